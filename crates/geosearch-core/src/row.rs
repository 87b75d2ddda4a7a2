//! Unified result rows and the output column contract
//!
//! Every search type, whatever its source tables look like, must produce the
//! same seven columns. [`ColumnRole`] names them and fixes their order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places kept on `lng`/`lat`
pub const COORDINATE_PRECISION: u32 = 4;

const COORDINATE_SCALE: f64 = 10_000.0;

/// One column of the output contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Id,
    Type,
    Label,
    Lng,
    Lat,
    Pid,
    Address,
}

impl ColumnRole {
    /// The contract, in output order
    pub const ALL: [ColumnRole; 7] = [
        Self::Id,
        Self::Type,
        Self::Label,
        Self::Lng,
        Self::Lat,
        Self::Pid,
        Self::Address,
    ];

    /// Column alias used in composed statements
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Type => "type",
            Self::Label => "label",
            Self::Lng => "lng",
            Self::Lat => "lat",
            Self::Pid => "pid",
            Self::Address => "address",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Lng | Self::Lat)
    }
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single search hit in the unified output shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub lng: f64,
    pub lat: f64,
    pub pid: Option<String>,
    pub address: Option<String>,
}

impl ResultRow {
    /// Build a row, rounding coordinates to the contract precision
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        label: impl Into<String>,
        lng: f64,
        lat: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            label: label.into(),
            lng: round_coordinate(lng),
            lat: round_coordinate(lat),
            pid: None,
            address: None,
        }
    }

    pub fn with_pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Raw row as decoded from the database, before normalization
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RawResultRow {
    id: String,
    #[sqlx(rename = "type")]
    kind: String,
    label: String,
    lng: f64,
    lat: f64,
    pid: Option<String>,
    address: Option<String>,
}

impl RawResultRow {
    pub(crate) fn into_result_row(self) -> ResultRow {
        ResultRow {
            id: self.id,
            kind: self.kind,
            label: self.label,
            lng: round_coordinate(self.lng),
            lat: round_coordinate(self.lat),
            pid: self.pid,
            address: self.address,
        }
    }
}

/// Round a coordinate to [`COORDINATE_PRECISION`] decimal places
pub fn round_coordinate(value: f64) -> f64 {
    (value * COORDINATE_SCALE).round() / COORDINATE_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decimal_places(value: f64) -> usize {
        let text = value.to_string();
        text.split_once('.').map_or(0, |(_, frac)| frac.len())
    }

    #[test]
    fn test_round_coordinate() {
        assert_eq!(round_coordinate(-80.843_127_9), -80.8431);
        assert_eq!(round_coordinate(35.227_085_5), 35.2271);
        assert_eq!(round_coordinate(12.0), 12.0);
    }

    #[test]
    fn test_rounded_coordinates_print_with_at_most_four_decimals() {
        let samples = [
            0.1,
            1.0 / 3.0,
            -80.843_127_912_34,
            35.999_999_9,
            179.123_45,
            -0.000_049,
            std::f64::consts::PI,
        ];
        for sample in samples {
            let rounded = round_coordinate(sample);
            assert!(
                decimal_places(rounded) <= 4,
                "{sample} rounded to {rounded}"
            );
        }
    }

    #[test]
    fn test_contract_order() {
        let names: Vec<_> = ColumnRole::ALL.iter().map(ColumnRole::as_str).collect();
        assert_eq!(
            names,
            vec!["id", "type", "label", "lng", "lat", "pid", "address"]
        );
        assert!(ColumnRole::Lat.is_numeric());
        assert!(!ColumnRole::Pid.is_numeric());
    }

    #[test]
    fn test_result_row_serializes_in_contract_order() {
        let row = ResultRow::new("7", "PARK", "Freedom Park", -80.851_234_9, 35.196_11)
            .with_pid("15303101")
            .with_address("1900 East Blvd");

        let json = serde_json::to_string(&row).expect("Should serialize");
        assert_eq!(
            json,
            r#"{"id":"7","type":"PARK","label":"Freedom Park","lng":-80.8512,"lat":35.1961,"pid":"15303101","address":"1900 East Blvd"}"#
        );
    }
}
