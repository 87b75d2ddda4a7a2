//! Query composition
//!
//! Turns a search-type selection and raw user input into one parameterized
//! `UNION ALL` statement. This is the only place statement text is
//! assembled: configuration supplies trusted fragments (source, projection,
//! filter) and user input only ever travels as a bound parameter.

use crate::error::{Error, Result};
use crate::registry::{SearchDefinition, SearchRegistry, placeholder_offsets};
use crate::row::ColumnRole;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// SQL dialect of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `?` placeholders, `REAL` coordinates
    #[default]
    Sqlite,
    /// `$n` placeholders, `DOUBLE PRECISION` coordinates
    Postgres,
}

impl Dialect {
    /// Infer the dialect from a connection URL
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(Error::Config(format!(
                "Unsupported database URL scheme '{}'. Use sqlite: or postgres:",
                scheme
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${}", index),
        }
    }

    /// Type every arm casts `role` to so that union arms line up
    fn cast_type(&self, role: ColumnRole) -> &'static str {
        match (self, role.is_numeric()) {
            (Self::Sqlite, true) => "REAL",
            (Self::Postgres, true) => "DOUBLE PRECISION",
            (_, false) => "TEXT",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameterized statement ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedQuery {
    /// Statement text containing one placeholder per parameter
    pub sql: String,
    /// Formatted input, one value per selected search type, in selection order
    pub params: Vec<String>,
    /// Selected search types, in selection order
    pub search_types: Vec<String>,
}

/// Builds union queries from registered search definitions
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryComposer {
    dialect: Dialect,
}

impl QueryComposer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compose the union query for `selected` over `raw_query`
    pub fn compose<S: AsRef<str>>(
        &self,
        registry: &SearchRegistry,
        selected: &[S],
        raw_query: &str,
    ) -> Result<ComposedQuery> {
        let definitions = resolve_selection(registry, selected)?;
        check_projections(&definitions)?;

        let mut arms = Vec::with_capacity(definitions.len());
        let mut params = Vec::with_capacity(definitions.len());

        for (index, definition) in definitions.iter().enumerate() {
            arms.push(self.arm(definition, index + 1)?);
            params.push(definition.format(raw_query));
        }

        let columns = ColumnRole::ALL
            .iter()
            .map(ColumnRole::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {columns} FROM ({arms}) AS results ORDER BY label, type, id",
            arms = arms.join(" UNION ALL ")
        );

        Ok(ComposedQuery {
            sql,
            params,
            search_types: definitions.iter().map(|d| d.name().to_string()).collect(),
        })
    }

    /// `SELECT <projection> FROM <source> WHERE (<filter>)` for one definition
    fn arm(&self, definition: &SearchDefinition, param_index: usize) -> Result<String> {
        let projection = ColumnRole::ALL
            .iter()
            .map(|role| {
                let expr = definition.column(*role).ok_or_else(|| {
                    Error::IncompatibleProjection(format!(
                        "'{}' does not project '{}'",
                        definition.name(),
                        role
                    ))
                })?;
                Ok(format!(
                    "CAST({} AS {}) AS {}",
                    expr,
                    self.dialect.cast_type(*role),
                    role
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let filter = definition.filter();
        let offset = placeholder_offsets(filter)
            .first()
            .copied()
            .ok_or_else(|| {
                Error::invalid_definition(definition.name(), "filter has no placeholder")
            })?;
        let filter = format!(
            "{}{}{}",
            &filter[..offset],
            self.dialect.placeholder(param_index),
            &filter[offset + 1..]
        );

        Ok(format!(
            "SELECT {} FROM {} WHERE ({})",
            projection,
            definition.source(),
            filter
        ))
    }
}

/// Resolve names in selection order, rejecting empty or repeated selections
fn resolve_selection<S: AsRef<str>>(
    registry: &SearchRegistry,
    selected: &[S],
) -> Result<Vec<Arc<SearchDefinition>>> {
    if selected.is_empty() {
        return Err(Error::InvalidSelection(
            "at least one search type is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    selected
        .iter()
        .map(|name| {
            let name = name.as_ref();
            if !seen.insert(name) {
                return Err(Error::InvalidSelection(format!(
                    "'{}' is selected more than once",
                    name
                )));
            }
            registry.lookup(name)
        })
        .collect()
}

/// Every definition must project the full contract, each role exactly once
fn check_projections(definitions: &[Arc<SearchDefinition>]) -> Result<()> {
    let Some(first) = definitions.first() else {
        return Ok(());
    };
    let first_shape = first.shape();

    for other in &definitions[1..] {
        if other.shape() != first_shape {
            return Err(Error::IncompatibleProjection(format!(
                "'{}' projects [{}] but '{}' projects [{}]",
                first.name(),
                describe(&first_shape),
                other.name(),
                describe(&other.shape())
            )));
        }
    }

    let mut contract = ColumnRole::ALL.to_vec();
    contract.sort();
    if first_shape != contract {
        return Err(Error::IncompatibleProjection(format!(
            "'{}' projects [{}], expected [{}]",
            first.name(),
            describe(&first_shape),
            describe(&contract)
        )));
    }
    Ok(())
}

fn describe(roles: &[ColumnRole]) -> String {
    roles
        .iter()
        .map(ColumnRole::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
