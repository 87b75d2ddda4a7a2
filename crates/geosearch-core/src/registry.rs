//! Search registry
//!
//! Holds the search definitions loaded from configuration. The registry is
//! built once, validated on load and never mutated afterwards; a reload
//! builds a fresh registry and swaps it in as a whole.

use crate::config::SearchSettings;
use crate::error::{Error, Result};
use crate::formatter::{FormatterCatalog, QueryFormatter};
use crate::row::ColumnRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Placeholder marking where the formatted query is bound in a filter
pub const PLACEHOLDER: char = '?';

/// One output column of a search definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionColumn {
    /// Which contract column this expression produces
    pub role: ColumnRole,
    /// SQL expression evaluated against the definition's source
    pub expr: String,
}

impl ProjectionColumn {
    pub fn new(role: ColumnRole, expr: impl Into<String>) -> Self {
        Self {
            role,
            expr: expr.into(),
        }
    }
}

/// A named, queryable category (address, park, ...)
#[derive(Debug, Clone)]
pub struct SearchDefinition {
    name: String,
    source: String,
    projection: Vec<ProjectionColumn>,
    filter: String,
    formatter: Arc<dyn QueryFormatter>,
}

impl SearchDefinition {
    /// Create a definition with an empty projection
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        filter: impl Into<String>,
        formatter: Arc<dyn QueryFormatter>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            projection: Vec::new(),
            filter: filter.into(),
            formatter,
        }
    }

    /// Append a projected column
    pub fn with_column(mut self, role: ColumnRole, expr: impl Into<String>) -> Self {
        self.projection.push(ProjectionColumn::new(role, expr));
        self
    }

    /// Replace the whole projection
    pub fn with_projection(mut self, projection: Vec<ProjectionColumn>) -> Self {
        self.projection = projection;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn projection(&self) -> &[ProjectionColumn] {
        &self.projection
    }

    pub fn formatter(&self) -> &dyn QueryFormatter {
        self.formatter.as_ref()
    }

    /// Format raw input with this definition's policy
    pub fn format(&self, raw: &str) -> String {
        self.formatter.format(raw)
    }

    /// Expression projected for `role`, if any
    pub fn column(&self, role: ColumnRole) -> Option<&str> {
        self.projection
            .iter()
            .find(|column| column.role == role)
            .map(|column| column.expr.as_str())
    }

    /// Sorted roles produced by the projection, duplicates included
    pub fn shape(&self) -> Vec<ColumnRole> {
        let mut roles: Vec<ColumnRole> = self.projection.iter().map(|c| c.role).collect();
        roles.sort();
        roles
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_definition(&self.name, "name must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(Error::invalid_definition(&self.name, "source must not be empty"));
        }
        if self.projection.is_empty() {
            return Err(Error::invalid_definition(
                &self.name,
                "projection must not be empty",
            ));
        }
        if let Some(column) = self.projection.iter().find(|c| c.expr.trim().is_empty()) {
            return Err(Error::invalid_definition(
                &self.name,
                format!("projection expression for '{}' is empty", column.role),
            ));
        }

        let placeholders = count_placeholders(&self.filter);
        if placeholders != 1 {
            return Err(Error::invalid_definition(
                &self.name,
                format!(
                    "filter must contain exactly one '{}' placeholder, found {}",
                    PLACEHOLDER, placeholders
                ),
            ));
        }
        Ok(())
    }
}

/// Count placeholders outside quoted literals and identifiers
pub fn count_placeholders(fragment: &str) -> usize {
    placeholder_offsets(fragment).len()
}

/// Byte offsets of placeholders outside quoted literals and identifiers
pub(crate) fn placeholder_offsets(fragment: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut quote: Option<char> = None;

    for (offset, ch) in fragment.char_indices() {
        match quote {
            // a doubled quote closes and reopens, which nets out
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == PLACEHOLDER => offsets.push(offset),
            None => {}
        }
    }
    offsets
}

/// Immutable mapping from search-type name to definition
#[derive(Debug, Clone, Default)]
pub struct SearchRegistry {
    definitions: BTreeMap<String, Arc<SearchDefinition>>,
}

impl SearchRegistry {
    /// Validate and register a set of definitions
    pub fn register(definitions: impl IntoIterator<Item = SearchDefinition>) -> Result<Self> {
        let mut registry = BTreeMap::new();

        for definition in definitions {
            definition.validate()?;
            let name = definition.name.clone();
            if registry.contains_key(&name) {
                return Err(Error::invalid_definition(name, "duplicate search type"));
            }
            registry.insert(name, Arc::new(definition));
        }

        debug!(search_types = registry.len(), "Search registry loaded");
        Ok(Self {
            definitions: registry,
        })
    }

    /// Build a registry from configuration, resolving formatter names
    pub fn from_settings(
        searches: &BTreeMap<String, SearchSettings>,
        catalog: &FormatterCatalog,
    ) -> Result<Self> {
        let definitions = searches
            .iter()
            .map(|(name, settings)| {
                let formatter = catalog.get(&settings.formatter)?;
                Ok(SearchDefinition::new(
                    name.clone(),
                    settings.source.clone(),
                    settings.filter.clone(),
                    formatter,
                )
                .with_projection(settings.projection.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::register(definitions)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<SearchDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSearchType(name.to_string()))
    }

    /// Registered names in lexicographic order
    pub fn all(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
