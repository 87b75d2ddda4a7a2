//! Query formatting policies
//!
//! A formatter turns the raw user query into the value bound at a search
//! definition's filter placeholder. Formatters are pure and total: they never
//! fail and never escape SQL. Their output is always bound as a parameter.
//!
//! Policies are looked up by name from a [`FormatterCatalog`]. Adding a policy
//! means registering another [`QueryFormatter`] in the catalog; the composer
//! never needs to know about it.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the tokenized full-text policy
pub const TOKENIZED_FULL_TEXT: &str = "tokenized_full_text";
/// Name of the fuzzy wildcard policy
pub const FUZZY_WILDCARD: &str = "fuzzy_wildcard";
/// Name of the exact policy
pub const EXACT: &str = "exact";

/// A pure transformation from raw query text to a bound value
pub trait QueryFormatter: Send + Sync + fmt::Debug {
    /// Name used to reference this policy from configuration
    fn name(&self) -> &str;

    /// Format raw user input. Must not panic for any input.
    fn format(&self, raw: &str) -> String;
}

/// Uppercase and join tokens for a full-text prefix query
///
/// `"main st"` becomes `"MAIN&ST:*"`, suitable for PostgreSQL `to_tsquery`.
#[derive(Debug, Clone)]
pub struct TokenizedFullText {
    join: String,
    suffix: String,
}

impl TokenizedFullText {
    pub fn new(join: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            join: join.into(),
            suffix: suffix.into(),
        }
    }
}

impl Default for TokenizedFullText {
    fn default() -> Self {
        Self::new("&", ":*")
    }
}

impl QueryFormatter for TokenizedFullText {
    fn name(&self) -> &str {
        TOKENIZED_FULL_TEXT
    }

    fn format(&self, raw: &str) -> String {
        let tokens: Vec<String> = raw.split_whitespace().map(str::to_uppercase).collect();
        if tokens.is_empty() {
            return String::new();
        }
        format!("{}{}", tokens.join(&self.join), self.suffix)
    }
}

/// Wrap the trimmed input in wildcards for a substring match
#[derive(Debug, Clone)]
pub struct FuzzyWildcard {
    wildcard: char,
}

impl FuzzyWildcard {
    pub fn new(wildcard: char) -> Self {
        Self { wildcard }
    }
}

impl Default for FuzzyWildcard {
    fn default() -> Self {
        Self::new('%')
    }
}

impl QueryFormatter for FuzzyWildcard {
    fn name(&self) -> &str {
        FUZZY_WILDCARD
    }

    fn format(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        format!("{w}{trimmed}{w}", w = self.wildcard)
    }
}

/// Trim only
#[derive(Debug, Clone, Copy, Default)]
pub struct Exact;

impl QueryFormatter for Exact {
    fn name(&self) -> &str {
        EXACT
    }

    fn format(&self, raw: &str) -> String {
        raw.trim().to_string()
    }
}

/// Named formatting policies available to search definitions
#[derive(Debug, Clone)]
pub struct FormatterCatalog {
    formatters: BTreeMap<String, Arc<dyn QueryFormatter>>,
}

impl FormatterCatalog {
    /// An empty catalog
    pub fn empty() -> Self {
        Self {
            formatters: BTreeMap::new(),
        }
    }

    /// A catalog holding the built-in policies
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(Arc::new(TokenizedFullText::default()));
        catalog.register(Arc::new(FuzzyWildcard::default()));
        catalog.register(Arc::new(Exact));
        catalog
    }

    /// Add or replace a policy under its own name
    pub fn register(&mut self, formatter: Arc<dyn QueryFormatter>) -> &mut Self {
        self.formatters
            .insert(formatter.name().to_string(), formatter);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn QueryFormatter>> {
        self.formatters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFormatter(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.formatters.keys().map(String::as_str).collect()
    }
}

impl Default for FormatterCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
