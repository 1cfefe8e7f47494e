//! Layer configuration loading and validation
//!
//! A configuration is validated before any host interaction. Every field the
//! layer exposes (the field list, the label field, and `$field` references in
//! declared variable expressions) must be selected by the query, otherwise the
//! configuration is rejected with [`SqlLayerError::ConfigurationError`].

mod types;

pub use types::*;

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use crate::{Result, SqlLayerError};

/// Variable names used internally by the compiled program
pub const RESERVED_VARIABLES: &[&str] = &["v_features", "v_labels"];

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"))
}

fn field_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid reference regex"))
}

/// Check whether `query` mentions `field` as a whole word
pub fn query_selects(query: &str, field: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(field));
    Regex::new(&pattern)
        .map(|re| re.is_match(query))
        .unwrap_or(false)
}

/// Field names referenced as `$field` in an expression, in order of appearance
pub fn referenced_fields(expression: &str) -> Vec<&str> {
    field_reference_regex()
        .captures_iter(expression)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect()
}

impl LayerConfiguration {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            SqlLayerError::ConfigurationError(format!("Invalid layer configuration: {}", e))
        })
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SqlLayerError::ConfigurationError(format!(
                "Could not read configuration '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Validate the configuration invariants
    ///
    /// # Errors
    ///
    /// Returns `SqlLayerError::ConfigurationError` if:
    /// - The layer name is empty
    /// - `minzoom` is greater than `maxzoom`
    /// - A field, the label field, or a `$field` in a variable expression is
    ///   not selected by the query
    /// - A variable name is not an identifier, is reserved, or is declared twice
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SqlLayerError::ConfigurationError(
                "The layer 'name' must not be empty".to_string(),
            ));
        }

        if self.minzoom > self.maxzoom {
            return Err(SqlLayerError::ConfigurationError(format!(
                "'minzoom' ({}) must not be greater than 'maxzoom' ({})",
                format_number(self.minzoom),
                format_number(self.maxzoom)
            )));
        }

        if let Some(fields) = &self.fields {
            for field in fields {
                self.require_field(field, "fields")?;
            }
        }

        if let Some(field) = self.label_field() {
            self.require_field(field, "labels")?;
        }

        let mut seen = HashSet::new();
        for (kind, variable) in self.variables() {
            if !identifier_regex().is_match(&variable.name) {
                return Err(SqlLayerError::ConfigurationError(format!(
                    "Invalid {} variable name '{}'",
                    kind, variable.name
                )));
            }
            if RESERVED_VARIABLES.contains(&variable.name.as_str()) {
                return Err(SqlLayerError::ConfigurationError(format!(
                    "Variable name '{}' is reserved",
                    variable.name
                )));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(SqlLayerError::ConfigurationError(format!(
                    "Variable '{}' is declared more than once",
                    variable.name
                )));
            }
            for field in referenced_fields(&variable.expression) {
                self.require_field(field, &format!("variable '{}'", variable.name))?;
            }
        }

        Ok(())
    }

    fn require_field(&self, field: &str, origin: &str) -> Result<()> {
        if !identifier_regex().is_match(field) {
            return Err(SqlLayerError::ConfigurationError(format!(
                "Invalid field name '{}' in {}",
                field, origin
            )));
        }
        if !query_selects(&self.query, field) {
            return Err(SqlLayerError::ConfigurationError(format!(
                "The 'query' must include every field used by {}. Missing field: {}",
                origin, field
            )));
        }
        Ok(())
    }
}
