//! Binding configuration.
//!
//! Export and import names default to those of the reference module. All
//! fields are optional in YAML:
//!
//! ```yaml
//! exports:
//!   query: searchGames
//! imports:
//!   diagnostic_module: env
//! reserve_pages: 4
//! ```

use crate::error::{Result, TidepoolError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the module exports the binding calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    /// Linear memory.
    pub memory: String,
    /// `(size) -> handle`.
    pub allocate: String,
    /// `(handle, size)`.
    pub release: String,
    /// `(snapshot_slice)`.
    pub initialize: String,
    /// `()`, snapshot delivered through the diagnostic channel.
    pub persist: String,
    /// `(json_slice)`.
    pub upsert_primary: String,
    /// `(json_slice)`.
    pub upsert_secondary: String,
    /// `(id_query, filter_list)`.
    pub query: String,
    /// `() -> slice` or `()`.
    pub fetch_snapshot_json: String,
    /// `(raw_json) -> result_tuple`.
    pub convert: String,
    /// `(result_tuple, start, end) -> range_totals`.
    pub aggregate_range: String,
    /// Global holding the address of the result tuple's byte length.
    pub histogram_descriptor: String,
    /// Global holding the address of one trailing element's byte length.
    pub recommendation_descriptor: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            allocate: "alloc".to_string(),
            release: "dealloc".to_string(),
            initialize: "init".to_string(),
            persist: "persist".to_string(),
            upsert_primary: "updateGames".to_string(),
            upsert_secondary: "updateUsers".to_string(),
            query: "filterGames".to_string(),
            fetch_snapshot_json: "getFullJson".to_string(),
            convert: "convert".to_string(),
            aggregate_range: "accumulate".to_string(),
            histogram_descriptor: "BYTE_LENGTH_HISTOGRAM".to_string(),
            recommendation_descriptor: "BYTE_LENGTH_RECOMMENDATION".to_string(),
        }
    }
}

/// Names under which the host functions are linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportNames {
    /// Import module of the diagnostic channel.
    pub diagnostic_module: String,
    /// Import field of the diagnostic channel.
    pub diagnostic_field: String,
    /// Import module of the plain log function.
    pub log_module: String,
    /// Import field of the plain log function.
    pub log_field: String,
}

impl Default for ImportNames {
    fn default() -> Self {
        Self {
            diagnostic_module: "ctx".to_string(),
            diagnostic_field: "resolve".to_string(),
            log_module: "console".to_string(),
            log_field: "log".to_string(),
        }
    }
}

/// Configuration of a module binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Export names.
    pub exports: ExportNames,
    /// Import names.
    pub imports: ImportNames,
    /// Pages to grow the arena by right after instantiation.
    pub reserve_pages: u32,
}

impl BindingConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TidepoolError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| TidepoolError::YamlParse {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Set the export names.
    #[must_use]
    pub fn with_exports(mut self, exports: ExportNames) -> Self {
        self.exports = exports;
        self
    }

    /// Set the import names.
    #[must_use]
    pub fn with_imports(mut self, imports: ImportNames) -> Self {
        self.imports = imports;
        self
    }

    /// Set the number of pages reserved after instantiation.
    #[must_use]
    pub fn with_reserve_pages(mut self, pages: u32) -> Self {
        self.reserve_pages = pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_module() {
        let config = BindingConfig::default();
        assert_eq!(config.exports.allocate, "alloc");
        assert_eq!(config.exports.query, "filterGames");
        assert_eq!(config.imports.diagnostic_module, "ctx");
        assert_eq!(config.imports.log_field, "log");
        assert_eq!(config.reserve_pages, 0);
        assert_eq!(
            config.exports.recommendation_descriptor,
            "BYTE_LENGTH_RECOMMENDATION"
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = BindingConfig::from_yaml(
            "exports:\n  query: searchGames\nimports:\n  diagnostic_module: env\nreserve_pages: 4\n",
        )
        .unwrap();
        assert_eq!(config.exports.query, "searchGames");
        assert_eq!(config.exports.convert, "convert");
        assert_eq!(config.imports.diagnostic_module, "env");
        assert_eq!(config.imports.diagnostic_field, "resolve");
        assert_eq!(config.reserve_pages, 4);
    }

    #[test]
    fn builder() {
        let config = BindingConfig::default()
            .with_reserve_pages(2)
            .with_imports(ImportNames {
                log_module: "env".to_string(),
                ..ImportNames::default()
            });
        assert_eq!(config.reserve_pages, 2);
        assert_eq!(config.imports.log_module, "env");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reserve_pages: 3").unwrap();
        let config = BindingConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.reserve_pages, 3);
    }

    #[test]
    fn load_errors() {
        let err = BindingConfig::from_yaml_file(Path::new("/nonexistent/tidepool.yaml")).unwrap_err();
        assert_eq!(err.code(), "E901");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reserve_pages: [not, a, number]").unwrap();
        let err = BindingConfig::from_yaml_file(file.path()).unwrap_err();
        assert_eq!(err.code(), "E801");
    }
}
