//! Error types for gherkin-tdl
//!
//! Only conditions that stop the whole pipeline live here. Everything that is
//! local to a line or a step is reported as a [`crate::diagnostic::Diagnostic`].

use thiserror::Error;

/// Result type alias for gherkin-tdl operations
pub type Result<T> = std::result::Result<T, TdlError>;

/// Fatal error type for the conversion pipeline
#[derive(Error, Debug)]
pub enum TdlError {
    #[error("Failed to load catalog for locale '{locale}': {message}")]
    CatalogLoad { locale: String, message: String },

    #[error("Unknown data model: {0}")]
    UnknownModel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation service error: {0}")]
    ValidationService(String),
}

impl TdlError {
    pub(crate) fn catalog(locale: &str, message: impl Into<String>) -> Self {
        TdlError::CatalogLoad {
            locale: locale.to_string(),
            message: message.into(),
        }
    }

    /// True when the catalog could not be loaded; step expansion must not run.
    pub fn is_catalog_failure(&self) -> bool {
        matches!(self, TdlError::CatalogLoad { .. })
    }
}
