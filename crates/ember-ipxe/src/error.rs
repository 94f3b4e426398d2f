//! Error types for script generation.

use thiserror::Error;

/// Error type for iPXE script generation
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A boot flavour string that is not one of the known five
    #[error("unknown boot flavour: {0}")]
    UnknownFlavor(String),

    /// A required parameter was empty for the selected flavour
    #[error("missing script parameter: {0}")]
    MissingParam(&'static str),
}

/// Result type for script generation
pub type Result<T> = std::result::Result<T, ScriptError>;
