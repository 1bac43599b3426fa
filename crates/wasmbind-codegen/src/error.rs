//! Codegen error types.

use thiserror::Error;

/// Errors that can occur while assembling a guest module.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A declared signature is internally inconsistent.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] wasmbind_types::ValueError),

    /// Two exports were registered under the same name.
    #[error("duplicate export: {0}")]
    DuplicateExport(String),

    /// The signature table could not be serialized.
    #[error("failed to encode signature metadata: {0}")]
    Metadata(String),

    /// The generated WASM module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),

    /// Static data or memory limits were exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
