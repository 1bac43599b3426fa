//! Shared types for wasmbind.
//!
//! This crate defines the host-side value model and the export signature
//! metadata that both the guest emitter and the binding runtime agree on.

pub mod abi;
mod error;
pub mod signature;
pub mod value;

pub use error::ValueError;
pub use signature::{
    CallConvention, CoreType, ExportSignature, ParamKind, ReturnKind, SignatureTable,
    METADATA_VERSION,
};
pub use value::{Array, Scalar, ScalarKind, Value, ValueKind};

/// Result type used by value construction and signature validation.
pub type Result<T> = std::result::Result<T, ValueError>;
