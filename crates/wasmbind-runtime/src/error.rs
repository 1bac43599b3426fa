//! Binding error types.

use std::fmt;

use thiserror::Error;

use crate::instance::RawValue;

/// Errors surfaced by loading, instantiating and calling into a module.
#[derive(Debug, Error)]
pub enum BindError {
    /// The module bytes are not valid WebAssembly.
    #[error("failed to compile module: {0}")]
    Compile(String),

    /// The module could not be instantiated (e.g. unsatisfied imports).
    #[error("failed to instantiate module: {0}")]
    Instantiation(String),

    #[error("export not found: {0}")]
    ExportNotFound(String),

    /// Host arguments do not match the export's signature.
    #[error("argument mismatch calling `{export}`: {reason}")]
    ArgumentMismatch { export: String, reason: String },

    /// The guest trapped. Carries the raw arguments of the failing call.
    #[error("`{export}({})` trapped: {message}", RawArgs(args))]
    Trap {
        export: String,
        args: Vec<RawValue>,
        message: String,
    },

    /// A string or decimal result was not well formed.
    #[error("invalid result from `{export}`: {reason}")]
    Encoding { export: String, reason: String },

    /// The guest allocator could not serve a request.
    #[error("guest allocation of {requested} bytes failed: {reason}")]
    Allocation { requested: u32, reason: String },

    #[error("allocation #{id} at {ptr:#x} was already released")]
    DoubleFree { id: u64, ptr: u32 },

    /// A handle was used after a memory growth it was not refreshed across.
    #[error("allocation #{id} at {ptr:#x} is stale (epoch {handle_epoch}, memory at epoch {current_epoch})")]
    DanglingHandle {
        id: u64,
        ptr: u32,
        handle_epoch: u64,
        current_epoch: u64,
    },

    #[error("memory access out of bounds: {offset:#x}+{len} exceeds {memory_len} bytes")]
    OutOfBounds {
        offset: u64,
        len: u64,
        memory_len: usize,
    },

    /// A declared or derived signature does not fit the export's real type.
    #[error("invalid signature for `{export}`: {reason}")]
    InvalidSignature { export: String, reason: String },

    /// The signature custom section could not be read.
    #[error("invalid metadata section: {0}")]
    Metadata(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of a [`BindError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Compile,
    Instantiation,
    ExportNotFound,
    ArgumentMismatch,
    Trap,
    Encoding,
    Allocation,
    DoubleFree,
    DanglingHandle,
    OutOfBounds,
    InvalidSignature,
    Metadata,
    Config,
}

impl BindError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindError::Compile(_) => ErrorKind::Compile,
            BindError::Instantiation(_) => ErrorKind::Instantiation,
            BindError::ExportNotFound(_) => ErrorKind::ExportNotFound,
            BindError::ArgumentMismatch { .. } => ErrorKind::ArgumentMismatch,
            BindError::Trap { .. } => ErrorKind::Trap,
            BindError::Encoding { .. } => ErrorKind::Encoding,
            BindError::Allocation { .. } => ErrorKind::Allocation,
            BindError::DoubleFree { .. } => ErrorKind::DoubleFree,
            BindError::DanglingHandle { .. } => ErrorKind::DanglingHandle,
            BindError::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            BindError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            BindError::Metadata(_) => ErrorKind::Metadata,
            BindError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the instance should be discarded after this error.
    ///
    /// Traps may leave the guest heap half-updated; double frees and stale
    /// handles mean host bookkeeping no longer matches the guest.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Instantiation
                | ErrorKind::Trap
                | ErrorKind::DoubleFree
                | ErrorKind::DanglingHandle
        )
    }

    pub(crate) fn mismatch(export: &str, reason: impl Into<String>) -> Self {
        BindError::ArgumentMismatch {
            export: export.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn encoding(export: &str, reason: impl Into<String>) -> Self {
        BindError::Encoding {
            export: export.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn signature(export: &str, reason: impl Into<String>) -> Self {
        BindError::InvalidSignature {
            export: export.to_string(),
            reason: reason.into(),
        }
    }
}

struct RawArgs<'a>(&'a [RawValue]);

impl fmt::Display for RawArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

/// Binding result type alias.
pub type BindResult<T> = Result<T, BindError>;
