use thiserror::Error;

use crate::value::ScalarKind;

/// Errors raised while building host values or validating signatures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// An array element did not match the array's declared element kind.
    #[error("array of {expected} cannot hold a {found} element at index {index}")]
    ElementKind {
        expected: ScalarKind,
        found: ScalarKind,
        index: usize,
    },

    /// An index was past the end of an array.
    #[error("index {index} out of range for array of length {len}")]
    Index { index: usize, len: usize },

    /// A signature is internally inconsistent.
    #[error("invalid signature for `{export}`: {reason}")]
    Signature { export: String, reason: String },
}
