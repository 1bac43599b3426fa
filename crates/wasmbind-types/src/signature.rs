//! Export signatures and the metadata table embedded in guest modules.
//!
//! A guest module may carry a custom section (named `wasmbind` by default)
//! whose payload is the JSON form of a [`SignatureTable`]:
//!
//! ```json
//! {"version":1,"exports":[
//!   {"name":"count_booleans","params":[{"slice":"bool"}],"ret":{"scalar":"i32"}}
//! ]}
//! ```
//!
//! Each parameter and return kind lowers to a fixed list of core WASM types;
//! the runtime checks that lowering against the export's real function type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::value::ScalarKind;

/// Version written into, and required from, the metadata section.
pub const METADATA_VERSION: u32 = 1;

/// Core WASM number types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoreType::I32 => "i32",
            CoreType::I64 => "i64",
            CoreType::F32 => "f32",
            CoreType::F64 => "f64",
        })
    }
}

/// How one host argument crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Passed directly as a machine argument.
    Scalar(ScalarKind),
    /// `&[T]`: copied into a scratch buffer, freed after the call.
    Slice(ScalarKind),
    /// `&mut [T]`: copied in, mutated by the guest, copied back out.
    SliceMut(ScalarKind),
    /// `Vec<T>`: copied into an owned input buffer.
    Vec(ScalarKind),
    /// UTF-8 string as (ptr, byte length).
    Str,
}

impl ParamKind {
    /// Core types this parameter occupies in the raw export's parameter list.
    pub fn core_params(&self) -> &'static [CoreType] {
        match self {
            ParamKind::Scalar(k) => match k.core_type() {
                CoreType::I32 => &[CoreType::I32],
                CoreType::I64 => &[CoreType::I64],
                CoreType::F32 => &[CoreType::F32],
                CoreType::F64 => &[CoreType::F64],
            },
            ParamKind::Slice(_) | ParamKind::SliceMut(_) | ParamKind::Vec(_) | ParamKind::Str => {
                &[CoreType::I32, CoreType::I32]
            }
        }
    }

    /// Whether encoding this parameter needs a linear-memory allocation.
    pub fn needs_allocation(&self) -> bool {
        !matches!(self, ParamKind::Scalar(_))
    }

    /// Element kind of array parameters.
    pub fn element(&self) -> Option<ScalarKind> {
        match *self {
            ParamKind::Slice(k) | ParamKind::SliceMut(k) | ParamKind::Vec(k) => Some(k),
            ParamKind::Scalar(_) | ParamKind::Str => None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Scalar(k) => write!(f, "{k}"),
            ParamKind::Slice(k) => write!(f, "&[{k}]"),
            ParamKind::SliceMut(k) => write!(f, "&mut [{k}]"),
            ParamKind::Vec(k) => write!(f, "Vec<{k}>"),
            ParamKind::Str => f.write_str("String"),
        }
    }
}

/// What an export hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    #[default]
    Unit,
    Scalar(ScalarKind),
    /// Pointer to a `(ptr, len, cap)` descriptor of a fresh guest buffer.
    Vec(ScalarKind),
    /// Pointer to a `(ptr, len, cap)` descriptor of UTF-8 bytes.
    Str,
    /// Like `Str`, but the bytes are the decimal digits of a saturated integer.
    BigDecimal,
}

impl ReturnKind {
    pub fn core_results(&self) -> &'static [CoreType] {
        match self {
            ReturnKind::Unit => &[],
            ReturnKind::Scalar(k) => match k.core_type() {
                CoreType::I32 => &[CoreType::I32],
                CoreType::I64 => &[CoreType::I64],
                CoreType::F32 => &[CoreType::F32],
                CoreType::F64 => &[CoreType::F64],
            },
            ReturnKind::Vec(_) | ReturnKind::Str | ReturnKind::BigDecimal => &[CoreType::I32],
        }
    }

    /// Whether the result is returned through a guest-allocated descriptor.
    pub fn is_buffer(&self) -> bool {
        matches!(
            self,
            ReturnKind::Vec(_) | ReturnKind::Str | ReturnKind::BigDecimal
        )
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Unit => f.write_str("()"),
            ReturnKind::Scalar(k) => write!(f, "{k}"),
            ReturnKind::Vec(k) => write!(f, "Vec<{k}>"),
            ReturnKind::Str => f.write_str("String"),
            ReturnKind::BigDecimal => f.write_str("BigDecimal"),
        }
    }
}

/// Calling convention of a wrapped export, versioned per signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallConvention {
    /// Result is returned to the caller.
    #[default]
    Standard,
    /// Caller passes a pre-allocated output array as the trailing argument and
    /// the result is written into it instead of being returned.
    LegacyOutParam,
}

/// Declared signature of one wrapped export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSignature {
    /// Host-facing name (without the export prefix).
    pub name: String,
    pub params: Vec<ParamKind>,
    #[serde(default)]
    pub ret: ReturnKind,
    #[serde(default, skip_serializing_if = "is_standard")]
    pub convention: CallConvention,
}

fn is_standard(c: &CallConvention) -> bool {
    *c == CallConvention::Standard
}

impl ExportSignature {
    pub fn new(name: impl Into<String>, params: Vec<ParamKind>, ret: ReturnKind) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            convention: CallConvention::Standard,
        }
    }

    /// Mark this signature as using the legacy output-array convention.
    pub fn with_legacy_out_param(mut self) -> Self {
        self.convention = CallConvention::LegacyOutParam;
        self
    }

    pub fn is_legacy(&self) -> bool {
        self.convention == CallConvention::LegacyOutParam
    }

    /// Number of arguments the host caller must supply.
    pub fn host_arity(&self) -> usize {
        self.params.len() + usize::from(self.is_legacy())
    }

    /// Flattened core parameter types of the raw export.
    pub fn core_params(&self) -> Vec<CoreType> {
        self.params
            .iter()
            .flat_map(|p| p.core_params().iter().copied())
            .collect()
    }

    pub fn core_results(&self) -> Vec<CoreType> {
        self.ret.core_results().to_vec()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(ValueError::Signature {
                export: self.name.clone(),
                reason: "empty export name".to_string(),
            });
        }
        if self.is_legacy() && !matches!(self.ret, ReturnKind::Vec(_)) {
            return Err(ValueError::Signature {
                export: self.name.clone(),
                reason: format!(
                    "legacy output-array convention needs a Vec return, found {}",
                    self.ret
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ExportSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// The full metadata table carried by a guest module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTable {
    pub version: u32,
    pub exports: Vec<ExportSignature>,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureTable {
    pub fn new() -> Self {
        Self {
            version: METADATA_VERSION,
            exports: Vec::new(),
        }
    }

    pub fn push(&mut self, signature: ExportSignature) {
        self.exports.push(signature);
    }

    pub fn get(&self, name: &str) -> Option<&ExportSignature> {
        self.exports.iter().find(|s| s.name == name)
    }

    /// Serialize to JSON bytes for embedding in a WASM custom section.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from custom-section bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_json_shape() {
        let mut table = SignatureTable::new();
        table.push(ExportSignature::new(
            "count_booleans",
            vec![ParamKind::Slice(ScalarKind::Bool)],
            ReturnKind::Scalar(ScalarKind::I32),
        ));
        table.push(ExportSignature::new("hello_x", vec![ParamKind::Str], ReturnKind::Str));

        let json = String::from_utf8(table.to_json().unwrap()).unwrap();
        assert!(json.contains(r#"{"slice":"bool"}"#), "{json}");
        assert!(json.contains(r#""ret":"str""#), "{json}");
        assert!(!json.contains("convention"), "standard convention is omitted");

        let back = SignatureTable::from_json(json.as_bytes()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn missing_ret_defaults_to_unit() {
        let json = br#"{"version":1,"exports":[{"name":"product_in_place","params":[{"slice_mut":"u8"}]}]}"#;
        let table = SignatureTable::from_json(json).unwrap();
        let sig = table.get("product_in_place").unwrap();
        assert_eq!(sig.ret, ReturnKind::Unit);
        assert_eq!(sig.convention, CallConvention::Standard);
    }

    #[test]
    fn lowering_flattens_buffers_to_pointer_pairs() {
        let sig = ExportSignature::new(
            "mix",
            vec![
                ParamKind::Scalar(ScalarKind::F64),
                ParamKind::Vec(ScalarKind::U8),
                ParamKind::Scalar(ScalarKind::Bool),
            ],
            ReturnKind::Vec(ScalarKind::U8),
        );
        assert_eq!(
            sig.core_params(),
            vec![CoreType::F64, CoreType::I32, CoreType::I32, CoreType::I32]
        );
        assert_eq!(sig.core_results(), vec![CoreType::I32]);
    }

    #[test]
    fn legacy_requires_vec_return() {
        let ok = ExportSignature::new(
            "product_into",
            vec![ParamKind::Slice(ScalarKind::U8)],
            ReturnKind::Vec(ScalarKind::U8),
        )
        .with_legacy_out_param();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.host_arity(), 2);

        let bad = ExportSignature::new("sum_into", vec![], ReturnKind::Scalar(ScalarKind::I32))
            .with_legacy_out_param();
        assert!(bad.validate().is_err());
    }
}
