//! Host-side value model.
//!
//! A [`Value`] is what callers hand to and receive from the dispatcher.
//! Arrays are homogeneous: every element of an [`Array`] has the array's
//! [`ScalarKind`], which fixes its byte width in linear memory.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::signature::CoreType;

// ══════════════════════════════════════════════════════════════════════════════
// Scalar kinds
// ══════════════════════════════════════════════════════════════════════════════

/// Fixed-width element kinds that can cross the boundary by copy.
///
/// `usize`/`isize` on the guest side are 32-bit and map to `U32`/`I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarKind {
    /// Size in bytes of one element in linear memory.
    ///
    /// Not `std::mem::size_of`: this is the wasm32 layout, not the host's.
    pub const fn width(self) -> u32 {
        match self {
            ScalarKind::Bool | ScalarKind::U8 | ScalarKind::I8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::F64 => 8,
        }
    }

    /// Core WASM type used when this kind is passed as a machine argument.
    pub const fn core_type(self) -> CoreType {
        match self {
            ScalarKind::I64 => CoreType::I64,
            ScalarKind::F32 => CoreType::F32,
            ScalarKind::F64 => CoreType::F64,
            _ => CoreType::I32,
        }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, ScalarKind::Bool | ScalarKind::F32 | ScalarKind::F64)
    }

    /// Inclusive range representable by an integer kind.
    pub const fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            ScalarKind::U8 => Some((0, u8::MAX as i64)),
            ScalarKind::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            ScalarKind::U16 => Some((0, u16::MAX as i64)),
            ScalarKind::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ScalarKind::U32 => Some((0, u32::MAX as i64)),
            ScalarKind::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ScalarKind::I64 => Some((i64::MIN, i64::MAX)),
            ScalarKind::Bool | ScalarKind::F32 | ScalarKind::F64 => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::U8 => "u8",
            ScalarKind::I8 => "i8",
            ScalarKind::U16 => "u16",
            ScalarKind::I16 => "i16",
            ScalarKind::U32 => "u32",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Scalars
// ══════════════════════════════════════════════════════════════════════════════

/// A single fixed-width element, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::U8(_) => ScalarKind::U8,
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::U16(_) => ScalarKind::U16,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::I64(_) => ScalarKind::I64,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }

    /// Integer value of an integer scalar, widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Scalar::U8(v) => Some(v as i64),
            Scalar::I8(v) => Some(v as i64),
            Scalar::U16(v) => Some(v as i64),
            Scalar::I16(v) => Some(v as i64),
            Scalar::U32(v) => Some(v as i64),
            Scalar::I32(v) => Some(v as i64),
            Scalar::I64(v) => Some(v),
            Scalar::Bool(_) | Scalar::F32(_) | Scalar::F64(_) => None,
        }
    }

    /// Narrow an integer into `kind`, or `None` if it is out of range.
    pub fn from_i64(kind: ScalarKind, v: i64) -> Option<Scalar> {
        let (lo, hi) = kind.integer_range()?;
        if v < lo || v > hi {
            return None;
        }
        Some(match kind {
            ScalarKind::U8 => Scalar::U8(v as u8),
            ScalarKind::I8 => Scalar::I8(v as i8),
            ScalarKind::U16 => Scalar::U16(v as u16),
            ScalarKind::I16 => Scalar::I16(v as i16),
            ScalarKind::U32 => Scalar::U32(v as u32),
            ScalarKind::I32 => Scalar::I32(v as i32),
            ScalarKind::I64 => Scalar::I64(v),
            ScalarKind::Bool | ScalarKind::F32 | ScalarKind::F64 => return None,
        })
    }

    /// Convert into the corresponding host [`Value`].
    ///
    /// Narrow integers widen to `I32`; `U32` widens to `I64` so values above
    /// `i32::MAX` stay exact.
    pub fn into_value(self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::U8(v) => Value::I32(v as i32),
            Scalar::I8(v) => Value::I32(v as i32),
            Scalar::U16(v) => Value::I32(v as i32),
            Scalar::I16(v) => Value::I32(v as i32),
            Scalar::U32(v) => Value::I64(v as i64),
            Scalar::I32(v) => Value::I32(v),
            Scalar::I64(v) => Value::I64(v),
            Scalar::F32(v) => Value::F32(v),
            Scalar::F64(v) => Value::F64(v),
        }
    }

    /// Coerce a host value into a scalar of `kind`.
    ///
    /// Integer kinds accept any integer value that fits; floats and bools
    /// only accept their own variant.
    pub fn from_value(kind: ScalarKind, value: &Value) -> Option<Scalar> {
        match (kind, value) {
            (ScalarKind::Bool, Value::Bool(b)) => Some(Scalar::Bool(*b)),
            (ScalarKind::F32, Value::F32(v)) => Some(Scalar::F32(*v)),
            (ScalarKind::F64, Value::F64(v)) => Some(Scalar::F64(*v)),
            (k, Value::I32(v)) if k.is_integer() => Scalar::from_i64(k, *v as i64),
            (k, Value::I64(v)) if k.is_integer() => Scalar::from_i64(k, *v),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Arrays
// ══════════════════════════════════════════════════════════════════════════════

/// A homogeneous, ordered sequence of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    kind: ScalarKind,
    items: Vec<Scalar>,
}

impl Array {
    /// An empty array of `kind`.
    pub fn new(kind: ScalarKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    /// Build an array, checking that every element has `kind`.
    pub fn from_scalars(kind: ScalarKind, items: Vec<Scalar>) -> crate::Result<Self> {
        if let Some((index, bad)) = items.iter().enumerate().find(|(_, s)| s.kind() != kind) {
            return Err(ValueError::ElementKind {
                expected: kind,
                found: bad.kind(),
                index,
            });
        }
        Ok(Self { kind, items })
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total size of the encoded payload in bytes.
    pub fn byte_len(&self) -> usize {
        self.items.len() * self.kind.width() as usize
    }

    pub fn items(&self) -> &[Scalar] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        self.items.get(index).copied()
    }

    pub fn push(&mut self, item: Scalar) -> crate::Result<()> {
        if item.kind() != self.kind {
            return Err(ValueError::ElementKind {
                expected: self.kind,
                found: item.kind(),
                index: self.items.len(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// Overwrite element `index` in place.
    pub fn set(&mut self, index: usize, item: Scalar) -> crate::Result<()> {
        if item.kind() != self.kind {
            return Err(ValueError::ElementKind {
                expected: self.kind,
                found: item.kind(),
                index,
            });
        }
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(ValueError::Index { index, len })?;
        *slot = item;
        Ok(())
    }

    /// Replace the whole contents with `other`, which must have the same kind.
    pub fn assign(&mut self, other: Array) -> crate::Result<()> {
        if other.kind != self.kind {
            return Err(ValueError::ElementKind {
                expected: self.kind,
                found: other.kind,
                index: 0,
            });
        }
        self.items = other.items;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scalar> {
        self.items.iter()
    }
}

macro_rules! array_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Array {
                fn from(items: Vec<$ty>) -> Self {
                    Array {
                        kind: ScalarKind::$variant,
                        items: items.into_iter().map(Scalar::$variant).collect(),
                    }
                }
            }

            impl From<&[$ty]> for Array {
                fn from(items: &[$ty]) -> Self {
                    Array::from(items.to_vec())
                }
            }
        )*
    };
}

array_from_vec! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str("]")
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Values
// ══════════════════════════════════════════════════════════════════════════════

/// A host value crossing a call boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Returned by exports with no result.
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Array(Array),
    /// Decimal digits of an integer too large for a native host integer.
    BigDecimal(String),
}

/// The kind of a [`Value`], used for argument validation and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unit,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8String,
    ArrayOf(ScalarKind),
    BigDecimalString,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::I32(_) => ValueKind::Int32,
            Value::I64(_) => ValueKind::Int64,
            Value::F32(_) => ValueKind::Float32,
            Value::F64(_) => ValueKind::Float64,
            Value::Str(_) => ValueKind::Utf8String,
            Value::Array(a) => ValueKind::ArrayOf(a.kind()),
            Value::BigDecimal(_) => ValueKind::BigDecimalString,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::BigDecimal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Unit => f.write_str("unit"),
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Int32 => f.write_str("i32"),
            ValueKind::Int64 => f.write_str("i64"),
            ValueKind::Float32 => f.write_str("f32"),
            ValueKind::Float64 => f.write_str("f64"),
            ValueKind::Utf8String => f.write_str("string"),
            ValueKind::ArrayOf(k) => write!(f, "[{k}]"),
            ValueKind::BigDecimalString => f.write_str("big decimal"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(a) => write!(f, "{a}"),
            Value::BigDecimal(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}
