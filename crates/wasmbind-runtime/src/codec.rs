//! Type-directed encoding of host values into guest memory and back.
//!
//! Scalars travel as machine arguments. Arrays and strings are copied into an
//! owned guest buffer and passed as `(ptr, count)`; strings count bytes.
//! Buffer results come back as a pointer to a `(ptr, len, cap)` descriptor,
//! and both the descriptor and the data it points at are adopted so they are
//! freed with the rest of the call's allocations.
//!
//! Every write goes through a view acquired after the allocation it targets;
//! no view outlives a step that may grow memory.

use tracing::trace;
use wasmbind_types::abi::{DESCRIPTOR_CAP, DESCRIPTOR_LEN, DESCRIPTOR_PTR, DESCRIPTOR_SIZE};
use wasmbind_types::{Array, ParamKind, ReturnKind, Scalar, ScalarKind, Value};

use crate::alloc::{AllocationHandle, AllocationManager};
use crate::config::AccessStyle;
use crate::dispatcher::Arg;
use crate::error::{BindError, BindResult};
use crate::instance::{Instance, RawValue};

/// One encoded parameter.
#[derive(Debug)]
pub struct Encoded {
    /// Machine arguments for the raw export.
    pub raw: Vec<RawValue>,
    /// The guest buffer backing an array or string argument.
    pub handle: Option<AllocationHandle>,
}

/// Encoder/decoder bound to one memory access style.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    style: AccessStyle,
}

impl ValueCodec {
    pub fn new(style: AccessStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> AccessStyle {
        self.style
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Scalars
    // ══════════════════════════════════════════════════════════════════════════

    /// Lower a scalar to its machine argument. Bools become 0/1 and narrow
    /// integers widen to i32 by zero or sign extension.
    pub fn lower_scalar(value: Scalar) -> RawValue {
        match value {
            Scalar::Bool(v) => RawValue::I32(i32::from(v)),
            Scalar::U8(v) => RawValue::I32(v as i32),
            Scalar::I8(v) => RawValue::I32(v as i32),
            Scalar::U16(v) => RawValue::I32(v as i32),
            Scalar::I16(v) => RawValue::I32(v as i32),
            Scalar::U32(v) => RawValue::I32(v as i32),
            Scalar::I32(v) => RawValue::I32(v),
            Scalar::I64(v) => RawValue::I64(v),
            Scalar::F32(v) => RawValue::F32(v),
            Scalar::F64(v) => RawValue::F64(v),
        }
    }

    /// Lift a machine result into a scalar of `kind`, narrowing with a range
    /// check.
    pub fn lift_scalar(export: &str, kind: ScalarKind, raw: RawValue) -> BindResult<Scalar> {
        let out_of_range =
            |v: i32| BindError::encoding(export, format!("{v} is out of range for {kind}"));
        let scalar = match (kind, raw) {
            (ScalarKind::Bool, RawValue::I32(v)) => Scalar::Bool(v != 0),
            (ScalarKind::U8, RawValue::I32(v)) => {
                Scalar::U8(u8::try_from(v).map_err(|_| out_of_range(v))?)
            }
            (ScalarKind::I8, RawValue::I32(v)) => {
                Scalar::I8(i8::try_from(v).map_err(|_| out_of_range(v))?)
            }
            (ScalarKind::U16, RawValue::I32(v)) => {
                Scalar::U16(u16::try_from(v).map_err(|_| out_of_range(v))?)
            }
            (ScalarKind::I16, RawValue::I32(v)) => {
                Scalar::I16(i16::try_from(v).map_err(|_| out_of_range(v))?)
            }
            (ScalarKind::U32, RawValue::I32(v)) => Scalar::U32(v as u32),
            (ScalarKind::I32, RawValue::I32(v)) => Scalar::I32(v),
            (ScalarKind::I64, RawValue::I64(v)) => Scalar::I64(v),
            (ScalarKind::F32, RawValue::F32(v)) => Scalar::F32(v),
            (ScalarKind::F64, RawValue::F64(v)) => Scalar::F64(v),
            (kind, raw) => {
                return Err(BindError::encoding(
                    export,
                    format!("expected a {} result for {kind}, got {raw}", kind.core_type()),
                ))
            }
        };
        Ok(scalar)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Parameters
    // ══════════════════════════════════════════════════════════════════════════

    /// Check one host argument against its parameter kind without touching
    /// the guest.
    pub fn check_arg(export: &str, index: usize, param: ParamKind, arg: &Arg<'_>) -> BindResult<()> {
        let mismatch = |found: String| {
            BindError::mismatch(
                export,
                format!("argument {index}: expected {param}, got {found}"),
            )
        };
        match (param, arg) {
            (ParamKind::Scalar(kind), Arg::In(value)) => {
                Scalar::from_value(kind, value).ok_or_else(|| mismatch(value.to_string()))?;
            }
            (ParamKind::Str, Arg::In(Value::Str(_))) => {}
            (ParamKind::Slice(kind), _)
            | (ParamKind::SliceMut(kind), Arg::InOut(_))
            | (ParamKind::Vec(kind), Arg::In(_)) => match arg.as_array() {
                Some(array) if array.kind() == kind => {}
                Some(array) => return Err(mismatch(format!("an array of {}", array.kind()))),
                None => return Err(mismatch(arg.describe())),
            },
            _ => return Err(mismatch(arg.describe())),
        }
        Ok(())
    }

    /// Encode one checked argument, allocating its guest buffer if needed.
    pub fn encode_param(
        &self,
        export: &str,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        param: ParamKind,
        arg: &Arg<'_>,
    ) -> BindResult<Encoded> {
        match (param, arg) {
            (ParamKind::Scalar(kind), Arg::In(value)) => {
                let scalar = Scalar::from_value(kind, value).ok_or_else(|| {
                    BindError::mismatch(export, format!("expected {kind}, got {}", value.kind()))
                })?;
                Ok(Encoded {
                    raw: vec![Self::lower_scalar(scalar)],
                    handle: None,
                })
            }
            (ParamKind::Str, Arg::In(Value::Str(s))) => {
                let handle = self.copy_in(instance, allocs, s.as_bytes())?;
                Ok(Encoded {
                    raw: pointer_pair(handle.ptr(), handle.len()),
                    handle: Some(handle),
                })
            }
            (param, arg) => {
                let array = arg.as_array().ok_or_else(|| {
                    BindError::mismatch(export, format!("expected {param}, got {}", arg.describe()))
                })?;
                let handle = self.encode_array(instance, allocs, array)?;
                Ok(Encoded {
                    raw: pointer_pair(handle.ptr(), array.len() as u32),
                    handle: Some(handle),
                })
            }
        }
    }

    fn encode_array(
        &self,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        array: &Array,
    ) -> BindResult<AllocationHandle> {
        let byte_len = buffer_len(array.len() as u64, array.kind().width())?;
        let handle = self.allocate_checked(instance, allocs, byte_len)?;

        let width = array.kind().width();
        let mut view = instance.view(self.style);
        for (i, item) in array.iter().enumerate() {
            view.write_scalar(handle.ptr() + i as u32 * width, *item)?;
        }
        trace!(ptr = handle.ptr(), count = array.len(), kind = %array.kind(), "encoded array");
        Ok(handle)
    }

    fn copy_in(
        &self,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        bytes: &[u8],
    ) -> BindResult<AllocationHandle> {
        let byte_len = buffer_len(bytes.len() as u64, 1)?;
        let handle = self.allocate_checked(instance, allocs, byte_len)?;
        instance.view(self.style).write_bytes(handle.ptr(), bytes)?;
        Ok(handle)
    }

    /// Allocate and make sure the region really covers the buffer.
    fn allocate_checked(
        &self,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        byte_len: u32,
    ) -> BindResult<AllocationHandle> {
        let handle = allocs.allocate(instance, byte_len)?;
        let grew = instance.view(self.style).ensure_capacity(handle.end())?;
        if grew {
            return allocs.refresh(instance, handle);
        }
        Ok(handle)
    }

    /// Copy a mutated in-place buffer back into the caller's array, keeping
    /// its length.
    pub fn write_back(
        &self,
        export: &str,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        handle: AllocationHandle,
        target: &mut Array,
    ) -> BindResult<()> {
        let handle = allocs.refresh(instance, handle)?;
        let kind = target.kind();
        let width = kind.width();
        let view = instance.view(self.style);
        for i in 0..target.len() {
            let item = view.read_scalar(handle.ptr() + i as u32 * width, kind)?;
            target
                .set(i, item)
                .map_err(|e| BindError::encoding(export, e.to_string()))?;
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Results
    // ══════════════════════════════════════════════════════════════════════════

    /// Decode the raw results of `export` according to `ret`.
    ///
    /// Buffer results are adopted into `allocs` before they are read, so they
    /// are freed even when decoding fails.
    pub fn decode_result(
        &self,
        export: &str,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        ret: ReturnKind,
        raw: &[RawValue],
    ) -> BindResult<Value> {
        let first = || {
            raw.first()
                .copied()
                .ok_or_else(|| BindError::encoding(export, format!("no result for {ret}")))
        };
        match ret {
            ReturnKind::Unit => Ok(Value::Unit),
            ReturnKind::Scalar(kind) => Ok(Self::lift_scalar(export, kind, first()?)?.into_value()),
            ReturnKind::Vec(kind) => {
                let (handle, len) = self.adopt_buffer(export, instance, allocs, first()?, kind.width())?;
                let view = instance.view(self.style);
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    items.push(view.read_scalar(handle.ptr() + i * kind.width(), kind)?);
                }
                let array = Array::from_scalars(kind, items)
                    .map_err(|e| BindError::encoding(export, e.to_string()))?;
                Ok(Value::Array(array))
            }
            ReturnKind::Str => {
                let text = self.read_utf8(export, instance, allocs, first()?)?;
                Ok(Value::Str(text))
            }
            ReturnKind::BigDecimal => {
                let text = self.read_utf8(export, instance, allocs, first()?)?;
                if !is_decimal(&text) {
                    return Err(BindError::encoding(
                        export,
                        format!("{text:?} is not a decimal integer"),
                    ));
                }
                Ok(Value::BigDecimal(text))
            }
        }
    }

    fn read_utf8(
        &self,
        export: &str,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        raw: RawValue,
    ) -> BindResult<String> {
        let (handle, len) = self.adopt_buffer(export, instance, allocs, raw, 1)?;
        let bytes = instance.view(self.style).read_bytes(handle.ptr(), len)?;
        String::from_utf8(bytes).map_err(|e| BindError::encoding(export, e.to_string()))
    }

    /// Follow a result descriptor, adopting the data buffer and then the
    /// descriptor itself. Returns the data handle and the element count.
    fn adopt_buffer(
        &self,
        export: &str,
        instance: &mut Instance,
        allocs: &mut AllocationManager,
        raw: RawValue,
        width: u32,
    ) -> BindResult<(AllocationHandle, u32)> {
        let descriptor = match raw {
            RawValue::I32(0) => {
                return Err(BindError::Allocation {
                    requested: 0,
                    reason: format!("`{export}` returned a null result descriptor"),
                })
            }
            RawValue::I32(ptr) => ptr as u32,
            other => {
                return Err(BindError::encoding(
                    export,
                    format!("expected a descriptor pointer, got {other}"),
                ))
            }
        };

        let (ptr, len, cap) = {
            let view = instance.view(self.style);
            let field = |offset: u32| -> BindResult<u32> {
                match view.read_scalar(descriptor + offset, ScalarKind::U32)? {
                    Scalar::U32(v) => Ok(v),
                    other => Err(BindError::encoding(export, format!("bad descriptor field {other}"))),
                }
            };
            (field(DESCRIPTOR_PTR)?, field(DESCRIPTOR_LEN)?, field(DESCRIPTOR_CAP)?)
        };
        let data_len = u32::try_from(cap as u64 * width as u64).map_err(|_| {
            BindError::encoding(export, format!("capacity {cap} overflows linear memory"))
        })?;

        let data = allocs.adopt(instance, ptr, data_len);
        allocs.adopt(instance, descriptor, DESCRIPTOR_SIZE);
        if len > cap {
            return Err(BindError::encoding(
                export,
                format!("descriptor length {len} exceeds capacity {cap}"),
            ));
        }
        trace!(export, ptr, len, cap, "adopted result buffer");
        Ok((data, len))
    }
}

fn pointer_pair(ptr: u32, count: u32) -> Vec<RawValue> {
    vec![RawValue::I32(ptr as i32), RawValue::I32(count as i32)]
}

fn buffer_len(count: u64, width: u32) -> BindResult<u32> {
    let bytes = count * width as u64;
    u32::try_from(bytes)
        .ok()
        .filter(|&b| b <= i32::MAX as u32)
        .ok_or(BindError::Allocation {
            requested: u32::MAX,
            reason: format!("{bytes} bytes does not fit in wasm32 memory"),
        })
}

/// Optional leading '-', then at least one ASCII digit.
fn is_decimal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_integers_widen_by_signedness() {
        assert_eq!(ValueCodec::lower_scalar(Scalar::U8(250)), RawValue::I32(250));
        assert_eq!(ValueCodec::lower_scalar(Scalar::I8(-6)), RawValue::I32(-6));
        assert_eq!(ValueCodec::lower_scalar(Scalar::U16(0xffff)), RawValue::I32(0xffff));
        assert_eq!(ValueCodec::lower_scalar(Scalar::U32(u32::MAX)), RawValue::I32(-1));
        assert_eq!(ValueCodec::lower_scalar(Scalar::Bool(true)), RawValue::I32(1));
    }

    #[test]
    fn lifting_checks_ranges() {
        let lift = |kind, raw| ValueCodec::lift_scalar("f", kind, raw);
        assert_eq!(lift(ScalarKind::U8, RawValue::I32(255)).unwrap(), Scalar::U8(255));
        assert!(matches!(
            lift(ScalarKind::U8, RawValue::I32(256)).unwrap_err(),
            BindError::Encoding { .. }
        ));
        assert!(lift(ScalarKind::I8, RawValue::I32(-129)).is_err());
        assert_eq!(
            lift(ScalarKind::U32, RawValue::I32(-1)).unwrap(),
            Scalar::U32(u32::MAX)
        );
        assert_eq!(lift(ScalarKind::Bool, RawValue::I32(2)).unwrap(), Scalar::Bool(true));
        assert!(lift(ScalarKind::I64, RawValue::I32(1)).is_err());
    }

    #[test]
    fn argument_checks() {
        let check = |param, arg: &Arg<'_>| ValueCodec::check_arg("f", 0, param, arg);

        assert!(check(ParamKind::Scalar(ScalarKind::U8), &Arg::In(Value::I32(3))).is_ok());
        assert!(check(ParamKind::Scalar(ScalarKind::U8), &Arg::In(Value::I32(300))).is_err());
        assert!(check(ParamKind::Str, &Arg::In("hi".into())).is_ok());
        assert!(check(ParamKind::Str, &Arg::In(Value::I32(1))).is_err());

        let bools = Value::Array(Array::from(vec![true]));
        assert!(check(ParamKind::Slice(ScalarKind::Bool), &Arg::In(bools.clone())).is_ok());
        assert!(check(ParamKind::Slice(ScalarKind::U8), &Arg::In(bools.clone())).is_err());
        assert!(check(ParamKind::SliceMut(ScalarKind::Bool), &Arg::In(bools)).is_err());

        let mut bytes = Array::from(vec![1u8, 2]);
        assert!(check(ParamKind::SliceMut(ScalarKind::U8), &Arg::InOut(&mut bytes)).is_ok());
        assert!(check(ParamKind::Slice(ScalarKind::U8), &Arg::InOut(&mut bytes)).is_ok());
        let err = check(ParamKind::Vec(ScalarKind::U8), &Arg::InOut(&mut bytes)).unwrap_err();
        assert!(err.to_string().contains("argument 0: expected Vec<u8>"), "{err}");
    }

    #[test]
    fn decimal_payloads() {
        assert!(is_decimal("0"));
        assert!(is_decimal("-18446744073709551615"));
        assert!(!is_decimal(""));
        assert!(!is_decimal("-"));
        assert!(!is_decimal("12x"));
        assert!(!is_decimal("+1"));
    }

    #[test]
    fn buffer_lengths_must_fit_wasm32() {
        assert_eq!(buffer_len(3, 8).unwrap(), 24);
        assert!(matches!(
            buffer_len(1 << 31, 1).unwrap_err(),
            BindError::Allocation { .. }
        ));
    }
}
