use wasm_encoder::{Function, Instruction, ValType};
use wasmbind_types::{ExportSignature, ParamKind, ReturnKind, ScalarKind};

use super::{emit_element_addr, emit_for_each};
use crate::builder::ModuleBuilder;
use crate::error::CodegenResult;
use crate::runtime::{emit_alloc_into, memarg, RT_NEW_DESCRIPTOR};

/// Numeric arrays in every passing style.
///
/// - `sum(&[u32]) -> i32`: wrapping
/// - `product_in_place(&mut [u8])`: doubles each byte, wrapping
/// - `product_new(Vec<u8>) -> Vec<u8>`: same, into a fresh buffer
/// - `float_product(Vec<f64>) -> f64`
pub fn simple_summation() -> CodegenResult<Vec<u8>> {
    let mut b = ModuleBuilder::new();

    b.export(
        ExportSignature::new(
            "sum",
            vec![ParamKind::Slice(ScalarKind::U32)],
            ReturnKind::Scalar(ScalarKind::I32),
        ),
        sum(),
    )?;
    b.export(
        ExportSignature::new(
            "product_in_place",
            vec![ParamKind::SliceMut(ScalarKind::U8)],
            ReturnKind::Unit,
        ),
        product_in_place(),
    )?;
    b.export(
        ExportSignature::new(
            "product_new",
            vec![ParamKind::Vec(ScalarKind::U8)],
            ReturnKind::Vec(ScalarKind::U8),
        ),
        doubled_copy(),
    )?;
    b.export(
        ExportSignature::new(
            "float_product",
            vec![ParamKind::Vec(ScalarKind::F64)],
            ReturnKind::Scalar(ScalarKind::F64),
        ),
        float_product(),
    )?;

    b.finish()
}

fn sum() -> Function {
    // params: 0=ptr, 1=len
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 2: i
        (1, ValType::I32), // local 3: acc
    ]);
    emit_for_each(&mut f, 2, 1, |f| {
        emit_element_addr(f, 0, 2, 2);
        f.instruction(&Instruction::I32Load(memarg(0, 2)));
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::I32Add);
        f.instruction(&Instruction::LocalSet(3));
    });
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::End);
    f
}

/// `dst[i] = src[i] * 2` for bytes.
fn emit_double_bytes(f: &mut Function, src: u32, dst: u32, counter: u32, len: u32) {
    emit_for_each(f, counter, len, |f| {
        emit_element_addr(f, dst, counter, 0);
        emit_element_addr(f, src, counter, 0);
        f.instruction(&Instruction::I32Load8U(memarg(0, 0)));
        f.instruction(&Instruction::I32Const(1));
        f.instruction(&Instruction::I32Shl);
        f.instruction(&Instruction::I32Store8(memarg(0, 0)));
    });
}

fn product_in_place() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 2: i
    emit_double_bytes(&mut f, 0, 0, 2, 1);
    f.instruction(&Instruction::End);
    f
}

/// `(ptr, len) -> descriptor` of a doubled copy. Shared with the legacy
/// `product_into` diagnostic.
pub(super) fn doubled_copy() -> Function {
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 2: buf
        (1, ValType::I32), // local 3: i
    ]);
    f.instruction(&Instruction::LocalGet(1));
    emit_alloc_into(&mut f, 2);
    emit_double_bytes(&mut f, 0, 2, 3, 1);

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::Call(RT_NEW_DESCRIPTOR));
    f.instruction(&Instruction::End);
    f
}

fn float_product() -> Function {
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 2: i
        (1, ValType::F64), // local 3: acc
    ]);
    f.instruction(&Instruction::F64Const(1.0));
    f.instruction(&Instruction::LocalSet(3));
    emit_for_each(&mut f, 2, 1, |f| {
        emit_element_addr(f, 0, 2, 3);
        f.instruction(&Instruction::F64Load(memarg(0, 3)));
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::F64Mul);
        f.instruction(&Instruction::LocalSet(3));
    });
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::End);
    f
}
