use wasm_encoder::{Function, Instruction, ValType};
use wasmbind_types::{ExportSignature, ParamKind, ReturnKind, ScalarKind};

use super::copy_constant;
use super::simple_summation::doubled_copy;
use crate::builder::ModuleBuilder;
use crate::error::CodegenResult;
use crate::runtime::memarg;

/// Failure paths and the less common conventions.
///
/// - `divide(i32, i32) -> i32`: traps on a zero divisor
/// - `crash()`: `unreachable`
/// - `peek(u32) -> i32`: raw load, traps out of bounds
/// - `bad_utf8() -> String`: returns `[0xff, 0xfe]`
/// - `bad_decimal() -> BigDecimal`: returns `"12x"`
/// - `product_into(&[u8], out)`: legacy output-array convention
/// - `add(i32, i32) -> i32`: no metadata entry
pub fn diagnostics() -> CodegenResult<Vec<u8>> {
    let mut b = ModuleBuilder::new();
    let bad_utf8 = b.data().intern_bytes(&[0xff, 0xfe]);
    let bad_decimal = b.data().intern_string("12x");

    let i32_scalar = || ParamKind::Scalar(ScalarKind::I32);
    b.export(
        ExportSignature::new(
            "divide",
            vec![i32_scalar(), i32_scalar()],
            ReturnKind::Scalar(ScalarKind::I32),
        ),
        binary_op(Instruction::I32DivS),
    )?;
    b.export(ExportSignature::new("crash", vec![], ReturnKind::Unit), crash())?;
    b.export(
        ExportSignature::new(
            "peek",
            vec![ParamKind::Scalar(ScalarKind::U32)],
            ReturnKind::Scalar(ScalarKind::I32),
        ),
        peek(),
    )?;
    b.export(
        ExportSignature::new("bad_utf8", vec![], ReturnKind::Str),
        copy_constant(bad_utf8),
    )?;
    b.export(
        ExportSignature::new("bad_decimal", vec![], ReturnKind::BigDecimal),
        copy_constant(bad_decimal),
    )?;
    b.export(
        ExportSignature::new(
            "product_into",
            vec![ParamKind::Slice(ScalarKind::U8)],
            ReturnKind::Vec(ScalarKind::U8),
        )
        .with_legacy_out_param(),
        doubled_copy(),
    )?;
    b.raw_export(
        "add",
        vec![ValType::I32, ValType::I32],
        vec![ValType::I32],
        binary_op(Instruction::I32Add),
    )?;

    b.finish()
}

/// A module whose metadata disagrees with its exports: `sum` is declared as
/// taking a slice but really takes a single i32.
pub fn mismatched_metadata() -> CodegenResult<Vec<u8>> {
    let mut b = ModuleBuilder::new();
    b.declare(ExportSignature::new(
        "sum",
        vec![ParamKind::Slice(ScalarKind::U32)],
        ReturnKind::Scalar(ScalarKind::I32),
    ))?;
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::End);
    b.raw_export("sum", vec![ValType::I32], vec![ValType::I32], f)?;
    b.finish()
}

fn binary_op(op: Instruction<'static>) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&op);
    f.instruction(&Instruction::End);
    f
}

fn crash() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::Unreachable);
    f.instruction(&Instruction::End);
    f
}

fn peek() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Load(memarg(0, 0)));
    f.instruction(&Instruction::End);
    f
}
