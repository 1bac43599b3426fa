use wasm_encoder::{BlockType, Function, Instruction, ValType};
use wasmbind_types::{ExportSignature, ParamKind, ReturnKind, ScalarKind};

use super::{emit_element_addr, emit_for_each};
use crate::builder::ModuleBuilder;
use crate::error::CodegenResult;
use crate::runtime::{emit_alloc_into, emit_return_null_if, memarg, RT_NEW_DESCRIPTOR};

/// Fibonacci numbers with saturating arithmetic.
///
/// - `fib(u32) -> i64`: saturates at `i64::MAX`
/// - `fib_str(u32) -> BigDecimal`: decimal digits, saturating at `u64::MAX`
/// - `all(u32) -> Vec<i64>`: `fib(1) ..= fib(n)`
pub fn fibonacci() -> CodegenResult<Vec<u8>> {
    let mut b = ModuleBuilder::new();

    b.export(
        ExportSignature::new(
            "fib",
            vec![ParamKind::Scalar(ScalarKind::U32)],
            ReturnKind::Scalar(ScalarKind::I64),
        ),
        fib(),
    )?;
    b.export(
        ExportSignature::new(
            "fib_str",
            vec![ParamKind::Scalar(ScalarKind::U32)],
            ReturnKind::BigDecimal,
        ),
        fib_str(),
    )?;
    b.export(
        ExportSignature::new(
            "all",
            vec![ParamKind::Scalar(ScalarKind::U32)],
            ReturnKind::Vec(ScalarKind::I64),
        ),
        all(),
    )?;

    b.finish()
}

/// Where a sum clamps when it no longer fits.
#[derive(Clone, Copy)]
enum Saturation {
    Signed,
    Unsigned,
}

/// `next = a + b` (clamped); `a = b; b = next`.
fn emit_fib_step(f: &mut Function, a: u32, b: u32, next: u32, sat: Saturation) {
    f.instruction(&Instruction::LocalGet(a));
    f.instruction(&Instruction::LocalGet(b));
    f.instruction(&Instruction::I64Add);
    f.instruction(&Instruction::LocalSet(next));

    // both operands are non-negative, so a wrapped sum lands below `b`
    match sat {
        Saturation::Signed => f.instruction(&Instruction::I64Const(i64::MAX)),
        Saturation::Unsigned => f.instruction(&Instruction::I64Const(-1)),
    };
    f.instruction(&Instruction::LocalGet(next));
    f.instruction(&Instruction::LocalGet(next));
    f.instruction(&Instruction::LocalGet(b));
    match sat {
        Saturation::Signed => f.instruction(&Instruction::I64LtS),
        Saturation::Unsigned => f.instruction(&Instruction::I64LtU),
    };
    f.instruction(&Instruction::Select);
    f.instruction(&Instruction::LocalSet(next));

    f.instruction(&Instruction::LocalGet(b));
    f.instruction(&Instruction::LocalSet(a));
    f.instruction(&Instruction::LocalGet(next));
    f.instruction(&Instruction::LocalSet(b));
}

/// `a = fib(n)` for the `n` in local 0.
fn emit_fib(f: &mut Function, counter: u32, a: u32, b: u32, next: u32, sat: Saturation) {
    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::LocalSet(a));
    f.instruction(&Instruction::I64Const(1));
    f.instruction(&Instruction::LocalSet(b));
    emit_for_each(f, counter, 0, |f| emit_fib_step(f, a, b, next, sat));
}

fn fib() -> Function {
    let mut f = Function::new(vec![
        (1, ValType::I64), // local 1: a
        (1, ValType::I64), // local 2: b
        (1, ValType::I32), // local 3: i
        (1, ValType::I64), // local 4: next
    ]);
    emit_fib(&mut f, 3, 1, 2, 4, Saturation::Signed);
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::End);
    f
}

fn fib_str() -> Function {
    let mut f = Function::new(vec![
        (1, ValType::I64), // local 1: a
        (1, ValType::I64), // local 2: b
        (1, ValType::I32), // local 3: i
        (1, ValType::I64), // local 4: next
        (1, ValType::I64), // local 5: remaining
        (1, ValType::I32), // local 6: digit count
        (1, ValType::I32), // local 7: buf
        (1, ValType::I32), // local 8: write position
    ]);
    emit_fib(&mut f, 3, 1, 2, 4, Saturation::Unsigned);

    // count digits: do { count += 1; remaining /= 10 } while remaining != 0
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalSet(5));
    f.instruction(&Instruction::Loop(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(6));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalSet(6));
    f.instruction(&Instruction::LocalGet(5));
    f.instruction(&Instruction::I64Const(10));
    f.instruction(&Instruction::I64DivU);
    f.instruction(&Instruction::LocalTee(5));
    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::I64Ne);
    f.instruction(&Instruction::BrIf(0));
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::LocalGet(6));
    emit_alloc_into(&mut f, 7);

    // write digits right to left
    f.instruction(&Instruction::LocalGet(6));
    f.instruction(&Instruction::LocalSet(8));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalSet(5));
    f.instruction(&Instruction::Loop(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(8));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::LocalSet(8));
    // buf[pos] = '0' + remaining % 10
    emit_element_addr(&mut f, 7, 8, 0);
    f.instruction(&Instruction::LocalGet(5));
    f.instruction(&Instruction::I64Const(10));
    f.instruction(&Instruction::I64RemU);
    f.instruction(&Instruction::I32WrapI64);
    f.instruction(&Instruction::I32Const(b'0' as i32));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Store8(memarg(0, 0)));
    f.instruction(&Instruction::LocalGet(5));
    f.instruction(&Instruction::I64Const(10));
    f.instruction(&Instruction::I64DivU);
    f.instruction(&Instruction::LocalTee(5));
    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::I64Ne);
    f.instruction(&Instruction::BrIf(0));
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::LocalGet(7));
    f.instruction(&Instruction::LocalGet(6));
    f.instruction(&Instruction::LocalGet(6));
    f.instruction(&Instruction::Call(RT_NEW_DESCRIPTOR));
    f.instruction(&Instruction::End);
    f
}

fn all() -> Function {
    // param 0: n
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 1: buf
        (1, ValType::I64), // local 2: a
        (1, ValType::I64), // local 3: b
        (1, ValType::I32), // local 4: i
        (1, ValType::I64), // local 5: next
    ]);
    // n * 8 must fit in 32 bits
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(0x1fff_ffff));
    f.instruction(&Instruction::I32GtU);
    emit_return_null_if(&mut f);

    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(3));
    f.instruction(&Instruction::I32Shl);
    emit_alloc_into(&mut f, 1);

    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::LocalSet(2));
    f.instruction(&Instruction::I64Const(1));
    f.instruction(&Instruction::LocalSet(3));
    emit_for_each(&mut f, 4, 0, |f| {
        // buf[i] = b, which holds fib(i + 1)
        emit_element_addr(f, 1, 4, 3);
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::I64Store(memarg(0, 3)));
        emit_fib_step(f, 2, 3, 5, Saturation::Signed);
    });

    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::Call(RT_NEW_DESCRIPTOR));
    f.instruction(&Instruction::End);
    f
}
