use wasm_encoder::{Function, Instruction, ValType};
use wasmbind_types::{ExportSignature, ParamKind, ReturnKind};

use super::{copy_constant, emit_memory_copy};
use crate::builder::ModuleBuilder;
use crate::error::CodegenResult;
use crate::runtime::{emit_alloc_into, emit_return_null_if, memarg, RT_NEW_DESCRIPTOR};

/// String results and string arguments.
///
/// - `hello_world() -> String`
/// - `hello_x(String) -> String`: `"Hello, {x}!"`
pub fn hello_world_strings() -> CodegenResult<Vec<u8>> {
    let mut b = ModuleBuilder::new();
    let greeting = b.data().intern_string("Hello, world!");
    let prefix = b.data().intern_string("Hello, ");

    b.export(
        ExportSignature::new("hello_world", vec![], ReturnKind::Str),
        copy_constant(greeting),
    )?;
    b.export(
        ExportSignature::new("hello_x", vec![ParamKind::Str], ReturnKind::Str),
        hello_x(prefix),
    )?;

    b.finish()
}

fn hello_x((prefix_ptr, prefix_len): (u32, u32)) -> Function {
    // params: 0=ptr, 1=len
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 2: buf
        (1, ValType::I32), // local 3: total length
    ]);
    // total = prefix + len + "!"
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Const(prefix_len as i32 + 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalTee(3));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32LtU);
    emit_return_null_if(&mut f);

    f.instruction(&Instruction::LocalGet(3));
    emit_alloc_into(&mut f, 2);

    // "Hello, "
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Const(prefix_ptr as i32));
    f.instruction(&Instruction::I32Const(prefix_len as i32));
    emit_memory_copy(&mut f);

    // x
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Const(prefix_len as i32));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    emit_memory_copy(&mut f);

    // "!"
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const(b'!' as i32));
    f.instruction(&Instruction::I32Store8(memarg(0, 0)));

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::Call(RT_NEW_DESCRIPTOR));
    f.instruction(&Instruction::End);
    f
}
