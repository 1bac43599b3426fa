//! Reference guest modules.
//!
//! Each function assembles one self-contained module exporting a handful of
//! wrapped functions through the standard ABI. They exercise every parameter
//! and return kind the binding layer supports and double as fixtures for the
//! runtime's integration tests.

mod diagnostics;
mod fibonacci;
mod hello_world_strings;
mod simple_summation;

pub use boolean_test::boolean_test;
pub use diagnostics::{diagnostics, mismatched_metadata};
pub use fibonacci::fibonacci;
pub use hello_world_strings::hello_world_strings;
pub use simple_summation::simple_summation;

use wasm_encoder::{BlockType, Function, Instruction, ValType};

use crate::runtime::{emit_alloc_into, RT_NEW_DESCRIPTOR};

/// `for counter in 0..len { body }` over two i32 locals (unsigned compare).
pub(crate) fn emit_for_each(
    f: &mut Function,
    counter: u32,
    len: u32,
    body: impl FnOnce(&mut Function),
) {
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::LocalSet(counter));
    f.instruction(&Instruction::Block(BlockType::Empty));
    f.instruction(&Instruction::Loop(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(counter));
    f.instruction(&Instruction::LocalGet(len));
    f.instruction(&Instruction::I32GeU);
    f.instruction(&Instruction::BrIf(1));

    body(f);

    f.instruction(&Instruction::LocalGet(counter));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalSet(counter));
    f.instruction(&Instruction::Br(0));
    f.instruction(&Instruction::End); // loop
    f.instruction(&Instruction::End); // block
}

/// Push `base + (index << shift)`.
pub(crate) fn emit_element_addr(f: &mut Function, base: u32, index: u32, shift: i32) {
    f.instruction(&Instruction::LocalGet(base));
    f.instruction(&Instruction::LocalGet(index));
    if shift > 0 {
        f.instruction(&Instruction::I32Const(shift));
        f.instruction(&Instruction::I32Shl);
    }
    f.instruction(&Instruction::I32Add);
}

pub(crate) fn emit_memory_copy(f: &mut Function) {
    f.instruction(&Instruction::MemoryCopy {
        src_mem: 0,
        dst_mem: 0,
    });
}

/// `() -> descriptor` of a fresh copy of the static bytes at `(ptr, len)`.
pub(crate) fn copy_constant((ptr, len): (u32, u32)) -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 0: buf
    f.instruction(&Instruction::I32Const(len as i32));
    emit_alloc_into(&mut f, 0);

    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(ptr as i32));
    f.instruction(&Instruction::I32Const(len as i32));
    emit_memory_copy(&mut f);

    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(len as i32));
    f.instruction(&Instruction::I32Const(len as i32));
    f.instruction(&Instruction::Call(RT_NEW_DESCRIPTOR));
    f.instruction(&Instruction::End);
    f
}
