//! Allocator builtins emitted into every guest module.
//!
//! The builder registers these before any wrapped export, so their offsets
//! below are also their absolute function indices. Three of them are exported
//! under the builtin names from [`wasmbind_types::abi`]; the descriptor
//! constructor is internal.

use std::collections::HashMap;

use wasm_encoder::{BlockType, Function, Instruction, ValType};
use wasmbind_types::abi::{DESCRIPTOR_CAP, DESCRIPTOR_LEN, DESCRIPTOR_PTR, DESCRIPTOR_SIZE};

use crate::types::*;

// ══════════════════════════════════════════════════════════════════════════════
// Runtime function indices
// ══════════════════════════════════════════════════════════════════════════════

/// Bump-allocate `size` bytes, rounded up to [`ALLOC_ALIGN`].
///
/// `alloc(size: i32) -> i32`, 0 when memory cannot grow far enough.
pub const RT_ALLOC: u32 = 0;

/// `dealloc(ptr: i32, len: i32)`
///
/// Frees are accounted in the live-byte counter. The heap pointer only moves
/// back when the freed block is the topmost one, so freeing in reverse
/// allocation order returns the heap to where it started.
pub const RT_DEALLOC: u32 = 1;

/// `live() -> i32`: bytes allocated and not yet freed.
pub const RT_LIVE: u32 = 2;

/// `new_descriptor(ptr: i32, len: i32, cap: i32) -> i32`
///
/// Allocates a result descriptor and fills it; returns 0 if the allocation
/// failed.
pub const RT_NEW_DESCRIPTOR: u32 = 3;

/// Total number of runtime helper functions.
pub const RT_FUNC_COUNT: u32 = 4;

// ══════════════════════════════════════════════════════════════════════════════
// Emit helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Emit the `alloc(size: i32) -> i32` function.
pub fn emit_alloc() -> Function {
    let mut f = Function::new(vec![
        (1, ValType::I32), // local 1: aligned size
        (1, ValType::I32), // local 2: result ptr
        (1, ValType::I32), // local 3: end of block
        (1, ValType::I32), // local 4: current memory size in bytes
    ]);
    // aligned = (size + 7) & !7
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Const(ALLOC_ALIGN as i32 - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(-(ALLOC_ALIGN as i32)));
    f.instruction(&Instruction::I32And);
    f.instruction(&Instruction::LocalSet(1));
    // rounding wrapped past 4 GiB
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32LtU);
    emit_return_null_if(&mut f);

    // ptr = heap_ptr; end = ptr + aligned
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::LocalSet(2));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalTee(3));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32LtU);
    emit_return_null_if(&mut f);

    // current = memory.size << 16
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(PAGE_SHIFT));
    f.instruction(&Instruction::I32Shl);
    f.instruction(&Instruction::LocalSet(4));

    // if end > current: grow by ceil((end - current) / page) pages
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::LocalGet(4));
    f.instruction(&Instruction::I32GtU);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::LocalGet(4));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const((1 << PAGE_SHIFT) - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(PAGE_SHIFT));
    f.instruction(&Instruction::I32ShrU);
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::I32Const(-1));
    f.instruction(&Instruction::I32Eq);
    emit_return_null_if(&mut f);
    f.instruction(&Instruction::End);

    // heap_ptr = end; live += aligned
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::GlobalGet(GLOBAL_LIVE_BYTES));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalSet(GLOBAL_LIVE_BYTES));

    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::End);
    f
}

/// Emit `dealloc(ptr: i32, len: i32)`.
pub fn emit_dealloc() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 2: aligned
    // zero-length frees are no-ops
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Eqz);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::Return);
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Const(ALLOC_ALIGN as i32 - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(-(ALLOC_ALIGN as i32)));
    f.instruction(&Instruction::I32And);
    f.instruction(&Instruction::LocalSet(2));

    // live -= aligned
    f.instruction(&Instruction::GlobalGet(GLOBAL_LIVE_BYTES));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::GlobalSet(GLOBAL_LIVE_BYTES));

    // topmost block: move the heap pointer back
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP_PTR));
    f.instruction(&Instruction::End);

    f.instruction(&Instruction::End);
    f
}

/// Emit `live() -> i32`.
pub fn emit_live() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::GlobalGet(GLOBAL_LIVE_BYTES));
    f.instruction(&Instruction::End);
    f
}

/// Emit `new_descriptor(ptr: i32, len: i32, cap: i32) -> i32`.
pub fn emit_new_descriptor() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 3: descriptor
    f.instruction(&Instruction::I32Const(DESCRIPTOR_SIZE as i32));
    emit_alloc_into(&mut f, 3);

    for (field, local) in [(DESCRIPTOR_PTR, 0), (DESCRIPTOR_LEN, 1), (DESCRIPTOR_CAP, 2)] {
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::LocalGet(local));
        f.instruction(&Instruction::I32Store(memarg(field as u64, 2)));
    }

    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::End);
    f
}

// ══════════════════════════════════════════════════════════════════════════════
// Body helpers shared by exports
// ══════════════════════════════════════════════════════════════════════════════

/// `if <cond> { return 0 }`: consumes an i32 condition.
///
/// Only valid inside functions whose single result is an i32.
pub fn emit_return_null_if(f: &mut Function) {
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::Return);
    f.instruction(&Instruction::End);
}

/// Allocate the size on top of the stack into `dst`, returning 0 from the
/// enclosing function if the allocator failed.
pub fn emit_alloc_into(f: &mut Function, dst: u32) {
    f.instruction(&Instruction::Call(RT_ALLOC));
    f.instruction(&Instruction::LocalTee(dst));
    f.instruction(&Instruction::I32Eqz);
    emit_return_null_if(f);
}

/// Build a `MemArg` for memory index 0.
pub(crate) fn memarg(offset: u64, align: u32) -> wasm_encoder::MemArg {
    wasm_encoder::MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Static data
// ══════════════════════════════════════════════════════════════════════════════

/// Interns constant byte strings into the data region.
///
/// Offsets start at [`DATA_START`]; identical strings share one copy.
#[derive(Debug, Clone)]
pub struct DataSegmentTracker {
    bytes: Vec<u8>,
    interned: HashMap<Vec<u8>, u32>,
    /// Next free offset in the data segment.
    pub next_offset: u32,
}

impl Default for DataSegmentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSegmentTracker {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            interned: HashMap::new(),
            next_offset: DATA_START,
        }
    }

    /// Intern raw bytes and return `(offset, length)`.
    pub fn intern_bytes(&mut self, data: &[u8]) -> (u32, u32) {
        let len = data.len() as u32;
        if let Some(&ptr) = self.interned.get(data) {
            return (ptr, len);
        }
        let ptr = self.next_offset;
        self.bytes.extend_from_slice(data);
        self.next_offset += len;
        self.interned.insert(data.to_vec(), ptr);
        (ptr, len)
    }

    /// Intern a string literal and return `(offset, length)`.
    pub fn intern_string(&mut self, s: &str) -> (u32, u32) {
        self.intern_bytes(s.as_bytes())
    }

    /// The raw bytes for the data segment, to be placed at [`DATA_START`].
    pub fn data_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut data = DataSegmentTracker::new();
        let (a, alen) = data.intern_string("Hello, ");
        let (b, blen) = data.intern_string("world");
        let (c, _) = data.intern_string("Hello, ");
        assert_eq!(a, DATA_START);
        assert_eq!(alen, 7);
        assert_eq!(b, DATA_START + 7);
        assert_eq!(blen, 5);
        assert_eq!(c, a);
        assert_eq!(data.data_bytes(), b"Hello, world");
        assert_eq!(data.next_offset, DATA_START + 12);
    }
}
