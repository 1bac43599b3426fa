//! Guest memory layout and fixed indices.
//!
//! ```text
//! 0 .. DATA_START          reserved, address 0 is the null pointer
//! DATA_START .. HEAP_START static data (interned string constants)
//! HEAP_START ..            bump heap, grown a page at a time on demand
//! ```

// ── Global variable indices ──────────────────────────────────────────────────
// (order must match the global section emission in builder.rs)

/// Heap allocation pointer: next free byte in linear memory.
pub const GLOBAL_HEAP_PTR: u32 = 0;
/// Bytes currently allocated and not yet freed.
pub const GLOBAL_LIVE_BYTES: u32 = 1;

// ── Memory ───────────────────────────────────────────────────────────────────

/// Initial linear memory size in pages (64 KiB each).
pub const INITIAL_MEMORY_PAGES: u64 = 1;
/// Maximum linear memory pages (16 MiB).
pub const MAX_MEMORY_PAGES: u64 = 256;
/// First byte of the static data region.
pub const DATA_START: u32 = 16;
/// Heap starts after the data region. The first 4 KiB hold static data.
pub const HEAP_START: u32 = 4096;
/// Every allocation is rounded up to this many bytes.
pub const ALLOC_ALIGN: u32 = 8;
/// `log2(PAGE_SIZE)`
pub const PAGE_SHIFT: i32 = 16;
