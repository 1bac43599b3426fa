//! Names and layouts both sides of the boundary agree on.
//!
//! ```text
//! memory                              linear memory
//! __wasmbind_builtin_alloc(len) -> ptr    0 when the allocation cannot be served
//! __wasmbind_builtin_dealloc(ptr, len)
//! __wasmbind_builtin_live() -> bytes      optional, live allocated bytes
//! __wasmbind_<name>(...)                  wrapped exports
//! ```
//!
//! Buffer results are returned as a pointer to a descriptor:
//!
//! ```text
//! offset+0 : u32 LE data pointer
//! offset+4 : u32 LE length (elements, or bytes for strings)
//! offset+8 : u32 LE capacity (same unit as length)
//! ```

/// Prefix of every wrapped export.
pub const EXPORT_PREFIX: &str = "__wasmbind_";
/// Allocator export.
pub const BUILTIN_ALLOC: &str = "__wasmbind_builtin_alloc";
/// Deallocator export.
pub const BUILTIN_DEALLOC: &str = "__wasmbind_builtin_dealloc";
/// Live-bytes probe export.
pub const BUILTIN_LIVE: &str = "__wasmbind_builtin_live";
/// Prefix shared by the builtins; never wrapped.
pub const BUILTIN_PREFIX: &str = "__wasmbind_builtin_";
/// Linear memory export.
pub const MEMORY_EXPORT: &str = "memory";
/// Custom section holding the JSON [`SignatureTable`](crate::SignatureTable).
pub const METADATA_SECTION: &str = "wasmbind";

/// Size of a `(ptr, len, cap)` result descriptor.
pub const DESCRIPTOR_SIZE: u32 = 12;
/// Byte offsets of the descriptor fields.
pub const DESCRIPTOR_PTR: u32 = 0;
pub const DESCRIPTOR_LEN: u32 = 4;
pub const DESCRIPTOR_CAP: u32 = 8;

/// WASM page size.
pub const PAGE_SIZE: u32 = 65_536;
