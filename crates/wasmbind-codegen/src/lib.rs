//! wasmbind guest emitter: assembles `.wasm` modules that follow the binding ABI.
//!
//! # Architecture
//!
//! A [`ModuleBuilder`] takes hand-assembled export bodies and their declared
//! [`ExportSignature`](wasmbind_types::ExportSignature)s and produces a
//! self-contained module with no imports:
//!
//! ## Exports
//! - `memory`: linear memory (1 page initially, at most 256)
//! - `__wasmbind_builtin_alloc(len) → ptr`: bump allocator, 0 on failure
//! - `__wasmbind_builtin_dealloc(ptr, len)`
//! - `__wasmbind_builtin_live() → bytes`: live allocation counter
//! - `__wasmbind_<name>(...)`: wrapped exports
//!
//! ## Custom section
//! The JSON signature table is written to the `wasmbind` custom section so a
//! host can marshal arguments without being told the signatures.
//!
//! The [`demos`] module builds the reference modules the runtime is tested
//! against.

pub mod builder;
pub mod demos;
pub mod error;
pub mod runtime;
pub mod types;

pub use builder::{val_type, ModuleBuilder};
pub use error::{CodegenError, CodegenResult};
