//! Host bindings for WebAssembly modules.
//!
//! Call exported guest functions with host [`Value`]s:
//!
//! ```ignore
//! let mut ctx = BindingContext::new(BindingConfig::default())?;
//! let mut guest = ctx.bind(&wasm_bytes)?;
//! let n = guest.invoke("count_booleans", vec![Array::from(vec![true, false]).into()])?;
//! ```
//!
//! # Pipeline
//!
//! ```text
//! BindingContext::bind
//!   → LoadedModule (compile, digest, signature table)
//!   → Instance (store, linear memory)
//!   → Dispatcher (one CallPlan per wrapped export)
//!
//! Dispatcher::call
//!   → check args → ValueCodec::encode_param (AllocationManager + MemoryView)
//!   → Instance::call → write back → ValueCodec::decode_result
//!   → AllocationManager::release_all
//! ```

pub mod alloc;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod memory;

pub use alloc::{AllocationHandle, AllocationManager, GuestAllocator, Ownership};
pub use codec::ValueCodec;
pub use config::{AccessStyle, BindingConfig, DEFAULT_MAX_MEMORY_PAGES};
pub use context::BindingContext;
pub use dispatcher::{Arg, CallPlan, Dispatcher, PlanSource};
pub use error::{BindError, BindResult, ErrorKind};
pub use instance::{content_digest, ExportShape, Instance, LoadedModule, RawValue};
pub use memory::{
    view_of, LinearRegion, LittleEndianView, MemoryRegion, MemoryView, NativeView, VecRegion,
};

pub use wasmbind_types::{Array, ExportSignature, ParamKind, ReturnKind, Scalar, ScalarKind, Value};
