//! Compiled modules and live instances.
//!
//! A [`LoadedModule`] is the compiled, immutable form of a guest: the wasmi
//! module, its content digest, the export table and the optional signature
//! metadata. It is shared between instances. An [`Instance`] owns its store
//! and linear memory and is driven by one caller at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;
use wasmbind_types::abi::{BUILTIN_ALLOC, BUILTIN_DEALLOC, BUILTIN_LIVE, MEMORY_EXPORT};
use wasmbind_types::{CoreType, SignatureTable, METADATA_VERSION};
use wasmi::core::{ValType, F32, F64};
use wasmi::{Engine, ExternType, Linker, Memory, Module, Store, Val};
use wasmparser::{Parser as WasmParser, Payload};

use crate::alloc::GuestAllocator;
use crate::config::{AccessStyle, BindingConfig};
use crate::error::{BindError, BindResult};
use crate::memory::{view_of, LinearRegion, MemoryView};

// ══════════════════════════════════════════════════════════════════════════════
// Raw values
// ══════════════════════════════════════════════════════════════════════════════

/// A core WASM number as passed to or returned from a raw export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl RawValue {
    pub fn core_type(&self) -> CoreType {
        match self {
            RawValue::I32(_) => CoreType::I32,
            RawValue::I64(_) => CoreType::I64,
            RawValue::F32(_) => CoreType::F32,
            RawValue::F64(_) => CoreType::F64,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            RawValue::I32(v) => Some(v),
            _ => None,
        }
    }

    fn to_val(self) -> Val {
        match self {
            RawValue::I32(v) => Val::I32(v),
            RawValue::I64(v) => Val::I64(v),
            RawValue::F32(v) => Val::F32(F32::from_bits(v.to_bits())),
            RawValue::F64(v) => Val::F64(F64::from_bits(v.to_bits())),
        }
    }

    /// `None` for reference types, which never cross this boundary.
    fn from_val(val: &Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(RawValue::I32(*v)),
            Val::I64(v) => Some(RawValue::I64(*v)),
            Val::F32(v) => Some(RawValue::F32(f32::from_bits(v.to_bits()))),
            Val::F64(v) => Some(RawValue::F64(f64::from_bits(v.to_bits()))),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::I32(v) => write!(f, "{v}i32"),
            RawValue::I64(v) => write!(f, "{v}i64"),
            RawValue::F32(v) => write!(f, "{v}f32"),
            RawValue::F64(v) => write!(f, "{v}f64"),
        }
    }
}

/// Core parameter and result types of a function export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportShape {
    pub params: Vec<CoreType>,
    pub results: Vec<CoreType>,
}

/// Map wasmi value types onto core types, rejecting reference types.
fn core_types(types: &[ValType]) -> Option<Vec<CoreType>> {
    types
        .iter()
        .map(|&ty| RawValue::from_val(&Val::default(ty)).map(|v| v.core_type()))
        .collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// LoadedModule
// ══════════════════════════════════════════════════════════════════════════════

/// A compiled guest module.
#[derive(Debug)]
pub struct LoadedModule {
    module: Module,
    digest: String,
    signatures: Option<SignatureTable>,
    exports: BTreeMap<String, ExportShape>,
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl LoadedModule {
    /// Compile `bytes` and read the signature table from `metadata_section`.
    pub fn load(engine: &Engine, bytes: &[u8], metadata_section: &str) -> BindResult<Self> {
        let module = Module::new(engine, bytes).map_err(|e| BindError::Compile(e.to_string()))?;
        let signatures = read_signature_table(bytes, metadata_section)?;

        let mut exports = BTreeMap::new();
        for export in module.exports() {
            let ExternType::Func(func_type) = export.ty() else {
                continue;
            };
            // functions taking or returning references are not callable here
            let (Some(params), Some(results)) =
                (core_types(func_type.params()), core_types(func_type.results()))
            else {
                continue;
            };
            exports.insert(export.name().to_string(), ExportShape { params, results });
        }

        let digest = content_digest(bytes);
        debug!(
            digest = %digest,
            exports = exports.len(),
            metadata = signatures.is_some(),
            "compiled guest module"
        );
        Ok(Self {
            module,
            digest,
            signatures,
            exports,
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The embedded signature table, if the module carries one.
    pub fn signatures(&self) -> Option<&SignatureTable> {
        self.signatures.as_ref()
    }

    /// Callable function exports by full name.
    pub fn exports(&self) -> &BTreeMap<String, ExportShape> {
        &self.exports
    }

    pub fn export(&self, name: &str) -> Option<&ExportShape> {
        self.exports.get(name)
    }
}

fn read_signature_table(bytes: &[u8], section: &str) -> BindResult<Option<SignatureTable>> {
    for payload in WasmParser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| BindError::Compile(e.to_string()))?;
        if let Payload::CustomSection(reader) = payload {
            if reader.name() != section {
                continue;
            }
            let table = SignatureTable::from_json(reader.data())
                .map_err(|e| BindError::Metadata(format!("section `{section}`: {e}")))?;
            if table.version != METADATA_VERSION {
                return Err(BindError::Metadata(format!(
                    "section `{section}` has version {}, expected {METADATA_VERSION}",
                    table.version
                )));
            }
            return Ok(Some(table));
        }
    }
    Ok(None)
}

// ══════════════════════════════════════════════════════════════════════════════
// Instance
// ══════════════════════════════════════════════════════════════════════════════

/// A live, instantiated guest with its own linear memory.
pub struct Instance {
    module: Arc<LoadedModule>,
    store: Store<()>,
    instance: wasmi::Instance,
    memory: Memory,
    max_memory_pages: u32,
    /// Bumped every time the memory is observed to have changed size.
    epoch: u64,
    observed_len: usize,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("module", &self.module.digest)
            .field("memory_len", &self.observed_len)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Instance {
    /// Instantiate `module` with no imports and run its start function.
    pub fn instantiate(
        engine: &Engine,
        module: Arc<LoadedModule>,
        config: &BindingConfig,
    ) -> BindResult<Self> {
        let mut store = Store::new(engine, ());
        let linker = Linker::<()>::new(engine);
        let instance = linker
            .instantiate(&mut store, &module.module)
            .and_then(|pre| pre.start(&mut store))
            .map_err(|e| BindError::Instantiation(e.to_string()))?;
        let memory = instance
            .get_memory(&store, MEMORY_EXPORT)
            .ok_or_else(|| {
                BindError::Instantiation(format!("module does not export `{MEMORY_EXPORT}`"))
            })?;
        let observed_len = memory.data(&store).len();

        Ok(Self {
            module,
            store,
            instance,
            memory,
            max_memory_pages: config.max_memory_pages,
            epoch: 0,
            observed_len,
        })
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    /// Call a raw export by its full name.
    ///
    /// Arguments are checked against the export's type before the guest runs.
    pub fn call(&mut self, export: &str, args: &[RawValue]) -> BindResult<Vec<RawValue>> {
        let shape = self
            .module
            .export(export)
            .ok_or_else(|| BindError::ExportNotFound(export.to_string()))?;
        if args.len() != shape.params.len() {
            return Err(BindError::mismatch(
                export,
                format!(
                    "expected {} raw arguments, got {}",
                    shape.params.len(),
                    args.len()
                ),
            ));
        }
        for (i, (arg, expected)) in args.iter().zip(&shape.params).enumerate() {
            if arg.core_type() != *expected {
                return Err(BindError::mismatch(
                    export,
                    format!("raw argument {i} is {}, expected {expected}", arg.core_type()),
                ));
            }
        }

        let func = self
            .instance
            .get_func(&self.store, export)
            .ok_or_else(|| BindError::ExportNotFound(export.to_string()))?;
        let inputs: Vec<Val> = args.iter().map(|a| a.to_val()).collect();
        let mut outputs: Vec<Val> = func
            .ty(&self.store)
            .results()
            .iter()
            .map(|&ty| Val::default(ty))
            .collect();

        let result = func.call(&mut self.store, &inputs, &mut outputs);
        self.observe_growth();
        result.map_err(|e| BindError::Trap {
            export: export.to_string(),
            args: args.to_vec(),
            message: e.to_string(),
        })?;

        Ok(outputs.iter().filter_map(RawValue::from_val).collect())
    }

    /// A view over this instance's linear memory.
    pub fn view(&mut self, style: AccessStyle) -> Box<dyn MemoryView + '_> {
        let region = LinearRegion::new(self.memory, &mut self.store);
        view_of(region, style, self.max_memory_pages)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.data(&self.store).len()
    }

    /// Compare the memory size with the last observation, advancing the epoch
    /// if it changed. Returns whether it did.
    pub fn observe_growth(&mut self) -> bool {
        let len = self.memory_len();
        if len == self.observed_len {
            return false;
        }
        debug!(from = self.observed_len, to = len, epoch = self.epoch + 1, "guest memory grew");
        self.observed_len = len;
        self.epoch += 1;
        true
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.module.exports.keys().map(String::as_str)
    }

    /// Bytes currently allocated by the guest allocator, when the guest
    /// exports the probe.
    pub fn live_bytes(&mut self) -> BindResult<Option<u32>> {
        if self.module.export(BUILTIN_LIVE).is_none() {
            return Ok(None);
        }
        let out = self.call(BUILTIN_LIVE, &[])?;
        Ok(out.first().and_then(RawValue::as_i32).map(|v| v as u32))
    }
}

impl GuestAllocator for Instance {
    fn guest_alloc(&mut self, len: u32) -> BindResult<u32> {
        let failed = |reason: String| BindError::Allocation {
            requested: len,
            reason,
        };
        if self.module.export(BUILTIN_ALLOC).is_none() {
            return Err(failed(format!("module does not export `{BUILTIN_ALLOC}`")));
        }
        let out = self
            .call(BUILTIN_ALLOC, &[RawValue::I32(len as i32)])
            .map_err(|e| failed(e.to_string()))?;
        out.first()
            .and_then(RawValue::as_i32)
            .map(|ptr| ptr as u32)
            .ok_or_else(|| failed("allocator returned no pointer".to_string()))
    }

    fn guest_dealloc(&mut self, ptr: u32, len: u32) -> BindResult<()> {
        self.call(BUILTIN_DEALLOC, &[RawValue::I32(ptr as i32), RawValue::I32(len as i32)])?;
        Ok(())
    }

    fn memory_epoch(&mut self) -> u64 {
        self.observe_growth();
        self.epoch
    }

    fn memory_len(&self) -> usize {
        Instance::memory_len(self)
    }
}
