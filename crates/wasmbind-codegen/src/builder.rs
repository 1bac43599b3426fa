//! Guest module assembler.
//!
//! A [`ModuleBuilder`] collects wrapped export bodies and their signatures,
//! then lays out a self-contained module:
//! 1. Type section (deduplicated)
//! 2. Function section (runtime builtins first, then exports)
//! 3. Memory and global sections
//! 4. Export section (`memory`, builtins, `__wasmbind_<name>` exports)
//! 5. Code and data sections
//! 6. Custom section with the JSON signature table
//! 7. Validation with `wasmparser`

use std::borrow::Cow;
use std::collections::HashSet;

use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, DataSection, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, MemorySection, MemoryType, Module, TypeSection,
    ValType,
};
use wasmbind_types::abi::{
    BUILTIN_ALLOC, BUILTIN_DEALLOC, BUILTIN_LIVE, EXPORT_PREFIX, MEMORY_EXPORT, METADATA_SECTION,
};
use wasmbind_types::{CoreType, ExportSignature, SignatureTable};

use crate::error::{CodegenError, CodegenResult};
use crate::runtime::{self, DataSegmentTracker};
use crate::types::*;

/// Map a core type onto its encoder value type.
pub fn val_type(ty: CoreType) -> ValType {
    match ty {
        CoreType::I32 => ValType::I32,
        CoreType::I64 => ValType::I64,
        CoreType::F32 => ValType::F32,
        CoreType::F64 => ValType::F64,
    }
}

struct GuestFunction {
    type_index: u32,
    /// Export name, `None` for internal functions.
    export: Option<String>,
    body: Function,
}

/// Incrementally assembles one guest module.
pub struct ModuleBuilder {
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
    functions: Vec<GuestFunction>,
    export_names: HashSet<String>,
    signatures: SignatureTable,
    metadata_section: Option<String>,
    data: DataSegmentTracker,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    /// A builder with the allocator builtins already registered.
    pub fn new() -> Self {
        let mut builder = Self {
            types: Vec::new(),
            functions: Vec::new(),
            export_names: HashSet::new(),
            signatures: SignatureTable::new(),
            metadata_section: Some(METADATA_SECTION.to_string()),
            data: DataSegmentTracker::new(),
        };

        let i32s = |n: usize| vec![ValType::I32; n];
        // order must match the RT_* indices in runtime.rs
        builder.push(i32s(1), i32s(1), Some(BUILTIN_ALLOC), runtime::emit_alloc());
        builder.push(i32s(2), vec![], Some(BUILTIN_DEALLOC), runtime::emit_dealloc());
        builder.push(vec![], i32s(1), Some(BUILTIN_LIVE), runtime::emit_live());
        builder.push(i32s(3), i32s(1), None, runtime::emit_new_descriptor());
        debug_assert_eq!(builder.functions.len() as u32, runtime::RT_FUNC_COUNT);
        builder
    }

    /// Write the signature table under a different custom section name.
    pub fn with_metadata_section(mut self, name: impl Into<String>) -> Self {
        self.metadata_section = Some(name.into());
        self
    }

    /// Omit the signature custom section entirely.
    pub fn without_metadata(mut self) -> Self {
        self.metadata_section = None;
        self
    }

    /// Static data interner for string constants.
    pub fn data(&mut self) -> &mut DataSegmentTracker {
        &mut self.data
    }

    /// Register a wrapped export whose raw type is the lowering of `sig`.
    ///
    /// Returns the function index.
    pub fn export(&mut self, sig: ExportSignature, body: Function) -> CodegenResult<u32> {
        sig.validate()?;
        let params = sig.core_params().into_iter().map(val_type).collect();
        let results = sig.core_results().into_iter().map(val_type).collect();
        let index = self.raw_export(&sig.name, params, results, body)?;
        self.signatures.push(sig);
        Ok(index)
    }

    /// Register a wrapped export with an explicit core type and no metadata
    /// entry. The host derives its signature from the core type.
    pub fn raw_export(
        &mut self,
        name: &str,
        params: Vec<ValType>,
        results: Vec<ValType>,
        body: Function,
    ) -> CodegenResult<u32> {
        let export = format!("{EXPORT_PREFIX}{name}");
        if !self.export_names.insert(export.clone()) {
            return Err(CodegenError::DuplicateExport(name.to_string()));
        }
        Ok(self.push(params, results, Some(&export), body))
    }

    /// Add a metadata entry without a matching function body.
    pub fn declare(&mut self, sig: ExportSignature) -> CodegenResult<()> {
        sig.validate()?;
        self.signatures.push(sig);
        Ok(())
    }

    /// Signatures registered so far.
    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    fn push(
        &mut self,
        params: Vec<ValType>,
        results: Vec<ValType>,
        export: Option<&str>,
        body: Function,
    ) -> u32 {
        let type_index = self.type_index(params, results);
        self.functions.push(GuestFunction {
            type_index,
            export: export.map(str::to_string),
            body,
        });
        self.functions.len() as u32 - 1
    }

    fn type_index(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        let key = (params, results);
        if let Some(i) = self.types.iter().position(|t| *t == key) {
            return i as u32;
        }
        self.types.push(key);
        self.types.len() as u32 - 1
    }

    /// Assemble and validate the module.
    pub fn finish(self) -> CodegenResult<Vec<u8>> {
        if self.data.next_offset > HEAP_START {
            return Err(CodegenError::LimitExceeded(format!(
                "static data ends at {} but the heap starts at {HEAP_START}",
                self.data.next_offset
            )));
        }

        let mut module = Module::new();

        // 1. Type section
        let mut types = TypeSection::new();
        for (params, results) in &self.types {
            types.ty().function(params.iter().copied(), results.iter().copied());
        }
        module.section(&types);

        // 2. Function section
        let mut func_section = FunctionSection::new();
        for func in &self.functions {
            func_section.function(func.type_index);
        }
        module.section(&func_section);

        // 3. Memory section
        let mut memory = MemorySection::new();
        memory.memory(MemoryType {
            minimum: INITIAL_MEMORY_PAGES,
            maximum: Some(MAX_MEMORY_PAGES),
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        module.section(&memory);

        // 4. Global section
        let mut globals = GlobalSection::new();
        // GLOBAL_HEAP_PTR
        globals.global(
            GlobalType {
                val_type: ValType::I32,
                mutable: true,
                shared: false,
            },
            &ConstExpr::i32_const(HEAP_START as i32),
        );
        // GLOBAL_LIVE_BYTES
        globals.global(
            GlobalType {
                val_type: ValType::I32,
                mutable: true,
                shared: false,
            },
            &ConstExpr::i32_const(0),
        );
        module.section(&globals);

        // 5. Export section
        let mut exports = ExportSection::new();
        exports.export(MEMORY_EXPORT, ExportKind::Memory, 0);
        for (index, func) in self.functions.iter().enumerate() {
            if let Some(name) = &func.export {
                exports.export(name, ExportKind::Func, index as u32);
            }
        }
        module.section(&exports);

        // 6. Code section
        let mut code = CodeSection::new();
        for func in &self.functions {
            code.function(&func.body);
        }
        module.section(&code);

        // 7. Data section
        if !self.data.is_empty() {
            let mut data_sec = DataSection::new();
            data_sec.active(
                0,
                &ConstExpr::i32_const(DATA_START as i32),
                self.data.data_bytes().iter().copied(),
            );
            module.section(&data_sec);
        }

        // 8. Custom section (signature metadata)
        if let Some(name) = &self.metadata_section {
            let payload = self
                .signatures
                .to_json()
                .map_err(|e| CodegenError::Metadata(e.to_string()))?;
            module.section(&CustomSection {
                name: Cow::Borrowed(name.as_str()),
                data: Cow::Owned(payload),
            });
        }

        let wasm_bytes = module.finish();

        // 9. Validate
        wasmparser::validate(&wasm_bytes)
            .map_err(|e| CodegenError::ValidationFailed(format!("{e}")))?;

        Ok(wasm_bytes)
    }
}
