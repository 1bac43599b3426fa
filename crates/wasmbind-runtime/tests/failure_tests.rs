//! Error paths: every failure surfaces with the right kind, and owned guest
//! buffers are still released.

use std::sync::Arc;

use wasm_encoder::{
    CustomSection, EntityType, ExportKind, ExportSection, ImportSection, MemorySection, MemoryType,
    Module, TypeSection, ValType,
};
use wasmbind_codegen::{demos, ModuleBuilder};
use wasmbind_runtime::{
    Arg, Array, BindError, BindingConfig, BindingContext, Dispatcher, ErrorKind, ExportSignature,
    ParamKind, RawValue, ReturnKind, ScalarKind, Value,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn context() -> BindingContext {
    BindingContext::new(BindingConfig::default()).expect("valid config")
}

fn bind(wasm: &[u8]) -> Dispatcher {
    context().bind(wasm).expect("module binds")
}

fn live_bytes(guest: &mut Dispatcher) -> u32 {
    guest
        .instance_mut()
        .live_bytes()
        .unwrap()
        .expect("reference modules export the live probe")
}

/// A module with one exported memory page and a `wasmbind` section holding
/// `metadata`.
fn module_with_metadata(metadata: &[u8]) -> Vec<u8> {
    let mut module = Module::new();
    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: 1,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);
    let mut exports = ExportSection::new();
    exports.export("memory", ExportKind::Memory, 0);
    module.section(&exports);
    module.section(&CustomSection {
        name: "wasmbind".into(),
        data: metadata.into(),
    });
    module.finish()
}

// ══════════════════════════════════════════════════════════════════════════════
// Caller contract
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn argument_mismatch_allocates_nothing() {
    let mut guest = bind(&demos::boolean_test().unwrap());

    let cases = vec![
        ("count_booleans", vec![Value::I32(3)]),
        ("count_booleans", vec![]),
        ("count_booleans", vec![Value::Array(Array::from(vec![1i32]))]),
        ("bits_within", vec![Value::I32(256)]),
        ("bits_within", vec![Value::Bool(true)]),
        ("is_sum_even", vec![Value::Array(Array::from(vec![1i32])), Value::I32(0)]),
    ];
    for (name, args) in cases {
        let err = guest.invoke(name, args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentMismatch, "{name}: {err}");
        assert!(!err.is_fatal());
    }
    assert_eq!(guest.allocations().allocations(), 0);
    assert_eq!(live_bytes(&mut guest), 0);
}

#[test]
fn in_place_parameter_needs_a_mutable_array() {
    let mut guest = bind(&demos::simple_summation().unwrap());
    let err = guest
        .invoke("product_in_place", vec![Value::Array(Array::from(vec![1u8]))])
        .unwrap_err();
    assert!(
        err.to_string().contains("expected &mut [u8], got [u8]"),
        "{err}"
    );

    let mut wrong_kind = Array::from(vec![1u16]);
    let err = guest
        .call("product_in_place", &mut [Arg::InOut(&mut wrong_kind)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentMismatch);
    assert_eq!(guest.allocations().allocations(), 0);
}

#[test]
fn legacy_call_without_output_array_is_rejected() {
    let mut guest = bind(&demos::diagnostics().unwrap());
    let err = guest
        .invoke("product_into", vec![Value::Array(Array::from(vec![1u8]))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentMismatch);
    assert_eq!(live_bytes(&mut guest), 0);
}

#[test]
fn unknown_export() {
    let mut guest = bind(&demos::diagnostics().unwrap());
    let err = guest.invoke("nope", vec![]).unwrap_err();
    assert!(matches!(err, BindError::ExportNotFound(ref name) if name == "nope"));

    // builtins are never wrapped
    let err = guest.invoke("builtin_alloc", vec![Value::I32(8)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExportNotFound);
}

// ══════════════════════════════════════════════════════════════════════════════
// Traps
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn trap_carries_export_and_raw_args() {
    let mut guest = bind(&demos::diagnostics().unwrap());
    let err = guest
        .invoke("divide", vec![Value::I32(7), Value::I32(0)])
        .unwrap_err();
    match &err {
        BindError::Trap { export, args, .. } => {
            assert_eq!(export, "__wasmbind_divide");
            assert_eq!(args, &vec![RawValue::I32(7), RawValue::I32(0)]);
        }
        other => panic!("expected a trap, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(err.to_string().starts_with("`__wasmbind_divide(7i32, 0i32)` trapped"), "{err}");
}

#[test]
fn unreachable_and_out_of_bounds_trap() {
    let mut guest = bind(&demos::diagnostics().unwrap());

    let err = guest.invoke("crash", vec![]).unwrap_err();
    assert!(matches!(err, BindError::Trap { ref args, .. } if args.is_empty()));

    // u32 argument lowers to its bit pattern
    let err = guest
        .invoke("peek", vec![Value::I64(4_000_000_000)])
        .unwrap_err();
    match err {
        BindError::Trap { args, .. } => {
            assert_eq!(args, vec![RawValue::I32(4_000_000_000u32 as i32)]);
        }
        other => panic!("expected a trap, got {other:?}"),
    }
    assert_eq!(live_bytes(&mut guest), 0);
}

#[test]
fn trap_after_allocation_still_releases_arguments() {
    use wasm_encoder::{Function, Instruction};

    let mut crash = Function::new(vec![]);
    crash.instruction(&Instruction::Unreachable);
    crash.instruction(&Instruction::End);
    let mut b = ModuleBuilder::new();
    b.export(
        ExportSignature::new("explode", vec![ParamKind::Str], ReturnKind::Unit),
        crash,
    )
    .unwrap();
    let mut guest = bind(&b.finish().unwrap());

    let err = guest
        .invoke("explode", vec![Value::Str("boom".into())])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Trap);
    assert_eq!(guest.allocations().allocations(), 1);
    assert_eq!(guest.allocations().releases(), 1);
    assert_eq!(live_bytes(&mut guest), 0);
}

// ══════════════════════════════════════════════════════════════════════════════
// Decoding and allocation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn invalid_utf8_is_an_encoding_error_and_frees_the_buffer() {
    let mut guest = bind(&demos::diagnostics().unwrap());
    let err = guest.invoke("bad_utf8", vec![]).unwrap_err();
    assert!(matches!(err, BindError::Encoding { ref export, .. } if export == "__wasmbind_bad_utf8"));
    assert!(!err.is_fatal());

    // data buffer and descriptor
    assert_eq!(guest.allocations().allocations(), 2);
    assert_eq!(guest.allocations().outstanding(), 0);
    assert_eq!(live_bytes(&mut guest), 0);
}

#[test]
fn malformed_decimal_is_an_encoding_error() {
    let mut guest = bind(&demos::diagnostics().unwrap());
    let err = guest.invoke("bad_decimal", vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    assert!(err.to_string().contains("\"12x\""), "{err}");
    assert_eq!(live_bytes(&mut guest), 0);
}

#[test]
fn oversized_argument_fails_to_allocate() {
    let mut guest = bind(&demos::hello_world_strings().unwrap());
    // the reference modules cap memory at 16 MiB
    let huge = "x".repeat(17 << 20);
    let err = guest.invoke("hello_x", vec![Value::Str(huge)]).unwrap_err();
    assert!(
        matches!(err, BindError::Allocation { requested, .. } if requested == 17 << 20),
        "{err}"
    );
    assert_eq!(guest.allocations().outstanding(), 0);
    assert_eq!(live_bytes(&mut guest), 0);

    // the instance is still usable
    assert_eq!(
        guest.invoke("hello_x", vec!["ok".into()]).unwrap(),
        Value::Str("Hello, ok!".into())
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Loading and planning
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn malformed_bytes_fail_to_compile() {
    let err = context().load(b"\0asm\x01\0\0\0garbage").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
}

#[test]
fn unsatisfied_import_fails_to_instantiate() {
    let mut module = Module::new();
    let mut types = TypeSection::new();
    let none: [ValType; 0] = [];
    types.ty().function(none, none);
    module.section(&types);
    let mut imports = ImportSection::new();
    imports.import("env", "missing", EntityType::Function(0));
    module.section(&imports);

    let err = context().instantiate(&module.finish()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Instantiation);
    assert!(err.is_fatal());
}

#[test]
fn module_without_memory_fails_to_instantiate() {
    let err = context().instantiate(&Module::new().finish()).unwrap_err();
    assert!(matches!(err, BindError::Instantiation(ref msg) if msg.contains("memory")));
}

#[test]
fn metadata_must_parse_and_match_version() {
    let err = context().load(&module_with_metadata(b"{not json")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Metadata);

    let err = context()
        .load(&module_with_metadata(br#"{"version":2,"exports":[]}"#))
        .unwrap_err();
    assert!(err.to_string().contains("version 2"), "{err}");

    let module = context()
        .load(&module_with_metadata(br#"{"version":1,"exports":[]}"#))
        .unwrap();
    assert_eq!(module.signatures().map(|t| t.exports.len()), Some(0));
}

#[test]
fn metadata_disagreeing_with_export_type() {
    let err = context()
        .bind(&demos::mismatched_metadata().unwrap())
        .unwrap_err();
    match err {
        BindError::InvalidSignature { export, reason } => {
            assert_eq!(export, "__wasmbind_sum");
            assert!(reason.contains("(i32) -> (i32)"), "{reason}");
        }
        other => panic!("expected InvalidSignature, got {other:?}"),
    }
}

#[test]
fn metadata_entry_without_export() {
    let mut b = ModuleBuilder::new();
    b.declare(ExportSignature::new(
        "ghost",
        vec![],
        ReturnKind::Scalar(ScalarKind::I32),
    ))
    .unwrap();
    let err = context().bind(&b.finish().unwrap()).unwrap_err();
    assert!(
        matches!(err, BindError::InvalidSignature { ref export, .. } if export == "__wasmbind_ghost"),
        "{err}"
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Context
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn identical_bytes_share_a_compiled_module() {
    let wasm = demos::fibonacci().unwrap();
    let mut ctx = context();
    let a = ctx.load(&wasm).unwrap();
    let b = ctx.load(&wasm).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(ctx.cache_size(), 1);

    ctx.load(&demos::boolean_test().unwrap()).unwrap();
    assert_eq!(ctx.cache_size(), 2);
    ctx.clear_cache();
    assert_eq!(ctx.cache_size(), 0);
}

#[test]
fn instances_of_one_module_have_separate_memory() {
    let wasm = demos::hello_world_strings().unwrap();
    let mut ctx = context();
    let mut first = ctx.bind(&wasm).unwrap();
    let second = ctx.bind(&wasm).unwrap();
    assert_eq!(ctx.cache_size(), 1);

    first
        .invoke("hello_x", vec!["x".repeat(200_000).into()])
        .unwrap();
    assert!(first.instance().memory_len() > second.instance().memory_len());
}

#[test]
fn caching_can_be_disabled() {
    let wasm = demos::fibonacci().unwrap();
    let mut ctx = BindingContext::new(BindingConfig::default().with_cache(false)).unwrap();
    let a = ctx.load(&wasm).unwrap();
    let b = ctx.load(&wasm).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.digest(), b.digest());
    assert_eq!(ctx.cache_size(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let err = BindingContext::new(BindingConfig::default().with_max_memory_pages(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
