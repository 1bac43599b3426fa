//! End-to-end calls through the dispatcher against the reference modules.
//!
//! Every test runs under each memory access style the host supports, and
//! checks that no guest bytes stay allocated once the call returns.

use wasmbind_codegen::demos;
use wasmbind_runtime::{
    AccessStyle, Arg, Array, BindingConfig, BindingContext, Dispatcher, PlanSource, ScalarKind,
    Value,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Native access is only meaningful on little-endian hosts.
fn styles() -> Vec<AccessStyle> {
    if cfg!(target_endian = "little") {
        vec![AccessStyle::LittleEndian, AccessStyle::Native]
    } else {
        vec![AccessStyle::LittleEndian]
    }
}

fn bind(wasm: &[u8], style: AccessStyle) -> Dispatcher {
    let config = BindingConfig::default().with_access_style(style);
    let mut ctx = BindingContext::new(config).expect("valid config");
    ctx.bind(wasm).expect("module binds")
}

fn assert_no_leaks(guest: &mut Dispatcher) {
    assert_eq!(guest.allocations().outstanding(), 0, "outstanding host handles");
    assert_eq!(
        guest.allocations().allocations(),
        guest.allocations().releases()
    );
    assert_eq!(
        guest.instance_mut().live_bytes().unwrap(),
        Some(0),
        "guest bytes still allocated"
    );
}

fn array<T>(items: Vec<T>) -> Value
where
    Array: From<Vec<T>>,
{
    Value::Array(Array::from(items))
}

// ══════════════════════════════════════════════════════════════════════════════
// boolean_test
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn count_booleans_counts_true_values() {
    for style in styles() {
        let mut guest = bind(&demos::boolean_test().unwrap(), style);
        let input = array(vec![true, false, true, true, false, false, true]);
        assert_eq!(guest.invoke("count_booleans", vec![input]).unwrap(), Value::I32(4));
        assert_eq!(
            guest.invoke("count_booleans", vec![array(Vec::<bool>::new())]).unwrap(),
            Value::I32(0)
        );
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn is_sum_even_matches_exact_parity() {
    let input = vec![123312312i32, 14910241, 1231241290];
    let exact: i64 = input.iter().map(|&v| v as i64).sum();

    for style in styles() {
        let mut guest = bind(&demos::boolean_test().unwrap(), style);
        assert_eq!(
            guest.invoke("is_sum_even", vec![array(input.clone())]).unwrap(),
            Value::Bool(exact % 2 == 0)
        );
        assert_eq!(
            guest.invoke("is_sum_even", vec![array(vec![1i32, 3])]).unwrap(),
            Value::Bool(true)
        );
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn bits_within_is_a_popcount() {
    let mut guest = bind(&demos::boolean_test().unwrap(), AccessStyle::LittleEndian);
    assert_eq!(
        guest.invoke("bits_within", vec![Value::I32(250)]).unwrap(),
        Value::I32(250u8.count_ones() as i32)
    );
    assert_eq!(
        guest.invoke("bits_within", vec![Value::I32(0)]).unwrap(),
        Value::I32(0)
    );
}

#[test]
fn bits_of_returns_bool_vector() {
    for style in styles() {
        let mut guest = bind(&demos::boolean_test().unwrap(), style);
        let bits = guest.invoke("bits_of", vec![Value::I32(0b1010_0001)]).unwrap();
        assert_eq!(
            bits,
            array(vec![true, false, true, false, false, false, false, true])
        );
        assert_no_leaks(&mut guest);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// fibonacci
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn fib_small_values() {
    let mut guest = bind(&demos::fibonacci().unwrap(), AccessStyle::LittleEndian);
    let mut fib = |n: i32| guest.invoke("fib", vec![Value::I32(n)]).unwrap();
    assert_eq!(fib(0), Value::I64(0));
    assert_eq!(fib(1), Value::I64(1));
    assert_eq!(fib(20), Value::I64(6765));
    assert_eq!(fib(92), Value::I64(7540113804746346429));
    assert_eq!(fib(93), Value::I64(i64::MAX));
}

#[test]
fn fib_accepts_wide_integer_for_u32() {
    let mut guest = bind(&demos::fibonacci().unwrap(), AccessStyle::LittleEndian);
    assert_eq!(
        guest.invoke("fib", vec![Value::I64(20)]).unwrap(),
        Value::I64(6765)
    );
}

#[test]
fn fib_str_saturates_to_exact_digits() {
    for style in styles() {
        let mut guest = bind(&demos::fibonacci().unwrap(), style);
        let mut fib_str = |n: i32| guest.invoke("fib_str", vec![Value::I32(n)]).unwrap();
        assert_eq!(fib_str(0), Value::BigDecimal("0".into()));
        assert_eq!(fib_str(20), Value::BigDecimal("6765".into()));
        assert_eq!(fib_str(93), Value::BigDecimal("12200160415121876738".into()));
        assert_eq!(
            fib_str(200),
            Value::BigDecimal(u64::MAX.to_string()),
            "fib(200) saturates instead of wrapping"
        );
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn all_lists_the_sequence() {
    for style in styles() {
        let mut guest = bind(&demos::fibonacci().unwrap(), style);
        assert_eq!(
            guest.invoke("all", vec![Value::I32(8)]).unwrap(),
            array(vec![1i64, 1, 2, 3, 5, 8, 13, 21])
        );
        assert_eq!(
            guest.invoke("all", vec![Value::I32(0)]).unwrap(),
            Value::Array(Array::new(ScalarKind::I64))
        );
        assert_no_leaks(&mut guest);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// hello_world_strings
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn strings_roundtrip() {
    for style in styles() {
        let mut guest = bind(&demos::hello_world_strings().unwrap(), style);
        assert_eq!(
            guest.invoke("hello_world", vec![]).unwrap(),
            Value::Str("Hello, world!".into())
        );
        for name in ["wasm", "", "wörld 🦀"] {
            assert_eq!(
                guest.invoke("hello_x", vec![name.into()]).unwrap(),
                Value::Str(format!("Hello, {name}!"))
            );
        }
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn growth_mid_call_keeps_argument_bytes() {
    for style in styles() {
        let mut guest = bind(&demos::hello_world_strings().unwrap(), style);
        let before = guest.instance().memory_len();

        // larger than the initial memory, and the result needs more again
        let name: String = (0..300_000).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let greeting = guest.invoke("hello_x", vec![name.as_str().into()]).unwrap();

        assert_eq!(greeting, Value::Str(format!("Hello, {name}!")));
        assert!(guest.instance().memory_len() > before);
        assert!(guest.instance().epoch() > 0);
        assert_no_leaks(&mut guest);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// simple_summation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn sum_wraps_like_the_guest() {
    let mut guest = bind(&demos::simple_summation().unwrap(), AccessStyle::LittleEndian);
    assert_eq!(
        guest.invoke("sum", vec![array(vec![1u32, 2, 3])]).unwrap(),
        Value::I32(6)
    );
    assert_eq!(
        guest.invoke("sum", vec![array(vec![u32::MAX, 2])]).unwrap(),
        Value::I32(1)
    );
    assert_no_leaks(&mut guest);
}

#[test]
fn float_product_multiplies() {
    for style in styles() {
        let mut guest = bind(&demos::simple_summation().unwrap(), style);
        assert_eq!(
            guest
                .invoke("float_product", vec![array(vec![1.5f64, 2.0, 4.0])])
                .unwrap(),
            Value::F64(12.0)
        );
        assert_eq!(
            guest.invoke("float_product", vec![array(Vec::<f64>::new())]).unwrap(),
            Value::F64(1.0)
        );
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn in_place_and_new_agree() {
    let input = vec![1u8, 2, 100, 200];
    for style in styles() {
        let mut guest = bind(&demos::simple_summation().unwrap(), style);

        let mut in_place = Array::from(input.clone());
        let ret = guest
            .call("product_in_place", &mut [Arg::InOut(&mut in_place)])
            .unwrap();
        assert_eq!(ret, Value::Unit);
        assert_eq!(in_place.len(), input.len());

        let fresh = guest.invoke("product_new", vec![array(input.clone())]).unwrap();
        assert_eq!(fresh, Value::Array(in_place.clone()));
        assert_eq!(Value::Array(in_place), array(vec![2u8, 4, 200, 144]));
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn empty_arrays_cross_both_ways() {
    let mut guest = bind(&demos::simple_summation().unwrap(), AccessStyle::LittleEndian);
    assert_eq!(
        guest.invoke("product_new", vec![array(Vec::<u8>::new())]).unwrap(),
        Value::Array(Array::new(ScalarKind::U8))
    );
    let mut empty = Array::new(ScalarKind::U8);
    guest
        .call("product_in_place", &mut [Arg::InOut(&mut empty)])
        .unwrap();
    assert!(empty.is_empty());
    assert_no_leaks(&mut guest);
}

#[test]
#[cfg(target_endian = "little")]
fn access_styles_leave_identical_memory() {
    let wasm = demos::simple_summation().unwrap();
    let snapshot = |style: AccessStyle| {
        let mut guest = bind(&wasm, style);
        let mut bytes = Array::from(vec![9u8, 8, 7]);
        guest
            .call("product_in_place", &mut [Arg::InOut(&mut bytes)])
            .unwrap();
        guest
            .invoke("float_product", vec![array(vec![0.5f64, -3.0])])
            .unwrap();
        guest
            .invoke("sum", vec![array(vec![7u32, 0xdead_beef])])
            .unwrap();
        let instance = guest.instance_mut();
        let len = instance.memory_len() as u32;
        let bytes = instance.view(style).read_bytes(0, len).unwrap();
        bytes
    };
    assert_eq!(
        snapshot(AccessStyle::Native),
        snapshot(AccessStyle::LittleEndian)
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// diagnostics: conventions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn plans_cover_every_wrapped_export() {
    let guest = bind(&demos::diagnostics().unwrap(), AccessStyle::LittleEndian);
    let names: Vec<&str> = guest.exports().collect();
    assert_eq!(
        names,
        vec![
            "add",
            "bad_decimal",
            "bad_utf8",
            "crash",
            "divide",
            "peek",
            "product_into"
        ]
    );
    assert_eq!(guest.plan("divide").unwrap().source(), PlanSource::Metadata);
    assert_eq!(guest.plan("add").unwrap().source(), PlanSource::Convention);
    assert_eq!(guest.plan("add").unwrap().export(), "__wasmbind_add");
}

#[test]
fn convention_export_without_metadata() {
    let mut guest = bind(&demos::diagnostics().unwrap(), AccessStyle::LittleEndian);
    assert_eq!(
        guest.invoke("add", vec![Value::I32(2), Value::I32(40)]).unwrap(),
        Value::I32(42)
    );
}

#[test]
fn legacy_output_array_is_filled() {
    for style in styles() {
        let mut guest = bind(&demos::diagnostics().unwrap(), style);
        let mut out = Array::from(vec![0u8]);
        let ret = guest
            .call(
                "product_into",
                &mut [array(vec![1u8, 2, 3]).into(), Arg::InOut(&mut out)],
            )
            .unwrap();
        assert_eq!(ret, Value::Unit);
        assert_eq!(out, Array::from(vec![2u8, 4, 6]));
        assert_no_leaks(&mut guest);
    }
}

#[test]
fn custom_metadata_section_name() {
    use wasmbind_codegen::ModuleBuilder;
    use wasmbind_runtime::{ExportSignature, ParamKind, ReturnKind};
    use wasm_encoder::{Function, Instruction};

    // (ptr, len) -> len
    let mut body = Function::new(vec![]);
    body.instruction(&Instruction::LocalGet(1));
    body.instruction(&Instruction::End);

    let mut b = ModuleBuilder::new().with_metadata_section("abi");
    b.export(
        ExportSignature::new(
            "count",
            vec![ParamKind::Slice(ScalarKind::U16)],
            ReturnKind::Scalar(ScalarKind::I32),
        ),
        body,
    )
    .unwrap();
    let wasm = b.finish().unwrap();

    // under the default name the section is invisible; only raw i32s work
    let mut raw = bind(&wasm, AccessStyle::LittleEndian);
    assert_eq!(raw.plan("count").unwrap().source(), PlanSource::Convention);

    let config = BindingConfig::default().with_metadata_section("abi");
    let mut ctx = BindingContext::new(config).unwrap();
    let mut guest = ctx.bind(&wasm).unwrap();
    assert_eq!(guest.plan("count").unwrap().source(), PlanSource::Metadata);
    assert_eq!(
        guest.invoke("count", vec![array(vec![1u16, 2, 3])]).unwrap(),
        Value::I32(3)
    );
    assert_no_leaks(&mut guest);
    assert_no_leaks(&mut raw);
}
