//! Per-export call plans and the host-facing call path.
//!
//! A [`Dispatcher`] owns one [`Instance`]. At construction it walks the
//! module's exports carrying the configured prefix and builds a [`CallPlan`]
//! for each, from the embedded signature table when it has an entry and from
//! the export's scalar-only core type otherwise. Every plan is checked
//! against the export's real function type up front, so a call never
//! discovers a signature mismatch halfway through encoding.
//!
//! A call runs: check arguments → encode → invoke → write back in-place
//! arrays → decode → release every owned buffer, on success and on failure.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace, warn};
use wasmbind_types::abi::BUILTIN_PREFIX;
use wasmbind_types::{
    Array, CoreType, ExportSignature, ParamKind, ReturnKind, ScalarKind, Value,
};

use crate::alloc::AllocationManager;
use crate::codec::ValueCodec;
use crate::config::BindingConfig;
use crate::error::{BindError, BindResult};
use crate::instance::{ExportShape, Instance};

// ══════════════════════════════════════════════════════════════════════════════
// Host arguments
// ══════════════════════════════════════════════════════════════════════════════

/// One host argument.
#[derive(Debug)]
pub enum Arg<'a> {
    /// Passed by value.
    In(Value),
    /// A caller-owned array the call writes into: in-place slices and legacy
    /// output arrays.
    InOut(&'a mut Array),
}

impl Arg<'_> {
    /// The array behind an array argument, by value or in-place.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Arg::In(Value::Array(array)) => Some(array),
            Arg::InOut(array) => Some(&**array),
            Arg::In(_) => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Arg::In(value) => value.kind().to_string(),
            Arg::InOut(array) => format!("a mutable array of {}", array.kind()),
        }
    }
}

impl From<Value> for Arg<'_> {
    fn from(value: Value) -> Self {
        Arg::In(value)
    }
}

impl<'a> From<&'a mut Array> for Arg<'a> {
    fn from(array: &'a mut Array) -> Self {
        Arg::InOut(array)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Call plans
// ══════════════════════════════════════════════════════════════════════════════

/// Where a plan's signature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// The module's signature table.
    Metadata,
    /// Derived from a scalar-only core function type.
    Convention,
}

/// Everything needed to call one export, computed once.
#[derive(Debug, Clone)]
pub struct CallPlan {
    signature: ExportSignature,
    export: String,
    source: PlanSource,
    alloc_slots: Vec<usize>,
    inout_slots: Vec<usize>,
    core_params: Vec<CoreType>,
    core_results: Vec<CoreType>,
}

impl CallPlan {
    fn build(
        export: &str,
        signature: ExportSignature,
        source: PlanSource,
        shape: &ExportShape,
    ) -> BindResult<Self> {
        signature
            .validate()
            .map_err(|e| BindError::signature(export, e.to_string()))?;

        let core_params = signature.core_params();
        let core_results = signature.core_results();
        if core_params != shape.params || core_results != shape.results {
            return Err(BindError::signature(
                export,
                format!(
                    "`{signature}` lowers to ({}) -> ({}), but the export has type ({}) -> ({})",
                    type_list(&core_params),
                    type_list(&core_results),
                    type_list(&shape.params),
                    type_list(&shape.results),
                ),
            ));
        }

        let slots = |pred: fn(&ParamKind) -> bool| -> Vec<usize> {
            signature
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| pred(p))
                .map(|(i, _)| i)
                .collect()
        };
        let alloc_slots = slots(ParamKind::needs_allocation);
        let inout_slots = slots(|p| matches!(p, ParamKind::SliceMut(_)));

        Ok(Self {
            export: export.to_string(),
            source,
            alloc_slots,
            inout_slots,
            core_params,
            core_results,
            signature,
        })
    }

    pub fn signature(&self) -> &ExportSignature {
        &self.signature
    }

    /// Full export name, prefix included.
    pub fn export(&self) -> &str {
        &self.export
    }

    pub fn source(&self) -> PlanSource {
        self.source
    }

    /// Parameter slots whose encoding allocates guest memory.
    pub fn alloc_slots(&self) -> &[usize] {
        &self.alloc_slots
    }

    /// Parameter slots written back after the call.
    pub fn inout_slots(&self) -> &[usize] {
        &self.inout_slots
    }

    pub fn core_params(&self) -> &[CoreType] {
        &self.core_params
    }

    pub fn core_results(&self) -> &[CoreType] {
        &self.core_results
    }
}

fn type_list(types: &[CoreType]) -> String {
    types
        .iter()
        .map(CoreType::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scalar signature for an export with no metadata entry.
fn convention_signature(export: &str, name: &str, shape: &ExportShape) -> BindResult<ExportSignature> {
    let kind = |ty: CoreType| match ty {
        CoreType::I32 => ScalarKind::I32,
        CoreType::I64 => ScalarKind::I64,
        CoreType::F32 => ScalarKind::F32,
        CoreType::F64 => ScalarKind::F64,
    };
    let ret = match shape.results.as_slice() {
        [] => ReturnKind::Unit,
        [ty] => ReturnKind::Scalar(kind(*ty)),
        many => {
            return Err(BindError::signature(
                export,
                format!("{} results cannot be derived without metadata", many.len()),
            ))
        }
    };
    let params = shape
        .params
        .iter()
        .map(|&ty| ParamKind::Scalar(kind(ty)))
        .collect();
    Ok(ExportSignature::new(name, params, ret))
}

// ══════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ══════════════════════════════════════════════════════════════════════════════

/// Routes host calls through the codec and the raw exports of one instance.
pub struct Dispatcher {
    instance: Instance,
    codec: ValueCodec,
    plans: BTreeMap<String, CallPlan>,
    allocs: AllocationManager,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("instance", &self.instance)
            .field("exports", &self.plans.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dispatcher {
    /// Plan every wrapped export of `instance`.
    pub fn new(instance: Instance, config: &BindingConfig) -> BindResult<Self> {
        let module = instance.module().clone();
        let prefix = config.export_prefix.as_str();
        let mut plans = BTreeMap::new();

        for (export, shape) in module.exports() {
            if export.starts_with(BUILTIN_PREFIX) {
                continue;
            }
            let Some(name) = export.strip_prefix(prefix) else {
                continue;
            };
            let (signature, source) = match module.signatures().and_then(|t| t.get(name)) {
                Some(declared) => (declared.clone(), PlanSource::Metadata),
                None => (
                    convention_signature(export, name, shape)?,
                    PlanSource::Convention,
                ),
            };
            let plan = CallPlan::build(export, signature, source, shape)?;
            debug!(export = %export, signature = %plan.signature, source = ?source, "planned export");
            plans.insert(name.to_string(), plan);
        }

        if let Some(table) = module.signatures() {
            if let Some(orphan) = table.exports.iter().find(|s| !plans.contains_key(&s.name)) {
                return Err(BindError::signature(
                    &format!("{prefix}{}", orphan.name),
                    "declared in metadata but not exported",
                ));
            }
        }

        Ok(Self {
            instance,
            codec: ValueCodec::new(config.access_style),
            plans,
            allocs: AllocationManager::new(),
        })
    }

    /// Call `name` (without prefix) with host arguments.
    ///
    /// Arguments are checked before anything is allocated. Owned buffers are
    /// released whether or not the call succeeds.
    pub fn call(&mut self, name: &str, args: &mut [Arg<'_>]) -> BindResult<Value> {
        let Self {
            instance,
            codec,
            plans,
            allocs,
        } = self;
        let plan = plans
            .get(name)
            .ok_or_else(|| BindError::ExportNotFound(name.to_string()))?;
        check_args(plan, args)?;

        trace!(export = %plan.export, args = args.len(), "dispatching call");
        let result = run(plan, codec, instance, allocs, args);
        let cleanup = allocs.release_all(instance);

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(export = %plan.export, error = %cleanup, "cleanup failed after call error");
                Err(e)
            }
        }
    }

    /// Call with by-value arguments only.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> BindResult<Value> {
        let mut args: Vec<Arg<'_>> = args.into_iter().map(Arg::In).collect();
        self.call(name, &mut args)
    }

    pub fn plan(&self, name: &str) -> Option<&CallPlan> {
        self.plans.get(name)
    }

    /// Wrapped export names, without prefix.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    pub fn allocations(&self) -> &AllocationManager {
        &self.allocs
    }

    pub fn into_instance(self) -> Instance {
        self.instance
    }
}

fn check_args(plan: &CallPlan, args: &[Arg<'_>]) -> BindResult<()> {
    let sig = &plan.signature;
    if args.len() != sig.host_arity() {
        return Err(BindError::mismatch(
            &plan.export,
            format!(
                "`{sig}` takes {} arguments, got {}",
                sig.host_arity(),
                args.len()
            ),
        ));
    }
    for (i, (param, arg)) in sig.params.iter().zip(args).enumerate() {
        ValueCodec::check_arg(&plan.export, i, *param, arg)?;
    }
    if sig.is_legacy() {
        let index = sig.params.len();
        let expected = match sig.ret {
            ReturnKind::Vec(kind) => kind,
            _ => return Err(BindError::signature(&plan.export, "legacy output needs a Vec return")),
        };
        match &args[index] {
            Arg::InOut(out) if out.kind() == expected => {}
            other => {
                return Err(BindError::mismatch(
                    &plan.export,
                    format!(
                        "argument {index}: expected an output array of {expected}, got {}",
                        other.describe()
                    ),
                ))
            }
        }
    }
    Ok(())
}

fn run(
    plan: &CallPlan,
    codec: &ValueCodec,
    instance: &mut Instance,
    allocs: &mut AllocationManager,
    args: &mut [Arg<'_>],
) -> BindResult<Value> {
    let sig = &plan.signature;
    let mut raw_args = Vec::with_capacity(plan.core_params.len());
    let mut handles = Vec::with_capacity(sig.params.len());
    for (param, arg) in sig.params.iter().zip(args.iter()) {
        let encoded = codec.encode_param(&plan.export, instance, allocs, *param, arg)?;
        raw_args.extend(encoded.raw);
        handles.push(encoded.handle);
    }

    let raw = instance.call(&plan.export, &raw_args)?;

    for &slot in &plan.inout_slots {
        if let (Some(handle), Arg::InOut(target)) = (handles[slot], &mut args[slot]) {
            codec.write_back(&plan.export, instance, allocs, handle, target)?;
        }
    }

    let value = codec.decode_result(&plan.export, instance, allocs, sig.ret, &raw)?;
    if !sig.is_legacy() {
        return Ok(value);
    }

    let (Some(Arg::InOut(out)), Value::Array(result)) = (args.last_mut(), value) else {
        return Err(BindError::encoding(&plan.export, "legacy output was not an array"));
    };
    out.assign(result)
        .map_err(|e| BindError::encoding(&plan.export, e.to_string()))?;
    Ok(Value::Unit)
}
