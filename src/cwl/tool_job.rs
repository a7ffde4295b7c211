//! Executes one CWL tool: resolve inputs, check the conditional, fill
//! defaults, compute resource requirements, invoke the tool-runtime
//! collaborator, and re-import its outputs. Mirrors the job-execution shape
//! this codebase already used for its own background jobs, but runs
//! directly under the workflow translator rather than through the generic
//! job registry — a tool invocation is identified by the step that built it,
//! never looked up by name.

use std::collections::BTreeMap;

use dispatch_system::AcceleratorRequirement;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, ToolRuntimeContext};
use crate::cwl::model::CwlValue;
use crate::cwl::path_mapper::PathMapperError;
use crate::cwl::resolve::{resolve_bindings, InputBinding, ResolveError, ResultsMap};
use crate::cwl::staging::{self, ImportMaps, ImportOptions, StagingError};
use crate::jobs::context::JobCollaborators;
use crate::jobs::dispatcher_bridge::BridgeError;

#[derive(Debug, Error)]
pub enum ToolJobError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),
	#[error(transparent)]
	Staging(#[from] StagingError),
	#[error(transparent)]
	PathMapper(#[from] PathMapperError),
	#[error(transparent)]
	Collaborator(#[from] CollaboratorError),
	#[error(transparent)]
	Dispatch(#[from] BridgeError),
	#[error("when-condition did not evaluate to a boolean: {0}")]
	NonBooleanConditional(serde_json::Value),
	#[error("resource expression for {field} did not evaluate to a number: {value}")]
	NonNumericResource { field: &'static str, value: serde_json::Value },
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("tool runtime reported failure: {0}")]
	RuntimeFailure(String),
}

/// A resource field that is either a fixed number or a CWL expression,
/// evaluated once every other input is resolved. `UsePreemptible` is never an
/// expression — modeling it as a plain bool rather than a third string
/// variant makes that a structural guarantee instead of a runtime check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceExpressions {
	pub cores: Option<String>,
	pub ram_mib: Option<String>,
	pub tmpdir_mib: Option<String>,
	pub outdir_mib: Option<String>,
	pub cuda_device_count: Option<String>,
	pub use_preemptible: bool,
}

impl ResourceExpressions {
	/// True if any field holds a CWL expression rather than a bare constant.
	/// The translator uses this to decide whether a step needs a
	/// [`super::translator::JobWrapper`] indirection before it can dispatch.
	pub fn has_expression(&self) -> bool {
		[&self.cores, &self.ram_mib, &self.tmpdir_mib, &self.outdir_mib, &self.cuda_device_count]
			.into_iter()
			.any(|f| f.as_deref().is_some_and(has_expression_syntax))
	}
}

fn has_expression_syntax(s: &str) -> bool {
	s.contains("$(") || s.contains("${")
}

const DEFAULT_CORES: f64 = 1.0;
const DEFAULT_RAM_MIB: f64 = 1024.0;
const DEFAULT_TMPDIR_MIB: f64 = 1024.0;
const DEFAULT_OUTDIR_MIB: f64 = 1024.0;
const MIB: u64 = 1024 * 1024;

/// Concrete resource numbers, ready to hand to a scheduler.
#[derive(Debug, Clone)]
pub struct ResolvedResources {
	pub cores: f64,
	pub ram_bytes: u64,
	pub disk_bytes: u64,
	pub accelerators: Vec<AcceleratorRequirement>,
	pub preemptible: bool,
}

/// The outcome of running one tool job: either its output object, or — if
/// `when` evaluated false — the distinguished skip record every declared
/// output port gets instead.
#[derive(Debug, Clone)]
pub enum ToolJobOutput {
	Completed(BTreeMap<String, CwlValue>),
	Skipped(BTreeMap<String, CwlValue>),
}

impl ToolJobOutput {
	pub fn into_record(self) -> BTreeMap<String, CwlValue> {
		match self {
			ToolJobOutput::Completed(r) | ToolJobOutput::Skipped(r) => r,
		}
	}
}

/// Executes one CWL `CommandLineTool` (or `ExpressionTool`) invocation.
/// Built fresh by the translator for each step that isn't itself a
/// sub-workflow or scatter/gather node.
#[derive(Debug, Clone)]
pub struct ToolJob {
	pub tool: serde_json::Value,
	pub inputs: BTreeMap<String, InputBinding>,
	pub when: Option<String>,
	pub output_ports: Vec<String>,
	pub resources: ResourceExpressions,
	pub cuda_api: Option<String>,
}

impl ToolJob {
	/// Runs the full 11-step contract, from input resolution through
	/// re-importing the tool's declared outputs.
	pub async fn run(
		&self,
		collaborators: &JobCollaborators,
		results: &ResultsMap,
	) -> Result<ToolJobOutput, ToolJobError> {
		// 1. Resolve every input binding against the promises already recorded.
		let resolved = resolve_bindings(
			&self.inputs,
			results,
			collaborators.expression_evaluator.as_ref(),
			collaborators.filesystem.as_ref(),
		)
		.await?;

		// 2. Conditional: a false `when` short-circuits the whole step, and
		// every declared output gets the skip sentinel instead of a value.
		if let Some(when) = &self.when {
			if !self.eval_conditional(when, &resolved, collaborators).await? {
				let skipped = self
					.output_ports
					.iter()
					.map(|k| (k.clone(), CwlValue::Skip))
					.collect();
				info!(tool = %tool_id(&self.tool), "step skipped by when-condition");
				return Ok(ToolJobOutput::Skipped(skipped));
			}
		}

		// 3 & 4. Filling declared-input defaults and computing EnvVarRequirement
		// both happen inside the tool-runtime collaborator, which receives the
		// parsed process description directly; this crate only hands it a
		// resolved job order.

		// 5. Strip any resolved key the tool doesn't declare as an input.
		let job_order = self.strip_undeclared(resolved);

		// 6. Evaluate resource requirements into concrete numbers, then hand
		// them to the grid-engine dispatcher (component G) so this step's
		// cores/memory/disk actually gate on scheduler admission before it
		// runs. No dispatcher configured just means "run locally with no
		// admission control" - the common case for the in-process collaborator
		// doubles these tests use.
		let resources = self.evaluate_resources(&job_order, collaborators).await?;
		if let Some(dispatcher) = &collaborators.dispatcher {
			dispatcher.admit(tool_id(&self.tool), &resources).await?;
		}

		// 7. Build the runtime context; outdir/tmpdir are worker-local scratch,
		// never a virtual location.
		let local_tmp = collaborators.job_store.get_local_temp_dir();
		let run_id = uuid::Uuid::new_v4();
		let runtime_context = ToolRuntimeContext {
			toplevel: false,
			outdir: local_tmp.join(format!("out-{run_id}")),
			tmpdir_prefix: local_tmp.join(format!("tmp-{run_id}-")),
			move_outputs: true,
			streaming_allowed: true,
			preserve_environment: Vec::new(),
		};

		let job_order_json = serde_json::to_value(&job_order)?;

		// 8. Invoke the tool.
		let (outputs_json, status) = collaborators
			.tool_runtime
			.execute(&self.tool, &job_order_json, &runtime_context)
			.await?;
		if status != "success" {
			warn!(tool = %tool_id(&self.tool), %status, "tool execution failed");
			return Err(ToolJobError::RuntimeFailure(status));
		}

		// 9. Any streaming pipe threads the runtime opened against our inputs
		// are joined by the runtime itself before it returns "success"; this
		// function never holds a handle to them.

		// 10. Re-import declared outputs so downstream steps see toil URIs,
		// not worker-local paths that vanish once this job's scratch is swept.
		let outputs: CwlValue = serde_json::from_value(outputs_json)?;
		let mut maps = ImportMaps::default();
		let reimported = staging::import_files(
			collaborators.job_store.as_ref(),
			collaborators.filesystem.as_ref(),
			&mut maps,
			ImportOptions::default(),
			outputs,
		)
		.await?;

		// 11. Return the output dict keyed by declared output id.
		let record = match reimported {
			CwlValue::Record(fields) => fields,
			CwlValue::Null => BTreeMap::new(),
			other => {
				let mut single = BTreeMap::new();
				if let Some(only) = self.output_ports.first() {
					single.insert(only.clone(), other);
				}
				single
			}
		};
		Ok(ToolJobOutput::Completed(record))
	}

	async fn eval_conditional(
		&self,
		when: &str,
		resolved: &BTreeMap<String, CwlValue>,
		collaborators: &JobCollaborators,
	) -> Result<bool, ToolJobError> {
		let inputs_json = serde_json::to_value(resolved)?;
		let result = collaborators
			.expression_evaluator
			.eval(when, &inputs_json, &serde_json::Value::Null, None)
			.await?;
		result
			.as_bool()
			.ok_or(ToolJobError::NonBooleanConditional(result))
	}

	fn strip_undeclared(&self, resolved: BTreeMap<String, CwlValue>) -> BTreeMap<String, CwlValue> {
		let declared: Option<std::collections::HashSet<&str>> = self
			.tool
			.get("inputs")
			.and_then(|v| v.as_array())
			.map(|items| {
				items
					.iter()
					.filter_map(|i| i.get("id").and_then(|id| id.as_str()))
					.collect()
			});
		match declared {
			Some(declared) if !declared.is_empty() => resolved
				.into_iter()
				.filter(|(k, _)| declared.contains(k.as_str()))
				.collect(),
			_ => resolved,
		}
	}

	async fn evaluate_resources(
		&self,
		job_order: &BTreeMap<String, CwlValue>,
		collaborators: &JobCollaborators,
	) -> Result<ResolvedResources, ToolJobError> {
		let job_order_json = serde_json::to_value(job_order)?;
		let cores = self
			.eval_numeric_field("cores", self.resources.cores.as_deref(), DEFAULT_CORES, &job_order_json, collaborators)
			.await?;
		let ram_mib = self
			.eval_numeric_field("ram_mib", self.resources.ram_mib.as_deref(), DEFAULT_RAM_MIB, &job_order_json, collaborators)
			.await?;
		let tmpdir_mib = self
			.eval_numeric_field(
				"tmpdir_mib",
				self.resources.tmpdir_mib.as_deref(),
				DEFAULT_TMPDIR_MIB,
				&job_order_json,
				collaborators,
			)
			.await?;
		let outdir_mib = self
			.eval_numeric_field(
				"outdir_mib",
				self.resources.outdir_mib.as_deref(),
				DEFAULT_OUTDIR_MIB,
				&job_order_json,
				collaborators,
			)
			.await?;

		let mut accelerators = Vec::new();
		if let Some(expr) = &self.resources.cuda_device_count {
			let count = self
				.eval_numeric_field("cuda_device_count", Some(expr.as_str()), 0.0, &job_order_json, collaborators)
				.await?;
			if count > 0.0 {
				accelerators.push(AcceleratorRequirement {
					kind: "gpu".to_string(),
					api: self.cuda_api.clone(),
					count: count.round() as u32,
				});
			}
		}

		Ok(ResolvedResources {
			cores,
			ram_bytes: (ram_mib * MIB as f64) as u64,
			disk_bytes: ((tmpdir_mib + outdir_mib) * MIB as f64) as u64,
			accelerators,
			preemptible: self.resources.use_preemptible,
		})
	}

	async fn eval_numeric_field(
		&self,
		field: &'static str,
		expr: Option<&str>,
		default: f64,
		job_order_json: &serde_json::Value,
		collaborators: &JobCollaborators,
	) -> Result<f64, ToolJobError> {
		let Some(expr) = expr else { return Ok(default) };
		if !has_expression_syntax(expr) {
			return expr
				.parse::<f64>()
				.map_err(|_| ToolJobError::NonNumericResource { field, value: serde_json::Value::String(expr.to_string()) });
		}
		let result = collaborators
			.expression_evaluator
			.eval(expr, job_order_json, &serde_json::Value::Null, None)
			.await?;
		result
			.as_f64()
			.ok_or_else(|| ToolJobError::NonNumericResource { field, value: result })
	}
}

fn tool_id(tool: &serde_json::Value) -> &str {
	tool.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>")
}

/// Runs a tool job whose resource requirements themselves depend on an
/// expression over the *other* steps' outputs — the translator cannot
/// compute concrete numbers until those promises resolve, so it wraps the
/// real [`ToolJob`] behind this indirection and lets it construct the final
/// job only once every dependency it needs is available.
#[derive(Debug, Clone)]
pub struct JobWrapper {
	pub inner: ToolJob,
}

impl JobWrapper {
	pub async fn run(
		&self,
		collaborators: &JobCollaborators,
		results: &ResultsMap,
	) -> Result<ToolJobOutput, ToolJobError> {
		// Resource expressions are evaluated as part of `ToolJob::run` itself
		// (step 6), so by the time every referenced source is in `results`
		// the wrapper has nothing left to do but delegate.
        self.inner.run(collaborators, results).await
	}
}
