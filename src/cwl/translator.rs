//! Expands a parsed CWL workflow into job nodes and runs them to completion.
//!
//! The translator's declaration-level fixed point (a step becomes buildable
//! once every source it references has a producer) and the runtime fixed
//! point (a job's inputs are actually available) coincide here: this engine
//! has no separate external scheduler collaborator deferring execution to a
//! later pass, so building a step's job and running it happen in the same
//! iteration. See `DESIGN.md` for why that collapse is sound.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cwl::model::{CwlValue, StepPromise, TranslatorState};
use crate::cwl::resolve::{
	DefaultWithSource, InputBinding, JustAValue, LinkMerge, PickValue, ResolveError, ResolveSource,
	ResultsMap, StepValueFrom,
};
use crate::cwl::tool_job::{JobWrapper, ResourceExpressions, ToolJob, ToolJobError, ToolJobOutput};
use crate::jobs::context::JobCollaborators;
use crate::jobs::types::JobId;

#[derive(Debug, Error)]
pub enum TranslatorError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),
	#[error(transparent)]
	ToolJob(#[from] ToolJobError),
	#[error("workflow graph did not reach a fixed point: steps {0:?} never became ready")]
	UnreachableSteps(Vec<String>),
	#[error("scatter inputs have mismatched lengths: {0:?}")]
	ScatterLengthMismatch(HashMap<String, usize>),
	#[error("step {0} declares an empty scatter list")]
	EmptyScatter(String),
}

/// How a step input is produced, before it is lowered into a
/// [`crate::cwl::resolve::InputBinding`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInputDecl {
	pub key: String,
	pub sources: Vec<String>,
	pub link_merge: LinkMerge,
	pub pick_value: Option<PickValue>,
	pub default: Option<CwlValue>,
	pub value_from: Option<String>,
	pub load_contents: bool,
}

impl StepInputDecl {
	fn referenced_sources(&self) -> &[String] {
		&self.sources
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScatterMethod {
	DotProduct,
	NestedCrossProduct,
	FlatCrossProduct,
}

/// A step's tool: either a leaf command/expression tool, or a nested
/// sub-workflow translated recursively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolKind {
	Tool(serde_json::Value),
	SubWorkflow(Box<Workflow>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecl {
	pub id: String,
	pub tool: ToolKind,
	pub inputs: Vec<StepInputDecl>,
	pub outputs: Vec<String>,
	pub when: Option<String>,
	pub scatter: Vec<String>,
	pub scatter_method: Option<ScatterMethod>,
	pub resources: ResourceExpressions,
	pub cuda_api: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutputDecl {
	pub id: String,
	pub sources: Vec<String>,
	pub link_merge: LinkMerge,
	pub pick_value: Option<PickValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
	pub input_ids: Vec<String>,
	pub steps: Vec<StepDecl>,
	pub outputs: Vec<WorkflowOutputDecl>,
}

/// Caps the number of declaration-level passes so a workflow whose step
/// graph can never reach a fixed point (a typo'd source, a real cycle)
/// fails instead of looping forever.
const MAX_PASSES: usize = 10_000;

/// Runs a parsed workflow to completion against a resolved input object,
/// returning the workflow's own output record.
pub async fn run_workflow(
	workflow: &Workflow,
	inputs: BTreeMap<String, CwlValue>,
	collaborators: &JobCollaborators,
) -> Result<BTreeMap<String, CwlValue>, TranslatorError> {
	let self_job = JobId::new();
	let mut results: ResultsMap = ResultsMap::new();
	results.insert(self_job, inputs.into_iter().collect::<HashMap<_, _>>());

	let mut state = TranslatorState::new();
	for id in &workflow.input_ids {
		state.promises.insert(id.clone(), self_job);
	}

	let mut pass = 0;

	loop {
		pass += 1;
		let mut made_progress = false;

		for step in &workflow.steps {
			if state.jobs.contains_key(&step.id) {
				continue;
			}
			if !step_is_ready(step, &state) {
				continue;
			}

			let bindings = build_bindings(step, &state.promises);
			let job_id = run_step(step, bindings, &mut results, collaborators).await?;

			for output in &step.outputs {
				state.promises.insert(format!("{}/{}", step.id, output), job_id);
			}
			state.jobs.insert(step.id.clone(), job_id);
			made_progress = true;
		}

		let outputs_ready = workflow
			.outputs
			.iter()
			.all(|o| state.is_ready(&o.sources));
		if outputs_ready && state.jobs.len() == workflow.steps.len() {
			break;
		}
		if !made_progress {
			let stuck: Vec<String> = workflow
				.steps
				.iter()
				.filter(|s| !state.jobs.contains_key(&s.id))
				.map(|s| s.id.clone())
				.collect();
			if !stuck.is_empty() {
				return Err(TranslatorError::UnreachableSteps(stuck));
			}
		}
		if pass > MAX_PASSES {
			return Err(TranslatorError::UnreachableSteps(vec!["<graph never converged>".to_string()]));
		}
	}

	let mut out = BTreeMap::new();
	for output in &workflow.outputs {
		let source = ResolveSource {
			sources: output
				.sources
				.iter()
				.map(|s| StepPromise {
					producer: *state.promises.get(s).expect("checked ready above"),
					output_key: s.clone(),
				})
				.collect(),
			link_merge: output.link_merge,
			pick_value: output.pick_value,
		};
		out.insert(output.id.clone(), source.resolve(&results)?);
	}
	Ok(out)
}

fn step_is_ready(step: &StepDecl, state: &TranslatorState) -> bool {
	step.inputs.iter().all(|input| state.is_ready(input.referenced_sources()))
}

fn build_bindings(step: &StepDecl, promises: &HashMap<String, JobId>) -> BTreeMap<String, InputBinding> {
	let mut bindings = BTreeMap::new();
	for input in &step.inputs {
		let promised: Vec<StepPromise> = input
			.sources
			.iter()
			.map(|s| StepPromise {
				producer: *promises.get(s).expect("step_is_ready already checked"),
				output_key: s.clone(),
			})
			.collect();

		let binding = if promised.is_empty() {
			InputBinding::Value(JustAValue(input.default.clone().unwrap_or(CwlValue::Null)))
		} else {
			let source = ResolveSource {
				sources: promised,
				link_merge: input.link_merge,
				pick_value: input.pick_value,
			};
			match (&input.default, &input.value_from) {
				(_, Some(expr)) => InputBinding::StepValueFrom(StepValueFrom {
					source,
					expression: expr.clone(),
					load_contents: input.load_contents,
				}),
				(Some(default), None) => InputBinding::Default(DefaultWithSource {
					source,
					default: default.clone(),
				}),
				(None, None) => InputBinding::Source(source),
			}
		};
		bindings.insert(input.key.clone(), binding);
	}
	bindings
}

async fn run_step(
	step: &StepDecl,
	bindings: BTreeMap<String, InputBinding>,
	results: &mut ResultsMap,
	collaborators: &JobCollaborators,
) -> Result<JobId, TranslatorError> {
	let job_id = JobId::new();

	if !step.scatter.is_empty() {
		let record = run_scatter(step, bindings, results, collaborators).await?;
		results.insert(job_id, record);
		return Ok(job_id);
	}

	if let ToolKind::SubWorkflow(sub) = &step.tool {
		let resolved = crate::cwl::resolve::resolve_bindings(
			&bindings,
			results,
			collaborators.expression_evaluator.as_ref(),
			collaborators.filesystem.as_ref(),
		)
		.await?;
		let record = Box::pin(run_workflow(sub, resolved, collaborators)).await?;
		results.insert(job_id, record.into_iter().collect());
		return Ok(job_id);
	}

	let ToolKind::Tool(tool) = &step.tool else {
		unreachable!("sub-workflow handled above");
	};

	let outcome = if step.resources.has_expression() {
		let wrapper = JobWrapper {
			inner: ToolJob {
				tool: tool.clone(),
				inputs: bindings,
				when: step.when.clone(),
				output_ports: step.outputs.clone(),
				resources: step.resources.clone(),
				cuda_api: step.cuda_api.clone(),
			},
		};
		wrapper.run(collaborators, results).await?
	} else {
		let job = ToolJob {
			tool: tool.clone(),
			inputs: bindings,
			when: step.when.clone(),
			output_ports: step.outputs.clone(),
			resources: step.resources.clone(),
			cuda_api: step.cuda_api.clone(),
		};
		job.run(collaborators, results).await?
	};

	let record = match outcome {
		ToolJobOutput::Completed(r) => r,
		ToolJobOutput::Skipped(r) => {
			debug!(step = %step.id, "recording skip sentinels for a conditionally-bypassed step");
			r
		}
	};
	results.insert(job_id, record.into_iter().collect());
	Ok(job_id)
}

/// One scattered element: the scatter keys replaced by their i-th value,
/// with every other binding passed through unchanged.
fn scatter_element(
	bindings: &BTreeMap<String, InputBinding>,
	scatter_keys: &[String],
	elements: &HashMap<String, CwlValue>,
) -> BTreeMap<String, InputBinding> {
	let mut out = bindings.clone();
	for key in scatter_keys {
		if let Some(value) = elements.get(key) {
			out.insert(key.to_string(), InputBinding::Value(JustAValue(value.clone())));
		}
	}
	out
}

async fn run_scatter(
	step: &StepDecl,
	bindings: BTreeMap<String, InputBinding>,
	results: &ResultsMap,
	collaborators: &JobCollaborators,
) -> Result<HashMap<String, CwlValue>, TranslatorError> {
	// Resolve the scatter axes themselves up front, in the order the step
	// declared them: their producers are already in `promises` by
	// construction (step_is_ready checked it). Declaration order matters
	// for `nested_crossproduct`'s gather shape below, so this is a `Vec`
	// rather than a `BTreeMap` that would silently re-sort axes
	// alphabetically.
	let mut axes: Vec<(String, Vec<CwlValue>)> = Vec::with_capacity(step.scatter.len());
	for key in &step.scatter {
		let binding = bindings
			.get(key)
			.expect("scatter key must be one of the step's declared inputs");
		let resolved = binding.resolve(results)?;
		let items = match resolved {
			CwlValue::Array(items) => items,
			other => vec![other],
		};
		axes.push((key.clone(), items));
	}

	let method = step.scatter_method.unwrap_or(ScatterMethod::DotProduct);
	let axis_lengths: Vec<usize> = axes.iter().map(|(_, v)| v.len()).collect();

	// `flat_crossproduct` and `nested_crossproduct` spawn the exact same set
	// of job combinations; they differ only in how the gather step below
	// re-nests the per-output results.
	let combinations: Vec<HashMap<String, CwlValue>> = match method {
		ScatterMethod::DotProduct => dotproduct_combinations(&axes)?,
		ScatterMethod::FlatCrossProduct | ScatterMethod::NestedCrossProduct => crossproduct_combinations(&axes),
	};

	if combinations.is_empty() && step.scatter.is_empty() {
		return Err(TranslatorError::EmptyScatter(step.id.clone()));
	}

	let futures = combinations.into_iter().map(|elements| {
		let job_bindings = scatter_element(&bindings, &step.scatter, &elements);
		run_one_scattered_job(step, job_bindings, results, collaborators)
	});
	let outcomes: Vec<Result<ToolJobOutput, TranslatorError>> = join_all(futures).await;

	let mut per_output: BTreeMap<String, Vec<CwlValue>> = step
		.outputs
		.iter()
		.map(|o| (o.clone(), Vec::new()))
		.collect();
	for outcome in outcomes {
		let record = outcome?.into_record();
		for (key, values) in per_output.iter_mut() {
			values.push(record.get(key).cloned().unwrap_or(CwlValue::Null));
		}
	}

	Ok(per_output
		.into_iter()
		.map(|(k, flat)| {
			let shaped = if method == ScatterMethod::NestedCrossProduct && axis_lengths.len() > 1 {
				nest_by_axis_lengths(&flat, &axis_lengths)
			} else {
				CwlValue::Array(flat)
			};
			(k, shaped)
		})
		.collect())
}

/// Re-nests a flat, row-major list of per-combination results into arrays
/// mirroring `axis_lengths`' shape: the first axis becomes the outermost
/// array, with every later axis recursively nested inside it. `flat` must be
/// in the same row-major order `crossproduct_combinations` produced (outer
/// axis slowest-varying, last axis fastest), which it is since `outcomes`
/// tracks `combinations`' order through `join_all`.
fn nest_by_axis_lengths(flat: &[CwlValue], axis_lengths: &[usize]) -> CwlValue {
	if axis_lengths.len() <= 1 {
		return CwlValue::Array(flat.to_vec());
	}
	let chunk_size: usize = axis_lengths[1..].iter().product::<usize>().max(1);
	CwlValue::Array(
		flat.chunks(chunk_size)
			.map(|chunk| nest_by_axis_lengths(chunk, &axis_lengths[1..]))
			.collect(),
	)
}

async fn run_one_scattered_job(
	step: &StepDecl,
	bindings: BTreeMap<String, InputBinding>,
	results: &ResultsMap,
	collaborators: &JobCollaborators,
) -> Result<ToolJobOutput, TranslatorError> {
	let ToolKind::Tool(tool) = &step.tool else {
		// Scattering over a sub-workflow step: run it and adapt its record
		// into the same `ToolJobOutput` shape the gather step expects.
		let ToolKind::SubWorkflow(sub) = &step.tool else {
			unreachable!()
		};
		let resolved = crate::cwl::resolve::resolve_bindings(
			&bindings,
			results,
			collaborators.expression_evaluator.as_ref(),
			collaborators.filesystem.as_ref(),
		)
		.await?;
		let record = run_workflow(sub, resolved, collaborators).await?;
		return Ok(ToolJobOutput::Completed(record));
	};

	let job = ToolJob {
		tool: tool.clone(),
		inputs: bindings,
		when: step.when.clone(),
		output_ports: step.outputs.clone(),
		resources: step.resources.clone(),
		cuda_api: step.cuda_api.clone(),
	};
	Ok(job.run(collaborators, results).await?)
}

fn dotproduct_combinations(
	axes: &[(String, Vec<CwlValue>)],
) -> Result<Vec<HashMap<String, CwlValue>>, TranslatorError> {
	let lengths: HashMap<String, usize> = axes.iter().map(|(k, v)| (k.clone(), v.len())).collect();
	let n = match lengths.values().next() {
		Some(n) => *n,
		None => return Ok(Vec::new()),
	};
	if lengths.values().any(|len| *len != n) {
		return Err(TranslatorError::ScatterLengthMismatch(lengths));
	}
	Ok((0..n)
		.map(|i| axes.iter().map(|(k, v)| (k.clone(), v[i].clone())).collect())
		.collect())
}

/// Cartesian product over every axis, in declaration order, row-major (the
/// first axis slowest-varying, the last fastest). Used for both
/// `flat_crossproduct` and `nested_crossproduct`: the two methods spawn the
/// identical set of job combinations in this same order, and only the
/// gather step in `run_scatter` re-nests the result differently.
fn crossproduct_combinations(axes: &[(String, Vec<CwlValue>)]) -> Vec<HashMap<String, CwlValue>> {
	let mut combos: Vec<HashMap<String, CwlValue>> = vec![HashMap::new()];
	for (key, values) in axes {
		let mut next = Vec::with_capacity(combos.len() * values.len());
		for combo in &combos {
			for value in values {
				let mut extended = combo.clone();
				extended.insert(key.clone(), value.clone());
				next.push(extended);
			}
		}
		combos = next;
	}
	combos
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborators::{CollaboratorError, MemoryJobStore, NullEvaluator, ToolRuntimeContext};

	struct NoopFilesystem;

	#[async_trait::async_trait]
	impl crate::collaborators::FilesystemAccess for NoopFilesystem {
		async fn exists(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(true)
		}
		async fn is_file(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(true)
		}
		async fn is_dir(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(false)
		}
		async fn size(&self, _path: &str) -> Result<u64, CollaboratorError> {
			Ok(0)
		}
		async fn list_dir(&self, _path: &str) -> Result<Vec<String>, CollaboratorError> {
			Ok(Vec::new())
		}
		async fn glob(&self, _pattern: &str) -> Result<Vec<String>, CollaboratorError> {
			Ok(Vec::new())
		}
		async fn realpath(&self, path: &str) -> Result<String, CollaboratorError> {
			Ok(path.to_string())
		}
		fn join(&self, base: &str, part: &str) -> String {
			format!("{base}/{part}")
		}
		async fn open_read(&self, _path: &str) -> Result<Vec<u8>, CollaboratorError> {
			Ok(Vec::new())
		}
	}

	struct EchoRuntime;

	#[async_trait::async_trait]
	impl crate::collaborators::ToolRuntime for EchoRuntime {
		async fn execute(
			&self,
			_process: &serde_json::Value,
			job_order: &serde_json::Value,
			_runtime_context: &ToolRuntimeContext,
		) -> Result<(serde_json::Value, String), CollaboratorError> {
			let x = job_order.get("x").cloned().unwrap_or(serde_json::Value::Null);
			let out = match x.as_str() {
				Some(s) => serde_json::Value::String(format!("{s}\n")),
				None => serde_json::Value::Null,
			};
			Ok((serde_json::json!({ "out": out }), "success".to_string()))
		}
	}

	fn test_collaborators() -> JobCollaborators {
		JobCollaborators {
			job_store: std::sync::Arc::new(MemoryJobStore::new()),
			filesystem: std::sync::Arc::new(NoopFilesystem),
			tool_runtime: std::sync::Arc::new(EchoRuntime),
			expression_evaluator: std::sync::Arc::new(NullEvaluator),
			dispatcher: None,
		}
	}

	fn single_step_workflow() -> Workflow {
		Workflow {
			input_ids: vec!["x".to_string()],
			steps: vec![StepDecl {
				id: "echo".to_string(),
				tool: ToolKind::Tool(serde_json::json!({ "id": "echo", "inputs": [{"id": "x"}] })),
				inputs: vec![StepInputDecl {
					key: "x".to_string(),
					sources: vec!["x".to_string()],
					link_merge: LinkMerge::MergeNested,
					pick_value: None,
					default: None,
					value_from: None,
					load_contents: false,
				}],
				outputs: vec!["out".to_string()],
				when: None,
				scatter: Vec::new(),
				scatter_method: None,
				resources: ResourceExpressions::default(),
				cuda_api: None,
			}],
			outputs: vec![WorkflowOutputDecl {
				id: "out".to_string(),
				sources: vec!["echo/out".to_string()],
				link_merge: LinkMerge::MergeNested,
				pick_value: None,
			}],
		}
	}

	#[tokio::test]
	async fn single_tool_single_input_produces_the_declared_output() {
		let workflow = single_step_workflow();
		let collaborators = test_collaborators();
		let inputs = BTreeMap::from([("x".to_string(), CwlValue::String("hello".to_string()))]);
		let out = run_workflow(&workflow, inputs, &collaborators).await.unwrap();
		assert_eq!(out.get("out"), Some(&CwlValue::String("hello\n".to_string())));
	}

	#[tokio::test]
	async fn scatter_dotproduct_preserves_order() {
		let mut workflow = single_step_workflow();
		workflow.steps[0].scatter = vec!["x".to_string()];
		workflow.steps[0].scatter_method = Some(ScatterMethod::DotProduct);
		let collaborators = test_collaborators();
		let inputs = BTreeMap::from([(
			"x".to_string(),
			CwlValue::Array(vec![
				CwlValue::String("a".to_string()),
				CwlValue::String("b".to_string()),
				CwlValue::String("c".to_string()),
			]),
		)]);
		let out = run_workflow(&workflow, inputs, &collaborators).await.unwrap();
		assert_eq!(
			out.get("out"),
			Some(&CwlValue::Array(vec![
				CwlValue::String("a\n".to_string()),
				CwlValue::String("b\n".to_string()),
				CwlValue::String("c\n".to_string()),
			]))
		);
	}

	#[tokio::test]
	async fn conditional_skip_is_filtered_to_null_through_pick_value() {
		let mut workflow = single_step_workflow();
		workflow.steps[0].when = Some("false".to_string());
		let collaborators = test_collaborators();
		let inputs = BTreeMap::from([("x".to_string(), CwlValue::String("hello".to_string()))]);
		let out = run_workflow(&workflow, inputs, &collaborators).await.unwrap();
		assert_eq!(out.get("out"), Some(&CwlValue::Null));
	}

	#[tokio::test]
	async fn mismatched_scatter_lengths_are_rejected() {
		let mut workflow = single_step_workflow();
		workflow.steps[0].scatter = vec!["x".to_string()];
		let bad_axes: Vec<(String, Vec<CwlValue>)> = vec![
			("x".to_string(), vec![CwlValue::Int(1), CwlValue::Int(2)]),
			("y".to_string(), vec![CwlValue::Int(1)]),
		];
		let err = dotproduct_combinations(&bad_axes).unwrap_err();
		assert!(matches!(err, TranslatorError::ScatterLengthMismatch(_)));
	}

	struct ConcatRuntime;

	#[async_trait::async_trait]
	impl crate::collaborators::ToolRuntime for ConcatRuntime {
		async fn execute(
			&self,
			_process: &serde_json::Value,
			job_order: &serde_json::Value,
			_runtime_context: &ToolRuntimeContext,
		) -> Result<(serde_json::Value, String), CollaboratorError> {
			let x = job_order.get("x").and_then(|v| v.as_str()).unwrap_or_default();
			let y = job_order.get("y").and_then(|v| v.as_str()).unwrap_or_default();
			Ok((serde_json::json!({ "out": format!("{x}{y}") }), "success".to_string()))
		}
	}

	#[tokio::test]
	async fn scatter_nested_crossproduct_shapes_output_by_outer_axis() {
		let collaborators = JobCollaborators {
			job_store: std::sync::Arc::new(MemoryJobStore::new()),
			filesystem: std::sync::Arc::new(NoopFilesystem),
			tool_runtime: std::sync::Arc::new(ConcatRuntime),
			expression_evaluator: std::sync::Arc::new(NullEvaluator),
			dispatcher: None,
		};

		let workflow = Workflow {
			input_ids: vec!["x".to_string(), "y".to_string()],
			steps: vec![StepDecl {
				id: "pair".to_string(),
				tool: ToolKind::Tool(serde_json::json!({ "id": "pair", "inputs": [{"id": "x"}, {"id": "y"}] })),
				inputs: vec![
					StepInputDecl {
						key: "x".to_string(),
						sources: vec!["x".to_string()],
						link_merge: LinkMerge::MergeNested,
						pick_value: None,
						default: None,
						value_from: None,
						load_contents: false,
					},
					StepInputDecl {
						key: "y".to_string(),
						sources: vec!["y".to_string()],
						link_merge: LinkMerge::MergeNested,
						pick_value: None,
						default: None,
						value_from: None,
						load_contents: false,
					},
				],
				outputs: vec!["out".to_string()],
				when: None,
				scatter: vec!["x".to_string(), "y".to_string()],
				scatter_method: Some(ScatterMethod::NestedCrossProduct),
				resources: ResourceExpressions::default(),
				cuda_api: None,
			}],
			outputs: vec![WorkflowOutputDecl {
				id: "out".to_string(),
				sources: vec!["pair/out".to_string()],
				link_merge: LinkMerge::MergeNested,
				pick_value: None,
			}],
		};

		let inputs = BTreeMap::from([
			(
				"x".to_string(),
				CwlValue::Array(vec![CwlValue::String("a".to_string()), CwlValue::String("b".to_string())]),
			),
			(
				"y".to_string(),
				CwlValue::Array(vec![
					CwlValue::String("1".to_string()),
					CwlValue::String("2".to_string()),
					CwlValue::String("3".to_string()),
				]),
			),
		]);

		let out = run_workflow(&workflow, inputs, &collaborators).await.unwrap();
		let expected = CwlValue::Array(vec![
			CwlValue::Array(vec![
				CwlValue::String("a1".to_string()),
				CwlValue::String("a2".to_string()),
				CwlValue::String("a3".to_string()),
			]),
			CwlValue::Array(vec![
				CwlValue::String("b1".to_string()),
				CwlValue::String("b2".to_string()),
				CwlValue::String("b3".to_string()),
			]),
		]);
		assert_eq!(out.get("out"), Some(&expected));
	}

	#[tokio::test]
	async fn scatter_flat_crossproduct_stays_flat_over_the_same_axes() {
		let collaborators = JobCollaborators {
			job_store: std::sync::Arc::new(MemoryJobStore::new()),
			filesystem: std::sync::Arc::new(NoopFilesystem),
			tool_runtime: std::sync::Arc::new(ConcatRuntime),
			expression_evaluator: std::sync::Arc::new(NullEvaluator),
			dispatcher: None,
		};

		let workflow = Workflow {
			input_ids: vec!["x".to_string(), "y".to_string()],
			steps: vec![StepDecl {
				id: "pair".to_string(),
				tool: ToolKind::Tool(serde_json::json!({ "id": "pair", "inputs": [{"id": "x"}, {"id": "y"}] })),
				inputs: vec![
					StepInputDecl {
						key: "x".to_string(),
						sources: vec!["x".to_string()],
						link_merge: LinkMerge::MergeNested,
						pick_value: None,
						default: None,
						value_from: None,
						load_contents: false,
					},
					StepInputDecl {
						key: "y".to_string(),
						sources: vec!["y".to_string()],
						link_merge: LinkMerge::MergeNested,
						pick_value: None,
						default: None,
						value_from: None,
						load_contents: false,
					},
				],
				outputs: vec!["out".to_string()],
				when: None,
				scatter: vec!["x".to_string(), "y".to_string()],
				scatter_method: Some(ScatterMethod::FlatCrossProduct),
				resources: ResourceExpressions::default(),
				cuda_api: None,
			}],
			outputs: vec![WorkflowOutputDecl {
				id: "out".to_string(),
				sources: vec!["pair/out".to_string()],
				link_merge: LinkMerge::MergeNested,
				pick_value: None,
			}],
		};

		let inputs = BTreeMap::from([
			(
				"x".to_string(),
				CwlValue::Array(vec![CwlValue::String("a".to_string()), CwlValue::String("b".to_string())]),
			),
			(
				"y".to_string(),
				CwlValue::Array(vec![CwlValue::String("1".to_string()), CwlValue::String("2".to_string())]),
			),
		]);

		let out = run_workflow(&workflow, inputs, &collaborators).await.unwrap();
		let expected = CwlValue::Array(vec![
			CwlValue::String("a1".to_string()),
			CwlValue::String("a2".to_string()),
			CwlValue::String("b1".to_string()),
			CwlValue::String("b2".to_string()),
		]);
		assert_eq!(out.get("out"), Some(&expected));
	}
}
