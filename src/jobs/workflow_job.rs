//! Runs a parsed CWL workflow graph as a managed, resumable job: the same
//! bookkeeping (status, progress, checkpoints, restart-time resumption)
//! every other background job gets, instead of a workflow only ever running
//! inline under whatever called `cwl::run_workflow` directly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use job_derive::Job;
use serde::{Deserialize, Serialize};

use crate::cwl::model::CwlValue;
use crate::cwl::translator::{run_workflow, Workflow};
use crate::jobs::context::JobContext;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::output::JobOutput;
use crate::jobs::traits::{Job, JobDependencies, JobHandler};
use crate::jobs::types::JobSchema;

/// A workflow plus its resolved top-level inputs, dispatched through
/// [`crate::jobs::JobManager`] like any other job. `Serialize`/`Deserialize`
/// (required by `#[derive(Job)]` for checkpoint persistence and resumption)
/// are why [`Workflow`] and everything it's built from derive them too.
#[derive(Debug, Clone, Serialize, Deserialize, Job)]
pub struct WorkflowJob {
	pub workflow: Workflow,
	pub inputs: BTreeMap<String, CwlValue>,
}

impl Job for WorkflowJob {
	const NAME: &'static str = "cwl.workflow";
	const DESCRIPTION: Option<&'static str> = Some("Runs a parsed CWL workflow graph to completion.");

	fn schema() -> JobSchema {
		JobSchema {
			name: Self::NAME.to_string(),
			description: "Runs a parsed CWL workflow graph to completion.".to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"properties": {
					"workflow": { "type": "object" },
					"inputs": { "type": "object" }
				},
				"required": ["workflow", "inputs"]
			}),
		}
	}
}

/// No static resource estimate: each step's own `ResourceExpressions`
/// already gates admission through the dispatcher bridge as the workflow
/// runs, so this job itself asks the in-process scheduler for nothing
/// up front.
impl JobDependencies for WorkflowJob {}

#[async_trait]
impl JobHandler for WorkflowJob {
	type Output = JobOutput;

	async fn run(&mut self, ctx: JobContext<'_>) -> JobResult<Self::Output> {
		ctx.check_interrupt().await?;
		let outputs = run_workflow(&self.workflow, self.inputs.clone(), &ctx.collaborators)
			.await
			.map_err(|e| JobError::execution(e.to_string()))?;
		let outputs = serde_json::to_value(outputs).map_err(|e| JobError::serialization(e.to_string()))?;
		Ok(JobOutput::WorkflowCompleted { outputs })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborators::{CollaboratorError, MemoryJobStore, NullEvaluator, ToolRuntime, ToolRuntimeContext};
	use crate::cwl::resolve::{LinkMerge, PickValue};
	use crate::cwl::tool_job::ResourceExpressions;
	use crate::cwl::translator::{ScatterMethod, StepDecl, StepInputDecl, ToolKind, WorkflowOutputDecl};
	use crate::jobs::context::JobCollaborators;
	use crate::jobs::manager::JobManager;
	use crate::jobs::types::JobStatus;

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
	impl ToolRuntime for EchoRuntime {
		async fn execute(
			&self,
			_process: &serde_json::Value,
			job_order: &serde_json::Value,
			_runtime_context: &ToolRuntimeContext,
		) -> Result<(serde_json::Value, String), CollaboratorError> {
			let x = job_order.get("x").cloned().unwrap_or(serde_json::Value::Null);
			Ok((serde_json::json!({ "out": x }), "success".to_string()))
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

	fn echo_workflow() -> WorkflowJob {
		WorkflowJob {
			workflow: Workflow {
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
					scatter_method: None::<ScatterMethod>,
					resources: ResourceExpressions::default(),
					cuda_api: None,
				}],
				outputs: vec![WorkflowOutputDecl {
					id: "out".to_string(),
					sources: vec!["echo/out".to_string()],
					link_merge: LinkMerge::MergeNested,
					pick_value: None::<PickValue>,
				}],
			},
			inputs: BTreeMap::from([("x".to_string(), CwlValue::String("hi".to_string()))]),
		}
	}

	#[tokio::test]
	async fn dispatched_through_job_manager_runs_to_completion() {
		let data_dir = tempfile::tempdir().unwrap();
		let manager = JobManager::new(data_dir.path(), test_collaborators()).await.unwrap();

		let handle = manager.dispatch(echo_workflow()).await.unwrap();
		let output = handle.wait().await.unwrap();
		assert_eq!(handle.status(), JobStatus::Completed);

		let outputs = match output {
			JobOutput::WorkflowCompleted { outputs } => outputs,
			other => panic!("expected WorkflowCompleted, got {other:?}"),
		};
		assert_eq!(outputs.get("out"), Some(&serde_json::Value::String("hi".to_string())));
	}

	#[test]
	fn registered_in_the_compile_time_job_registry() {
		assert!(crate::jobs::registry::REGISTRY.has_job(WorkflowJob::NAME));
	}
}
