use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a completed job, tagged by the kind of work it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum JobOutput {
	/// No meaningful output beyond "it finished".
	Success,

	/// A tool job finished; carries its resolved output object.
	ToolCompleted { outputs: Value },

	/// A workflow-level translation finished; carries the workflow's
	/// resolved output object.
	WorkflowCompleted { outputs: Value },

	/// A scatter step's gather phase finished; carries per-output arrays.
	ScatterCompleted { outputs: Value },

	/// A step was skipped because its `when` evaluated false.
	Skipped,

	/// Anything not covered above.
	Custom(Value),
}

impl fmt::Display for JobOutput {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			JobOutput::Success => write!(f, "success"),
			JobOutput::ToolCompleted { .. } => write!(f, "tool completed"),
			JobOutput::WorkflowCompleted { .. } => write!(f, "workflow completed"),
			JobOutput::ScatterCompleted { .. } => write!(f, "scatter completed"),
			JobOutput::Skipped => write!(f, "skipped"),
			JobOutput::Custom(_) => write!(f, "custom output"),
		}
	}
}

impl JobOutput {
	pub fn as_tool_outputs(&self) -> Option<&Value> {
		match self {
			JobOutput::ToolCompleted { outputs } => Some(outputs),
			_ => None,
		}
	}
}
