use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Logical job id, assigned by the front-end issuing the job; stable for the
/// job's lifetime in the dispatcher regardless of how the backend renames it.
pub type JobId = u64;

/// Opaque id a scheduler backend assigns a job once submitted (PBS/SLURM job
/// number, LSF job id, PID, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalBatchId(pub String);

impl std::fmt::Display for ExternalBatchId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// One accelerator request attached to a job (GPU, TPU, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorRequirement {
	pub kind: String,
	pub api: Option<String>,
	pub count: u32,
}

/// A job description handed to the dispatcher for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
	pub id: JobId,
	pub cores: f64,
	pub memory_bytes: u64,
	pub disk_bytes: u64,
	pub command: Vec<String>,
	pub display_name: String,
	pub environment: std::collections::BTreeMap<String, String>,
	pub accelerators: Vec<AcceleratorRequirement>,
	/// True if the job may run on preemptible/spot capacity.
	pub preemptible: bool,
}

/// Why a job exited other than with a plain process exit code. Kept as its
/// own variant (rather than overloading the integer code) so a caller can
/// never receive a value that is ambiguously both "exit code" and "reason" -
/// the two cases are structurally distinct and every match must handle both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
	/// The job was killed by `killJob` (or externally, e.g. OOM-killer).
	Killed,
	/// The scheduler lost track of the job (node failure, preemption).
	Lost,
	/// The job exceeded its memory reservation.
	MemoryLimitExceeded,
	/// The scheduler will not say why; worth a restart.
	Unknown,
}

/// Result of polling a job's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobExitStatus {
	Code(i32),
	Reason(ExitReason),
}

impl JobExitStatus {
	/// Exit code to report upward, and the reason if this wasn't a plain code.
	pub fn as_reported(&self) -> (i32, Option<ExitReason>) {
		match self {
			JobExitStatus::Code(code) => (*code, None),
			JobExitStatus::Reason(reason) => (1, Some(*reason)),
		}
	}
}

/// Subclass contract a concrete scheduler integration must implement. One
/// instance is shared (read-only) across dispatcher restarts; all mutable
/// state lives in the dispatcher itself.
#[async_trait]
pub trait BatchSystemBackend: Send + Sync + 'static {
	/// Name surfaced on `ExternalBatchIdMessage` events, for diagnostics.
	fn name(&self) -> &str;

	/// Build the scheduler-specific command line for a job. Pure; does not
	/// touch the scheduler.
	async fn prepare_submission(&self, job: &JobSubmission) -> Result<Vec<String>, BackendError>;

	/// Submit a prepared command, returning the scheduler's id for it.
	async fn submit_job(&self, command: Vec<String>) -> Result<ExternalBatchId, BackendError>;

	/// Ask the scheduler to kill a running job. Must be idempotent: killing
	/// an already-finished job is not an error.
	async fn kill_job(&self, id: &ExternalBatchId) -> Result<(), BackendError>;

	/// Ids the scheduler currently reports as running, for reconciliation.
	async fn get_running_job_ids(&self) -> Result<HashSet<ExternalBatchId>, BackendError>;

	/// Poll one job. `None` means still running.
	async fn get_job_exit_code(
		&self,
		id: &ExternalBatchId,
	) -> Result<Option<JobExitStatus>, BackendError>;

	/// Batched variant of `get_job_exit_code`, aligned index-for-index with
	/// `ids`. Backends that cannot query in bulk return `None` and the
	/// dispatcher falls back to polling one at a time.
	async fn coalesce_job_exit_codes(
		&self,
		_ids: &[ExternalBatchId],
	) -> Option<Vec<Result<Option<JobExitStatus>, BackendError>>> {
		None
	}

	/// Default interval between scheduler polls when nothing else is pending.
	fn get_wait_duration(&self) -> Duration {
		Duration::from_secs(1)
	}
}
