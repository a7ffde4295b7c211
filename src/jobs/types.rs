//! Core type definitions for the job bookkeeping layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one dispatched job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<Uuid> for JobId {
	fn from(id: Uuid) -> Self {
		Self(id)
	}
}

/// Lifecycle state of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
	Queued,
	Running,
	Paused,
	Completed,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
		)
	}

	pub fn is_active(&self) -> bool {
		matches!(self, JobStatus::Running | JobStatus::Paused)
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			JobStatus::Queued => "queued",
			JobStatus::Running => "running",
			JobStatus::Paused => "paused",
			JobStatus::Completed => "completed",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		};
		write!(f, "{s}")
	}
}

/// Scheduling priority. Higher runs first among ready work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobPriority(pub i32);

impl JobPriority {
	pub const LOW: JobPriority = JobPriority(-10);
	pub const NORMAL: JobPriority = JobPriority(0);
	pub const HIGH: JobPriority = JobPriority(10);
	pub const CRITICAL: JobPriority = JobPriority(100);
}

impl Default for JobPriority {
	fn default() -> Self {
		JobPriority::NORMAL
	}
}

/// Point-in-time metrics for a job run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
	pub progress_percent: f32,
	pub items_completed: u64,
	pub items_total: Option<u64>,
}

/// Machine-readable description of a job type, used by front-ends that want
/// to submit jobs generically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSchema {
	pub name: String,
	pub description: String,
	pub parameters: serde_json::Value,
}

/// One entry in the compile-time job registry, submitted via `inventory` by
/// the `#[derive(Job)]` macro.
pub struct JobRegistration {
	pub name: &'static str,
	pub schema_fn: fn() -> JobSchema,
	pub create_fn: fn(serde_json::Value) -> Result<Box<dyn ErasedJob>, serde_json::Error>,
	pub deserialize_fn: fn(&[u8]) -> Result<Box<dyn ErasedJob>, rmp_serde::decode::Error>,
}

inventory::collect!(JobRegistration);

/// Type-erased job, dispatchable without knowing its concrete type.
pub trait ErasedJob: Send + Sync {
	#[allow(clippy::too_many_arguments)]
	fn create_executor(
		self: Box<Self>,
		job_id: JobId,
		job_db: std::sync::Arc<crate::jobs::database::JobDb>,
		status_tx: tokio::sync::watch::Sender<JobStatus>,
		progress_tx: tokio::sync::mpsc::UnboundedSender<crate::jobs::progress::Progress>,
		broadcast_tx: tokio::sync::broadcast::Sender<crate::jobs::progress::Progress>,
		checkpoint_handler: std::sync::Arc<dyn crate::jobs::context::CheckpointHandler>,
		collaborators: crate::jobs::context::JobCollaborators,
	) -> (
		Box<dyn dispatch_system::Task<crate::jobs::error::JobError>>,
		std::sync::Arc<tokio::sync::Mutex<Option<crate::jobs::output::JobOutput>>>,
	);

	fn serialize_state(&self) -> Result<Vec<u8>, crate::jobs::error::JobError>;
}

/// Summary view of a job, as returned to callers inspecting job history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
	pub id: JobId,
	pub name: String,
	pub status: JobStatus,
	pub priority: JobPriority,
	pub progress: f32,
	pub parent_job_id: Option<JobId>,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub started_at: Option<chrono::DateTime<chrono::Utc>>,
	pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
	pub error_message: Option<String>,
}
