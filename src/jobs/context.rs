use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::collaborators::{ExpressionEvaluator, FilesystemAccess, JobStore, ToolRuntime};
use crate::jobs::dispatcher_bridge::DispatchBridge;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::progress::Progress;
use crate::jobs::types::{JobId, JobMetrics};
use dispatch_system::Interrupter;

/// External collaborators a job needs to do anything useful. Grouped into
/// one struct (rather than one constructor argument per service) because a
/// job that needs one of these almost always needs the others too.
#[derive(Clone)]
pub struct JobCollaborators {
	pub job_store: Arc<dyn JobStore>,
	pub tool_runtime: Arc<dyn ToolRuntime>,
	pub filesystem: Arc<dyn FilesystemAccess>,
	pub expression_evaluator: Arc<dyn ExpressionEvaluator>,
	/// Grid-engine admission gate (component G). `None` runs every tool job
	/// locally with no scheduler in front of it.
	pub dispatcher: Option<Arc<DispatchBridge>>,
}

/// Persists and restores job checkpoints across process restarts.
#[async_trait]
pub trait CheckpointHandler: Send + Sync {
	async fn save(&self, job_id: JobId, data: Vec<u8>) -> JobResult<()>;
	async fn load(&self, job_id: JobId) -> JobResult<Option<Vec<u8>>>;
	async fn delete(&self, job_id: JobId) -> JobResult<()>;
}

/// Everything a running [`crate::jobs::traits::JobHandler`] needs from its
/// surroundings: interruption signaling, progress/checkpoint reporting, and
/// the CWL-domain collaborators.
pub struct JobContext<'a> {
	pub job_id: JobId,
	interrupter: &'a Interrupter,
	progress_tx: mpsc::UnboundedSender<Progress>,
	metrics: Arc<Mutex<JobMetrics>>,
	checkpoint_handler: Arc<dyn CheckpointHandler>,
	child_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
	pub collaborators: JobCollaborators,
}

impl<'a> JobContext<'a> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		job_id: JobId,
		interrupter: &'a Interrupter,
		progress_tx: mpsc::UnboundedSender<Progress>,
		metrics: Arc<Mutex<JobMetrics>>,
		checkpoint_handler: Arc<dyn CheckpointHandler>,
		child_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
		collaborators: JobCollaborators,
	) -> Self {
		Self {
			job_id,
			interrupter,
			progress_tx,
			metrics,
			checkpoint_handler,
			child_handles,
			collaborators,
		}
	}

	/// Cooperative interruption point. Jobs should call this between units
	/// of work; it returns promptly either way, it does not block waiting
	/// for the interruption future.
	pub async fn check_interrupt(&self) -> JobResult<()> {
		match self.interrupter.peek() {
			Some(_) => Err(JobError::Interrupted),
			None => Ok(()),
		}
	}

	pub async fn progress(&self, progress: Progress) {
		let mut metrics = self.metrics.lock().await;
		metrics.progress_percent = progress.percentage;
		let _ = self.progress_tx.send(progress);
	}

	pub async fn checkpoint(&self, data: Vec<u8>) -> JobResult<()> {
		self.checkpoint_handler.save(self.job_id, data).await
	}

	/// Tracks a spawned background task so the executor can join it before
	/// reporting the job as finished (used for streaming-pipe writer
	/// threads during file staging).
	pub async fn track_child(&self, handle: JoinHandle<()>) {
		self.child_handles.lock().await.push(handle);
	}
}
