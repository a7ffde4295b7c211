use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{error, info};

use dispatch_system::{ExecStatus, Interrupter, InterruptionKind, Task, TaskId};

use crate::jobs::context::{CheckpointHandler, JobCollaborators, JobContext};
use crate::jobs::database::JobDb;
use crate::jobs::error::JobError;
use crate::jobs::output::JobOutput;
use crate::jobs::progress::Progress;
use crate::jobs::traits::JobHandler;
use crate::jobs::types::{JobId, JobMetrics, JobStatus};

pub(crate) struct JobExecutorState {
	pub job_id: JobId,
	pub job_db: Arc<JobDb>,
	pub status_tx: watch::Sender<JobStatus>,
	pub progress_tx: mpsc::UnboundedSender<Progress>,
	pub broadcast_tx: broadcast::Sender<Progress>,
	pub checkpoint_handler: Arc<dyn CheckpointHandler>,
	pub metrics: Arc<Mutex<JobMetrics>>,
	pub collaborators: JobCollaborators,
	pub output: Arc<Mutex<Option<JobOutput>>>,
}

/// Wraps a [`JobHandler`] so it can be driven by the in-process task runner
/// in `dispatch_system`, translating its `Result<Output>` contract into the
/// `ExecStatus` the runner expects.
pub struct JobExecutor<J: JobHandler> {
	job: J,
	state: JobExecutorState,
}

impl<J: JobHandler> JobExecutor<J> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		job: J,
		job_id: JobId,
		job_db: Arc<JobDb>,
		status_tx: watch::Sender<JobStatus>,
		progress_tx: mpsc::UnboundedSender<Progress>,
		broadcast_tx: broadcast::Sender<Progress>,
		checkpoint_handler: Arc<dyn CheckpointHandler>,
		collaborators: JobCollaborators,
		output: Arc<Mutex<Option<JobOutput>>>,
	) -> Self {
		Self {
			job,
			state: JobExecutorState {
				job_id,
				job_db,
				status_tx,
				progress_tx,
				broadcast_tx,
				checkpoint_handler,
				metrics: Arc::new(Mutex::new(JobMetrics::default())),
				collaborators,
				output,
			},
		}
	}
}

#[async_trait]
impl<J: JobHandler> Task<JobError> for JobExecutor<J> {
	fn id(&self) -> TaskId {
		TaskId::from(self.state.job_id.0)
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, JobError> {
		let _ = self.state.status_tx.send(JobStatus::Running);
		self.state
			.job_db
			.update_status(self.state.job_id, JobStatus::Running)
			.await?;

		let child_handles = Arc::new(Mutex::new(Vec::new()));
		let (fwd_tx, mut fwd_rx) = mpsc::unbounded_channel::<Progress>();
		let forward_broadcast = self.state.broadcast_tx.clone();
		let forward_progress = self.state.progress_tx.clone();
		let forward_handle = tokio::spawn(async move {
			while let Some(progress) = fwd_rx.recv().await {
				let _ = forward_broadcast.send(progress.clone());
				let _ = forward_progress.send(progress);
			}
		});

		let ctx = JobContext::new(
			self.state.job_id,
			interrupter,
			fwd_tx,
			self.state.metrics.clone(),
			self.state.checkpoint_handler.clone(),
			child_handles.clone(),
			self.state.collaborators.clone(),
		);

		let result = self.job.run(ctx).await;
		forward_handle.abort();

		for handle in child_handles.lock().await.drain(..) {
			let _ = handle.await;
		}

		match result {
			Ok(output) => {
				info!(job_id = %self.state.job_id, "job completed");
				let _ = self.state.status_tx.send(JobStatus::Completed);
				self.state
					.job_db
					.update_status(self.state.job_id, JobStatus::Completed)
					.await?;
				self.state.checkpoint_handler.delete(self.state.job_id).await?;
				*self.state.output.lock().await = Some(output.into());
				Ok(ExecStatus::Done)
			}
			Err(e) if e.is_interrupted() => match interrupter.peek() {
				Some(InterruptionKind::Pause) => {
					info!(job_id = %self.state.job_id, "job paused");
					let _ = self.state.status_tx.send(JobStatus::Paused);
					self.state
						.job_db
						.update_status(self.state.job_id, JobStatus::Paused)
						.await?;
					Ok(ExecStatus::Paused)
				}
				_ => {
					info!(job_id = %self.state.job_id, "job cancelled");
					let _ = self.state.status_tx.send(JobStatus::Cancelled);
					self.state
						.job_db
						.update_status(self.state.job_id, JobStatus::Cancelled)
						.await?;
					self.state.checkpoint_handler.delete(self.state.job_id).await?;
					Ok(ExecStatus::Canceled)
				}
			},
			Err(e) => {
				error!(job_id = %self.state.job_id, error = %e, "job failed");
				let _ = self.state.status_tx.send(JobStatus::Failed);
				self.state
					.job_db
					.update_status_with_error(self.state.job_id, JobStatus::Failed, e.to_string())
					.await?;
				Err(e)
			}
		}
	}
}
