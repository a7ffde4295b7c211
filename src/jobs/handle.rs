use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};

use dispatch_system::TaskHandle;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::output::JobOutput;
use crate::jobs::progress::Progress;
use crate::jobs::types::{JobId, JobStatus};

/// A live or finished job, as seen by whoever dispatched it.
#[derive(Clone)]
pub struct JobHandle {
	job_id: JobId,
	status_rx: watch::Receiver<JobStatus>,
	progress_rx_factory: broadcast::Sender<Progress>,
	task: Arc<TaskHandle<JobError>>,
	output: Arc<Mutex<Option<JobOutput>>>,
}

impl JobHandle {
	pub(crate) fn new(
		job_id: JobId,
		status_rx: watch::Receiver<JobStatus>,
		broadcast_tx: broadcast::Sender<Progress>,
		task: Arc<TaskHandle<JobError>>,
		output: Arc<Mutex<Option<JobOutput>>>,
	) -> Self {
		Self {
			job_id,
			status_rx,
			progress_rx_factory: broadcast_tx,
			task,
			output,
		}
	}

	pub fn id(&self) -> JobId {
		self.job_id
	}

	pub fn status(&self) -> JobStatus {
		*self.status_rx.borrow()
	}

	pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
		self.status_rx.clone()
	}

	pub fn subscribe_progress(&self) -> broadcast::Receiver<Progress> {
		self.progress_rx_factory.subscribe()
	}

	pub fn pause(&self) {
		self.task.pause();
	}

	pub fn cancel(&self) {
		self.task.cancel();
	}

	/// Waits for the job to reach a terminal status and returns its output.
	pub async fn wait(&self) -> JobResult<JobOutput> {
		let result = self.task.wait().await;
		match &*result {
			Ok(dispatch_system::ExecStatus::Done) => self
				.output
				.lock()
				.await
				.clone()
				.ok_or_else(|| JobError::invalid_state("job completed without recording output")),
			Ok(dispatch_system::ExecStatus::Canceled) => Err(JobError::Interrupted),
			Ok(dispatch_system::ExecStatus::Paused) => {
				Err(JobError::invalid_state("job is paused, not finished"))
			}
			Err(_) => Err(JobError::execution("job task failed")),
		}
	}
}
