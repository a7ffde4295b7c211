//! Grid-engine style dispatcher: a single background worker task that
//! submits, polls, and kills jobs against a [`BatchSystemBackend`], talking to
//! the rest of the process only through four FIFO channels.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BatchSystemBackend, ExternalBatchId, JobExitStatus, JobId, JobSubmission};
use crate::error::{BackendError, DispatchError};

/// Emitted once a job's terminal exit status has been observed. The
/// dispatcher forgets the job immediately after sending this, so a given
/// `job_id` is reported at most once.
#[derive(Debug, Clone)]
pub struct UpdatedBatchJobInfo {
	pub job_id: JobId,
	pub exit_status: JobExitStatus,
}

/// Best-effort notice published as soon as a job is handed to the scheduler,
/// mainly useful for cross-process bookkeeping/debugging.
#[derive(Debug, Clone)]
pub struct ExternalBatchIdMessage {
	pub job_id: JobId,
	pub external_batch_id: ExternalBatchId,
	pub backend_name: String,
}

/// Front-end handle to a running dispatcher. Cloning shares the same
/// underlying queues; only one worker task drains them.
#[derive(Clone)]
pub struct DispatcherHandle {
	new_jobs_tx: mpsc::UnboundedSender<Option<JobSubmission>>,
	kill_tx: mpsc::UnboundedSender<JobId>,
	killed_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>>,
	updated_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<UpdatedBatchJobInfo>>>,
	external_id_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ExternalBatchIdMessage>>>,
}

impl DispatcherHandle {
	/// Enqueue a new job for submission.
	pub fn issue(&self, job: JobSubmission) -> Result<(), DispatchError> {
		self.new_jobs_tx
			.send(Some(job))
			.map_err(|_| DispatchError::ShuttingDown)
	}

	/// Request a job be killed. Idempotent: unknown or already-terminated
	/// ids are accepted without error; the worker resolves them.
	pub fn kill(&self, job_id: JobId) -> Result<(), DispatchError> {
		self.kill_tx
			.send(job_id)
			.map_err(|_| DispatchError::ShuttingDown)
	}

	/// Await confirmation that a kill request completed.
	pub async fn recv_killed(&self) -> Option<JobId> {
		self.killed_rx.lock().await.recv().await
	}

	/// Await the next terminal status update.
	pub async fn recv_updated(&self) -> Option<UpdatedBatchJobInfo> {
		self.updated_rx.lock().await.recv().await
	}

	/// Await the next best-effort external-id notice.
	pub async fn recv_external_id(&self) -> Option<ExternalBatchIdMessage> {
		self.external_id_rx.lock().await.recv().await
	}

	/// Push the shutdown sentinel and wait for the worker to drain.
	pub async fn shutdown(&self, worker: JoinHandle<()>) {
		let _ = self.new_jobs_tx.send(None);
		let _ = worker.await;
	}
}

struct Worker<B: BatchSystemBackend> {
	backend: Arc<B>,
	max_jobs: usize,
	waiting: VecDeque<JobSubmission>,
	running: HashSet<JobId>,
	id_map: HashMap<JobId, ExternalBatchId>,
	last_poll: Option<Instant>,

	new_jobs_rx: mpsc::UnboundedReceiver<Option<JobSubmission>>,
	kill_rx: mpsc::UnboundedReceiver<JobId>,
	killed_tx: mpsc::UnboundedSender<JobId>,
	updated_tx: mpsc::UnboundedSender<UpdatedBatchJobInfo>,
	external_id_tx: mpsc::UnboundedSender<ExternalBatchIdMessage>,
}

/// Retries a fallible scheduler interaction up to 3 times on transient
/// errors, sleeping `wait` between attempts, and re-raises on exhaustion.
pub async fn with_retries<T, F, Fut>(wait: Duration, mut op: F) -> Result<T, BackendError>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, BackendError>>,
{
	const MAX_TRIES: u32 = 3;
	let mut tries = 0;
	loop {
		tries += 1;
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if err.is_transient() && tries < MAX_TRIES => {
				warn!(tries, %err, "transient scheduler error, retrying");
				tokio::time::sleep(wait).await;
			}
			Err(err) => {
				if tries >= MAX_TRIES {
					warn!(tries, %err, "scheduler operation exhausted retries");
				}
				return Err(err);
			}
		}
	}
}

impl<B: BatchSystemBackend> Worker<B> {
	fn forget_job(&mut self, job_id: JobId) {
		self.running.remove(&job_id);
		self.id_map.remove(&job_id);
	}

	async fn create_jobs(&mut self, new_job: Option<JobSubmission>) -> Result<bool, DispatchError> {
		let mut activity = false;
		if let Some(job) = new_job {
			activity = true;
			self.waiting.push_back(job);
		}

		while !self.waiting.is_empty() && self.running.len() < self.max_jobs {
			activity = true;
			let job = self.waiting.pop_front().expect("checked non-empty above");
			let job_id = job.id;
			let wait = self.backend.get_wait_duration();

			let command = self.backend.prepare_submission(&job).await?;
			let backend = Arc::clone(&self.backend);
			let batch_id = with_retries(wait, || backend.submit_job(command.clone())).await?;

			debug!(job_id, %batch_id, "submitted job");
			let _ = self.external_id_tx.send(ExternalBatchIdMessage {
				job_id,
				external_batch_id: batch_id.clone(),
				backend_name: self.backend.name().to_string(),
			});

			self.id_map.insert(job_id, batch_id);
			self.running.insert(job_id);
		}

		Ok(activity)
	}

	async fn kill_jobs(&mut self) -> Result<bool, DispatchError> {
		let mut to_kill = Vec::new();
		while let Ok(job_id) = self.kill_rx.try_recv() {
			to_kill.push(job_id);
		}
		if to_kill.is_empty() {
			return Ok(false);
		}

		let wait = self.backend.get_wait_duration();
		let mut killed_running = Vec::new();

		for job_id in to_kill {
			if self.running.contains(&job_id) {
				let batch_id = self
					.id_map
					.get(&job_id)
					.cloned()
					.ok_or(DispatchError::UnknownJob(job_id))?;
				let backend = Arc::clone(&self.backend);
				let target = batch_id.clone();
				with_retries(wait, || backend.kill_job(&target)).await?;
				killed_running.push((job_id, batch_id));
			} else {
				self.waiting.retain(|j| j.id != job_id);
				let _ = self.killed_tx.send(job_id);
			}
		}

		for (job_id, batch_id) in killed_running {
			loop {
				if self.backend.get_job_exit_code(&batch_id).await?.is_some() {
					break;
				}
				tokio::time::sleep(wait).await;
			}
			let _ = self.killed_tx.send(job_id);
			self.forget_job(job_id);
		}

		Ok(true)
	}

	async fn check_on_jobs(&mut self) -> Result<bool, DispatchError> {
		let wait = self.backend.get_wait_duration();
		if let Some(last) = self.last_poll {
			if last.elapsed() < wait {
				return Ok(false);
			}
		}
		self.last_poll = Some(Instant::now());

		if self.running.is_empty() {
			return Ok(false);
		}

		let pairs: Vec<(JobId, ExternalBatchId)> = self
			.running
			.iter()
			.map(|id| (*id, self.id_map[id].clone()))
			.collect();
		let batch_ids: Vec<ExternalBatchId> = pairs.iter().map(|(_, b)| b.clone()).collect();

		let results = match self.backend.coalesce_job_exit_codes(&batch_ids).await {
			Some(results) => results,
			None => {
				let mut results = Vec::with_capacity(batch_ids.len());
				for batch_id in &batch_ids {
					results.push(self.backend.get_job_exit_code(batch_id).await);
				}
				results
			}
		};

		let mut activity = false;
		for ((job_id, _), result) in pairs.into_iter().zip(results) {
			if let Some(exit_status) = result? {
				activity = true;
				let _ = self.updated_tx.send(UpdatedBatchJobInfo {
					job_id,
					exit_status,
				});
				self.forget_job(job_id);
			}
		}

		Ok(activity)
	}

	/// One iteration of the main loop. Returns `false` on the shutdown
	/// sentinel.
	async fn run_step(&mut self) -> Result<bool, DispatchError> {
		let mut activity = false;
		let mut new_job = None;

		match self.new_jobs_rx.try_recv() {
			Ok(Some(job)) => {
				activity = true;
				new_job = Some(job);
			}
			Ok(None) => return Ok(false),
			Err(_) => {}
		}

		if self.kill_jobs().await? {
			activity = true;
		}
		if self.create_jobs(new_job).await? {
			activity = true;
		}
		if self.check_on_jobs().await? {
			activity = true;
		}

		if !activity {
			tokio::time::sleep(self.backend.get_wait_duration()).await;
		}

		Ok(true)
	}

	async fn run(mut self) {
		loop {
			match self.run_step().await {
				Ok(true) => continue,
				Ok(false) => break,
				Err(err) => {
					warn!(%err, "dispatcher step failed, continuing");
				}
			}
		}
		info!(backend = self.backend.name(), "dispatcher worker shut down");
	}
}

/// Spawns the worker task and returns a handle plus its `JoinHandle` (pass
/// the latter to [`DispatcherHandle::shutdown`]).
pub fn spawn<B: BatchSystemBackend>(
	backend: Arc<B>,
	max_jobs: usize,
) -> (DispatcherHandle, JoinHandle<()>) {
	let (new_jobs_tx, new_jobs_rx) = mpsc::unbounded_channel();
	let (kill_tx, kill_rx) = mpsc::unbounded_channel();
	let (killed_tx, killed_rx) = mpsc::unbounded_channel();
	let (updated_tx, updated_rx) = mpsc::unbounded_channel();
	let (external_id_tx, external_id_rx) = mpsc::unbounded_channel();

	let worker = Worker {
		backend,
		max_jobs,
		waiting: VecDeque::new(),
		running: HashSet::new(),
		id_map: HashMap::new(),
		last_poll: None,
		new_jobs_rx,
		kill_rx,
		killed_tx,
		updated_tx,
		external_id_tx,
	};

	let join = tokio::spawn(worker.run());

	let handle = DispatcherHandle {
		new_jobs_tx,
		kill_tx,
		killed_rx: Arc::new(tokio::sync::Mutex::new(killed_rx)),
		updated_rx: Arc::new(tokio::sync::Mutex::new(updated_rx)),
		external_id_rx: Arc::new(tokio::sync::Mutex::new(external_id_rx)),
	};

	(handle, join)
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};
	use tokio::sync::Mutex as AsyncMutex;

	struct CountingBackend {
		submitted: AtomicU32,
		exit_after: Duration,
		running_ids: AsyncMutex<HashSet<ExternalBatchId>>,
	}

	#[async_trait]
	impl BatchSystemBackend for CountingBackend {
		fn name(&self) -> &str {
			"counting-test-backend"
		}

		async fn prepare_submission(
			&self,
			job: &JobSubmission,
		) -> Result<Vec<String>, BackendError> {
			Ok(vec!["run".into(), job.id.to_string()])
		}

		async fn submit_job(&self, command: Vec<String>) -> Result<ExternalBatchId, BackendError> {
			let n = self.submitted.fetch_add(1, Ordering::SeqCst);
			let id = ExternalBatchId(format!("batch-{n}-{}", command.join(",")));
			self.running_ids.lock().await.insert(id.clone());
			Ok(id)
		}

		async fn kill_job(&self, id: &ExternalBatchId) -> Result<(), BackendError> {
			self.running_ids.lock().await.remove(id);
			Ok(())
		}

		async fn get_running_job_ids(&self) -> Result<HashSet<ExternalBatchId>, BackendError> {
			Ok(self.running_ids.lock().await.clone())
		}

		async fn get_job_exit_code(
			&self,
			id: &ExternalBatchId,
		) -> Result<Option<JobExitStatus>, BackendError> {
			tokio::time::sleep(self.exit_after).await;
			if self.running_ids.lock().await.remove(id) {
				Ok(Some(JobExitStatus::Code(0)))
			} else {
				Ok(None)
			}
		}

		fn get_wait_duration(&self) -> Duration {
			Duration::from_millis(5)
		}
	}

	#[tokio::test]
	async fn running_cap_is_respected_and_waiting_drains_fifo() {
		let backend = Arc::new(CountingBackend {
			submitted: AtomicU32::new(0),
			exit_after: Duration::from_millis(1),
			running_ids: AsyncMutex::new(HashSet::new()),
		});
		let (handle, join) = spawn(backend, 2);

		for i in 0..5u64 {
			handle
				.issue(JobSubmission {
					id: i,
					cores: 1.0,
					memory_bytes: 0,
					disk_bytes: 0,
					command: vec!["true".into()],
					display_name: format!("job-{i}"),
					environment: Default::default(),
					accelerators: vec![],
					preemptible: false,
				})
				.unwrap();
		}

		let mut seen = HashSet::new();
		for _ in 0..5 {
			let info = handle.recv_updated().await.expect("job should complete");
			assert!(seen.insert(info.job_id), "job id reported more than once");
		}

		handle.shutdown(join).await;
	}

	#[tokio::test]
	async fn kill_while_waiting_is_never_submitted() {
		let backend = Arc::new(CountingBackend {
			submitted: AtomicU32::new(0),
			exit_after: Duration::from_millis(200),
			running_ids: AsyncMutex::new(HashSet::new()),
		});
		let (handle, join) = spawn(backend, 1);

		for i in 0..3u64 {
			handle
				.issue(JobSubmission {
					id: i,
					cores: 1.0,
					memory_bytes: 0,
					disk_bytes: 0,
					command: vec!["true".into()],
					display_name: format!("job-{i}"),
					environment: Default::default(),
					accelerators: vec![],
					preemptible: false,
				})
				.unwrap();
		}

		// job 0 is submitted immediately (maxJobs=1); jobs 1 and 2 wait.
		tokio::time::sleep(Duration::from_millis(20)).await;
		handle.kill(2).unwrap();

		let killed = handle.recv_killed().await.expect("kill confirmation");
		assert_eq!(killed, 2);

		handle.shutdown(join).await;
	}
}
