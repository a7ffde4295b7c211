//! Orchestrates job dispatch, tracking, and resumption. This is the entry
//! point callers use; everything else in `crate::jobs` exists to support it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, RwLock};
use tracing::{info, warn};

use crate::jobs::context::{CheckpointHandler, JobCollaborators};
use crate::jobs::database::{init_database, JobDb};
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::handle::JobHandle;
use crate::jobs::progress::Progress;
use crate::jobs::registry::REGISTRY;
use crate::jobs::traits::{Job, JobHandler};
use crate::jobs::types::{ErasedJob, JobId, JobInfo, JobPriority, JobStatus};

struct TrackedJob {
	handle: JobHandle,
	name: String,
}

/// Dispatches jobs onto the in-process task runner, persists their
/// bookkeeping to sqlite, and tracks the ones currently live in this
/// process so their handles can be looked up again.
pub struct JobManager {
	job_db: Arc<JobDb>,
	collaborators: JobCollaborators,
	running: Arc<RwLock<HashMap<JobId, TrackedJob>>>,
}

impl JobManager {
	pub async fn new(data_dir: &Path, collaborators: JobCollaborators) -> JobResult<Self> {
		let db_path = data_dir.join("jobs.sqlite");
		let conn = init_database(&db_path).await?;
		Ok(Self {
			job_db: Arc::new(JobDb::new(conn)),
			collaborators,
			running: Arc::new(RwLock::new(HashMap::new())),
		})
	}

	/// Dispatches a new job at normal priority with no parent.
	pub async fn dispatch<J>(&self, job: J) -> JobResult<JobHandle>
	where
		J: Job + JobHandler + ErasedJob + 'static,
	{
		self.dispatch_with_priority(job, JobPriority::NORMAL, None).await
	}

	pub async fn dispatch_with_priority<J>(
		&self,
		job: J,
		priority: JobPriority,
		parent_job_id: Option<JobId>,
	) -> JobResult<JobHandle>
	where
		J: Job + JobHandler + ErasedJob + 'static,
	{
		let job_id = JobId::new();
		let state = job.serialize_state()?;
		self.job_db
			.insert_job(job_id, J::NAME, state, priority.0, parent_job_id)
			.await?;

		let handle = self
			.spawn_executor(job_id, J::NAME.to_string(), Box::new(job))
			.await?;
		self.running.write().await.insert(
			job_id,
			TrackedJob {
				handle: handle.clone(),
				name: J::NAME.to_string(),
			},
		);
		Ok(handle)
	}

	async fn spawn_executor(
		&self,
		job_id: JobId,
		name: String,
		job: Box<dyn ErasedJob>,
	) -> JobResult<JobHandle> {
		let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
		let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<Progress>();
		let (broadcast_tx, _) = broadcast::channel(256);

		let (executor, output) = job.create_executor(
			job_id,
			self.job_db.clone(),
			status_tx,
			progress_tx,
			broadcast_tx.clone(),
			self.job_db.clone() as Arc<dyn CheckpointHandler>,
			self.collaborators.clone(),
		);

		let job_db_for_progress = self.job_db.clone();
		tokio::spawn(async move {
			while let Some(progress) = progress_rx.recv().await {
				if let Err(e) = job_db_for_progress
					.update_progress(job_id, progress.percentage)
					.await
				{
					warn!(%job_id, error = %e, "failed to persist job progress");
				}
			}
		});

		let task_handle = Arc::new(dispatch_system::dispatch::<_, JobError>(executor));
		info!(%job_id, %name, "job dispatched");
		Ok(JobHandle::new(job_id, status_rx, broadcast_tx, task_handle, output))
	}

	pub async fn get_job(&self, job_id: JobId) -> Option<JobHandle> {
		self.running.read().await.get(&job_id).map(|t| t.handle.clone())
	}

	pub async fn list_running_jobs(&self) -> Vec<JobInfo> {
		let running = self.running.read().await;
		let mut infos = Vec::with_capacity(running.len());
		for (job_id, tracked) in running.iter() {
			if let Ok(Some(model)) = self.job_db.get_job(*job_id).await {
				infos.push(job_info_from_model(model));
			} else {
				infos.push(JobInfo {
					id: *job_id,
					name: tracked.name.clone(),
					status: tracked.handle.status(),
					priority: JobPriority::NORMAL,
					progress: 0.0,
					parent_job_id: None,
					created_at: chrono::Utc::now(),
					started_at: None,
					completed_at: None,
					error_message: None,
				});
			}
		}
		infos
	}

	pub async fn list_jobs(&self, status: Option<JobStatus>) -> JobResult<Vec<JobInfo>> {
		let queued = self.job_db.get_queued_jobs().await?;
		Ok(queued
			.into_iter()
			.map(job_info_from_model)
			.filter(|info| match status {
				Some(s) => info.status == s,
				None => true,
			})
			.collect())
	}

	pub async fn get_job_info(&self, job_id: JobId) -> JobResult<Option<JobInfo>> {
		Ok(self.job_db.get_job(job_id).await?.map(job_info_from_model))
	}

	/// Re-dispatches every job the database still has in a non-terminal
	/// status, e.g. after a process restart. Jobs whose type is not
	/// `RESUMABLE` (or is no longer linked into the binary) are left
	/// untouched; a caller inspecting job history can still see why they
	/// stalled via their persisted status.
	pub async fn resume_interrupted_jobs(&self) -> JobResult<usize> {
		let mut resumed = 0;
		for model in self.job_db.get_queued_jobs().await? {
			let job_id: JobId = match model.id.parse() {
				Ok(uuid) => JobId(uuid),
				Err(_) => continue,
			};
			if self.running.read().await.contains_key(&job_id) {
				continue;
			}
			let job = match REGISTRY.deserialize_job(&model.name, &model.state) {
				Ok(job) => job,
				Err(e) => {
					warn!(%job_id, name = %model.name, error = %e, "could not deserialize job for resumption");
					continue;
				}
			};
			let handle = self.spawn_executor(job_id, model.name.clone(), job).await?;
			self.running.write().await.insert(
				job_id,
				TrackedJob {
					handle,
					name: model.name,
				},
			);
			resumed += 1;
		}
		Ok(resumed)
	}

	/// Requests cancellation of every currently tracked job and waits for
	/// each to reach a terminal state. Best-effort: a job that ignores
	/// interruption checks will still be waited on to completion.
	pub async fn shutdown(&self) -> JobResult<()> {
		let handles: Vec<JobHandle> = self
			.running
			.read()
			.await
			.values()
			.map(|t| t.handle.clone())
			.collect();
		for handle in &handles {
			handle.cancel();
		}
		for handle in &handles {
			let _ = handle.wait().await;
		}
		self.running.write().await.clear();
		Ok(())
	}
}

fn job_info_from_model(model: crate::jobs::database::jobs::Model) -> JobInfo {
	JobInfo {
		id: model
			.id
			.parse()
			.map(JobId)
			.unwrap_or_else(|_| JobId::new()),
		name: model.name,
		status: parse_status(&model.status),
		priority: JobPriority(model.priority),
		progress: model.progress_percent,
		parent_job_id: model.parent_job_id.and_then(|s| s.parse().ok()).map(JobId),
		created_at: model.created_at,
		started_at: model.started_at,
		completed_at: model.completed_at,
		error_message: model.error_message,
	}
}

fn parse_status(s: &str) -> JobStatus {
	match s {
		"running" => JobStatus::Running,
		"paused" => JobStatus::Paused,
		"completed" => JobStatus::Completed,
		"failed" => JobStatus::Failed,
		"cancelled" => JobStatus::Cancelled,
		_ => JobStatus::Queued,
	}
}
