//! Reference backend that runs jobs as plain child processes on the local
//! host. Useful for tests and for workflows with no HPC scheduler available.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{
	BatchSystemBackend, ExternalBatchId, JobExitStatus, JobSubmission,
};
use crate::error::BackendError;

/// Spawns each job as a child process and tracks it by pid.
pub struct LocalProcessBackend {
	children: Mutex<std::collections::HashMap<ExternalBatchId, Child>>,
}

impl LocalProcessBackend {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			children: Mutex::new(std::collections::HashMap::new()),
		})
	}
}

#[async_trait]
impl BatchSystemBackend for LocalProcessBackend {
	fn name(&self) -> &str {
		"local-process"
	}

	async fn prepare_submission(&self, job: &JobSubmission) -> Result<Vec<String>, BackendError> {
		if job.command.is_empty() {
			return Err(BackendError::Fatal(format!(
				"job {} has an empty command line",
				job.id
			)));
		}
		Ok(job.command.clone())
	}

	async fn submit_job(&self, command: Vec<String>) -> Result<ExternalBatchId, BackendError> {
		let mut cmd = Command::new(&command[0]);
		cmd.args(&command[1..])
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null());

		let child = cmd
			.spawn()
			.map_err(|e| BackendError::Transient(format!("spawn failed: {e}")))?;
		let pid = child
			.id()
			.ok_or_else(|| BackendError::Fatal("child exited before pid was observed".into()))?;
		let batch_id = ExternalBatchId(pid.to_string());

		debug!(%batch_id, "spawned local process");
		self.children.lock().await.insert(batch_id.clone(), child);
		Ok(batch_id)
	}

	async fn kill_job(&self, id: &ExternalBatchId) -> Result<(), BackendError> {
		let mut children = self.children.lock().await;
		if let Some(child) = children.get_mut(id) {
			let _ = child.start_kill();
		}
		Ok(())
	}

	async fn get_running_job_ids(&self) -> Result<HashSet<ExternalBatchId>, BackendError> {
		Ok(self.children.lock().await.keys().cloned().collect())
	}

	async fn get_job_exit_code(
		&self,
		id: &ExternalBatchId,
	) -> Result<Option<JobExitStatus>, BackendError> {
		let mut children = self.children.lock().await;
		let Some(child) = children.get_mut(id) else {
			return Ok(None);
		};

		match child.try_wait() {
			Ok(Some(status)) => {
				children.remove(id);
				#[cfg(unix)]
				{
					use std::os::unix::process::ExitStatusExt;
					if let Some(signal) = status.signal() {
						return Ok(Some(match signal {
							9 => JobExitStatus::Reason(crate::backend::ExitReason::Killed),
							_ => JobExitStatus::Code(128 + signal),
						}));
					}
				}
				Ok(Some(JobExitStatus::Code(status.code().unwrap_or(-1))))
			}
			Ok(None) => Ok(None),
			Err(e) => Err(BackendError::Transient(format!("wait failed: {e}"))),
		}
	}
}
