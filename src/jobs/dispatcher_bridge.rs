//! Bridges a tool job's resolved resource requirements (component F) into
//! the grid-engine dispatcher (component G): translates
//! [`crate::cwl::tool_job::ResolvedResources`] into a
//! `dispatch_system::JobSubmission`, issues it, and blocks the calling step
//! until the scheduler reports it admitted.
//!
//! This engine ships no standalone worker binary for a batch scheduler to
//! exec, so the submitted command is a bookkeeping placeholder rather than a
//! literal re-invocation of the tool; the dispatcher is exercised here purely
//! as a resource-admission gate ahead of the in-process `ToolRuntime`
//! collaborator, which still performs the actual execution once admission
//! succeeds. A deployment that wants the scheduler to run the tool itself
//! supplies a `BatchSystemBackend` whose `prepare_submission` turns that
//! placeholder into a real worker invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use dispatch_system::{DispatchError, DispatcherHandle, JobId as DispatchJobId, JobSubmission, UpdatedBatchJobInfo};

use crate::cwl::tool_job::ResolvedResources;

#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("dispatcher rejected submission: {0}")]
	Rejected(#[from] DispatchError),
	#[error("dispatcher shut down before admitting {display_name:?}")]
	ShutDown { display_name: String },
	#[error("grid-engine admission for {display_name:?} failed: {status:?}")]
	Denied { display_name: String, status: dispatch_system::JobExitStatus },
}

static NEXT_SUBMISSION_ID: AtomicU64 = AtomicU64::new(1);

/// Routes each dispatcher's terminal-status updates back to whichever
/// `admit` call is waiting on that submission id, so concurrent steps can
/// share one [`DispatcherHandle`] without stealing each other's updates off
/// the handle's single receiver.
pub struct DispatchBridge {
	handle: DispatcherHandle,
	pending: Arc<Mutex<HashMap<DispatchJobId, oneshot::Sender<UpdatedBatchJobInfo>>>>,
}

impl DispatchBridge {
	pub fn new(handle: DispatcherHandle) -> Self {
		let pending: Arc<Mutex<HashMap<DispatchJobId, oneshot::Sender<UpdatedBatchJobInfo>>>> =
			Arc::new(Mutex::new(HashMap::new()));
		let listener_handle = handle.clone();
		let listener_pending = pending.clone();
		tokio::spawn(async move {
			while let Some(info) = listener_handle.recv_updated().await {
				if let Some(tx) = listener_pending.lock().await.remove(&info.job_id) {
					let _ = tx.send(info);
				}
			}
		});
		Self { handle, pending }
	}

	/// Submits a resource reservation for `display_name` and waits for the
	/// scheduler to report its terminal status. Resolves once admission
	/// succeeds (exit code 0); any other outcome is an error the caller
	/// should treat the same as a failed tool invocation.
	pub async fn admit(&self, display_name: &str, resources: &ResolvedResources) -> Result<(), BridgeError> {
		let id = NEXT_SUBMISSION_ID.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.insert(id, tx);

		let submission = JobSubmission {
			id,
			cores: resources.cores,
			memory_bytes: resources.ram_bytes,
			disk_bytes: resources.disk_bytes,
			command: vec!["true".to_string()],
			display_name: display_name.to_string(),
			environment: Default::default(),
			accelerators: resources.accelerators.clone(),
			preemptible: resources.preemptible,
		};

		if let Err(err) = self.handle.issue(submission) {
			self.pending.lock().await.remove(&id);
			return Err(BridgeError::Rejected(err));
		}

		let info = rx.await.map_err(|_| BridgeError::ShutDown { display_name: display_name.to_string() })?;
		let (code, reason) = info.exit_status.as_reported();
		if code == 0 && reason.is_none() {
			Ok(())
		} else {
			Err(BridgeError::Denied { display_name: display_name.to_string(), status: info.exit_status })
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dispatch_system::{spawn, LocalProcessBackend};

	#[tokio::test]
	async fn admits_concurrent_submissions_without_crosstalk() {
		let backend = LocalProcessBackend::new();
		let (handle, _join) = spawn(backend, 4);
		let bridge = Arc::new(DispatchBridge::new(handle));

		let resources = ResolvedResources {
			cores: 1.0,
			ram_bytes: 1024,
			disk_bytes: 1024,
			accelerators: Vec::new(),
			preemptible: false,
		};

		let futures = (0..8).map(|i| {
			let bridge = bridge.clone();
			let resources = resources.clone();
			async move { bridge.admit(&format!("job-{i}"), &resources).await }
		});
		let results: Vec<_> = futures::future::join_all(futures).await;
		assert!(results.iter().all(|r| r.is_ok()));
	}
}
