//! Broadcast event bus for state changes a front-end might want to display
//! live: job lifecycle transitions, dispatcher submissions, and streaming
//! diagnostics. Same shape as this codebase's existing event bus — a
//! `tokio::broadcast` channel wrapped so a missing receiver is never an
//! error.

use tokio::sync::broadcast;

use crate::jobs::types::{JobId, JobStatus};

#[derive(Debug, Clone)]
pub enum Event {
	EngineStarted,
	EngineShutdown,

	JobDispatched { job_id: JobId, name: String },
	JobStatusChanged { job_id: JobId, status: JobStatus },
	JobProgress { job_id: JobId, percentage: f32, message: Option<String> },
	JobFinished { job_id: JobId, status: JobStatus },

	/// Mirrors the dispatcher's own `ExternalBatchIdMessage`: a job handed
	/// to a grid-engine backend got an id from that scheduler.
	ExternalBatchIdAssigned {
		job_id: JobId,
		external_batch_id: String,
		backend_name: String,
	},

	/// A streamed file's writer thread finished (cleanly or via EPIPE).
	StreamingPipeClosed { job_id: JobId, location: String, error: Option<String> },
}

pub struct EventBus {
	sender: broadcast::Sender<Event>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn emit(&self, event: Event) {
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}
