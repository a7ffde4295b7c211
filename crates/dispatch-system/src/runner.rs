//! Minimal in-process runner for [`Task`] implementors: spawns each task on
//! its own tokio task and returns a handle that can await completion or
//! request pause/cancel.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;

use crate::task::{interrupt_channel, ExecStatus, Task, TaskId, TaskInterruptHandle};

/// A running (or finished) task's handle.
pub struct TaskHandle<E> {
	id: TaskId,
	interrupt: TaskInterruptHandle,
	result_rx: watch::Receiver<Option<Arc<Result<ExecStatus, E>>>>,
	_marker: PhantomData<E>,
}

impl<E: Send + Sync + 'static> TaskHandle<E> {
	pub fn id(&self) -> TaskId {
		self.id
	}

	pub fn pause(&self) {
		self.interrupt.pause();
	}

	pub fn cancel(&self) {
		self.interrupt.cancel();
	}

	/// Waits for the task to reach a terminal `ExecStatus`.
	pub async fn wait(&self) -> Arc<Result<ExecStatus, E>> {
		let mut rx = self.result_rx.clone();
		loop {
			if let Some(result) = rx.borrow().clone() {
				return result;
			}
			if rx.changed().await.is_err() {
				unreachable!("sender outlives every receiver until it sends a result");
			}
		}
	}
}

/// Dispatches a task for execution, immediately returning a handle.
///
/// Unlike [`crate::dispatcher::spawn`] (which drives one backend's external
/// scheduler interactions on a single worker), each call here spawns its own
/// tokio task: the intended use is wrapping the ambient bookkeeping layer's
/// jobs, which run locally rather than being submitted to a backend.
pub fn dispatch<T, E>(mut task: T) -> TaskHandle<E>
where
	T: Task<E> + 'static,
	E: Send + Sync + 'static,
{
	let id = task.id();
	let (interrupter, interrupt) = interrupt_channel();
	let (result_tx, result_rx) = watch::channel(None);

	tokio::spawn(async move {
		let result = task.run(&interrupter).await;
		let _ = result_tx.send(Some(Arc::new(result)));
	});

	TaskHandle {
		id,
		interrupt,
		result_rx,
		_marker: PhantomData,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;

	#[derive(Debug, thiserror::Error)]
	#[error("boom")]
	struct TestError;

	struct Immediate(TaskId);

	#[async_trait]
	impl Task<TestError> for Immediate {
		fn id(&self) -> TaskId {
			self.0
		}

		async fn run(&mut self, _interrupter: &crate::task::Interrupter) -> Result<ExecStatus, TestError> {
			Ok(ExecStatus::Done)
		}
	}

	#[tokio::test]
	async fn dispatch_runs_to_completion() {
		let handle = dispatch::<_, TestError>(Immediate(TaskId::new_v4()));
		let result = handle.wait().await;
		assert!(matches!(**result, Ok(ExecStatus::Done)));
	}
}
