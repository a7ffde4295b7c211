//! Minimal async task wrapper used to run a single dispatched job in-process,
//! independent of however its exit status was ultimately obtained from the
//! backing scheduler.

use async_trait::async_trait;
use uuid::Uuid;

/// Opaque identifier for an in-process task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
	pub fn new_v4() -> Self {
		Self(Uuid::new_v4())
	}
}

impl From<Uuid> for TaskId {
	fn from(id: Uuid) -> Self {
		Self(id)
	}
}

impl std::fmt::Display for TaskId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Why a task's run loop was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	Pause,
	Cancel,
}

/// Awaitable interruption signal. Resolves once a pause or cancel has been
/// requested for the task currently polling it.
#[derive(Debug)]
pub struct Interrupter {
	rx: tokio::sync::watch::Receiver<Option<InterruptionKind>>,
}

impl Interrupter {
	pub(crate) fn new(rx: tokio::sync::watch::Receiver<Option<InterruptionKind>>) -> Self {
		Self { rx }
	}

	/// Non-consuming check for an already-requested interruption. Lets a
	/// caller poll for pause/cancel cooperatively between steps of work
	/// rather than awaiting this future directly.
	pub fn peek(&self) -> Option<InterruptionKind> {
		*self.rx.borrow()
	}
}

impl std::future::Future for Interrupter {
	type Output = InterruptionKind;

	fn poll(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<Self::Output> {
		if let Some(kind) = *self.rx.borrow() {
			return std::task::Poll::Ready(kind);
		}
		let changed = self.rx.has_changed().unwrap_or(false);
		if changed {
			if let Some(kind) = *self.rx.borrow_and_update() {
				return std::task::Poll::Ready(kind);
			}
		}
		// Re-poll on wake by spawning a watcher; for simplicity we rely on the
		// caller driving this future inside a `race()` alongside other work,
		// which keeps this task awake whenever the channel changes.
		let waker = cx.waker().clone();
		let mut rx = self.rx.clone();
		tokio::spawn(async move {
			let _ = rx.changed().await;
			waker.wake();
		});
		std::task::Poll::Pending
	}
}

/// Final status of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Paused,
	Canceled,
}

/// A unit of in-process async work that can be paused or canceled cooperatively.
#[async_trait]
pub trait Task<E>: Send + Sync + 'static {
	fn id(&self) -> TaskId;

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;

	/// Whether this task should jump ahead of normally-queued work.
	fn with_priority(&self) -> bool {
		false
	}
}

#[async_trait]
impl<E: Send + Sync + 'static> Task<E> for Box<dyn Task<E>> {
	fn id(&self) -> TaskId {
		(**self).id()
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E> {
		(**self).run(interrupter).await
	}

	fn with_priority(&self) -> bool {
		(**self).with_priority()
	}
}

/// Handle used to request pause/cancel of a running task.
#[derive(Debug, Clone)]
pub struct TaskInterruptHandle {
	tx: tokio::sync::watch::Sender<Option<InterruptionKind>>,
}

impl TaskInterruptHandle {
	pub fn pause(&self) {
		let _ = self.tx.send(Some(InterruptionKind::Pause));
	}

	pub fn cancel(&self) {
		let _ = self.tx.send(Some(InterruptionKind::Cancel));
	}
}

/// Creates a linked `(Interrupter, TaskInterruptHandle)` pair for one task run.
pub fn interrupt_channel() -> (Interrupter, TaskInterruptHandle) {
	let (tx, rx) = tokio::sync::watch::channel(None);
	(Interrupter::new(rx), TaskInterruptHandle { tx })
}
