//! Grid-engine style job dispatcher: a background worker that submits,
//! polls, and kills jobs against a pluggable scheduler backend, plus a small
//! in-process async task wrapper used by callers that need cooperative
//! pause/cancel around a single unit of work.

mod backend;
mod dispatcher;
mod error;
mod local_backend;
mod runner;
mod slurm_backend;
mod task;

pub use backend::{
	AcceleratorRequirement, BatchSystemBackend, ExitReason, ExternalBatchId, JobExitStatus, JobId,
	JobSubmission,
};
pub use dispatcher::{spawn, with_retries, DispatcherHandle, ExternalBatchIdMessage, UpdatedBatchJobInfo};
pub use error::{BackendError, DispatchError};
pub use local_backend::LocalProcessBackend;
pub use runner::{dispatch, TaskHandle};
pub use slurm_backend::{CommandRunner, SlurmBackend};
pub use task::{interrupt_channel, ExecStatus, Interrupter, InterruptionKind, Task, TaskId, TaskInterruptHandle};
