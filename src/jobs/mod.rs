//! Ambient job bookkeeping: status, progress, checkpoints, and resumption
//! for whatever work the rest of the crate dispatches onto the in-process
//! task runner. This is deliberately separate from `dispatch_system`'s grid
//! engine dispatcher, which talks to an external batch scheduler instead.

pub mod context;
pub mod database;
pub mod dispatcher_bridge;
pub mod error;
pub mod executor;
pub mod handle;
pub mod manager;
pub mod output;
pub mod progress;
pub mod registry;
pub mod traits;
pub mod types;
pub mod workflow_job;

pub use context::{CheckpointHandler, JobCollaborators, JobContext};
pub use dispatcher_bridge::{BridgeError, DispatchBridge};
pub use error::{JobError, JobResult};
pub use handle::JobHandle;
pub use manager::JobManager;
pub use output::JobOutput;
pub use progress::Progress;
pub use registry::{JobRegistry, REGISTRY};
pub use traits::{Job, JobDependencies, JobHandler, ResourceRequirement, ResourceRequirements};
pub use types::{JobId, JobInfo, JobPriority, JobSchema, JobStatus};
pub use workflow_job::WorkflowJob;
