use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::jobs::context::JobContext;
use crate::jobs::error::JobResult;
use crate::jobs::output::JobOutput;
use crate::jobs::types::JobSchema;

/// Static facts about a job type, independent of any particular run.
pub trait Job: Send + Sync + 'static {
	const NAME: &'static str;
	const RESUMABLE: bool = true;
	const VERSION: u32 = 1;
	const DESCRIPTION: Option<&'static str> = None;

	fn schema() -> JobSchema
	where
		Self: Sized;
}

/// The actual work a job performs.
#[async_trait]
pub trait JobHandler: Job {
	type Output: Into<JobOutput> + Send;

	async fn run(&mut self, ctx: JobContext<'_>) -> JobResult<Self::Output>;

	async fn on_pause(&mut self, _ctx: &JobContext<'_>) -> JobResult<()> {
		Ok(())
	}

	async fn on_resume(&mut self, _ctx: &JobContext<'_>) -> JobResult<()> {
		Ok(())
	}

	async fn on_cancel(&mut self, _ctx: &JobContext<'_>) -> JobResult<()> {
		Ok(())
	}
}

/// Blanket bound every job type must satisfy to be checkpointed and
/// resumed across process restarts.
pub trait SerializableJob: Serialize + DeserializeOwned {
	fn serialize(&self) -> JobResult<Vec<u8>> {
		rmp_serde::to_vec(self).map_err(|e| crate::jobs::error::JobError::serialization(e.to_string()))
	}

	fn deserialize(bytes: &[u8]) -> JobResult<Self>
	where
		Self: Sized,
	{
		rmp_serde::from_slice(bytes).map_err(|e| crate::jobs::error::JobError::serialization(e.to_string()))
	}
}

impl<T: Serialize + DeserializeOwned> SerializableJob for T {}

/// Single named resource requirement (e.g. a particular accelerator kind).
#[derive(Debug, Clone)]
pub enum ResourceRequirement {
	Named(String),
	DiskSpace(u64),
	Memory(u64),
	Cores(f64),
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRequirements(pub Vec<ResourceRequirement>);

impl ResourceRequirements {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, req: ResourceRequirement) -> Self {
		self.0.push(req);
		self
	}
}

/// Opt-in hook for jobs whose resource needs are known before they run.
pub trait JobDependencies {
	fn resource_requirements(&self) -> ResourceRequirements {
		ResourceRequirements::default()
	}
}
