use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::{ErasedJob, JobRegistration, JobSchema};

/// Lookup table of every job type linked into the binary, populated at
/// startup from `inventory::iter::<JobRegistration>()`.
pub struct JobRegistry {
	jobs: HashMap<&'static str, &'static JobRegistration>,
}

impl JobRegistry {
	fn new() -> Self {
		let mut jobs = HashMap::new();
		for registration in inventory::iter::<JobRegistration> {
			jobs.insert(registration.name, registration);
		}
		Self { jobs }
	}

	pub fn job_names(&self) -> Vec<&'static str> {
		self.jobs.keys().copied().collect()
	}

	pub fn get_schema(&self, name: &str) -> Option<JobSchema> {
		self.jobs.get(name).map(|r| (r.schema_fn)())
	}

	pub fn has_job(&self, name: &str) -> bool {
		self.jobs.contains_key(name)
	}

	pub fn create_job(&self, name: &str, params: serde_json::Value) -> JobResult<Box<dyn ErasedJob>> {
		let registration = self
			.jobs
			.get(name)
			.ok_or_else(|| JobError::NotFound(format!("unknown job type '{name}'")))?;
		(registration.create_fn)(params).map_err(|e| JobError::serialization(e.to_string()))
	}

	pub fn deserialize_job(&self, name: &str, state: &[u8]) -> JobResult<Box<dyn ErasedJob>> {
		let registration = self
			.jobs
			.get(name)
			.ok_or_else(|| JobError::NotFound(format!("unknown job type '{name}'")))?;
		(registration.deserialize_fn)(state).map_err(|e| JobError::serialization(e.to_string()))
	}
}

pub static REGISTRY: Lazy<JobRegistry> = Lazy::new(JobRegistry::new);
