use thiserror::Error;

/// Error raised by a scheduler backend while preparing, submitting, killing,
/// or polling a job. Distinguishes transient scheduler hiccups (worth a
/// retry) from everything else.
#[derive(Debug, Error, Clone)]
pub enum BackendError {
	#[error("scheduler command failed: {0}")]
	Transient(String),

	#[error("scheduler rejected the job: {0}")]
	Fatal(String),
}

impl BackendError {
	pub fn is_transient(&self) -> bool {
		matches!(self, BackendError::Transient(_))
	}
}

/// Error surfaced by the dispatcher itself.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error(transparent)]
	Backend(#[from] BackendError),

	#[error("job {0} is not known to the dispatcher")]
	UnknownJob(u64),

	#[error("dispatcher worker has already shut down")]
	ShuttingDown,
}
