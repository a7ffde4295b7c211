use thiserror::Error;

pub type JobResult<T = ()> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("job was interrupted")]
	Interrupted,

	#[error("job execution failed: {0}")]
	ExecutionFailed(String),

	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	#[error("serialization error: {0}")]
	Serialization(String),

	#[error("job not found: {0}")]
	NotFound(String),

	#[error("invalid job state: {0}")]
	InvalidState(String),

	#[error("dispatch error: {0}")]
	Dispatch(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<String> for JobError {
	fn from(s: String) -> Self {
		JobError::Other(s.into())
	}
}

impl JobError {
	pub fn execution(msg: impl Into<String>) -> Self {
		JobError::ExecutionFailed(msg.into())
	}

	pub fn serialization(msg: impl Into<String>) -> Self {
		JobError::Serialization(msg.into())
	}

	pub fn invalid_state(msg: impl Into<String>) -> Self {
		JobError::InvalidState(msg.into())
	}

	pub fn dispatch(msg: impl Into<String>) -> Self {
		JobError::Dispatch(msg.into())
	}

	pub fn is_interrupted(&self) -> bool {
		matches!(self, JobError::Interrupted)
	}
}
