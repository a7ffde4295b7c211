use serde::{Deserialize, Serialize};

/// A single progress update emitted by a running job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
	pub percentage: f32,
	pub message: Option<String>,
}

impl Progress {
	pub fn percentage(value: f32) -> Self {
		Self {
			percentage: value.clamp(0.0, 1.0),
			message: None,
		}
	}

	pub fn with_message(value: f32, message: impl Into<String>) -> Self {
		Self {
			percentage: value.clamp(0.0, 1.0),
			message: Some(message.into()),
		}
	}
}

/// Converts a job-specific progress representation into the generic wire
/// type broadcast to subscribers.
pub trait ToGenericProgress {
	fn to_generic(&self) -> Progress;
}
