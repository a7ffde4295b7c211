//! Shared context wiring the job manager, collaborators, config, and event
//! bus together for whatever front-end embeds this crate.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::jobs::context::JobCollaborators;
use crate::jobs::manager::JobManager;

/// Shared context handed to anything driving the engine: a CLI front-end,
/// an embedding application, or a test harness.
#[derive(Clone)]
pub struct EngineContext {
	pub config: Arc<RwLock<AppConfig>>,
	pub events: Arc<EventBus>,
	pub jobs: Arc<JobManager>,
	pub collaborators: JobCollaborators,
}

impl EngineContext {
	pub fn new(
		config: Arc<RwLock<AppConfig>>,
		events: Arc<EventBus>,
		jobs: Arc<JobManager>,
		collaborators: JobCollaborators,
	) -> Self {
		Self {
			config,
			events,
			jobs,
			collaborators,
		}
	}
}
