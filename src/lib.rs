//! flowcore
//!
//! A distributed workflow execution engine core: URI/path model, file
//! staging, the CWL resolver primitives, the tool-job/translator execution
//! graph, and a grid-engine dispatcher, wired together behind a small set of
//! collaborator traits so the CWL parser, container runtime, and storage
//! backend can all live outside this crate.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod credentials;
pub mod cwl;
pub mod events;
pub mod jobs;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::AppConfig;
use crate::context::EngineContext;
use crate::events::{Event, EventBus};
use crate::jobs::{JobCollaborators, JobManager};

/// The engine's top-level handle: a CLI front-end or an embedding
/// application constructs one of these and drives everything else through
/// it.
pub struct Engine {
	pub config: Arc<RwLock<AppConfig>>,
	pub events: Arc<EventBus>,
	pub jobs: Arc<JobManager>,
	pub context: EngineContext,
}

impl Engine {
	/// Initialize a new engine at the default data directory.
	pub async fn new(collaborators: JobCollaborators) -> anyhow::Result<Self> {
		let data_dir = crate::config::default_data_dir()?;
		Self::new_with_config(data_dir, collaborators).await
	}

	/// Initialize a new engine at a custom data directory.
	pub async fn new_with_config(
		data_dir: PathBuf,
		collaborators: JobCollaborators,
	) -> anyhow::Result<Self> {
		info!("initializing engine at {:?}", data_dir);

		// 1. Load or create app config.
		let config = AppConfig::load_or_create(&data_dir)?;
		config.ensure_directories()?;
		let config = Arc::new(RwLock::new(config));

		// 2. Create the event bus.
		let events = Arc::new(EventBus::default());

		// 3. Initialize the job manager, sharing the same collaborators every
		// dispatched job sees.
		let jobs = Arc::new(JobManager::new(&data_dir, collaborators.clone()).await?);

		// 4. Build the shared context handed to whatever drives the engine.
		let context = EngineContext::new(config.clone(), events.clone(), jobs.clone(), collaborators);

		// 5. Emit startup event.
		events.emit(Event::EngineStarted);

		Ok(Self {
			config,
			events,
			jobs,
			context,
		})
	}

	pub fn config(&self) -> Arc<RwLock<AppConfig>> {
		self.config.clone()
	}

	/// Re-dispatch any jobs the database still has in a non-terminal status,
	/// e.g. after a process restart.
	pub async fn resume_interrupted_jobs(&self) -> anyhow::Result<usize> {
		Ok(self.jobs.resume_interrupted_jobs().await?)
	}

	/// Shut the engine down gracefully: cancel and wait on every tracked job,
	/// then persist config.
	pub async fn shutdown(&self) -> anyhow::Result<()> {
		info!("shutting down engine");

		self.jobs.shutdown().await?;
		self.config.write().await.save()?;
		self.events.emit(Event::EngineShutdown);

		info!("engine shutdown complete");
		Ok(())
	}
}
