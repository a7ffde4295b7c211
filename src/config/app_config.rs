//! Application configuration

use super::{default_data_dir, migration::Migrate};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level
	pub log_level: String,

	/// Upper bound on jobs the in-process driver runs concurrently
	pub max_concurrent_jobs: usize,

	/// Whether streamable inputs may be piped rather than downloaded whole
	pub streaming_allowed: bool,

	/// Dispatcher's `statePollingWait`, in seconds
	pub state_polling_wait_secs: u64,

	/// Resource numbers a step gets when its tool declares none
	pub default_resources: DefaultResources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultResources {
	pub cores: f64,
	pub ram_mib: f64,
	pub tmpdir_mib: f64,
	pub outdir_mib: f64,
}

impl Default for DefaultResources {
	fn default() -> Self {
		Self {
			cores: 1.0,
			ram_mib: 1024.0,
			tmpdir_mib: 1024.0,
			outdir_mib: 1024.0,
		}
	}
}

impl AppConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory
	pub fn load_from(data_dir: &PathBuf) -> Result<Self> {
		let config_path = data_dir.join("flowcore.json");

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: AppConfig = serde_json::from_str(&json)?;

			if config.version < Self::target_version() {
				info!("Migrating config from v{} to v{}", config.version, Self::target_version());
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.clone());
			config.save()?;
			Ok(config)
		}
	}

	/// Load or create configuration
	pub fn load_or_create(data_dir: &PathBuf) -> Result<Self> {
		Self::load_from(data_dir).or_else(|_| {
			let config = Self::default_with_dir(data_dir.clone());
			config.save()?;
			Ok(config)
		})
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			max_concurrent_jobs: 8,
			streaming_allowed: true,
			state_polling_wait_secs: 1,
			default_resources: DefaultResources::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join("flowcore.json");
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Path to the job-bookkeeping sqlite database
	pub fn jobs_db_path(&self) -> PathBuf {
		self.data_dir.join("jobs.sqlite")
	}

	/// Worker-local scratch root for tool staging/output directories
	pub fn tmp_dir(&self) -> PathBuf {
		self.data_dir.join("tmp")
	}

	/// Ensure all required directories exist
	pub fn ensure_directories(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		fs::create_dir_all(self.tmp_dir())?;
		Ok(())
	}
}

impl Default for AppConfig {
	fn default() -> Self {
		let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
		Self::default_with_dir(data_dir)
	}
}

impl Migrate for AppConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		1
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				Ok(())
			}
			1 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}
