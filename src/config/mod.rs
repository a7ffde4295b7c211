//! On-disk engine configuration: data directory layout, logging, and the
//! resource defaults a job gets when its tool doesn't declare its own
//! requirements.

pub mod app_config;
pub mod migration;

pub use app_config::{AppConfig, DefaultResources};
pub use migration::Migrate;

use std::path::PathBuf;

use anyhow::anyhow;

pub fn default_data_dir() -> anyhow::Result<PathBuf> {
	dirs::data_dir()
		.map(|d| d.join("flowcore"))
		.ok_or_else(|| anyhow!("could not determine a default data directory for this platform"))
}
