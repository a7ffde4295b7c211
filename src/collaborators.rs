//! Contracts for everything this crate treats as an external collaborator:
//! the CWL parser/validator, the expression evaluator, container runtimes,
//! job-store backends, and the CLI front-end are all out of scope (see
//! `spec.md` §1) and named here only by the interface this crate needs from
//! them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::cwl::model::FileId;

#[derive(Debug, Error)]
pub enum CollaboratorError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("{0}")]
	Other(String),
}

/// The job-store collaborator: persistent content-addressed backing store
/// for files and workflow state. Concrete backends (local filesystem, S3,
/// GCS) are out of scope; this crate only calls through the trait.
#[async_trait]
pub trait JobStore: Send + Sync {
	async fn write_global_file(&self, local_path: &Path) -> Result<FileId, CollaboratorError>;
	async fn read_global_file(
		&self,
		id: &FileId,
		symlink: bool,
	) -> Result<PathBuf, CollaboratorError>;
	async fn read_global_file_stream(
		&self,
		id: &FileId,
	) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, CollaboratorError>;
	fn get_local_temp_dir(&self) -> PathBuf;
	fn get_local_temp_file_name(&self) -> PathBuf;
	async fn get_global_file_size(&self, id: &FileId) -> Result<u64, CollaboratorError>;
	async fn import_file(&self, url: &str, symlink: bool) -> Result<FileId, CollaboratorError>;
	async fn export_file(&self, id: &FileId, url: &str) -> Result<(), CollaboratorError>;

	async fn url_exists(&self, url: &str) -> Result<bool, CollaboratorError>;
	async fn get_size(&self, url: &str) -> Result<Option<u64>, CollaboratorError>;
	async fn get_is_directory(&self, url: &str) -> Result<bool, CollaboratorError>;
	async fn list_url(&self, url: &str) -> Result<Vec<String>, CollaboratorError>;
	async fn read_from_url(&self, url: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// The filesystem-access collaborator exposed to the tool runtime. Accepts
/// any of the virtual URI schemes as well as `file://` and whatever the job
/// store supports. Write modes are rejected by construction: there is no
/// `open_write`.
#[async_trait]
pub trait FilesystemAccess: Send + Sync {
	async fn exists(&self, path: &str) -> Result<bool, CollaboratorError>;
	async fn is_file(&self, path: &str) -> Result<bool, CollaboratorError>;
	async fn is_dir(&self, path: &str) -> Result<bool, CollaboratorError>;
	async fn size(&self, path: &str) -> Result<u64, CollaboratorError>;
	async fn list_dir(&self, path: &str) -> Result<Vec<String>, CollaboratorError>;
	async fn glob(&self, pattern: &str) -> Result<Vec<String>, CollaboratorError>;
	async fn realpath(&self, path: &str) -> Result<String, CollaboratorError>;
	fn join(&self, base: &str, part: &str) -> String;
	async fn open_read(&self, path: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// Runtime context passed to the tool-runtime collaborator for one
/// invocation. Mirrors the subset of cwltool's `RuntimeContext` this crate
/// actually threads through.
#[derive(Debug, Clone, Default)]
pub struct ToolRuntimeContext {
	pub toplevel: bool,
	pub outdir: PathBuf,
	pub tmpdir_prefix: PathBuf,
	pub move_outputs: bool,
	pub streaming_allowed: bool,
	pub preserve_environment: Vec<String>,
}

/// The tool-runtime collaborator: executes one CWL tool (container or local
/// process) and returns its resolved output object. Container engines
/// (Docker/Singularity/Podman) live entirely behind this trait.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
	async fn execute(
		&self,
		process: &Value,
		job_order: &Value,
		runtime_context: &ToolRuntimeContext,
	) -> Result<(Value, String), CollaboratorError>;
}

/// The expression-evaluator collaborator. No JavaScript engine is embedded
/// in this crate; `valueFrom` and `when` expressions are delegated here.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
	async fn eval(
		&self,
		expression: &str,
		inputs: &Value,
		requirements: &Value,
		context: Option<&Value>,
	) -> Result<Value, CollaboratorError>;
}

/// In-memory [`JobStore`] test double: content-addresses by a running
/// counter rather than a real hash, and keeps all bytes in a map.
#[derive(Default)]
pub struct MemoryJobStore {
	files: std::sync::Mutex<HashMap<String, Vec<u8>>>,
	next_id: std::sync::atomic::AtomicU64,
}

impl MemoryJobStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_bytes(&self, bytes: Vec<u8>) -> FileId {
		let n = self
			.next_id
			.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		let id = FileId::pack("mem", n);
		self.files.lock().unwrap().insert(id.as_str().to_string(), bytes);
		id
	}
}

#[async_trait]
impl JobStore for MemoryJobStore {
	async fn write_global_file(&self, local_path: &Path) -> Result<FileId, CollaboratorError> {
		let bytes = tokio::fs::read(local_path).await?;
		Ok(self.put_bytes(bytes))
	}

	async fn read_global_file(
		&self,
		id: &FileId,
		_symlink: bool,
	) -> Result<PathBuf, CollaboratorError> {
		let bytes = self
			.files
			.lock()
			.unwrap()
			.get(id.as_str())
			.cloned()
			.ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
		let tmp = self.get_local_temp_file_name();
		tokio::fs::write(&tmp, bytes).await?;
		Ok(tmp)
	}

	async fn read_global_file_stream(
		&self,
		id: &FileId,
	) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, CollaboratorError> {
		let bytes = self
			.files
			.lock()
			.unwrap()
			.get(id.as_str())
			.cloned()
			.ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
		Ok(Box::new(std::io::Cursor::new(bytes)))
	}

	fn get_local_temp_dir(&self) -> PathBuf {
		std::env::temp_dir()
	}

	fn get_local_temp_file_name(&self) -> PathBuf {
		std::env::temp_dir().join(uuid::Uuid::new_v4().to_string())
	}

	async fn get_global_file_size(&self, id: &FileId) -> Result<u64, CollaboratorError> {
		self.files
			.lock()
			.unwrap()
			.get(id.as_str())
			.map(|b| b.len() as u64)
			.ok_or_else(|| CollaboratorError::NotFound(id.to_string()))
	}

	async fn import_file(&self, url: &str, _symlink: bool) -> Result<FileId, CollaboratorError> {
		let path = url.strip_prefix("file://").unwrap_or(url);
		let bytes = tokio::fs::read(path).await?;
		Ok(self.put_bytes(bytes))
	}

	async fn export_file(&self, id: &FileId, url: &str) -> Result<(), CollaboratorError> {
		let bytes = self
			.files
			.lock()
			.unwrap()
			.get(id.as_str())
			.cloned()
			.ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
		let path = url.strip_prefix("file://").unwrap_or(url);
		tokio::fs::write(path, bytes).await?;
		Ok(())
	}

	async fn url_exists(&self, url: &str) -> Result<bool, CollaboratorError> {
		Ok(self.files.lock().unwrap().contains_key(url))
	}

	async fn get_size(&self, _url: &str) -> Result<Option<u64>, CollaboratorError> {
		Ok(None)
	}

	async fn get_is_directory(&self, _url: &str) -> Result<bool, CollaboratorError> {
		Ok(false)
	}

	async fn list_url(&self, _url: &str) -> Result<Vec<String>, CollaboratorError> {
		Ok(Vec::new())
	}

	async fn read_from_url(&self, url: &str) -> Result<Vec<u8>, CollaboratorError> {
		self.files
			.lock()
			.unwrap()
			.get(url)
			.cloned()
			.ok_or_else(|| CollaboratorError::NotFound(url.to_string()))
	}
}

/// Expression-evaluator test double: only handles the literal constant case
/// (no `$(...)`/`${...}` parsing), enough to exercise resolver logic in
/// isolation from a real JS engine.
pub struct NullEvaluator;

#[async_trait]
impl ExpressionEvaluator for NullEvaluator {
	async fn eval(
		&self,
		expression: &str,
		_inputs: &Value,
		_requirements: &Value,
		_context: Option<&Value>,
	) -> Result<Value, CollaboratorError> {
		serde_json::from_str(expression)
			.map_err(|e| CollaboratorError::Other(format!("cannot evaluate '{expression}': {e}")))
	}
}
