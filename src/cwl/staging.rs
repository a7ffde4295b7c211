//! File staging: import (leader, or per-job at output reintegration) and
//! materialize (worker, before tool execution) passes over CWL File/
//! Directory trees. Grounded on the same manually-boxed recursive-future
//! and streaming-copy patterns this codebase already used for cross-volume
//! file transfer.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, FilesystemAccess, JobStore};
use crate::cwl::model::{CwlDirectory, CwlFile, CwlValue};
use crate::cwl::uri::{self, DirEntry, DirectoryContents, UriError};

#[derive(Debug, Error)]
pub enum StagingError {
	#[error(transparent)]
	Collaborator(#[from] CollaboratorError),
	#[error(transparent)]
	Uri(#[from] UriError),
	#[error("missing required input file: {0}")]
	MissingRequired(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Controls how tolerant import is of unreachable inputs. The required/
/// optional distinction itself is applied later by the validator collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
	pub skip_broken: bool,
	pub skip_remote: bool,
}

/// Bidirectional bookkeeping for one import pass, scoped to a single job or
/// leader phase. Never shared across threads.
#[derive(Debug, Default)]
pub struct ImportMaps {
	/// external URI -> toil URI, used to deduplicate uploads.
	pub index: HashMap<String, String>,
	/// toil URI -> original URI, used to preserve identity across passes.
	pub existing: HashMap<String, String>,
}

fn is_virtual_location(location: &str) -> bool {
	location.starts_with("toilfile:") || location.starts_with("toildir:") || location.starts_with("_:")
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Recursively imports every File/Directory reachable from `value`,
/// replacing `location` with a `toilfile:`/`toildir:` URI. Already-virtual
/// or synthetic locations pass through unchanged.
pub fn import_files<'a>(
	job_store: &'a dyn JobStore,
	filesystem: &'a dyn FilesystemAccess,
	maps: &'a mut ImportMaps,
	options: ImportOptions,
	value: CwlValue,
) -> BoxFuture<'a, Result<CwlValue, StagingError>> {
	Box::pin(async move {
		match value {
			CwlValue::File(file) => Ok(CwlValue::File(
				import_file(job_store, maps, options, file).await?,
			)),
			CwlValue::Directory(dir) => Ok(CwlValue::Directory(
				import_directory(job_store, filesystem, maps, options, dir).await?,
			)),
			CwlValue::Array(items) => {
				let mut out = Vec::with_capacity(items.len());
				for item in items {
					out.push(import_files(job_store, filesystem, maps, options, item).await?);
				}
				Ok(CwlValue::Array(out))
			}
			CwlValue::Record(fields) => {
				let mut out = BTreeMap::new();
				for (k, v) in fields {
					out.insert(k, import_files(job_store, filesystem, maps, options, v).await?);
				}
				Ok(CwlValue::Record(out))
			}
			other => Ok(other),
		}
	})
}

async fn import_file(
	job_store: &dyn JobStore,
	maps: &mut ImportMaps,
	options: ImportOptions,
	mut file: CwlFile,
) -> Result<CwlFile, StagingError> {
	if is_virtual_location(&file.location) {
		return Ok(file);
	}

	if let Some(toil_uri) = maps.index.get(&file.location) {
		file.location = toil_uri.clone();
		return Ok(file);
	}

	if options.skip_remote && !file.location.starts_with("file://") {
		return Ok(file);
	}

	let local_path = file.location.strip_prefix("file://").map(PathBuf::from);
	let import_result = match local_path {
		Some(ref path) if !path.exists() => {
			if options.skip_broken {
				return Ok(file);
			}
			Err(StagingError::MissingRequired(file.location.clone()))
		}
		_ => job_store
			.import_file(&file.location, false)
			.await
			.map_err(|e| {
				warn!(location = %file.location, error = %e, "failed to import file");
				StagingError::Collaborator(e)
			}),
	};

	let id = import_result?;
	let toil_uri = id.to_toilfile_uri();
	maps.index.insert(file.location.clone(), toil_uri.clone());
	maps.existing.insert(toil_uri.clone(), file.location.clone());
	file.location = toil_uri;
	Ok(file)
}

async fn import_directory(
	job_store: &dyn JobStore,
	filesystem: &dyn FilesystemAccess,
	maps: &mut ImportMaps,
	options: ImportOptions,
	mut dir: CwlDirectory,
) -> Result<CwlDirectory, StagingError> {
	if is_virtual_location(&dir.location) {
		return Ok(dir);
	}

	// Descend: populate a one-level listing from the filesystem if absent,
	// preserving any already-resolved entries (e.g. secondary files).
	if dir.listing.as_ref().map(|l| l.is_empty()).unwrap_or(true) {
		let names = filesystem.list_dir(&dir.location).await?;
		let mut listing = dir.listing.take().unwrap_or_default();
		let known: std::collections::HashSet<String> = listing
			.iter()
			.filter_map(basename_of)
			.collect();
		for name in names {
			if known.contains(&name) {
				continue;
			}
			let child_location = filesystem.join(&dir.location, &name);
			if filesystem.is_dir(&child_location).await? {
				listing.push(CwlValue::Directory(CwlDirectory::new(child_location, name)));
			} else {
				listing.push(CwlValue::File(CwlFile::new(child_location, name)));
			}
		}
		dir.listing = Some(listing);
	}

	let basenames: Vec<String> = dir
		.listing
		.iter()
		.flatten()
		.filter_map(basename_of)
		.collect();
	uri::ensure_no_collisions(&basenames)?;

	// Ascend: import every child, then fold the results into a contents map.
	let mut contents = DirectoryContents::new();
	let mut new_listing = Vec::new();
	for child in dir.listing.take().into_iter().flatten() {
		let imported = import_files(job_store, filesystem, maps, options, child).await?;
		match &imported {
			CwlValue::File(f) => {
				contents.insert(f.basename.clone(), DirEntry::File(f.location.clone()));
			}
			CwlValue::Directory(d) => {
				let (nested, _, _) = uri::decode_directory(&d.location)
					.unwrap_or_else(|_| (DirectoryContents::new(), None, String::new()));
				contents.insert(d.basename.clone(), DirEntry::Dir(nested));
			}
			_ => {}
		}
		new_listing.push(imported);
	}
	dir.listing = Some(new_listing);
	dir.location = uri::encode_directory(&contents)?;
	Ok(dir)
}

fn basename_of(value: &CwlValue) -> Option<String> {
	match value {
		CwlValue::File(f) => Some(f.basename.clone()),
		CwlValue::Directory(d) => Some(d.basename.clone()),
		_ => None,
	}
}

/// Materializes a (possibly virtual) location into a `file://` path a tool
/// can open directly, streaming it through a named pipe when the file is
/// marked streamable and the store is non-local.
pub async fn toil_get_file(
	job_store: &dyn JobStore,
	location: &str,
	streamable: bool,
	streaming_allowed: bool,
	store_is_local: bool,
) -> Result<(String, Option<tokio::task::JoinHandle<()>>), StagingError> {
	if let Some(rest) = location.strip_prefix("toildir:") {
		let full = format!("toildir:{rest}");
		let (contents, subpath, _key) = uri::decode_directory(&full)?;
		return match subpath {
			None => materialize_directory(job_store, &contents).await,
			Some(subpath) => match uri::resolve_subpath(&contents, &subpath) {
				Some(DirEntry::File(file_uri)) => {
					Box::pin(toil_get_file(
						job_store,
						file_uri,
						streamable,
						streaming_allowed,
						store_is_local,
					))
					.await
				}
				Some(DirEntry::Dir(nested)) => materialize_directory(job_store, nested).await,
				None => Err(StagingError::MissingRequired(location.to_string())),
			},
		};
	}

	if location.starts_with("_:") {
		let dir = tempfile::tempdir()?.into_path();
		return Ok((format!("file://{}", dir.display()), None));
	}

	if location.starts_with("file://") || !location.contains(':') {
		return Ok((location.to_string(), None));
	}

	if let Some(id_str) = location.strip_prefix("toilfile:") {
		let id = crate::cwl::model::FileId::from_toilfile_uri(&format!("toilfile:{id_str}"))
			.expect("prefix already matched");
		if streamable && streaming_allowed && !store_is_local {
			let (path, handle) = spawn_streaming_pipe(job_store, id).await?;
			return Ok((format!("file://{}", path.display()), Some(handle)));
		}
		let path = job_store.read_global_file(&id, true).await?;
		return Ok((format!("file://{}", path.display()), None));
	}

	let bytes = job_store.read_from_url(location).await?;
	let dest = job_store.get_local_temp_file_name();
	tokio::fs::write(&dest, bytes).await?;
	Ok((format!("file://{}", dest.display()), None))
}

async fn materialize_directory(
	job_store: &dyn JobStore,
	contents: &DirectoryContents,
) -> Result<(String, Option<tokio::task::JoinHandle<()>>), StagingError> {
	let root = tempfile::tempdir()?.into_path();
	materialize_into(job_store, contents, &root).await?;
	Ok((format!("file://{}", root.display()), None))
}

fn materialize_into<'a>(
	job_store: &'a dyn JobStore,
	contents: &'a DirectoryContents,
	dest: &'a Path,
) -> BoxFuture<'a, Result<(), StagingError>> {
	Box::pin(async move {
		tokio::fs::create_dir_all(dest).await?;
		for (name, entry) in contents {
			let child_path = dest.join(name);
			match entry {
				DirEntry::File(uri) => {
					let (materialized, handle) =
						toil_get_file(job_store, uri, false, false, true).await?;
					if let Some(handle) = handle {
						handle.abort();
					}
					let src = materialized.strip_prefix("file://").unwrap_or(&materialized);
					tokio::fs::copy(src, &child_path).await?;
				}
				DirEntry::Dir(nested) => {
					materialize_into(job_store, nested, &child_path).await?;
				}
			}
		}
		Ok(())
	})
}

async fn spawn_streaming_pipe(
	job_store: &dyn JobStore,
	id: crate::cwl::model::FileId,
) -> Result<(PathBuf, tokio::task::JoinHandle<()>), StagingError> {
	let pipe_path = job_store.get_local_temp_file_name();
	#[cfg(unix)]
	{
		let c_path = std::ffi::CString::new(pipe_path.to_string_lossy().as_bytes())
			.expect("temp path has no interior nul");
		let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
		if rc != 0 {
			return Err(StagingError::Io(std::io::Error::last_os_error()));
		}
	}

	let mut reader = job_store.read_global_file_stream(&id).await?;
	let path_for_writer = pipe_path.clone();
	let handle = tokio::spawn(async move {
		use tokio::io::AsyncReadExt;
		match tokio::fs::OpenOptions::new()
			.write(true)
			.open(&path_for_writer)
			.await
		{
			Ok(mut pipe) => {
				let mut buf = [0u8; 64 * 1024];
				loop {
					match reader.read(&mut buf).await {
						Ok(0) => break,
						Ok(n) => {
							if let Err(e) = pipe.write_all(&buf[..n]).await {
								if e.kind() == std::io::ErrorKind::BrokenPipe {
									// Tool closed its end early; not an error.
									break;
								}
								warn!(error = %e, "streaming pipe writer failed");
								break;
							}
						}
						Err(e) => {
							warn!(error = %e, "streaming pipe reader failed");
							break;
						}
					}
				}
			}
			Err(e) => warn!(error = %e, "failed to open streaming pipe for write"),
		}
	});

	Ok((pipe_path, handle))
}

/// Removes secondary-file entries that still contain an unresolved
/// expression, or whose location is neither in the store, synthetic, a
/// Directory, nor an existing local file.
pub async fn prune_unresolved_secondary_files(
	filesystem: &dyn FilesystemAccess,
	secondary_files: Vec<CwlValue>,
) -> Vec<CwlValue> {
	let mut kept = Vec::with_capacity(secondary_files.len());
	for entry in secondary_files {
		let (basename, location) = match &entry {
			CwlValue::File(f) => (f.basename.clone(), f.location.clone()),
			CwlValue::Directory(_) => {
				kept.push(entry);
				continue;
			}
			_ => continue,
		};
		if has_unresolved_expression(&basename) || has_unresolved_expression(&location) {
			continue;
		}
		if is_virtual_location(&location) {
			kept.push(entry);
			continue;
		}
		let local = location.strip_prefix("file://").unwrap_or(&location);
		if matches!(filesystem.exists(local).await, Ok(true)) {
			kept.push(entry);
		} else {
			info!(location = %location, "dropping unresolved secondary file");
		}
	}
	kept
}

fn has_unresolved_expression(s: &str) -> bool {
	s.contains("$(") || s.contains("${")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborators::MemoryJobStore;

	struct NoopFilesystem;

	#[async_trait::async_trait]
	impl FilesystemAccess for NoopFilesystem {
		async fn exists(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(true)
		}
		async fn is_file(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(true)
		}
		async fn is_dir(&self, _path: &str) -> Result<bool, CollaboratorError> {
			Ok(false)
		}
		async fn size(&self, _path: &str) -> Result<u64, CollaboratorError> {
			Ok(0)
		}
		async fn list_dir(&self, _path: &str) -> Result<Vec<String>, CollaboratorError> {
			Ok(Vec::new())
		}
		async fn glob(&self, _pattern: &str) -> Result<Vec<String>, CollaboratorError> {
			Ok(Vec::new())
		}
		async fn realpath(&self, path: &str) -> Result<String, CollaboratorError> {
			Ok(path.to_string())
		}
		fn join(&self, base: &str, part: &str) -> String {
			format!("{base}/{part}")
		}
		async fn open_read(&self, _path: &str) -> Result<Vec<u8>, CollaboratorError> {
			Ok(Vec::new())
		}
	}

	#[tokio::test]
	async fn already_virtual_locations_pass_through() {
		let store = MemoryJobStore::new();
		let fs = NoopFilesystem;
		let mut maps = ImportMaps::default();
		let value = CwlValue::File(CwlFile::new("toilfile:abc:3", "x.txt"));
		let result = import_files(&store, &fs, &mut maps, ImportOptions::default(), value)
			.await
			.unwrap();
		assert_eq!(result, CwlValue::File(CwlFile::new("toilfile:abc:3", "x.txt")));
	}

	#[tokio::test]
	async fn imports_a_local_file_and_caches_the_mapping() {
		let store = MemoryJobStore::new();
		let fs = NoopFilesystem;
		let mut maps = ImportMaps::default();

		let tmp = tempfile::NamedTempFile::new().unwrap();
		tokio::fs::write(tmp.path(), b"hello").await.unwrap();
		let location = format!("file://{}", tmp.path().display());

		let value = CwlValue::File(CwlFile::new(location.clone(), "input.txt"));
		let result = import_files(&store, &fs, &mut maps, ImportOptions::default(), value)
			.await
			.unwrap();
		let CwlValue::File(file) = result else {
			panic!("expected file");
		};
		assert!(file.location.starts_with("toilfile:"));
		assert!(maps.index.contains_key(&location));
	}

	#[tokio::test]
	async fn synthetic_directory_materializes_to_an_empty_dir() {
		let store = MemoryJobStore::new();
		let (uri, handle) = toil_get_file(&store, "_:anon", false, false, true)
			.await
			.unwrap();
		assert!(uri.starts_with("file://"));
		assert!(handle.is_none());
	}
}
