//! Builds the table of logical input locations to concrete paths in a job's
//! staging directory, honoring copy/link/create modes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::collaborators::{CollaboratorError, FilesystemAccess};
use crate::cwl::model::{CwlDirectory, CwlFile, CwlValue};

/// How a mapped entry should be realized on the worker's local disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
	File,
	CreateFile,
	WritableFile,
	CreateWritableFile,
	Directory,
	WritableDirectory,
}

/// One row of the path-mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperEntry {
	/// The value's original location, or literal contents for `CreateFile`.
	pub resolved: String,
	pub target: PathBuf,
	pub path_type: PathType,
	/// Whether this entry itself needs staging, or is implied by an
	/// ancestor directory being copied in whole.
	pub staged: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PathMapperError {
	#[error(transparent)]
	Collaborator(#[from] CollaboratorError),
}

/// Logical location -> concrete target path, built by one recursive walk
/// over a job's resolved input object.
#[derive(Debug, Default)]
pub struct PathMapper {
	table: BTreeMap<String, MapperEntry>,
	used_targets: HashSet<PathBuf>,
}

impl PathMapper {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> &BTreeMap<String, MapperEntry> {
		&self.table
	}

	pub fn get(&self, location: &str) -> Option<&MapperEntry> {
		self.table.get(location)
	}

	/// Walks `value`, adding a row for every File/Directory it reaches.
	/// `stagedir` is the destination directory for top-level targets;
	/// `writable` marks the branch as InitialWorkDir-writable.
	pub async fn map(
		&mut self,
		filesystem: &dyn FilesystemAccess,
		stagedir: &Path,
		value: &CwlValue,
		writable: bool,
	) -> Result<(), PathMapperError> {
		self.map_inner(filesystem, stagedir, value, writable, true).await
	}

	fn map_inner<'a>(
		&'a mut self,
		filesystem: &'a dyn FilesystemAccess,
		stagedir: &'a Path,
		value: &'a CwlValue,
		writable: bool,
		staged: bool,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), PathMapperError>> + Send + 'a>> {
		Box::pin(async move {
			match value {
				CwlValue::File(file) => self.map_file(filesystem, stagedir, file, writable, staged).await,
				CwlValue::Directory(dir) => {
					self.map_directory(filesystem, stagedir, dir, writable, staged).await
				}
				CwlValue::Array(items) => {
					for item in items {
						self.map_inner(filesystem, stagedir, item, writable, staged).await?;
					}
					Ok(())
				}
				CwlValue::Record(fields) => {
					for item in fields.values() {
						self.map_inner(filesystem, stagedir, item, writable, staged).await?;
					}
					Ok(())
				}
				_ => Ok(()),
			}
		})
	}

	async fn map_file(
		&mut self,
		filesystem: &dyn FilesystemAccess,
		stagedir: &Path,
		file: &CwlFile,
		writable: bool,
		staged: bool,
	) -> Result<(), PathMapperError> {
		if self.table.contains_key(&file.location) {
			return Ok(());
		}

		let (resolved, path_type) = if let Some(contents) = &file.contents {
			let path_type = if writable {
				PathType::CreateWritableFile
			} else {
				PathType::CreateFile
			};
			(contents.clone(), path_type)
		} else {
			let resolved = self.dereference(filesystem, &file.location).await?;
			let path_type = if writable {
				PathType::WritableFile
			} else {
				PathType::File
			};
			(resolved, path_type)
		};

		let target = self.unique_target(stagedir, &file.basename);
		self.table.insert(
			file.location.clone(),
			MapperEntry {
				resolved,
				target,
				path_type,
				staged,
			},
		);

		for secondary in &file.secondary_files {
			self.map_inner(filesystem, stagedir, secondary, writable, staged)
				.await?;
		}
		Ok(())
	}

	async fn map_directory(
		&mut self,
		filesystem: &dyn FilesystemAccess,
		stagedir: &Path,
		dir: &CwlDirectory,
		writable: bool,
		staged: bool,
	) -> Result<(), PathMapperError> {
		if self.table.contains_key(&dir.location) {
			return Ok(());
		}

		let (resolved, path_type) = if dir.location.starts_with("_:") {
			(String::new(), PathType::WritableDirectory)
		} else {
			let resolved = self.dereference(filesystem, &dir.location).await?;
			let path_type = if writable {
				PathType::WritableDirectory
			} else {
				PathType::Directory
			};
			(resolved, path_type)
		};

		let target = self.unique_target(stagedir, &dir.basename);
		let copied_whole = !dir.location.starts_with("_:") && !path_type_is_writable(path_type);
		self.table.insert(
			dir.location.clone(),
			MapperEntry {
				resolved,
				target: target.clone(),
				path_type,
				staged,
			},
		);

		// When the whole directory is fetched as one unit, children are not
		// separately staged: mark them so, but still record their targets
		// (needed by anything addressing a file deep inside the tree).
		let child_staged = staged && !copied_whole;
		for child in dir.listing.iter().flatten() {
			self.map_inner(filesystem, &target, child, writable, child_staged)
				.await?;
		}
		Ok(())
	}

	/// Symlinks on the host are dereferenced; http(s) references are left
	/// for the caller to download into a local cache (that download itself
	/// is a job-store concern, out of this mapper's scope).
	async fn dereference(
		&self,
		filesystem: &dyn FilesystemAccess,
		location: &str,
	) -> Result<String, PathMapperError> {
		if let Some(local) = location.strip_prefix("file://") {
			let real = filesystem.realpath(local).await?;
			return Ok(format!("file://{real}"));
		}
		Ok(location.to_string())
	}

	/// If `stagedir/basename` is already taken, renames to `basename_2`,
	/// `basename_3`, ... until unique. Every colliding source gets its own
	/// distinct renamed target, not a single shared slot.
	fn unique_target(&mut self, stagedir: &Path, basename: &str) -> PathBuf {
		let mut candidate = stagedir.join(basename);
		if !self.used_targets.contains(&candidate) {
			self.used_targets.insert(candidate.clone());
			return candidate;
		}

		let (stem, ext) = split_basename(basename);
		let mut n = 2;
		loop {
			let renamed = match &ext {
				Some(ext) => format!("{stem}_{n}.{ext}"),
				None => format!("{stem}_{n}"),
			};
			candidate = stagedir.join(renamed);
			if !self.used_targets.contains(&candidate) {
				self.used_targets.insert(candidate.clone());
				return candidate;
			}
			n += 1;
		}
	}
}

fn path_type_is_writable(path_type: PathType) -> bool {
	matches!(
		path_type,
		PathType::WritableFile | PathType::CreateWritableFile | PathType::WritableDirectory
	)
}

fn split_basename(basename: &str) -> (&str, Option<&str>) {
	match basename.rsplit_once('.') {
		Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
		_ => (basename, None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct IdentityFilesystem;

	#[async_trait::async_trait]
	impl FilesystemAccess for IdentityFilesystem {
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
	async fn colliding_basenames_get_distinct_renamed_targets() {
		let fs = IdentityFilesystem;
		let mut mapper = PathMapper::new();
		let stagedir = PathBuf::from("/work/stage");

		let a = CwlValue::File(CwlFile::new("file:///a/data.txt", "data.txt"));
		let b = CwlValue::File(CwlFile::new("file:///b/data.txt", "data.txt"));
		let c = CwlValue::File(CwlFile::new("file:///c/data.txt", "data.txt"));

		mapper.map(&fs, &stagedir, &a, false).await.unwrap();
		mapper.map(&fs, &stagedir, &b, false).await.unwrap();
		mapper.map(&fs, &stagedir, &c, false).await.unwrap();

		let targets: HashSet<_> = ["file:///a/data.txt", "file:///b/data.txt", "file:///c/data.txt"]
			.iter()
			.map(|loc| mapper.get(loc).unwrap().target.clone())
			.collect();
		assert_eq!(targets.len(), 3, "each collision must get its own target");
		assert!(targets.contains(&stagedir.join("data.txt")));
		assert!(targets.contains(&stagedir.join("data_2.txt")));
		assert!(targets.contains(&stagedir.join("data_3.txt")));
	}

	#[tokio::test]
	async fn anonymous_directory_is_create_writable() {
		let fs = IdentityFilesystem;
		let mut mapper = PathMapper::new();
		let stagedir = PathBuf::from("/work/stage");
		let dir = CwlValue::Directory(CwlDirectory::new("_:scratch", "out"));
		mapper.map(&fs, &stagedir, &dir, true).await.unwrap();
		let entry = mapper.get("_:scratch").unwrap();
		assert_eq!(entry.path_type, PathType::WritableDirectory);
		assert_eq!(entry.resolved, "");
	}

	#[tokio::test]
	async fn already_mapped_directory_is_not_restaged() {
		let fs = IdentityFilesystem;
		let mut mapper = PathMapper::new();
		let stagedir = PathBuf::from("/work/stage");
		let dir = CwlValue::Directory(CwlDirectory::new("file:///d", "d"));
		mapper.map(&fs, &stagedir, &dir, false).await.unwrap();
		mapper.map(&fs, &stagedir, &dir, false).await.unwrap();
		assert_eq!(mapper.entries().len(), 1);
	}
}
