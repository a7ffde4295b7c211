//! Core CWL data model: tagged File/Directory values, the content-addressed
//! `FileId`, and the bookkeeping structures the translator and resolvers
//! thread through a workflow run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::jobs::types::JobId;

/// A File reference. `location` is one of the URI schemes in
/// [`crate::cwl::uri`]: `toilfile:`, `toildir:.../subpath`, `file://`,
/// `_:anon`, or a job-store-supported remote scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CwlFile {
	pub location: String,
	pub basename: String,
	pub size: Option<u64>,
	pub checksum: Option<String>,
	pub contents: Option<String>,
	#[serde(default)]
	pub secondary_files: Vec<CwlValue>,
	pub streamable: Option<bool>,
	pub format: Option<String>,
}

impl CwlFile {
	pub fn new(location: impl Into<String>, basename: impl Into<String>) -> Self {
		Self {
			location: location.into(),
			basename: basename.into(),
			size: None,
			checksum: None,
			contents: None,
			secondary_files: Vec::new(),
			streamable: None,
			format: None,
		}
	}
}

/// A Directory reference. A `toildir:` location encodes `listing` as a
/// recursive name→URI-or-subdirectory map (see [`crate::cwl::uri`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CwlDirectory {
	pub location: String,
	pub basename: String,
	#[serde(default)]
	pub listing: Option<Vec<CwlValue>>,
}

impl CwlDirectory {
	pub fn new(location: impl Into<String>, basename: impl Into<String>) -> Self {
		Self {
			location: location.into(),
			basename: basename.into(),
			listing: None,
		}
	}
}

/// Any value flowing through a CWL workflow: a JSON-like scalar, a File or
/// Directory, a nested array/record, or the distinguished skip sentinel.
///
/// Modeled as a sum type with an exhaustive match at every visit site,
/// rather than leaning on dynamic dispatch over a class hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CwlValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	File(CwlFile),
	Directory(CwlDirectory),
	Array(Vec<CwlValue>),
	Record(BTreeMap<String, CwlValue>),
	/// Marks the output of a step whose `when` evaluated false. Never
	/// escapes to a workflow consumer; `pickValue`/`filter_skip_null`
	/// reduce it to [`CwlValue::Null`] before any output crosses a step
	/// boundary unfiltered.
	Skip,
}

impl CwlValue {
	pub fn is_null_or_skip(&self) -> bool {
		matches!(self, CwlValue::Null | CwlValue::Skip)
	}

	pub fn as_file(&self) -> Option<&CwlFile> {
		match self {
			CwlValue::File(f) => Some(f),
			_ => None,
		}
	}

	pub fn as_directory(&self) -> Option<&CwlDirectory> {
		match self {
			CwlValue::Directory(d) => Some(d),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&[CwlValue]> {
		match self {
			CwlValue::Array(items) => Some(items),
			_ => None,
		}
	}
}

/// Opaque content-addressable id for a file inside the job store. Unpacking
/// always yields a record the store can read back; repacking a given
/// `(hash, size)` pair is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
	pub fn pack(content_hash: &str, size: u64) -> Self {
		Self(format!("{content_hash}:{size}"))
	}

	pub fn unpack(&self) -> Option<(&str, u64)> {
		let (hash, size) = self.0.rsplit_once(':')?;
		Some((hash, size.parse().ok()?))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn to_toilfile_uri(&self) -> String {
		format!("toilfile:{}", self.0)
	}

	pub fn from_toilfile_uri(uri: &str) -> Option<Self> {
		uri.strip_prefix("toilfile:").map(|id| Self(id.to_string()))
	}
}

impl std::fmt::Display for FileId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A lazy reference to a value a not-yet-run job will produce: a producing
/// job plus a key inside its eventual result record. Never evaluated until
/// the consuming job actually runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepPromise {
	pub producer: JobId,
	pub output_key: String,
}

/// Workflow translator bookkeeping for one in-progress expansion pass.
#[derive(Debug, Default)]
pub struct TranslatorState {
	/// paramID -> producing job
	pub promises: std::collections::HashMap<String, JobId>,
	/// stepID -> job
	pub jobs: std::collections::HashMap<String, JobId>,
}

impl TranslatorState {
	pub fn new() -> Self {
		Self::default()
	}

	/// A step is ready once every source it references is already a
	/// produced promise.
	pub fn is_ready(&self, sources: &[String]) -> bool {
		sources.iter().all(|s| self.promises.contains_key(s))
	}
}
