//! Virtual URI schemes for content-addressed files and directories.
//!
//! A `toildir:` URI makes a directory tree a first-class content-addressed
//! object without a separate registry: its listing is serialized to JSON,
//! base64-encoded, and carried in the URI itself. Fetching a directory is
//! then just decoding the URI; no lookup against the store is needed until
//! an individual file inside it is materialized.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UriError {
	#[error("not a toildir: uri")]
	NotToilDir,

	#[error("invalid base64 in toildir uri: {0}")]
	Base64(#[from] base64::DecodeError),

	#[error("invalid directory contents json: {0}")]
	Json(#[from] serde_json::Error),

	#[error("empty basename in directory listing")]
	EmptyBasename,

	#[error("File staging conflict: duplicate basename {0:?}")]
	Collision(String),
}

/// One entry in a directory's recursive listing: either a leaf file (its
/// own URI) or a nested subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirEntry {
	File(String),
	Dir(DirectoryContents),
}

/// A directory's contents: child basename -> entry. `BTreeMap` gives
/// stable key order, which is what makes `encode_directory` deterministic.
pub type DirectoryContents = BTreeMap<String, DirEntry>;

/// Serializes `contents` into a `toildir:<base64>` URI. Deterministic: the
/// same contents map always produces the same URI, since JSON object key
/// order follows the map's own sorted order.
pub fn encode_directory(contents: &DirectoryContents) -> Result<String, UriError> {
	let json = serde_json::to_vec(contents)?;
	Ok(format!("toildir:{}", URL_SAFE_NO_PAD.encode(json)))
}

/// Parses a `toildir:<base64>[/<subpath>]` URI, returning the decoded
/// contents, any path remaining after the first `/`, and the raw base64
/// blob (suitable as a cache key: identical directories decode to the
/// identical blob).
pub fn decode_directory(uri: &str) -> Result<(DirectoryContents, Option<String>, String), UriError> {
	let rest = uri.strip_prefix("toildir:").ok_or(UriError::NotToilDir)?;
	let (blob, subpath) = match rest.split_once('/') {
		Some((blob, subpath)) => (blob, Some(subpath.to_string())),
		None => (rest, None),
	};
	let bytes = URL_SAFE_NO_PAD.decode(blob)?;
	let contents: DirectoryContents = serde_json::from_slice(&bytes)?;
	Ok((contents, subpath, blob.to_string()))
}

/// Recursively rejects empty-string basenames anywhere in the tree.
pub fn check_directory_invariants(contents: &DirectoryContents) -> Result<(), UriError> {
	for (name, entry) in contents {
		if name.is_empty() {
			return Err(UriError::EmptyBasename);
		}
		if let DirEntry::Dir(nested) = entry {
			check_directory_invariants(nested)?;
		}
	}
	Ok(())
}

/// One name, one entry: basenames in `listing` must be pairwise distinct at
/// this level. Does not recurse (each directory level is checked
/// independently as it is built).
pub fn ensure_no_collisions(basenames: &[String]) -> Result<(), UriError> {
	let mut seen = std::collections::HashSet::with_capacity(basenames.len());
	for name in basenames {
		if !seen.insert(name.as_str()) {
			return Err(UriError::Collision(name.clone()));
		}
	}
	Ok(())
}

/// Resolves a `toildir:` subpath down to either a leaf file URI or a nested
/// contents map, walking one path segment at a time.
pub fn resolve_subpath<'a>(
	mut contents: &'a DirectoryContents,
	subpath: &str,
) -> Option<&'a DirEntry> {
	let mut segments = subpath.split('/').filter(|s| !s.is_empty()).peekable();
	let mut current = None;
	while let Some(segment) = segments.next() {
		let entry = contents.get(segment)?;
		if segments.peek().is_none() {
			return Some(entry);
		}
		match entry {
			DirEntry::Dir(nested) => contents = nested,
			DirEntry::File(_) => return None,
		}
		current = Some(entry);
	}
	current
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> DirectoryContents {
		let mut inner = DirectoryContents::new();
		inner.insert("b.txt".into(), DirEntry::File("toilfile:aa:1".into()));
		let mut outer = DirectoryContents::new();
		outer.insert("a.txt".into(), DirEntry::File("toilfile:bb:2".into()));
		outer.insert("sub".into(), DirEntry::Dir(inner));
		outer
	}

	#[test]
	fn round_trips_through_encode_decode() {
		let contents = sample();
		let uri = encode_directory(&contents).unwrap();
		let (decoded, subpath, _key) = decode_directory(&uri).unwrap();
		assert_eq!(decoded, contents);
		assert_eq!(subpath, None);
	}

	#[test]
	fn encoding_is_deterministic() {
		let a = encode_directory(&sample()).unwrap();
		let b = encode_directory(&sample()).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn subpath_survives_the_first_slash() {
		let uri = format!("{}/sub/b.txt", encode_directory(&sample()).unwrap());
		let (_, subpath, _) = decode_directory(&uri).unwrap();
		assert_eq!(subpath.as_deref(), Some("sub/b.txt"));
	}

	#[test]
	fn rejects_empty_basenames() {
		let mut contents = DirectoryContents::new();
		contents.insert(String::new(), DirEntry::File("toilfile:x:1".into()));
		assert!(matches!(
			check_directory_invariants(&contents),
			Err(UriError::EmptyBasename)
		));
	}

	#[test]
	fn collision_detection_matches_spec_example() {
		let names = vec!["x".to_string(), "x".to_string()];
		assert!(matches!(ensure_no_collisions(&names), Err(UriError::Collision(_))));
		let distinct = vec!["x".to_string(), "y".to_string()];
		assert!(ensure_no_collisions(&distinct).is_ok());
	}
}
