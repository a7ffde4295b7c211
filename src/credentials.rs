//! Cross-process cache of temporary cloud credentials, shared by every
//! worker on a host so they don't each refresh the same session token.
//!
//! File at `~/.cache/aws/cached_temporary_credentials`, four lines:
//! access key, secret key, session token, expiry (`%Y-%m-%dT%H:%M:%SZ`). An
//! empty file is a deliberate marker for "permanent credentials; resolve
//! fresh every time" rather than an error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

const CACHE_RELATIVE_PATH: &str = ".cache/aws/cached_temporary_credentials";
const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_POLL_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum CredentialCacheError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("cached credentials file is malformed: expected 4 lines, got {0}")]
	Malformed(usize),
	#[error("cached expiry timestamp is malformed: {0}")]
	BadExpiry(#[from] chrono::ParseError),
	#[error("timed out waiting for the credential cache lock to clear")]
	LockTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
	pub access_key: String,
	pub secret_key: String,
	pub session_token: String,
	pub expiry: DateTime<Utc>,
}

/// The cache's decoded contents: either real credentials, or the "always
/// re-resolve" marker an empty file represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedCredentials {
	Temporary(TemporaryCredentials),
	Permanent,
}

pub fn default_cache_path() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(CACHE_RELATIVE_PATH)
}

/// Reads the cache without locking: a reader racing a writer just sees
/// either the old or the new file, never a torn one, because writes land
/// via an atomic rename.
pub fn read_cached_credentials(path: &Path) -> Result<Option<CachedCredentials>, CredentialCacheError> {
	let contents = match std::fs::read_to_string(path) {
		Ok(c) => c,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e.into()),
	};

	if contents.trim().is_empty() {
		return Ok(Some(CachedCredentials::Permanent));
	}

	let lines: Vec<&str> = contents.lines().collect();
	if lines.len() != 4 {
		return Err(CredentialCacheError::Malformed(lines.len()));
	}
	let expiry = DateTime::parse_from_str(lines[3], EXPIRY_FORMAT)
		.map(|dt| dt.with_timezone(&Utc))
		.or_else(|_| {
			chrono::NaiveDateTime::parse_from_str(lines[3], EXPIRY_FORMAT)
				.map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
		})?;

	Ok(Some(CachedCredentials::Temporary(TemporaryCredentials {
		access_key: lines[0].to_string(),
		secret_key: lines[1].to_string(),
		session_token: lines[2].to_string(),
		expiry,
	})))
}

/// Writes `credentials` (or the permanent marker, if `None`) via an O_EXCL
/// `.tmp` file followed by an atomic rename, so a second writer racing the
/// first fails to create the lock file and instead polls for the winner's
/// rename to land.
pub fn write_cached_credentials(
	path: &Path,
	credentials: Option<&TemporaryCredentials>,
) -> Result<(), CredentialCacheError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}

	let tmp_path = path.with_extension("tmp");
	let mut open_opts = std::fs::OpenOptions::new();
	open_opts.write(true).create_new(true);
	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;
		open_opts.mode(0o600);
	}

	let body = match credentials {
		Some(creds) => format!(
			"{}\n{}\n{}\n{}\n",
			creds.access_key,
			creds.secret_key,
			creds.session_token,
			creds.expiry.format(EXPIRY_FORMAT)
		),
		None => String::new(),
	};

	match open_opts.open(&tmp_path) {
		Ok(mut file) => {
			use io::Write;
			file.write_all(body.as_bytes())?;
			file.sync_all()?;
			std::fs::rename(&tmp_path, path)?;
			Ok(())
		}
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
			debug!(path = %tmp_path.display(), "lost the race to write the credential cache; waiting for the winner");
			wait_for_lock_to_clear(&tmp_path)
		}
		Err(e) => Err(e.into()),
	}
}

fn wait_for_lock_to_clear(tmp_path: &Path) -> Result<(), CredentialCacheError> {
	for _ in 0..LOCK_POLL_ATTEMPTS {
		if !tmp_path.exists() {
			return Ok(());
		}
		std::thread::sleep(LOCK_POLL_INTERVAL);
	}
	warn!(path = %tmp_path.display(), "credential cache lock never cleared");
	Err(CredentialCacheError::LockTimeout)
}

/// True once fewer than this many seconds remain before expiry; callers
/// should treat that as "refresh now" rather than waiting for the hard
/// deadline.
pub fn is_stale(credentials: &TemporaryCredentials, now: DateTime<Utc>, refresh_margin: Duration) -> bool {
	let margin = chrono::Duration::from_std(refresh_margin).unwrap_or_default();
	credentials.expiry - margin <= now
}
