//! Content-addressed identity store.
//!
//! Records which feed and item identities have already been processed.
//! Identities are hashed with SHA-256 and stored one file per identity in a
//! sharded directory structure:
//! ```text
//! {root}/
//! ├── .feedmail
//! ├── 3f/
//! │   └── 3f2a...e1   (contains the identity string)
//! └── ...
//! ```
//! Entries are never removed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{FeedmailError, Result};

/// Name of the marker file that must exist in the store root.
pub const MARKER_FILE: &str = ".feedmail";

/// A durable set of identity strings.
///
/// Both operations are infallible from the caller's point of view: read
/// errors count as "not present" and write errors leave the identity
/// unmarked. Either way a warning is logged.
pub trait IdentityStore: Send + Sync {
    /// Whether the identity has been marked.
    fn has(&self, identity: &str) -> bool;

    /// Mark the identity as seen. Idempotent.
    fn mark(&self, identity: &str);
}

/// Filesystem-backed identity store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open an existing store. The root must contain the marker file.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let marker = root.join(MARKER_FILE);
        if !marker.is_file() {
            return Err(FeedmailError::Config(format!(
                "{} is not a feedmail storage directory (missing {}); run with --init-storage",
                root.display(),
                MARKER_FILE
            )));
        }
        Ok(Self { root })
    }

    /// Create the store root and its marker file, then open it.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let marker = root.join(MARKER_FILE);
        if !marker.exists() {
            fs::write(&marker, b"")?;
        }
        Self::open(root)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file recording the identity.
    pub fn key_path(&self, identity: &str) -> PathBuf {
        let key = format!("{:x}", Sha256::digest(identity.as_bytes()));
        self.root.join(&key[..2]).join(&key)
    }

    fn write_entry(&self, path: &Path, identity: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::File::options().write(true).create_new(true).open(path) {
            Ok(mut file) => file.write_all(identity.as_bytes()),
            // Another worker got there first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl IdentityStore for FileStore {
    fn has(&self, identity: &str) -> bool {
        let path = self.key_path(identity);
        match fs::metadata(&path) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to check {}, treating as unseen: {}", path.display(), e);
                false
            }
        }
    }

    fn mark(&self, identity: &str) {
        let path = self.key_path(identity);
        if let Err(e) = self.write_entry(&path, identity) {
            warn!("Failed to mark {}: {}", path.display(), e);
        }
    }
}
