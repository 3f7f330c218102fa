//! Key-value backends for the persisted session
//!
//! Two implementations of `KeyValueBackend`:
//! - `FileBackend` keeps a JSON object file mapping keys to serialized values.
//!   Writes use atomic temp-file + rename so a crash never leaves a torn file.
//! - `MemoryBackend` keeps the same map in process memory only.
//!
//! Both hold their map behind a `std::sync::Mutex`; the session store reads
//! and writes from synchronous code paths, so there is no async boundary here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Which class of storage a backend represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Survives process restarts
    Durable,
    /// Scoped to the current process
    Ephemeral,
}

impl Durability {
    /// Map the login-time "remember me" directive to a backend class.
    pub fn from_remember_me(remember_me: bool) -> Self {
        if remember_me {
            Durability::Durable
        } else {
            Durability::Ephemeral
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Durability::Durable => "durable",
            Durability::Ephemeral => "ephemeral",
        }
    }
}

/// A string key-value store the storage policy can target.
pub trait KeyValueBackend: Send + Sync {
    fn durability(&self) -> Durability;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local backend. Everything is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueBackend for MemoryBackend {
    fn durability(&self) -> Durability {
        Durability::Ephemeral
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// File-backed durable store.
///
/// The file holds a single JSON object (`{"key": "serialized value"}`). A
/// `set` only updates the in-memory copy after the file write succeeds, so a
/// failed write leaves both disk and memory at the previous state. A failed
/// `remove` still drops the key from memory.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileBackend {
    /// Open the store at `path`.
    ///
    /// If the file doesn't exist it is created as `{}`, so later opens skip
    /// the cold-start path.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "opened durable session storage");
            entries
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let entries = HashMap::new();
            write_atomic(&path, &entries)?;
            entries
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueBackend for FileBackend {
    fn durability(&self) -> Durability {
        Durability::Durable
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        write_atomic(&self.path, &next)?;
        *entries = next;
        debug!(key, "stored durable entry");
        Ok(())
    }

    /// The key is dropped from memory even when the disk write fails, so a
    /// value that could not be deleted on disk is never served again by this
    /// process. The error is still returned.
    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        write_atomic(&self.path, &entries)?;
        debug!(key, "removed durable entry");
        Ok(())
    }
}

/// Write the entry map to `path` atomically.
///
/// Writes a temp file in the same directory and renames it over the target.
/// The file holds bearer credentials, so it is restricted to 0600 on unix.
fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::Parse(format!("serializing session file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session file");
    Ok(())
}
