//! Persistent key-value media.
//!
//! A medium is the raw string storage underneath the [`KvStore`](super::KvStore).
//! It may fail at any time (quota, disabled storage, I/O errors); those
//! failures are reported here and contained one layer up.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Storage is disabled")]
    Disabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

pub trait StorageMedium: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removing a key that does not exist is not an error.
    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// All keys currently held, in no particular order.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

// ============================================================================
// In-memory medium
// ============================================================================

/// Mutex-guarded map. Optionally enforces a byte quota (key + value lengths)
/// or rejects every operation, mirroring how browser storage misbehaves.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    items: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_enabled(&self) -> StorageResult<()> {
        if self.disabled {
            Err(StorageError::Disabled)
        } else {
            Ok(())
        }
    }
}

impl StorageMedium for MemoryMedium {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_enabled()?;
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_enabled()?;
        let mut items = self.items();

        if let Some(quota) = self.quota {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded { needed, available });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.check_enabled()?;
        self.items().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check_enabled()?;
        Ok(self.items().keys().cloned().collect())
    }
}

// ============================================================================
// Directory-backed medium
// ============================================================================

/// File extension for stored items
const ITEM_EXTENSION: &str = "json";

/// Longest encoded name kept in one path component. Longer names continue
/// in nested directories, staying clear of the usual 255-byte limit.
const MAX_NAME_LEN: usize = 200;

/// One file per key under a directory. Keys are percent-encoded into file
/// names; each write lands in its own temp file and is renamed into place,
/// so concurrent writers of one key never interleave.
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn item_path(&self, key: &str) -> PathBuf {
        let encoded = encode_key(key);
        let mut path = self.dir.clone();
        let mut rest = encoded.as_str();
        // Encoded names are ASCII, so any byte offset is a char boundary
        while rest.len() > MAX_NAME_LEN {
            let (segment, tail) = rest.split_at(MAX_NAME_LEN);
            path.push(segment);
            rest = tail;
        }
        path.push(format!("{}.{}", rest, ITEM_EXTENSION));
        path
    }
}

impl StorageMedium for FileMedium {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.item_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.item_path(key);
        let parent = path.parent().unwrap_or(self.dir.as_path());
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    // Directories left empty by long keys are kept; a concurrent writer may
    // be about to use them.
    fn remove_item(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.item_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.dir.clone(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if entry.file_type()?.is_dir() {
                    pending.push((path.clone(), format!("{}{}", prefix, name)));
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(ITEM_EXTENSION) {
                    continue;
                }
                let stem = path.file_stem().and_then(|s| s.to_str());
                if let Some(key) = stem.and_then(|s| decode_key(&format!("{}{}", prefix, s))) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Percent-encode everything outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if is_safe_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
