//! Content fingerprinting and change detection.
//!
//! A file's fingerprint is the 128-bit xxh3 hash of its bytes. A file is
//! "changed" when no prior fingerprint exists or the stored one differs.
//! Modification times are never consulted; they lie across clones and
//! checkouts.

use crate::error::IndexErrorKind;
use crate::storage::StoragePort;
use ahash::AHashMap;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use xxhash_rust::xxh3::xxh3_128;

/// Files at or above this size are hashed through a memory map instead of a
/// full read.
const MMAP_HASH_THRESHOLD: u64 = 1024 * 1024;

/// How a file compares against its stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    New,
    Changed,
    Unchanged,
}

/// Persisted cache format. Fingerprints are stored as hex strings to keep
/// the JSON readable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<(PathBuf, String)>,
}

const CACHE_FORMAT_VERSION: u32 = 1;

/// Fingerprint cache with optional JSON persistence.
///
/// Internally synchronized; workers consult and update it concurrently.
pub struct ChangeDetector {
    cache: Mutex<AHashMap<PathBuf, u128>>,
    cache_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl ChangeDetector {
    /// In-memory detector with no persistence.
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(AHashMap::new()),
            cache_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Detector backed by a JSON cache file. An unreadable or corrupt cache
    /// starts empty; every file will simply hash as new.
    pub fn with_cache_file(path: PathBuf) -> Self {
        let mut cache = AHashMap::new();
        if let Ok(content) = fs::read_to_string(&path) {
            if let Ok(file) = serde_json::from_str::<CacheFile>(&content) {
                if file.version == CACHE_FORMAT_VERSION {
                    for (entry_path, hex) in file.entries {
                        if let Ok(fp) = u128::from_str_radix(&hex, 16) {
                            cache.insert(entry_path, fp);
                        }
                    }
                }
            }
        }
        Self {
            cache: Mutex::new(cache),
            cache_path: Some(path),
            dirty: AtomicBool::new(false),
        }
    }

    /// Hash a file's content. Large files are mapped rather than read.
    pub fn fingerprint_file(path: &Path) -> Result<u128, IndexErrorKind> {
        let metadata = fs::metadata(path).map_err(|e| IndexErrorKind::Io(e.to_string()))?;
        if metadata.len() >= MMAP_HASH_THRESHOLD {
            let file = fs::File::open(path).map_err(|e| IndexErrorKind::Io(e.to_string()))?;
            // SAFETY: the map is read-only and dropped before return.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| IndexErrorKind::Io(e.to_string()))?;
            Ok(xxh3_128(&map))
        } else {
            let content = fs::read(path).map_err(|e| IndexErrorKind::Io(e.to_string()))?;
            Ok(xxh3_128(&content))
        }
    }

    pub fn fingerprint_bytes(content: &[u8]) -> u128 {
        xxh3_128(content)
    }

    /// Compare a fresh fingerprint against the cache, falling back to the
    /// storage port (the source of truth for what is indexed) on a cache
    /// miss.
    pub fn status(&self, path: &Path, fingerprint: u128, storage: &dyn StoragePort) -> ChangeStatus {
        let mut cache = self.cache.lock().unwrap();
        let stored = cache.get(path).copied().or_else(|| {
            let from_storage = storage.read_fingerprint(path);
            if let Some(fp) = from_storage {
                cache.insert(path.to_path_buf(), fp);
            }
            from_storage
        });
        match stored {
            None => ChangeStatus::New,
            Some(fp) if fp == fingerprint => ChangeStatus::Unchanged,
            Some(_) => ChangeStatus::Changed,
        }
    }

    pub fn record(&self, path: &Path, fingerprint: u128) {
        self.cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), fingerprint);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn forget(&self, path: &Path) -> bool {
        let removed = self.cache.lock().unwrap().remove(path).is_some();
        if removed {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every cached fingerprint under a root.
    pub fn forget_under(&self, root: &Path) -> usize {
        let mut cache = self.cache.lock().unwrap();
        let before = cache.len();
        cache.retain(|path, _| !path.starts_with(root));
        let removed = before - cache.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    /// Write the cache to its backing file, if any. Writes go through a temp
    /// file and rename so a crashed write never truncates the cache.
    pub fn persist(&self) -> io::Result<()> {
        let Some(ref path) = self.cache_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        let entries: Vec<(PathBuf, String)> = {
            let cache = self.cache.lock().unwrap();
            cache
                .iter()
                .map(|(p, fp)| (p.clone(), format!("{fp:032x}")))
                .collect()
        };
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries,
        };

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if content is likely binary: NUL bytes or a high proportion of
/// control characters in the leading sample.
pub fn is_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(8192)];
    if memchr::memchr(0, sample).is_some() {
        return true;
    }
    let non_text = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    non_text > sample.len() / 8
}
