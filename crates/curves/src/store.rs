use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("value for '{key}' ({size} bytes) exceeds the store capacity of {capacity} bytes")]
    QuotaExceeded { key: String, size: u64, capacity: u64 },
    #[error("invalid store key '{0}'")]
    InvalidKey(String),
    #[error("could not evict '{key}' to make room: {source}")]
    Eviction { key: String, source: io::Error },
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Durable string key/value storage for encoded curves.
///
/// Writes may be rejected; callers treat a failed write as a warning.
pub trait DurableStore: Send {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;
    /// Whether `key` is present, without reading or touching it.
    fn contains(&self, key: &str) -> bool;
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Vec<String>;
    fn clear(&mut self) -> Result<(), StoreError>;
    fn used_bytes(&self) -> u64;
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Recency bookkeeping shared by both store flavours.
#[derive(Debug, Default)]
struct Recency {
    entries: HashMap<String, Entry>,
    clock: u64,
    used: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    size: u64,
    last_used: u64,
}

impl Recency {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = self.clock;
        }
    }

    fn insert(&mut self, key: &str, size: u64) {
        self.clock += 1;
        let previous = self.entries.insert(
            key.to_string(),
            Entry {
                size,
                last_used: self.clock,
            },
        );
        if let Some(previous) = previous {
            self.used -= previous.size;
        }
        self.used += size;
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.used -= entry.size;
        }
    }

    /// Keys to evict, oldest first, so that `incoming` more bytes fit.
    /// `replacing` is the key about to be overwritten; its bytes are
    /// reclaimed by the write itself.
    fn victims(&self, incoming: u64, capacity: u64, replacing: &str) -> Vec<String> {
        let reclaimed = self.entries.get(replacing).map_or(0, |entry| entry.size);
        let mut used = self.used - reclaimed;
        if used + incoming <= capacity {
            return Vec::new();
        }
        let mut candidates: Vec<(&String, &Entry)> = self
            .entries
            .iter()
            .filter(|(key, _)| key.as_str() != replacing)
            .collect();
        candidates.sort_by_key(|(_, entry)| entry.last_used);
        let mut victims = Vec::new();
        for (key, entry) in candidates {
            if used + incoming <= capacity {
                break;
            }
            used -= entry.size;
            victims.push(key.clone());
        }
        victims
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// One file per key under a cache directory, bounded by total bytes.
///
/// Least-recently-used entries are evicted to make room. A single value
/// larger than the whole capacity is rejected with `QuotaExceeded`.
#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
    capacity: u64,
    recency: Recency,
}

impl DiskStore {
    /// Opens (creating if needed) the store directory. Existing files seed
    /// the recency order by modification time.
    pub fn open(root: impl Into<PathBuf>, capacity: u64) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut found: Vec<(SystemTime, String, u64)> = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_key(&key).is_err() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, key, metadata.len()));
        }
        found.sort();

        let mut recency = Recency::default();
        for (_, key, size) in found {
            recency.insert(&key, size);
        }
        debug!(
            root = %root.display(),
            entries = recency.entries.len(),
            bytes = recency.used,
            "opened curve store"
        );
        Ok(Self {
            root,
            capacity,
            recency,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl DurableStore for DiskStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => {
                self.recency.touch(key);
                Ok(Some(value))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.recency.remove(key);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.recency.entries.contains_key(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let size = value.len() as u64;
        if size > self.capacity {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size,
                capacity: self.capacity,
            });
        }
        for victim in self.recency.victims(size, self.capacity, key) {
            debug!(key = %victim, "evicting curve from store");
            match fs::remove_file(self.path_for(&victim)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    warn!(key = %victim, incoming = key, error = %source, "failed to evict curve; skipping write");
                    return Err(StoreError::Eviction { key: victim, source });
                }
            }
            self.recency.remove(&victim);
        }
        fs::write(self.path_for(key), value)?;
        self.recency.insert(key, size);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.recency.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.recency.keys()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        for key in self.recency.keys() {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn used_bytes(&self) -> u64 {
        self.recency.used
    }
}

/// In-process store with the same eviction rules, for tests and offline
/// sessions.
#[derive(Debug)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    capacity: u64,
    recency: Recency,
}

impl MemoryStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            values: HashMap::new(),
            capacity,
            recency: Recency::default(),
        }
    }
}

impl DurableStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        let value = self.values.get(key).cloned();
        if value.is_some() {
            self.recency.touch(key);
        }
        Ok(value)
    }

    fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let size = value.len() as u64;
        if size > self.capacity {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size,
                capacity: self.capacity,
            });
        }
        for victim in self.recency.victims(size, self.capacity, key) {
            self.values.remove(&victim);
            self.recency.remove(&victim);
        }
        self.values.insert(key.to_string(), value.to_string());
        self.recency.insert(key, size);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.values.remove(key);
        self.recency.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.recency.keys()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.values.clear();
        self.recency = Recency::default();
        Ok(())
    }

    fn used_bytes(&self) -> u64 {
        self.recency.used
    }
}
