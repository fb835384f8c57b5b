use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::registry::FileCategory;
use crate::transport::SourceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// File accepted, awaiting a format selection
    Staged,
    Converting,
}

/// The file currently staged for conversion in one session. At most one
/// exists per session key; a new upload replaces it (last-write-wins) under
/// a fresh generation stamp.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub session_key: String,
    pub source: SourceHandle,
    pub file_name: String,
    pub size_bytes: u64,
    pub category: FileCategory,
    pub state: SessionState,
    pub generation: u64,
}

/// Per-session staged-file records.
///
/// Operations on different keys never block one another; event handling for
/// one key is serialized through `lock`. Generation stamps let a conversion
/// task detect that its session was superseded while it ran: the stamp is
/// captured at start and the outcome is dropped unless it still matches.
pub struct SessionStore {
    entries: DashMap<String, StagedFile>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Acquires the per-key event lock. The guard must never be held across
    /// a conversion await; it only serializes staging, validation and
    /// delivery for one session.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Unconditional overwrite of whatever was staged before. Returns the
    /// record with its newly assigned generation.
    pub fn stage(
        &self,
        key: &str,
        source: SourceHandle,
        file_name: String,
        size_bytes: u64,
        category: FileCategory,
    ) -> StagedFile {
        let staged = StagedFile {
            session_key: key.to_string(),
            source,
            file_name,
            size_bytes,
            category,
            state: SessionState::Staged,
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.entries.insert(key.to_string(), staged.clone());
        staged
    }

    pub fn get(&self, key: &str) -> Option<StagedFile> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Marks the staged file as converting, only if it is still the same
    /// generation that was validated.
    pub fn mark_converting(&self, key: &str, generation: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.generation == generation => {
                entry.state = SessionState::Converting;
                true
            }
            _ => false,
        }
    }

    /// True if the staged file for `key` still carries this generation.
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false)
    }

    pub fn clear(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Removes the record only if it still carries this generation, so a
    /// terminal conversion never clears a session it no longer owns.
    pub fn clear_if_current(&self, key: &str, generation: u64) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.generation == generation)
            .is_some()
    }

    /// Drops lock-map entries that no task currently holds.
    pub fn cleanup_locks(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
