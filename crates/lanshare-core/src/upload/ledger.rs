//! Durable session ledger.
//!
//! Every open upload session has one JSON record in the ledger directory,
//! written atomically (temp file, fsync, rename) in the same way transfer
//! resume state is persisted. Records are loaded into memory on open; the
//! in-memory table hands out one exclusive critical section per session id
//! so that concurrent chunk admissions for the same session never lose an
//! update, while different sessions never wait on each other.
//!
//! An open ledger holds an exclusive OS lock on `<dir>/.lock` for its whole
//! lifetime, so only one process at a time can change the directory.
//! [`SessionLedger::snapshot`] reads without the lock.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{Error, Result};

use super::chunks::ChunkSet;

/// File extension for ledger records.
pub const RECORD_EXTENSION: &str = "json";

/// Lock file held by the process that owns the ledger.
pub const LOCK_FILE: &str = ".lock";

/// One file transfer in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Opaque unique id, also the staging artifact name
    pub id: String,
    /// Requested destination name
    pub filename: String,
    /// Number of chunks the file was split into
    pub total_chunks: u32,
    /// Byte size of every chunk but possibly the last
    pub chunk_size: u64,
    /// Chunks admitted so far
    pub uploaded_chunks: ChunkSet,
    /// Declared SHA-256 of the whole file (lowercase hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a session with no chunks admitted yet.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        total_chunks: u32,
        chunk_size: u64,
        file_hash: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            total_chunks,
            chunk_size,
            uploaded_chunks: ChunkSet::new(total_chunks),
            file_hash,
            created_at: Utc::now(),
        }
    }

    /// Number of distinct chunks admitted.
    #[must_use]
    pub const fn uploaded(&self) -> u32 {
        self.uploaded_chunks.len()
    }

    /// Whether every chunk has been admitted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.uploaded_chunks.is_complete()
    }

    /// Chunk indices still outstanding, ascending.
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.uploaded_chunks.missing().collect()
    }

    /// Whether the session was created before `cutoff`.
    #[must_use]
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }

    /// Coverage as a percentage (0-100).
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        f64::from(self.uploaded()) / f64::from(self.total_chunks) * 100.0
    }

    fn check(&self, expected_id: &str) -> std::result::Result<(), String> {
        if self.id != expected_id {
            return Err(format!("record names session '{}'", self.id));
        }
        if self.total_chunks == 0 {
            return Err("total_chunks is zero".to_string());
        }
        if self.uploaded_chunks.capacity() != self.total_chunks {
            return Err(format!(
                "coverage sized for {} chunks, session expects {}",
                self.uploaded_chunks.capacity(),
                self.total_chunks
            ));
        }
        if self.chunk_size == 0 {
            return Err("chunk_size is zero".to_string());
        }
        Ok(())
    }
}

struct Slot {
    session: UploadSession,
    removed: bool,
}

struct LedgerEntry {
    created_at: DateTime<Utc>,
    slot: Arc<Mutex<Slot>>,
}

/// Exclusive access to one live session.
///
/// Holding the guard is the session's critical section: no other caller can
/// observe or change the session until it is dropped.
pub struct SessionGuard {
    slot: OwnedMutexGuard<Slot>,
}

impl Deref for SessionGuard {
    type Target = UploadSession;

    fn deref(&self) -> &UploadSession {
        &self.slot.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut UploadSession {
        &mut self.slot.session
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("id", &self.slot.session.id)
            .finish_non_exhaustive()
    }
}

/// Durable table of upload sessions keyed by session id.
pub struct SessionLedger {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, LedgerEntry>>,
    /// Released when the ledger is dropped
    _lock: std::fs::File,
}

impl SessionLedger {
    /// Open the ledger stored in `dir`, creating the directory if needed.
    ///
    /// Unreadable records are skipped with a warning rather than failing the
    /// whole ledger; leftover temp files from an interrupted save are removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageLocked`] if another open ledger (in this or
    /// another process) holds the directory, or an I/O error if the
    /// directory cannot be created or listed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create ledger directory {}: {e}",
                dir.display()
            )))
        })?;

        let lock = acquire_lock(&dir)?;

        let sessions: HashMap<String, LedgerEntry> = read_records(&dir, true)
            .await?
            .into_iter()
            .map(|session| {
                let entry = LedgerEntry {
                    created_at: session.created_at,
                    slot: Arc::new(Mutex::new(Slot {
                        session: session.clone(),
                        removed: false,
                    })),
                };
                (session.id, entry)
            })
            .collect();

        tracing::debug!(
            dir = %dir.display(),
            sessions = sessions.len(),
            "Opened session ledger"
        );

        Ok(Self {
            dir,
            sessions: RwLock::new(sessions),
            _lock: lock,
        })
    }

    /// Read the records in `dir` without taking ownership of the directory.
    ///
    /// Safe to call while a server has the same ledger open: nothing is
    /// created or cleaned up. A missing directory reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub async fn snapshot(dir: &Path) -> Result<Vec<UploadSession>> {
        if !fs::try_exists(dir).await? {
            return Ok(Vec::new());
        }
        let mut sessions = read_records(dir, false).await?;
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Add a new session and enter its critical section.
    ///
    /// The returned guard is taken before the session becomes visible, so the
    /// caller can finish setting it up before anyone else touches it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExists`] if the id is taken, or an I/O error if
    /// the record cannot be written (the session is then not added).
    pub async fn insert(&self, session: UploadSession) -> Result<SessionGuard> {
        let id = session.id.clone();
        let created_at = session.created_at;
        let slot = Arc::new(Mutex::new(Slot {
            session,
            removed: false,
        }));
        let mut guard = Arc::clone(&slot).lock_owned().await;

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                return Err(Error::SessionExists(id));
            }
            sessions.insert(id.clone(), LedgerEntry { created_at, slot });
        }

        if let Err(e) = self.write_record(&guard.session).await {
            guard.removed = true;
            self.sessions.write().await.remove(&id);
            return Err(e);
        }

        tracing::debug!(session_id = %id, "Inserted ledger record");
        Ok(SessionGuard { slot: guard })
    }

    /// Enter the critical section of a live session.
    ///
    /// Returns `None` if the id is unknown or the session was removed while
    /// waiting for the lock.
    pub async fn lock(&self, id: &str) -> Option<SessionGuard> {
        let slot = {
            let sessions = self.sessions.read().await;
            Arc::clone(&sessions.get(id)?.slot)
        };

        let slot = slot.lock_owned().await;
        if slot.removed {
            return None;
        }
        Some(SessionGuard { slot })
    }

    /// Persist the current state of a locked session.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub async fn save(&self, guard: &SessionGuard) -> Result<()> {
        self.write_record(&guard.slot.session).await
    }

    /// Delete a locked session.
    ///
    /// The session disappears from lookups immediately; callers still holding
    /// the guard finish their critical section before anyone else proceeds,
    /// and waiters then observe the session as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record file cannot be deleted. The in-memory
    /// removal has already happened in that case.
    pub async fn remove(&self, guard: &mut SessionGuard) -> Result<()> {
        if guard.slot.removed {
            return Ok(());
        }
        guard.slot.removed = true;

        let id = guard.slot.session.id.clone();
        {
            let mut sessions = self.sessions.write().await;
            let same_slot = sessions
                .get(&id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.slot, OwnedMutexGuard::mutex(&guard.slot)));
            if same_slot {
                sessions.remove(&id);
            }
        }

        let path = self.record_path(&id);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(session_id = %id, "Removed ledger record");
        Ok(())
    }

    /// Snapshot of one session.
    pub async fn get(&self, id: &str) -> Option<UploadSession> {
        self.lock(id).await.map(|guard| guard.slot.session.clone())
    }

    /// Whether a session with this id is present.
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the ledger holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of sessions created before `cutoff`.
    pub async fn expired_ids(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of all sessions, oldest first.
    pub async fn list(&self) -> Vec<UploadSession> {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get(&id).await {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Get the ledger directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    async fn write_record(&self, session: &UploadSession) -> Result<()> {
        let path = self.record_path(&session.id);

        let json = serde_json::to_string_pretty(session).map_err(|e| {
            Error::Serialization(format!("Failed to serialize ledger record: {e}"))
        })?;

        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        tracing::trace!(
            session_id = %session.id,
            uploaded = session.uploaded(),
            total = session.total_chunks,
            "Saved ledger record"
        );

        Ok(())
    }
}

impl std::fmt::Debug for SessionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLedger")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

fn acquire_lock(dir: &Path) -> Result<std::fs::File> {
    use fs2::FileExt;

    let path = dir.join(LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(Error::StorageLocked(dir.display().to_string()))
        }
        Err(e) => Err(Error::Io(std::io::Error::other(format!(
            "Failed to lock ledger directory {}: {e}",
            dir.display()
        )))),
    }
}

async fn read_records(dir: &Path, clean_temp: bool) -> Result<Vec<UploadSession>> {
    let mut sessions = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        if path.extension().is_some_and(|ext| ext == "tmp") {
            if clean_temp {
                if let Err(e) = fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale ledger temp file");
                }
            }
            continue;
        }

        if path.extension().is_none_or(|ext| ext != RECORD_EXTENSION) {
            continue;
        }

        match load_record(&path).await {
            Ok(session) => sessions.push(session),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable ledger record");
            }
        }
    }

    Ok(sessions)
}

async fn load_record(path: &Path) -> Result<UploadSession> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let contents = fs::read_to_string(path).await?;

    let session: UploadSession =
        serde_json::from_str(&contents).map_err(|e| Error::CorruptRecord {
            id: id.clone(),
            reason: e.to_string(),
        })?;

    session
        .check(&id)
        .map_err(|reason| Error::CorruptRecord { id, reason })?;

    Ok(session)
}
