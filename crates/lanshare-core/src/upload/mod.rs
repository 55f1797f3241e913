//! Resumable chunked uploads.
//!
//! A client uploads a file in independently retriable pieces:
//!
//! 1. [`UploadManager::init_session`] registers the transfer and hands back
//!    a session id plus the chunk unit to slice the file with.
//! 2. [`UploadManager::admit_chunk`] stages each piece at its final offset,
//!    in any order and any number of times.
//! 3. [`UploadManager::missing_chunks`] reports the gaps so only those are
//!    resent after a network failure.
//! 4. [`UploadManager::complete_session`] verifies full coverage and moves
//!    the staged file into the upload directory under a collision-free name.
//!
//! Sessions that stay open longer than the retention window are swept,
//! together with their staging artifacts.
//!
//! ## Storage layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `<upload_dir>/` | finished files |
//! | `<staging_dir>/<id>.part` | partially written upload |
//! | `<ledger_dir>/<id>.json` | session record (coverage bitmap) |

pub mod chunks;
pub mod ledger;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{StorageConfig, UploadConfig};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::file;

pub use chunks::ChunkSet;
pub use ledger::{SessionGuard, SessionLedger, UploadSession};
pub use store::ChunkStore;

/// Longest filename-derived prefix kept in a session id.
const MAX_ID_PREFIX_LEN: usize = 64;

/// Attempts at finding a free session id before giving up.
const MAX_ID_ATTEMPTS: u32 = 64;

/// Tunables of an [`UploadManager`].
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Chunk unit handed to new sessions
    pub chunk_size: u64,
    /// Retention window for open sessions
    pub session_ttl: Duration,
    /// Upper bound on chunks per session
    pub max_total_chunks: u32,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size as u64,
            session_ttl: config.session_ttl,
            max_total_chunks: config.max_total_chunks,
        }
    }
}

/// Result of [`UploadManager::init_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitOutcome {
    /// Id to quote on every later call
    pub session_id: String,
    /// Byte size to slice the file into
    pub chunk_size: u64,
}

/// Result of [`UploadManager::admit_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// The accepted chunk index
    pub index: u32,
    /// Bytes were staged but no ledger record exists for the session
    pub ledger_miss: bool,
    /// The chunk was not covered before this call
    pub newly_covered: bool,
}

/// Result of [`UploadManager::complete_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completed {
    /// Name actually used in the upload directory
    pub final_name: String,
    /// Size of the finished file in bytes
    pub size: u64,
}

/// What an expiry sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions past the retention window (ledger row and artifact)
    pub expired_sessions: usize,
    /// Staging artifacts that had no ledger row
    pub orphaned_artifacts: usize,
}

impl SweepReport {
    /// Total number of things removed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.expired_sessions + self.orphaned_artifacts
    }
}

/// Orchestrates upload sessions over a [`SessionLedger`] and a [`ChunkStore`].
pub struct UploadManager {
    ledger: Arc<SessionLedger>,
    store: ChunkStore,
    upload_dir: PathBuf,
    sink: Arc<dyn EventSink>,
    settings: UploadSettings,
    /// Serializes name resolution plus rename into the upload directory
    promote_lock: Mutex<()>,
    /// Timestamp of the last generated id, strictly increasing
    last_id_millis: AtomicI64,
}

impl UploadManager {
    /// Assemble a manager from its parts.
    #[must_use]
    pub fn new(
        ledger: Arc<SessionLedger>,
        store: ChunkStore,
        upload_dir: impl Into<PathBuf>,
        sink: Arc<dyn EventSink>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            ledger,
            store,
            upload_dir: upload_dir.into(),
            sink,
            settings,
            promote_lock: Mutex::new(()),
            last_id_millis: AtomicI64::new(0),
        }
    }

    /// Open the storage described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the ledger
    /// cannot be read.
    pub async fn open(
        storage: &StorageConfig,
        upload: &UploadConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&storage.upload_dir).await?;
        let ledger = Arc::new(SessionLedger::open(storage.ledger_dir()).await?);
        let store = ChunkStore::open(storage.staging_dir()).await?;

        let manager = Self::new(
            ledger,
            store,
            storage.upload_dir.clone(),
            sink,
            UploadSettings::from(upload),
        );
        manager.drop_dangling_records().await?;

        Ok(manager)
    }

    /// Register a new upload of `total_chunks` pieces.
    ///
    /// Expired sessions are swept first. `file_hash`, when given, must be a
    /// hex SHA-256 digest of the whole file and is checked at completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty filename, a chunk
    /// count of zero or above the configured maximum, or a malformed hash.
    pub async fn init_session(
        &self,
        filename: &str,
        total_chunks: u32,
        file_hash: Option<&str>,
    ) -> Result<InitOutcome> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::invalid("filename is empty"));
        }
        if total_chunks == 0 {
            return Err(Error::invalid("total_chunks must be positive"));
        }
        if total_chunks > self.settings.max_total_chunks {
            return Err(Error::invalid(format!(
                "total_chunks {total_chunks} exceeds the limit of {}",
                self.settings.max_total_chunks
            )));
        }
        let file_hash = file_hash.map(normalize_hash).transpose()?;

        if let Err(e) = self.sweep_expired().await {
            tracing::warn!(error = %e, "Expiry sweep before init failed");
        }

        let base = session_id_base(filename, self.next_id_millis());
        for attempt in 0..MAX_ID_ATTEMPTS {
            let id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };

            let session = UploadSession::new(
                id.clone(),
                filename,
                total_chunks,
                self.settings.chunk_size,
                file_hash.clone(),
            );

            match self.ledger.insert(session).await {
                Ok(mut guard) => {
                    if let Err(e) = self.store.create(&id).await {
                        if let Err(remove_err) = self.ledger.remove(&mut guard).await {
                            tracing::warn!(session_id = %id, error = %remove_err, "Failed to roll back ledger record");
                        }
                        return Err(e);
                    }
                    drop(guard);

                    tracing::info!(
                        session_id = %id,
                        filename,
                        total_chunks,
                        "Upload session created"
                    );
                    return Ok(InitOutcome {
                        session_id: id,
                        chunk_size: self.settings.chunk_size,
                    });
                }
                Err(Error::SessionExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Err(Error::Internal(format!(
            "no free session id for '{filename}' after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Stage one chunk and record it in the session's coverage.
    ///
    /// The bytes land at `chunk_index * chunk_size`. If the session has no
    /// ledger record the bytes are still staged and the call succeeds with
    /// [`Admitted::ledger_miss`] set; completing such a session later fails
    /// cleanly with [`Error::SessionNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a missing id or payload, an id
    /// with characters outside `[A-Za-z0-9._-]`, an index outside the
    /// session, a payload larger than the chunk unit, or a payload shorter
    /// than the chunk unit anywhere but the last index. Storage failures
    /// are returned as-is.
    pub async fn admit_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<Admitted> {
        if session_id.is_empty() {
            return Err(Error::invalid("missing session id"));
        }
        if data.is_empty() {
            return Err(Error::invalid("missing chunk payload"));
        }
        validate_session_id(session_id)?;

        let Some(mut guard) = self.lock_live(session_id).await? else {
            let offset = chunk_offset(chunk_index, self.settings.chunk_size, data.len())?;
            self.store.write_chunk(session_id, offset, data).await?;

            tracing::warn!(
                session_id,
                chunk_index,
                "Chunk staged for a session with no ledger record"
            );
            return Ok(Admitted {
                index: chunk_index,
                ledger_miss: true,
                newly_covered: false,
            });
        };

        if chunk_index >= guard.total_chunks {
            return Err(Error::invalid(format!(
                "chunk index {chunk_index} out of range (total chunks {})",
                guard.total_chunks
            )));
        }
        let offset = chunk_offset(chunk_index, guard.chunk_size, data.len())?;

        let is_last = chunk_index + 1 == guard.total_chunks;
        if is_last {
            self.store
                .write_final_chunk(session_id, offset, data)
                .await?;
        } else {
            if data.len() as u64 != guard.chunk_size {
                return Err(Error::invalid(format!(
                    "chunk {chunk_index} has {} bytes, expected {}",
                    data.len(),
                    guard.chunk_size
                )));
            }
            self.store.write_chunk(session_id, offset, data).await?;
        }

        let newly_covered = guard.uploaded_chunks.insert(chunk_index)?;
        if newly_covered {
            self.ledger.save(&guard).await?;
        }

        tracing::debug!(
            session_id,
            chunk_index,
            uploaded = guard.uploaded(),
            total = guard.total_chunks,
            "Chunk admitted"
        );

        Ok(Admitted {
            index: chunk_index,
            ledger_miss: false,
            newly_covered,
        })
    }

    /// Finalize a fully covered session.
    ///
    /// The staged file is renamed into the upload directory as `filename`
    /// (or the name given at init when `filename` is empty), with `(n)`
    /// inserted before the extension if that name is taken. The session is
    /// then deleted and a file-ready event published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for unknown or expired sessions,
    /// [`Error::IncompleteUpload`] while chunks are missing (nothing is
    /// touched), and [`Error::IntegrityMismatch`] if a declared hash does
    /// not match.
    pub async fn complete_session(&self, session_id: &str, filename: &str) -> Result<Completed> {
        if session_id.is_empty() {
            return Err(Error::invalid("missing session id"));
        }

        let mut guard = self
            .lock_live(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        if !guard.is_complete() {
            return Err(Error::IncompleteUpload {
                uploaded: guard.uploaded(),
                total: guard.total_chunks,
            });
        }

        let requested = file::file_name_only(filename)
            .or_else(|| file::file_name_only(&guard.filename))
            .ok_or_else(|| Error::invalid("filename is empty"))?;

        if let Some(expected) = guard.file_hash.clone() {
            let actual = self.store.digest(session_id).await?;
            if actual != expected {
                tracing::warn!(session_id, %expected, %actual, "Uploaded file failed integrity check");
                return Err(Error::IntegrityMismatch {
                    file: requested,
                    expected,
                    actual,
                });
            }
        }

        let (final_name, size) = {
            let _promotion = self.promote_lock.lock().await;
            let (name, dest) = file::resolve_unique_name(&self.upload_dir, &requested).await?;
            let size = self.store.promote(session_id, &dest).await?;
            (name, size)
        };

        if let Err(e) = self.ledger.remove(&mut guard).await {
            // The session is already gone from memory; a record left on disk
            // has no artifact and is dropped on the next open.
            tracing::warn!(session_id, error = %e, "Failed to delete ledger record after finalization");
        }
        drop(guard);

        tracing::info!(session_id, final_name = %final_name, size, "Upload finalized");
        self.sink.notify_file_ready(&final_name, size);

        Ok(Completed { final_name, size })
    }

    /// Chunk indices the session still needs, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session is unknown, already
    /// finalized, or expired; the caller should start over with
    /// [`UploadManager::init_session`].
    pub async fn missing_chunks(&self, session_id: &str) -> Result<Vec<u32>> {
        let guard = self
            .lock_live(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        Ok(guard.missing_chunks())
    }

    /// Snapshot of a live session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] as [`UploadManager::missing_chunks`].
    pub async fn session(&self, session_id: &str) -> Result<UploadSession> {
        self.lock_live(session_id)
            .await?
            .map(|guard| UploadSession::clone(&guard))
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// All open sessions, oldest first (expired ones included until swept).
    pub async fn sessions(&self) -> Vec<UploadSession> {
        self.ledger.list().await
    }

    /// Remove sessions older than the retention window and orphaned
    /// staging artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be scanned or an
    /// artifact cannot be removed.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweep_before(self.cutoff()).await
    }

    /// Remove sessions created before `cutoff` and orphaned staging
    /// artifacts last written before it.
    ///
    /// Each session is removed inside its critical section, ledger row
    /// first, so an interrupted sweep can only leave an orphaned artifact
    /// behind, which the next sweep reclaims.
    ///
    /// # Errors
    ///
    /// As [`UploadManager::sweep_expired`].
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for id in self.ledger.expired_ids(cutoff).await {
            if let Some(guard) = self.ledger.lock(&id).await {
                self.expire(guard).await?;
                report.expired_sessions += 1;
            }
        }

        for id in self.store.stale_artifacts(cutoff.into()).await? {
            if self.ledger.contains(&id).await {
                continue;
            }
            if self.store.discard(&id).await? {
                tracing::debug!(session_id = %id, "Reclaimed orphaned staging artifact");
                report.orphaned_artifacts += 1;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                expired = report.expired_sessions,
                orphaned = report.orphaned_artifacts,
                "Swept stale uploads"
            );
        }

        Ok(report)
    }

    /// Run [`UploadManager::sweep_expired`] every `every` on the runtime.
    ///
    /// The first sweep runs immediately. Abort the handle to stop it.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = manager.sweep_expired().await {
                    tracing::warn!(error = %e, "Background expiry sweep failed");
                }
            }
        })
    }

    /// The shared session ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<SessionLedger> {
        &self.ledger
    }

    /// The staging area.
    #[must_use]
    pub const fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Directory holding finished files.
    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Current epoch millis, bumped past the previous id's timestamp so no
    /// two ids from this process share one.
    fn next_id_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_id_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Remove ledger records whose staging artifact is gone.
    ///
    /// Every live session has an artifact from init until it is finalized or
    /// expired, so such a record is left over from a finalization or expiry
    /// that could not delete it.
    async fn drop_dangling_records(&self) -> Result<usize> {
        let mut dropped = 0;

        for session in self.ledger.list().await {
            if self.store.staged_len(&session.id).await?.is_some() {
                continue;
            }
            if let Some(mut guard) = self.ledger.lock(&session.id).await {
                self.ledger.remove(&mut guard).await?;
                tracing::warn!(session_id = %session.id, "Dropped ledger record with no staging artifact");
                dropped += 1;
            }
        }

        Ok(dropped)
    }

    fn cutoff(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.settings.session_ttl)
            .unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Lock a session that is still within the retention window.
    ///
    /// A session found past the window is expired on the spot.
    async fn lock_live(&self, session_id: &str) -> Result<Option<SessionGuard>> {
        let Some(guard) = self.ledger.lock(session_id).await else {
            return Ok(None);
        };

        if guard.is_expired(self.cutoff()) {
            self.expire(guard).await?;
            return Ok(None);
        }

        Ok(Some(guard))
    }

    async fn expire(&self, mut guard: SessionGuard) -> Result<()> {
        let id = guard.id.clone();
        let uploaded = guard.uploaded();
        let total = guard.total_chunks;

        self.ledger.remove(&mut guard).await?;
        self.store.discard(&id).await?;
        drop(guard);

        tracing::info!(session_id = %id, uploaded, total, "Upload session expired");
        Ok(())
    }
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("upload_dir", &self.upload_dir)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Check that a session id is safe to use as a file name.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] unless the id is non-empty, made of
/// `[A-Za-z0-9._-]`, and does not start with a dot.
pub fn validate_session_id(id: &str) -> Result<()> {
    let well_formed = !id.is_empty()
        && id.len() <= 200
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if well_formed {
        Ok(())
    } else {
        Err(Error::invalid(format!("malformed session id '{id}'")))
    }
}

/// Derive a session id from the filename and a creation timestamp.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`; the result is
/// `<prefix>_<epoch millis>`.
#[must_use]
pub fn session_id_base(filename: &str, epoch_millis: i64) -> String {
    let prefix: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_ID_PREFIX_LEN)
        .collect();
    let prefix = prefix.trim_start_matches('.');
    let prefix = if prefix.is_empty() { "upload" } else { prefix };

    format!("{prefix}_{epoch_millis}")
}

fn chunk_offset(chunk_index: u32, chunk_size: u64, len: usize) -> Result<u64> {
    if len as u64 > chunk_size {
        return Err(Error::invalid(format!(
            "chunk of {len} bytes exceeds the chunk size of {chunk_size}"
        )));
    }
    u64::from(chunk_index)
        .checked_mul(chunk_size)
        .ok_or_else(|| Error::invalid(format!("chunk index {chunk_index} out of range")))
}

fn normalize_hash(hash: &str) -> Result<String> {
    let hash = hash.trim();
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(hash.to_ascii_lowercase())
    } else {
        Err(Error::invalid("file_hash must be a hex SHA-256 digest"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir, chunk_size: u64) -> UploadManager {
        let storage = StorageConfig {
            upload_dir: dir.path().join("uploads"),
            ..Default::default()
        };
        let upload = UploadConfig {
            chunk_size: usize::try_from(chunk_size).unwrap(),
            ..Default::default()
        };
        UploadManager::open(&storage, &upload, Arc::new(NullSink))
            .await
            .expect("open manager")
    }

    #[test]
    fn test_session_id_base() {
        let now = 1_700_000_000_123;

        assert_eq!(
            session_id_base("report.pdf", now),
            "report.pdf_1700000000123"
        );
        assert_eq!(
            session_id_base("my file (1).txt", now),
            "my_file__1_.txt_1700000000123"
        );
        assert_eq!(session_id_base("..hidden", now), "hidden_1700000000123");
        assert_eq!(session_id_base("...", now), "upload_1700000000123");
        assert!(validate_session_id(&session_id_base("报告.pdf", now)).is_ok());
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("report.pdf_1700000000123").is_ok());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a/b").is_err());
        assert!(validate_session_id(".hidden").is_err());
        assert!(validate_session_id("").is_err());
    }

    #[test]
    fn test_chunk_offset() {
        assert_eq!(chunk_offset(3, 1024, 1024).unwrap(), 3072);
        assert!(chunk_offset(0, 1024, 1025).is_err());
        assert!(chunk_offset(u32::MAX, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_normalize_hash() {
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        assert_eq!(normalize_hash(upper).unwrap(), upper.to_ascii_lowercase());
        assert!(normalize_hash("abc").is_err());
    }

    #[tokio::test]
    async fn test_id_timestamps_strictly_increase() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;

        let a = manager.next_id_millis();
        let b = manager.next_id_millis();
        let c = manager.next_id_millis();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_init_rejects_bad_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;

        assert!(matches!(
            manager.init_session("", 3, None).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.init_session("a.txt", 0, None).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.init_session("a.txt", 2, Some("nothex")).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(manager.ledger().is_empty().await);
    }

    #[tokio::test]
    async fn test_admit_rejects_missing_parts() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;
        let init = manager.init_session("a.txt", 2, None).await.unwrap();

        assert!(matches!(
            manager.admit_chunk("", 0, b"abcd").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.admit_chunk(&init.session_id, 0, b"").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.admit_chunk(&init.session_id, 2, b"abcd").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.admit_chunk(&init.session_id, 0, b"abcde").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.admit_chunk(&init.session_id, 0, b"ab").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.admit_chunk("../../x", 0, b"abcd").await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            manager.store().staged_len(&init.session_id).await.unwrap(),
            Some(0)
        );
        assert_eq!(
            manager.missing_chunks(&init.session_id).await.unwrap(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn test_init_discards_bytes_staged_under_the_new_id() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;

        let future = Utc::now().timestamp_millis() + 86_400_000;
        manager.last_id_millis.store(future, Ordering::SeqCst);

        let id = session_id_base("a.txt", future + 1);
        let planted = manager.admit_chunk(&id, 0, b"evil").await.unwrap();
        assert!(planted.ledger_miss);

        let init = manager.init_session("a.txt", 2, None).await.unwrap();
        let staged = manager.store().staged_len(&init.session_id).await.unwrap();

        assert_eq!(init.session_id, id);
        assert_eq!(staged, Some(0));
    }

    #[tokio::test]
    async fn test_open_drops_records_without_artifact() {
        let temp_dir = TempDir::new().unwrap();

        let (kept, dangling) = {
            let manager = manager(&temp_dir, 4).await;
            let kept = manager.init_session("kept.txt", 2, None).await.unwrap();
            let dangling = manager.init_session("gone.txt", 2, None).await.unwrap();
            manager.store().discard(&dangling.session_id).await.unwrap();
            (kept.session_id, dangling.session_id)
        };

        let manager = manager(&temp_dir, 4).await;

        assert!(manager.ledger().contains(&kept).await);
        assert!(!manager.ledger().contains(&dangling).await);
        assert!(!manager
            .ledger()
            .dir()
            .join(format!("{dangling}.json"))
            .exists());
        assert!(matches!(
            manager.complete_session(&dangling, "gone.txt").await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_miss_still_stages_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;

        let admitted = manager.admit_chunk("ghost_1", 1, b"abcd").await.unwrap();

        assert!(admitted.ledger_miss);
        assert_eq!(admitted.index, 1);
        assert_eq!(
            manager.store().staged_len("ghost_1").await.unwrap(),
            Some(8)
        );
        assert!(matches!(
            manager.complete_session("ghost_1", "x.bin").await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_falls_back_to_init_filename() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;
        let init = manager.init_session("notes.txt", 1, None).await.unwrap();

        manager.admit_chunk(&init.session_id, 0, b"hi").await.unwrap();
        let done = manager.complete_session(&init.session_id, "").await.unwrap();

        assert_eq!(done.final_name, "notes.txt");
        assert_eq!(done.size, 2);
    }

    #[tokio::test]
    async fn test_integrity_mismatch_keeps_session() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;
        let wrong = "0".repeat(64);
        let init = manager
            .init_session("abc.txt", 1, Some(&wrong))
            .await
            .unwrap();

        manager.admit_chunk(&init.session_id, 0, b"abc").await.unwrap();

        assert!(matches!(
            manager.complete_session(&init.session_id, "abc.txt").await,
            Err(Error::IntegrityMismatch { .. })
        ));
        assert_eq!(
            manager.missing_chunks(&init.session_id).await.unwrap(),
            Vec::<u32>::new()
        );
    }

    #[tokio::test]
    async fn test_integrity_match_finalizes() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 2).await;
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let init = manager
            .init_session("abc.txt", 2, Some(digest))
            .await
            .unwrap();

        manager.admit_chunk(&init.session_id, 1, b"c").await.unwrap();
        manager.admit_chunk(&init.session_id, 0, b"ab").await.unwrap();

        let done = manager
            .complete_session(&init.session_id, "abc.txt")
            .await
            .unwrap();
        assert_eq!(done.size, 3);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_orphans_and_expired() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir, 4).await;

        let init = manager.init_session("a.txt", 2, None).await.unwrap();
        manager.admit_chunk(&init.session_id, 0, b"abcd").await.unwrap();
        manager.admit_chunk("orphan_1", 0, b"abcd").await.unwrap();

        let report = manager
            .sweep_before(Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(report.expired_sessions, 1);
        assert_eq!(report.orphaned_artifacts, 1);
        assert!(manager.ledger().is_empty().await);
        assert_eq!(
            manager.store().staged_len(&init.session_id).await.unwrap(),
            None
        );
        assert_eq!(manager.store().staged_len("orphan_1").await.unwrap(), None);
    }
}
