//! On-disk staging area for in-flight uploads.
//!
//! Each session owns exactly one staging artifact, `<session-id>.part`.
//! Chunks are written at their final byte offset, so arrival order and
//! resubmission do not matter.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::Digest;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// File extension for staging artifacts.
pub const STAGING_EXTENSION: &str = "part";

/// Staging directory holding one partial file per session.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Open the staging area in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create staging directory {}: {e}",
                dir.display()
            )))
        })?;
        Ok(Self { dir })
    }

    /// Path of a session's staging artifact.
    #[must_use]
    pub fn staging_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.{STAGING_EXTENSION}"))
    }

    /// Create an empty artifact for a new session, discarding any bytes
    /// staged earlier under the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be created.
    pub async fn create(&self, session_id: &str) -> Result<()> {
        let file = fs::File::create(self.staging_path(session_id)).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write `data` at `offset`, creating or extending the artifact.
    ///
    /// Each call opens its own handle, so writes to disjoint ranges from
    /// concurrent callers do not share a cursor. Data is flushed to disk
    /// before returning so the ledger never records a chunk that a crash
    /// could lose.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be opened or written.
    pub async fn write_chunk(&self, session_id: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at(session_id, offset, data, false).await
    }

    /// Write the last chunk of a file and cut the artifact off after it.
    ///
    /// A resubmitted last chunk may be shorter than an earlier attempt; the
    /// surplus bytes of that attempt are dropped.
    ///
    /// # Errors
    ///
    /// As [`ChunkStore::write_chunk`].
    pub async fn write_final_chunk(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        self.write_at(session_id, offset, data, true).await
    }

    async fn write_at(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        is_last: bool,
    ) -> Result<()> {
        let path = self.staging_path(session_id);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        if is_last {
            file.set_len(offset + data.len() as u64).await?;
        }
        file.sync_data().await?;

        tracing::trace!(
            session_id,
            offset,
            len = data.len(),
            is_last,
            "Wrote chunk to staging artifact"
        );

        Ok(())
    }

    /// Size of a session's artifact, or `None` if nothing was staged yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub async fn staged_len(&self, session_id: &str) -> Result<Option<u64>> {
        match fs::metadata(self.staging_path(session_id)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// SHA-256 of a session's artifact as lowercase hex.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read.
    pub async fn digest(&self, session_id: &str) -> Result<String> {
        let mut hasher = sha2::Sha256::new();
        let mut file = fs::File::open(self.staging_path(session_id)).await?;
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(to_hex(&hasher.finalize()))
    }

    /// Move a session's artifact to `dest`, returning its size.
    ///
    /// `dest` must be on the same filesystem so the move is a single rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is missing or cannot be renamed.
    pub async fn promote(&self, session_id: &str, dest: &Path) -> Result<u64> {
        let path = self.staging_path(session_id);
        let size = fs::metadata(&path).await?.len();

        fs::rename(&path, dest).await?;

        tracing::debug!(
            session_id,
            dest = %dest.display(),
            size,
            "Promoted staging artifact"
        );

        Ok(size)
    }

    /// Delete a session's artifact. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact exists but cannot be removed.
    pub async fn discard(&self, session_id: &str) -> Result<bool> {
        match fs::remove_file(self.staging_path(session_id)).await {
            Ok(()) => {
                tracing::debug!(session_id, "Discarded staging artifact");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Session ids whose artifact was last modified before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be listed.
    pub async fn stale_artifacts(&self, cutoff: SystemTime) -> Result<Vec<String>> {
        let mut stale = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.extension().is_none_or(|ext| ext != STAGING_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot read staging artifact age");
                    continue;
                }
            };

            if modified < cutoff {
                stale.push(id.to_string());
            }
        }

        Ok(stale)
    }

    /// Get the staging directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_out_of_order_writes_land_at_offsets() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store.write_chunk("s_1", 8, b"cccc").await.expect("chunk 2");
        store.write_chunk("s_1", 0, b"aaaa").await.expect("chunk 0");
        store.write_chunk("s_1", 4, b"bbbb").await.expect("chunk 1");
        store.write_chunk("s_1", 4, b"bbbb").await.expect("chunk 1 again");

        let content = std::fs::read(store.staging_path("s_1")).unwrap();
        assert_eq!(content, b"aaaabbbbcccc");
        assert_eq!(store.staged_len("s_1").await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_shorter_final_chunk_trims_artifact() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store.write_chunk("s_1", 0, b"aaaa").await.expect("chunk 0");
        store
            .write_final_chunk("s_1", 4, b"xxxx")
            .await
            .expect("chunk 1");
        store
            .write_final_chunk("s_1", 4, b"yy")
            .await
            .expect("chunk 1 again");

        let content = std::fs::read(store.staging_path("s_1")).unwrap();
        assert_eq!(content, b"aaaayy");
    }

    #[tokio::test]
    async fn test_final_chunk_first_keeps_room_for_the_rest() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store
            .write_final_chunk("s_1", 8, b"cc")
            .await
            .expect("chunk 2");
        store.write_chunk("s_1", 0, b"aaaa").await.expect("chunk 0");
        store.write_chunk("s_1", 4, b"bbbb").await.expect("chunk 1");

        let content = std::fs::read(store.staging_path("s_1")).unwrap();
        assert_eq!(content, b"aaaabbbbcc");
    }

    #[tokio::test]
    async fn test_create_discards_earlier_bytes() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store.write_chunk("s_1", 0, b"planted").await.expect("write");
        store.create("s_1").await.expect("create");

        assert_eq!(store.staged_len("s_1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_digest_matches_sha256() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store.write_chunk("s_1", 0, b"abc").await.expect("write");

        assert_eq!(
            store.digest("s_1").await.expect("digest"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_promote_moves_artifact() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path().join("staging"))
            .await
            .expect("open");

        store.write_chunk("s_1", 0, b"hello").await.expect("write");
        let dest = temp_dir.path().join("hello.txt");
        let size = store.promote("s_1", &dest).await.expect("promote");

        assert_eq!(size, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert_eq!(store.staged_len("s_1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_discard_missing_is_not_an_error() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        assert!(!store.discard("nothing_1").await.expect("discard"));
        store.write_chunk("s_1", 0, b"x").await.expect("write");
        assert!(store.discard("s_1").await.expect("discard"));
    }

    #[tokio::test]
    async fn test_stale_artifacts() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = ChunkStore::open(temp_dir.path()).await.expect("open");

        store.write_chunk("s_1", 0, b"x").await.expect("write");
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        assert!(store.stale_artifacts(past).await.expect("scan").is_empty());

        let future = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(
            store.stale_artifacts(future).await.expect("scan"),
            vec!["s_1".to_string()]
        );
    }
}
