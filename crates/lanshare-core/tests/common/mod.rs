//! Common test utilities for `lanshare` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanshare_core::config::{StorageConfig, UploadConfig};
use lanshare_core::events::EventSink;
use lanshare_core::upload::UploadManager;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Split `data` into chunks of `chunk_size` bytes (last one may be shorter).
pub fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// Sink that remembers every file-ready notification.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, u64)>>,
}

impl RecordingSink {
    /// Notifications received so far.
    pub fn events(&self) -> Vec<(String, u64)> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl EventSink for RecordingSink {
    fn notify_file_ready(&self, name: &str, size: u64) {
        self.events
            .lock()
            .expect("sink lock")
            .push((name.to_string(), size));
    }
}

/// Storage settings rooted at `root/uploads`.
pub fn storage(root: &Path) -> StorageConfig {
    StorageConfig {
        upload_dir: root.join("uploads"),
        ..Default::default()
    }
}

/// Upload settings with a small chunk unit.
pub fn upload_config(chunk_size: usize, ttl: Duration) -> UploadConfig {
    UploadConfig {
        chunk_size,
        session_ttl: ttl,
        ..Default::default()
    }
}

/// Open a manager over `root` with the given chunk unit and a one hour TTL.
pub async fn open_manager(
    root: &Path,
    chunk_size: usize,
    sink: Arc<dyn EventSink>,
) -> Arc<UploadManager> {
    let manager = UploadManager::open(
        &storage(root),
        &upload_config(chunk_size, Duration::from_secs(3600)),
        sink,
    )
    .await
    .expect("Failed to open upload manager");
    Arc::new(manager)
}
