//! # Lanshare Core Library
//!
//! `lanshare-core` provides the core functionality for Lanshare, a local
//! network file drop that accepts large uploads in resumable chunks.
//!
//! ## Features
//!
//! - **Resumable uploads**: Files arrive as independently retriable chunks
//! - **Out-of-order admission**: Chunks are written at their final offset
//! - **Crash-safe bookkeeping**: Session state is persisted atomically
//! - **Live feed**: Finished files and text messages are pushed to viewers
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`error`] - Error types and codes
//! - [`events`] - Event sink and broadcast bus
//! - [`mod@file`] - Visible file set, naming and listing
//! - [`upload`] - Chunked upload sessions, ledger and staging store
//! - [`web`] - HTTP API server
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lanshare_core::config::Config;
//! use lanshare_core::events::NullSink;
//! use lanshare_core::upload::UploadManager;
//!
//! let config = Config::load()?;
//! let manager = UploadManager::open(&config.storage, &config.upload, Arc::new(NullSink)).await?;
//!
//! let init = manager.init_session("report.pdf", 3, None).await?;
//! manager.admit_chunk(&init.session_id, 0, &first_chunk).await?;
//! let missing = manager.missing_chunks(&init.session_id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod error;
pub mod events;
pub mod file;
pub mod upload;

#[cfg(feature = "web")]
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5000;

/// Default chunk unit handed to clients (1 MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default retention window for open upload sessions (1 hour)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Default interval between background expiry sweeps (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default upper bound on chunks per session
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 1_000_000;
