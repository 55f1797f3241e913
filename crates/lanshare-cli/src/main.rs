//! Lanshare CLI - Local network file drop with resumable uploads
//!
//! Lanshare runs a small HTTP server that devices on the same network can
//! upload files to in resumable chunks.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve ./uploads on port 5000
//! lanshare serve
//!
//! # See uploads that are still in flight
//! lanshare sessions
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Sessions(args) => commands::sessions::run(args).await,
        Command::Sweep(args) => commands::sweep::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanshare=info,lanshare_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
