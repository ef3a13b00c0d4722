//! Driftbox CLI - Chunked resumable uploads over a local network
//!
//! One machine runs the upload server; any other device pushes files to it
//! in fixed-size chunks, either from a browser or from this CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! # Receive files into ./inbox
//! driftbox serve --root ./inbox
//!
//! # Upload a file (on another device)
//! driftbox upload ./movie.mkv --server http://192.168.1.20:8080
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Upload(args) => commands::upload::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,driftbox=info,driftbox_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
