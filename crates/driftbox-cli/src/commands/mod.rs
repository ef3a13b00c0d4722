//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file can't be parsed a warning is logged and defaults are used.
pub fn load_config() -> driftbox_core::config::Config {
    driftbox_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        driftbox_core::config::Config::default()
    })
}

pub mod config;
pub mod serve;
pub mod upload;

/// Driftbox - Chunked resumable uploads over a local network
#[derive(Parser)]
#[command(name = "driftbox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the upload server
    Serve(ServeArgs),

    /// Upload a file to a running server
    Upload(UploadArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Port to listen on (default from config, 8080)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory receiving uploaded files
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Bind to localhost only
    #[arg(long)]
    pub localhost_only: bool,
}

/// Arguments for the upload command
#[derive(Parser)]
pub struct UploadArgs {
    /// File to upload
    #[arg(required = true)]
    pub file: PathBuf,

    /// Server base URL (e.g. http://192.168.1.20:8080)
    #[arg(short, long)]
    pub server: String,

    /// Use the mobile policy (5 MiB chunks, 3 in flight)
    #[arg(long)]
    pub mobile: bool,

    /// Chunk size (e.g. 4M, 512K, 1048576)
    #[arg(long, value_parser = crate::ui::parse_size)]
    pub chunk_size: Option<u64>,

    /// Maximum chunks in flight
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Upload under a different file name
    #[arg(long)]
    pub name: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the final result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand (defaults to `show`)
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write the default configuration to the config file
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload_args() {
        let cli = Cli::try_parse_from([
            "driftbox",
            "upload",
            "movie.mkv",
            "--server",
            "http://10.0.0.2:8080",
            "--chunk-size",
            "4M",
            "-c",
            "2",
        ])
        .unwrap();

        let Command::Upload(args) = cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(args.file, PathBuf::from("movie.mkv"));
        assert_eq!(args.chunk_size, Some(4 * 1024 * 1024));
        assert_eq!(args.concurrency, Some(2));
        assert!(!args.mobile);
    }

    #[test]
    fn test_upload_requires_server() {
        assert!(Cli::try_parse_from(["driftbox", "upload", "movie.mkv"]).is_err());
    }

    #[test]
    fn test_parse_serve_args() {
        let cli =
            Cli::try_parse_from(["driftbox", "serve", "--port", "9000", "--localhost-only"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.port, Some(9000));
        assert!(args.localhost_only);
        assert!(args.root.is_none());
    }

    #[test]
    fn test_config_defaults_to_show() {
        let cli = Cli::try_parse_from(["driftbox", "config"]).unwrap();
        let Command::Config(args) = cli.command else {
            panic!("expected config command");
        };
        assert!(args.action.is_none());
    }
}
