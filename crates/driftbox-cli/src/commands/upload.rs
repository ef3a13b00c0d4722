//! Upload command implementation.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use driftbox_core::client::{
    DeviceClass, FileSource, HttpTransport, UploadSource, UploadTask, UploadTransport,
};
use driftbox_core::config::DevicePreference;
use driftbox_core::Error;

use crate::ui::{format_size, progress_line};

use super::UploadArgs;

/// Run the upload command.
pub async fn run(args: UploadArgs) -> Result<()> {
    let mut config = super::load_config();
    if args.mobile {
        config.upload.device_class = DevicePreference::Mobile;
    }

    let mut source = FileSource::open(&args.file)
        .await
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    if let Some(name) = &args.name {
        source = source.with_name(name.clone());
    }

    let mut transport = HttpTransport::new(args.server.clone())?;
    if let Some(secs) = args.timeout {
        transport = transport.with_timeout(Duration::from_secs(secs));
    }

    let policy = config
        .upload_policy(DeviceClass::Desktop)
        .with_chunk_size(args.chunk_size.unwrap_or(0))
        .with_concurrency(args.concurrency.unwrap_or(0));

    let file_name = source.name().to_string();
    let file_size = source.size();

    let task = UploadTask::new(source, transport, policy)
        .with_speed_interval(config.upload.speed_interval);

    if !args.quiet && !args.json {
        println!();
        println!("  Uploading {} ({})", file_name, format_size(file_size));
        println!(
            "  {} chunks of {}, {} in flight",
            task.total_chunks(),
            format_size(policy.chunk_size),
            policy.concurrency
        );
        println!();
    }

    let started = Instant::now();
    task.start()?;

    let mut rx = task.subscribe();
    let outcome = loop {
        let progress = rx.borrow_and_update().clone();
        if !args.quiet && !args.json {
            print!("\r  {}    ", progress_line(&progress));
            let _ = io::stdout().flush();
        }
        if progress.status.is_terminal() || progress.cancelled {
            break task.wait().await;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break task.wait().await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = task.cancel() {
                    tracing::debug!("Cancel ignored: {}", e);
                }
            }
        }
    };

    if !args.quiet && !args.json {
        println!();
    }

    report(&args, &task, &file_name, file_size, started.elapsed(), outcome)
}

fn report<S, T>(
    args: &UploadArgs,
    task: &UploadTask<S, T>,
    file_name: &str,
    file_size: u64,
    elapsed: Duration,
    outcome: driftbox_core::Result<()>,
) -> Result<()>
where
    S: UploadSource,
    T: UploadTransport,
{
    if args.json {
        let status = task.status();
        let json = serde_json::json!({
            "uploadId": task.upload_id(),
            "fileName": file_name,
            "size": file_size,
            "status": status,
            "cancelled": matches!(outcome, Err(Error::Cancelled)),
            "elapsedMs": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "error": outcome.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    }

    match outcome {
        Ok(()) => {
            if !args.quiet && !args.json {
                println!();
                println!(
                    "  Upload complete! {} in {:.1}s",
                    format_size(file_size),
                    elapsed.as_secs_f64()
                );
                println!();
            }
            Ok(())
        }
        Err(Error::Cancelled) => {
            if !args.quiet && !args.json {
                println!();
                println!("  Upload cancelled.");
                println!();
            }
            Ok(())
        }
        Err(e) => {
            if !args.quiet && !args.json {
                eprintln!();
                eprintln!("  Upload failed: {}", e);
                eprintln!();
            }
            Err(e.into())
        }
    }
}
