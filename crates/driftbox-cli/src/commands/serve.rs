//! Serve command implementation.

use anyhow::{Context, Result};

use driftbox_core::web::{WebServer, WebServerConfig};

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = super::load_config();
    let mut server_config = WebServerConfig::from(&config);

    if let Some(port) = args.port {
        server_config.port = port;
    }
    if let Some(root) = args.root {
        server_config.storage_root = root;
    }
    if args.localhost_only {
        server_config.localhost_only = true;
    }

    println!();
    println!("  Driftbox upload server");
    println!();
    println!("  Listening on  {}", server_config.bind_addr());
    println!("  Saving to     {}", server_config.storage_root.display());
    if let Some(max_age) = server_config.stale_after {
        println!("  Stale chunks  removed after {}s", max_age.as_secs());
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let server = WebServer::new(server_config);
    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("upload server failed")?;

    println!();
    println!("  Server stopped.");
    Ok(())
}
