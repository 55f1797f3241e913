//! Serve command implementation.

use anyhow::{Context, Result};

use lanshare_core::web::{WebServer, WebServerConfig};

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut global_config = super::load_config();
    super::apply_dir(&mut global_config, args.dir);

    let mut config = WebServerConfig::from(&global_config.server);
    if let Some(port) = args.port {
        config.port = port;
    }
    config.localhost_only |= args.localhost_only;
    if args.auth && config.auth_token.is_none() {
        config.auth_token = Some(WebServerConfig::generate_token());
    }

    let upload_dir = std::path::absolute(&global_config.storage.upload_dir)
        .unwrap_or_else(|_| global_config.storage.upload_dir.clone());

    println!();
    println!("Lanshare");
    println!("{}", "─".repeat(40));
    println!();
    println!("  http://localhost:{}", config.port);
    if !config.localhost_only {
        println!("  http://<this-machine>:{} (for other devices)", config.port);
    }
    println!();
    println!("  Files:  {}", upload_dir.display());
    println!(
        "  Chunks: {} bytes, sessions kept {}s",
        global_config.upload.chunk_size,
        global_config.upload.session_ttl.as_secs()
    );

    if let Some(ref token) = config.auth_token {
        println!();
        println!("  Token:  {}", token);
        println!("  (send as 'Authorization: Bearer {}')", token);
    }

    println!();
    println!("Press Ctrl+C to stop the server.");

    let server = WebServer::new(config, global_config);
    server.start().await.context("Web server failed")?;

    println!();
    println!("Server stopped.");

    Ok(())
}
