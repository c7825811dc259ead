//! Serve command - accept DAP connections over TCP
//!
//! Usage:
//!   stepwise serve --listen 127.0.0.1:4711 --persist
//!
//! Sessions are served one at a time. Without `--persist` the server exits
//! after the first client that actually spoke DAP disconnects; port probes
//! never count.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use stepwise_config::{Config, DEFAULT_LISTEN_ADDR};
use stepwise_dap::serve_listener;
use stepwise_logging::debug;
use tokio::net::TcpListener;

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address for DAP connections
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Keep running after the client disconnects (allow reconnection)
    #[arg(long)]
    pub persist: bool,
}

pub async fn run(args: ServeArgs, config: Arc<Config>) -> Result<()> {
    let listen_addr = normalize_listen_addr(&args.listen);
    debug!(listen = %listen_addr, persist = args.persist, "Startup parameters");

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Cannot listen on {}", listen_addr))?;
    let bound = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(listen_addr);

    println!("stepwise DAP server");
    println!("Listen: {}", bound);
    if args.persist {
        println!("Persist mode: enabled (will keep running after client disconnect)");
    }
    println!();
    println!("Waiting for DAP client connection...");

    serve_listener(listener, config, args.persist).await?;
    Ok(())
}

/// Bind `localhost` as IPv4 so clients connecting to 127.0.0.1 find us.
fn normalize_listen_addr(addr: &str) -> String {
    match addr.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{}", port),
        None => addr.to_string(),
    }
}
