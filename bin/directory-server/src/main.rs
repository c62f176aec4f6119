use anyhow::Result;
use directory_core::{ServiceDirectory, WatcherHub};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod protocol;
mod server;

use config::{LogFormat, ServerConfig};
use server::DirectoryServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Starting directory-server...");

    let hub = Arc::new(WatcherHub::new()?);
    let directory = Arc::new(ServiceDirectory::new(hub));
    info!("Service directory initialized");

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Directory server listening on {}", config.listen_addr);

    let server = Arc::new(DirectoryServer::new(directory));
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal, stopping"),
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
