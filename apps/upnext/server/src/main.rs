use anyhow::Result;
use clap::Parser;
use tracing::info;
use upnext_server::{telemetry::Telemetry, Cli, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        connection_buffer = config.connection_buffer,
        "starting upnext-server"
    );

    upnext_server::run(config, Some(telemetry.metrics_handle())).await
}
