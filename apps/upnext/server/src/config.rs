use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::Parser;

use crate::room::DEFAULT_CONNECTION_BUFFER;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub shutdown_grace: Duration,
    pub connection_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            shutdown_grace: Duration::from_secs(2),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "upnext-server",
    author,
    version,
    about = "Holds the shared UpNext queue and pushes every change to connected clients"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "UPNEXT_LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: String,

    /// Seconds to wait after the shutdown signal before exiting.
    #[arg(long, env = "UPNEXT_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,

    /// Pushes buffered per client before further pushes to it are dropped.
    #[arg(
        long,
        env = "UPNEXT_CONNECTION_BUFFER",
        default_value_t = DEFAULT_CONNECTION_BUFFER
    )]
    pub connection_buffer: usize,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        anyhow::ensure!(
            cli.connection_buffer >= 2,
            "connection buffer must hold at least the initial snapshot (2 pushes)"
        );
        Ok(ServerConfig {
            listen_addr,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            connection_buffer: cli.connection_buffer,
        })
    }
}
