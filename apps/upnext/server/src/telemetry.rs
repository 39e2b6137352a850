use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "warn,upnext_server=info,upnext_core=info";

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
}

impl Telemetry {
    /// Installs the global log subscriber and the Prometheus recorder behind
    /// `/metrics`. Call once, from the binary.
    pub fn init() -> Result<Self> {
        tracing_subscriber::registry()
            .with(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("upnext-server: log subscriber already installed")?;

        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("upnext-server: metrics recorder already installed")?;
        describe_metrics();

        info!(service = "upnext-server", "logging and /metrics ready");
        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn describe_metrics() {
    describe_gauge!("upnext_connections_active", "Clients currently in the room");
    describe_counter!("upnext_connections_total", "Clients that ever joined");
    describe_counter!("upnext_requests_total", "Client requests applied, by event");
    describe_counter!(
        "upnext_broadcast_drops_total",
        "Pushes that found a full buffer; the lagging client is evicted"
    );
    describe_counter!("upnext_invalid_frames_total", "Frames that failed to decode");
}
