use std::{env, time::Duration};

pub const DEVELOPMENT_URL: &str = "ws://127.0.0.1:3000/ws";
pub const PRODUCTION_URL: &str = "wss://qn-server.deno.dev/ws";
pub const SERVER_URL_ENV: &str = "UPNEXT_SERVER_URL";

/// Where the holder lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Development,
    Production,
    Custom(String),
}

impl Endpoint {
    /// `UPNEXT_SERVER_URL` if set, otherwise the development endpoint for
    /// debug builds and the production endpoint for release builds.
    pub fn from_env() -> Self {
        Self::resolve(env::var(SERVER_URL_ENV).ok(), cfg!(debug_assertions))
    }

    pub fn resolve(override_url: Option<String>, debug_build: bool) -> Self {
        match override_url {
            Some(url) if !url.trim().is_empty() => Endpoint::Custom(url.trim().to_string()),
            _ if debug_build => Endpoint::Development,
            _ => Endpoint::Production,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Endpoint::Development => DEVELOPMENT_URL,
            Endpoint::Production => PRODUCTION_URL,
            Endpoint::Custom(url) => url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::from_env(),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}
