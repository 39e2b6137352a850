use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use upnext_core::{ClientRequest, ServerPush, SyncClient};

use crate::{config::ClientConfig, ClientError, ClientView};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    /// Every handle is gone; stop for good.
    Shutdown,
    /// The connection dropped; reconnect after the delay.
    Lost,
}

pub(crate) struct Shared {
    pub cache: Mutex<SyncClient>,
    pub connected: Mutex<bool>,
    pub updates: watch::Sender<ClientView>,
}

impl Shared {
    pub fn publish(&self) {
        let view = {
            let cache = self.cache.lock();
            ClientView {
                queue: cache.queue().clone(),
                cursor: cache.cursor(),
                synced: cache.is_synced(),
                connected: *self.connected.lock(),
            }
        };
        self.updates.send_replace(view);
    }
}

/// Keeps a connection to the holder alive until every handle is dropped.
pub(crate) async fn run(
    config: ClientConfig,
    shared: Arc<Shared>,
    mut requests: mpsc::UnboundedReceiver<ClientRequest>,
) {
    loop {
        match connect(&config).await {
            Ok(socket) => {
                info!(url = config.endpoint.url(), "connected to holder");
                // Requests are fire-and-forget; anything queued while offline is stale.
                let mut stale = 0usize;
                while requests.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(stale, "discarded requests queued while disconnected");
                }
                *shared.connected.lock() = true;
                shared.publish();

                let end = drive(socket, &shared, &mut requests).await;

                *shared.connected.lock() = false;
                shared.cache.lock().disconnected();
                shared.publish();
                if let SessionEnd::Shutdown = end {
                    return;
                }
                warn!(url = config.endpoint.url(), "connection to holder lost");
            }
            Err(err) => {
                warn!(url = config.endpoint.url(), error = %err, "failed to reach holder");
            }
        }

        tokio::select! {
            _ = sleep(config.reconnect_delay) => {}
            _ = shared.updates.closed() => return,
        }
    }
}

async fn connect(config: &ClientConfig) -> Result<Socket, ClientError> {
    let url = config.endpoint.url();
    match timeout(config.connect_timeout, connect_async(url)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(err)) => Err(ClientError::Connect(err)),
        Err(_) => Err(ClientError::ConnectTimeout(config.connect_timeout)),
    }
}

async fn drive(
    socket: Socket,
    shared: &Shared,
    requests: &mut mpsc::UnboundedReceiver<ClientRequest>,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                let frame = match request.encode() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "dropping request");
                        continue;
                    }
                };
                debug!(event = request.event_name(), "sending request");
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
            message = ws_rx.next() => {
                let payload = match message {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(error = %err, "error receiving push");
                        return SessionEnd::Lost;
                    }
                };
                apply(shared, &payload);
            }
        }
    }
}

fn apply(shared: &Shared, payload: &[u8]) {
    match ServerPush::decode(payload) {
        Ok(push) => {
            let event = push.event_name();
            let changed = shared.cache.lock().apply(push);
            debug!(event, changed, "applied push");
            // Always publish: the first snapshot flips `synced` even when empty.
            shared.publish();
        }
        Err(err) => warn!(error = %err, "ignoring invalid push"),
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncWriteExt, net::TcpListener};
    use tokio_tungstenite::tungstenite::{error::UrlError, Error};

    use super::*;
    use crate::config::Endpoint;

    #[tokio::test]
    async fn secure_endpoints_reach_the_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"not tls").await;
            }
        });

        let config = ClientConfig::new(Endpoint::Custom(format!("wss://{addr}/ws")));
        let err = match connect(&config).await {
            Ok(_) => panic!("plain TCP peer cannot complete a TLS handshake"),
            Err(err) => err,
        };
        assert!(
            !matches!(err, ClientError::Connect(Error::Url(UrlError::TlsFeatureNotEnabled))),
            "wss support missing: {err}"
        );
    }
}
