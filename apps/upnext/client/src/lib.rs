//! Client side of the networked tracker.
//!
//! A [`QueueClient`] owns a background task that stays connected to the
//! holder, applies every push to a local [`SyncClient`] cache, and forwards the
//! requests issued through [`ClientHandle`]. Renderers watch [`ClientView`]
//! snapshots; they never own the queue.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error};
use upnext_core::{Advance, ClientRequest, Navigation, NumberQueue, SyncClient};

mod config;
mod connection;

pub use config::{ClientConfig, Endpoint, DEVELOPMENT_URL, PRODUCTION_URL, SERVER_URL_ENV};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("client task has stopped")]
    Closed,
}

/// Snapshot of the cache handed to renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientView {
    pub queue: NumberQueue,
    pub cursor: usize,
    /// An initial snapshot has arrived on the current connection.
    pub synced: bool,
    pub connected: bool,
}

impl ClientView {
    pub fn navigation(&self) -> Navigation {
        Navigation::at(&self.queue, self.cursor)
    }
}

/// Owns the connection task; dropping it stops the task.
pub struct QueueClient {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

impl QueueClient {
    /// Starts connecting in the background. Must be called inside a Tokio
    /// runtime.
    pub fn spawn(config: ClientConfig) -> Self {
        let (updates, receiver) = watch::channel(ClientView::default());
        let (requests, request_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(connection::Shared {
            cache: Mutex::new(SyncClient::new()),
            connected: Mutex::new(false),
            updates,
        });
        let task = tokio::spawn(connection::run(config, Arc::clone(&shared), request_rx));
        Self {
            handle: ClientHandle {
                shared,
                requests,
                updates: receiver,
            },
            task,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }
}

impl std::ops::Deref for QueueClient {
    type Target = ClientHandle;

    fn deref(&self) -> &ClientHandle {
        &self.handle
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cheap, cloneable access to the cache and the request channel.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<connection::Shared>,
    requests: mpsc::UnboundedSender<ClientRequest>,
    updates: watch::Receiver<ClientView>,
}

impl ClientHandle {
    pub fn view(&self) -> ClientView {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.updates.clone()
    }

    /// Waits until the view satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ClientView, ClientError>
    where
        F: FnMut(&ClientView) -> bool,
    {
        let mut updates = self.updates.clone();
        let view = updates
            .wait_for(|view| predicate(view))
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(view.clone())
    }

    pub fn set_pending(&self, text: impl Into<String>) {
        self.shared.cache.lock().set_pending(text);
    }

    pub fn pending(&self) -> String {
        self.shared.cache.lock().pending().to_string()
    }

    /// Sends the pending text as an update request. The text is cleared once
    /// the request is handed to the connection task; blank text sends nothing.
    pub fn submit(&self) -> Result<bool, ClientError> {
        let mut cache = self.shared.cache.lock();
        let Some(request) = cache.submit() else {
            return Ok(false);
        };
        if let Err(err) = self.send(request.clone()) {
            if let ClientRequest::Update(text) = request {
                cache.set_pending(text);
            }
            return Err(err);
        }
        Ok(true)
    }

    pub fn submit_text(&self, text: impl Into<String>) -> Result<bool, ClientError> {
        self.set_pending(text);
        self.submit()
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        let requests = self.shared.cache.lock().clear();
        for request in requests {
            self.send(request)?;
        }
        Ok(())
    }

    /// Steps back, moving the cached cursor straight away. Returns `false` when
    /// already at the start.
    pub fn prev(&self) -> Result<bool, ClientError> {
        let request = self.shared.cache.lock().prev();
        self.send_optimistic(request)
    }

    pub fn next(&self) -> Result<bool, ClientError> {
        let request = self.shared.cache.lock().next();
        self.send_optimistic(request)
    }

    pub fn set_cursor(&self, value: i64) -> Result<(), ClientError> {
        let request = self.shared.cache.lock().set_cursor(value);
        self.send(request)
    }

    fn send_optimistic(&self, request: Option<ClientRequest>) -> Result<bool, ClientError> {
        let Some(request) = request else {
            return Ok(false);
        };
        self.shared.publish();
        self.send(request)?;
        Ok(true)
    }

    fn send(&self, request: ClientRequest) -> Result<(), ClientError> {
        debug!(event = request.event_name(), "queueing request");
        self.requests.send(request).map_err(|_| ClientError::Closed)
    }
}

impl Advance for ClientHandle {
    fn advance(&self) -> bool {
        match self.next() {
            Ok(moved) => moved,
            Err(err) => {
                error!(error = %err, "failed to request auto-advance");
                false
            }
        }
    }
}
