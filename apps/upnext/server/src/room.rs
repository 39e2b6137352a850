use std::{collections::HashMap, sync::Arc};

use metrics::{counter, gauge};
use slab::Slab;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use upnext_core::{parse, ClientRequest, NumberQueue, QueueState, ServerPush, Transition};
use uuid::Uuid;

pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// The single shared room. All requests from all clients are applied one at a
/// time under this lock, and the resulting pushes are queued before it is
/// released, so every client sees pushes in the holder's processing order.
#[derive(Clone)]
pub struct SharedRoom {
    inner: Arc<Mutex<Room>>,
    connection_buffer: usize,
}

struct Room {
    state: QueueState,
    connections: Slab<Connection>,
    index_map: HashMap<Uuid, usize>,
    total_connections: u64,
    total_requests: u64,
}

struct Connection {
    id: Uuid,
    sender: mpsc::Sender<ServerPush>,
}

pub struct Registration {
    pub receiver: mpsc::Receiver<ServerPush>,
    pub active_connections: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMetrics {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub transition: Transition,
    pub broadcast: BroadcastMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub queue: NumberQueue,
    pub cursor: usize,
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_requests: u64,
}

impl SharedRoom {
    pub fn new(connection_buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Room {
                state: QueueState::new(),
                connections: Slab::new(),
                index_map: HashMap::new(),
                total_connections: 0,
                total_requests: 0,
            })),
            // Room for the two snapshot pushes is required.
            connection_buffer: connection_buffer.max(2),
        }
    }

    /// Registers a connection and queues its snapshot ahead of any broadcast.
    pub async fn join(&self, connection_id: Uuid) -> Registration {
        let (tx, rx) = mpsc::channel(self.connection_buffer);
        let mut room = self.inner.lock().await;

        // Fresh channel with capacity >= 2: these cannot fail.
        let _ = tx.try_send(ServerPush::InitialQueue(room.state.queue().clone()));
        let _ = tx.try_send(ServerPush::InitialCursor(room.state.cursor()));

        let key = room.connections.insert(Connection {
            id: connection_id,
            sender: tx,
        });
        room.index_map.insert(connection_id, key);
        room.total_connections += 1;

        let active_connections = room.connections.len();
        gauge!("upnext_connections_active", active_connections as f64);
        counter!("upnext_connections_total", 1);

        Registration {
            receiver: rx,
            active_connections,
        }
    }

    pub async fn leave(&self, connection_id: Uuid) -> usize {
        let mut room = self.inner.lock().await;
        room.remove(connection_id);
        room.connections.len()
    }

    /// Applies one client request and broadcasts the result.
    pub async fn handle(&self, from: Uuid, request: ClientRequest) -> RequestOutcome {
        let event = request.event_name();
        counter!("upnext_requests_total", 1, "event" => event);

        let mut room = self.inner.lock().await;
        room.total_requests += 1;

        let (transition, broadcast) = match request {
            ClientRequest::Update(raw) => {
                let numbers = parse(&raw);
                let transition = room.state.add(&numbers);
                let mut broadcast = BroadcastMetrics::default();
                if transition.queue_changed {
                    let queue = room.state.queue().clone();
                    broadcast = room.broadcast(ServerPush::QueueUpdated(queue));
                }
                if transition.cursor_changed {
                    let cursor = room.state.cursor();
                    broadcast.merge(room.broadcast(ServerPush::CursorUpdated(cursor)));
                }
                (transition, broadcast)
            }
            ClientRequest::Clear => {
                let transition = room.state.clear();
                // Clear always broadcasts so that optimistic clients converge.
                let broadcast = room.broadcast(ServerPush::QueueCleared);
                (transition, broadcast)
            }
            ClientRequest::Cursor(requested) => {
                let transition = room.state.set_cursor(requested);
                let cursor = room.state.cursor();
                let broadcast = if transition.cursor_changed {
                    room.broadcast(ServerPush::CursorUpdated(cursor))
                } else if requested != cursor as i64 {
                    // The requester may already show the rejected value.
                    room.send_to(from, ServerPush::CursorUpdated(cursor))
                } else {
                    BroadcastMetrics::default()
                };
                (transition, broadcast)
            }
        };

        debug!(
            connection_id = %from,
            event,
            queue_changed = transition.queue_changed,
            cursor_changed = transition.cursor_changed,
            delivered = broadcast.delivered,
            "applied request"
        );

        RequestOutcome {
            transition,
            broadcast,
        }
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let room = self.inner.lock().await;
        RoomSnapshot {
            queue: room.state.queue().clone(),
            cursor: room.state.cursor(),
            active_connections: room.connections.len(),
            total_connections: room.total_connections,
            total_requests: room.total_requests,
        }
    }
}

impl Room {
    /// Pushes to every connection. A connection whose buffer is full has
    /// missed state and is evicted along with closed ones; dropping its
    /// sender ends the writer, which closes the socket so the client
    /// reconnects and resyncs from the snapshot.
    fn broadcast(&mut self, push: ServerPush) -> BroadcastMetrics {
        let mut metrics = BroadcastMetrics::default();
        let mut evicted = Vec::new();

        for (_, connection) in self.connections.iter() {
            match connection.sender.try_send(push.clone()) {
                Ok(()) => metrics.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics.dropped += 1;
                    counter!(
                        "upnext_broadcast_drops_total",
                        1,
                        "event" => push.event_name()
                    );
                    evicted.push(connection.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics.closed += 1;
                    evicted.push(connection.id);
                }
            }
        }

        for connection_id in evicted {
            self.evict(connection_id);
        }
        metrics
    }

    fn send_to(&mut self, connection_id: Uuid, push: ServerPush) -> BroadcastMetrics {
        let mut metrics = BroadcastMetrics::default();
        let Some(&key) = self.index_map.get(&connection_id) else {
            return metrics;
        };
        let event = push.event_name();
        match self.connections[key].sender.try_send(push) {
            Ok(()) => {
                metrics.delivered += 1;
                return metrics;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.dropped += 1;
                counter!("upnext_broadcast_drops_total", 1, "event" => event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => metrics.closed += 1,
        }
        self.evict(connection_id);
        metrics
    }

    fn evict(&mut self, connection_id: Uuid) {
        warn!(connection_id = %connection_id, "evicting lagging or closed connection");
        self.remove(connection_id);
    }

    fn remove(&mut self, connection_id: Uuid) {
        if let Some(key) = self.index_map.remove(&connection_id) {
            self.connections.remove(key);
            gauge!("upnext_connections_active", self.connections.len() as f64);
        }
    }
}

impl BroadcastMetrics {
    fn merge(&mut self, other: BroadcastMetrics) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.closed += other.closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::Receiver<ServerPush>) -> Vec<ServerPush> {
        let mut pushes = Vec::new();
        while let Ok(push) = rx.try_recv() {
            pushes.push(push);
        }
        pushes
    }

    fn queue(numbers: &[u64]) -> NumberQueue {
        NumberQueue::from_unsorted(numbers.to_vec())
    }

    #[tokio::test]
    async fn join_receives_snapshot_first() {
        let room = SharedRoom::new(8);
        let a = Uuid::new_v4();
        let mut reg_a = room.join(a).await;
        room.handle(a, ClientRequest::Update("3 1".into())).await;
        room.handle(a, ClientRequest::Cursor(1)).await;

        let mut reg_b = room.join(Uuid::new_v4()).await;
        assert_eq!(reg_b.active_connections, 2);
        assert_eq!(
            drain(&mut reg_b.receiver).await,
            vec![
                ServerPush::InitialQueue(queue(&[1, 3])),
                ServerPush::InitialCursor(1),
            ]
        );
        assert_eq!(
            drain(&mut reg_a.receiver).await,
            vec![
                ServerPush::InitialQueue(NumberQueue::new()),
                ServerPush::InitialCursor(0),
                ServerPush::QueueUpdated(queue(&[1, 3])),
                ServerPush::CursorUpdated(1),
            ]
        );
    }

    #[tokio::test]
    async fn update_reaches_every_client() {
        let room = SharedRoom::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut reg_a = room.join(a).await;
        let mut reg_b = room.join(b).await;
        drain(&mut reg_a.receiver).await;
        drain(&mut reg_b.receiver).await;

        let outcome = room.handle(a, ClientRequest::Update("5 9".into())).await;
        assert!(outcome.transition.queue_changed);
        assert_eq!(outcome.broadcast.delivered, 2);
        let expected = vec![ServerPush::QueueUpdated(queue(&[5, 9]))];
        assert_eq!(drain(&mut reg_a.receiver).await, expected);
        assert_eq!(drain(&mut reg_b.receiver).await, expected);

        // Same text again changes nothing and pushes nothing.
        let outcome = room.handle(b, ClientRequest::Update("9 5".into())).await;
        assert!(outcome.transition.is_noop());
        assert!(drain(&mut reg_a.receiver).await.is_empty());
    }

    #[tokio::test]
    async fn cursor_requests_are_clamped_and_corrected() {
        let room = SharedRoom::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut reg_a = room.join(a).await;
        let mut reg_b = room.join(b).await;
        room.handle(a, ClientRequest::Update("1 2 3".into())).await;
        drain(&mut reg_a.receiver).await;
        drain(&mut reg_b.receiver).await;

        room.handle(a, ClientRequest::Cursor(10)).await;
        assert_eq!(room.snapshot().await.cursor, 2);
        assert_eq!(
            drain(&mut reg_b.receiver).await,
            vec![ServerPush::CursorUpdated(2)]
        );
        drain(&mut reg_a.receiver).await;

        // Already at the end: only the requester hears the correction.
        room.handle(a, ClientRequest::Cursor(3)).await;
        assert_eq!(
            drain(&mut reg_a.receiver).await,
            vec![ServerPush::CursorUpdated(2)]
        );
        assert!(drain(&mut reg_b.receiver).await.is_empty());

        // Exact repeat: nobody hears anything.
        room.handle(a, ClientRequest::Cursor(2)).await;
        assert!(drain(&mut reg_a.receiver).await.is_empty());
    }

    #[tokio::test]
    async fn clear_always_broadcasts() {
        let room = SharedRoom::new(8);
        let a = Uuid::new_v4();
        let mut reg = room.join(a).await;
        drain(&mut reg.receiver).await;

        room.handle(a, ClientRequest::Update("4 8".into())).await;
        room.handle(a, ClientRequest::Cursor(1)).await;
        room.handle(a, ClientRequest::Clear).await;
        room.handle(a, ClientRequest::Clear).await;

        let pushes = drain(&mut reg.receiver).await;
        assert_eq!(
            &pushes[2..],
            &[ServerPush::QueueCleared, ServerPush::QueueCleared]
        );
        let snapshot = room.snapshot().await;
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.cursor, 0);
        assert_eq!(snapshot.total_requests, 4);
    }

    #[tokio::test]
    async fn closed_connections_are_evicted_on_broadcast() {
        let room = SharedRoom::new(8);
        let a = Uuid::new_v4();
        let _reg_a = room.join(a).await;
        let reg_b = room.join(Uuid::new_v4()).await;
        drop(reg_b);

        let outcome = room.handle(a, ClientRequest::Update("7".into())).await;
        assert_eq!(outcome.broadcast.delivered, 1);
        assert_eq!(outcome.broadcast.closed, 1);
        assert_eq!(room.snapshot().await.active_connections, 1);
    }

    #[tokio::test]
    async fn lagging_connection_is_evicted_and_resyncs_on_rejoin() {
        let room = SharedRoom::new(2);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut reg_a = room.join(a).await;
        let mut reg_b = room.join(b).await;
        drain(&mut reg_a.receiver).await;
        // B never drains its snapshot, so its buffer is full.

        let outcome = room.handle(a, ClientRequest::Update("5 9".into())).await;
        assert_eq!(outcome.broadcast.delivered, 1);
        assert_eq!(outcome.broadcast.dropped, 1);
        assert_eq!(room.snapshot().await.active_connections, 1);

        // B gets what was buffered, then the channel ends.
        assert_eq!(reg_b.receiver.recv().await, Some(ServerPush::InitialQueue(NumberQueue::new())));
        assert_eq!(reg_b.receiver.recv().await, Some(ServerPush::InitialCursor(0)));
        assert_eq!(reg_b.receiver.recv().await, None);

        // Later pushes only reach A.
        let outcome = room.handle(a, ClientRequest::Cursor(1)).await;
        assert_eq!(outcome.broadcast.delivered, 1);
        assert_eq!(outcome.broadcast.dropped, 0);

        let mut rejoined = room.join(b).await;
        assert_eq!(
            drain(&mut rejoined.receiver).await,
            vec![
                ServerPush::InitialQueue(queue(&[5, 9])),
                ServerPush::InitialCursor(1),
            ]
        );
    }

    #[tokio::test]
    async fn full_requester_is_evicted_instead_of_corrected() {
        let room = SharedRoom::new(2);
        let a = Uuid::new_v4();
        let mut reg = room.join(a).await;
        // Snapshot fills the buffer; the correction for -4 cannot fit.
        let outcome = room.handle(a, ClientRequest::Cursor(-4)).await;
        assert!(outcome.transition.is_noop());
        assert_eq!(outcome.broadcast.dropped, 1);
        assert_eq!(room.snapshot().await.active_connections, 0);
        assert_eq!(drain(&mut reg.receiver).await.len(), 2);
        assert_eq!(reg.receiver.recv().await, None);
    }

    #[tokio::test]
    async fn leave_unregisters() {
        let room = SharedRoom::new(8);
        let a = Uuid::new_v4();
        let _reg = room.join(a).await;
        assert_eq!(room.leave(a).await, 0);
        assert_eq!(room.leave(a).await, 0);
        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_connections, 1);
    }
}
