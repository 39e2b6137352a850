//! Client-side cache of the holder's state.
//!
//! The cache never decides anything: pushes overwrite it unconditionally and
//! user intents become [`ClientRequest`]s for the holder to rule on. The only
//! local liberty taken is moving the cached cursor optimistically on prev/next
//! so the display does not wait for the round trip.

use crate::{
    navigation::Navigation,
    protocol::{ClientRequest, ServerPush},
    queue::NumberQueue,
};

#[derive(Debug, Clone, Default)]
pub struct SyncClient {
    queue: NumberQueue,
    cursor: usize,
    pending: String,
    synced: bool,
}

impl SyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &NumberQueue {
        &self.queue
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether an initial snapshot has arrived since the last connect.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn navigation(&self) -> Navigation {
        Navigation::at(&self.queue, self.cursor)
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn set_pending(&mut self, text: impl Into<String>) {
        self.pending = text.into();
    }

    /// Marks the cache stale; the next snapshot replaces it wholesale.
    pub fn disconnected(&mut self) {
        self.synced = false;
    }

    /// Applies a push from the holder. Returns whether the cache changed.
    pub fn apply(&mut self, push: ServerPush) -> bool {
        match push {
            ServerPush::InitialQueue(queue) => {
                self.synced = true;
                self.replace_queue(queue)
            }
            ServerPush::QueueUpdated(queue) => self.replace_queue(queue),
            ServerPush::InitialCursor(cursor) | ServerPush::CursorUpdated(cursor) => {
                let changed = self.cursor != cursor;
                self.cursor = cursor;
                changed
            }
            ServerPush::QueueCleared => {
                let changed = !self.queue.is_empty() || self.cursor != 0;
                self.queue = NumberQueue::new();
                self.cursor = 0;
                changed
            }
        }
    }

    fn replace_queue(&mut self, queue: NumberQueue) -> bool {
        // Re-normalize even though the holder already sorts.
        let queue = NumberQueue::from_unsorted(queue.into());
        let changed = self.queue != queue;
        self.queue = queue;
        changed
    }

    /// Turns the pending text into an update request and clears it. Blank
    /// input produces nothing.
    pub fn submit(&mut self) -> Option<ClientRequest> {
        if self.pending.trim().is_empty() {
            return None;
        }
        Some(ClientRequest::Update(std::mem::take(&mut self.pending)))
    }

    /// Clearing asks for both an empty queue and a zero cursor.
    pub fn clear(&self) -> [ClientRequest; 2] {
        [ClientRequest::Clear, ClientRequest::Cursor(0)]
    }

    pub fn prev(&mut self) -> Option<ClientRequest> {
        if !self.navigation().can_move_prev {
            return None;
        }
        self.cursor -= 1;
        Some(ClientRequest::Cursor(self.cursor as i64))
    }

    pub fn next(&mut self) -> Option<ClientRequest> {
        if !self.navigation().can_move_next {
            return None;
        }
        self.cursor += 1;
        Some(ClientRequest::Cursor(self.cursor as i64))
    }

    pub fn set_cursor(&self, value: i64) -> ClientRequest {
        ClientRequest::Cursor(value)
    }
}
