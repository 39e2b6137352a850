use serde::{Deserialize, Serialize};

/// Sorted, duplicate-free list of question numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u64>", into = "Vec<u64>")]
pub struct NumberQueue(Vec<u64>);

impl NumberQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a queue from arbitrary numbers, sorting and deduplicating.
    /// Zero is not a valid question number and is dropped.
    pub fn from_unsorted(mut numbers: Vec<u64>) -> Self {
        numbers.retain(|&n| n > 0);
        numbers.sort_unstable();
        numbers.dedup();
        Self(numbers)
    }

    /// Returns the union of `self` and `numbers`.
    pub fn merged(&self, numbers: &[u64]) -> Self {
        let mut combined = Vec::with_capacity(self.0.len() + numbers.len());
        combined.extend_from_slice(&self.0);
        combined.extend_from_slice(numbers);
        Self::from_unsorted(combined)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.0.get(index).copied()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Highest valid cursor for this queue; zero when empty.
    pub fn last_index(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

impl From<Vec<u64>> for NumberQueue {
    fn from(numbers: Vec<u64>) -> Self {
        Self::from_unsorted(numbers)
    }
}

impl From<NumberQueue> for Vec<u64> {
    fn from(queue: NumberQueue) -> Self {
        queue.0
    }
}

/// Which parts of the state a committed operation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    pub queue_changed: bool,
    pub cursor_changed: bool,
}

impl Transition {
    pub const NONE: Transition = Transition {
        queue_changed: false,
        cursor_changed: false,
    };

    pub fn is_noop(&self) -> bool {
        !self.queue_changed && !self.cursor_changed
    }
}

/// The queue together with the reading position.
///
/// Every mutation keeps `cursor <= queue.last_index()`; the only empty-queue
/// cursor value is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueState {
    queue: NumberQueue,
    cursor: usize,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a state from possibly stale parts, clamping the cursor.
    pub fn from_parts(queue: NumberQueue, cursor: usize) -> Self {
        let cursor = cursor.min(queue.last_index());
        Self { queue, cursor }
    }

    pub fn queue(&self) -> &NumberQueue {
        &self.queue
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn can_move_prev(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_move_next(&self) -> bool {
        !self.queue.is_empty() && self.cursor < self.queue.last_index()
    }

    /// Merges `numbers` into the queue. The cursor keeps its index.
    pub fn add(&mut self, numbers: &[u64]) -> Transition {
        let merged = self.queue.merged(numbers);
        if merged == self.queue {
            return Transition::NONE;
        }
        self.queue = merged;
        let clamped = self.cursor.min(self.queue.last_index());
        let cursor_changed = clamped != self.cursor;
        self.cursor = clamped;
        Transition {
            queue_changed: true,
            cursor_changed,
        }
    }

    /// Replaces the whole queue, re-clamping the cursor in the same step.
    pub fn replace_queue(&mut self, queue: NumberQueue) -> Transition {
        let queue_changed = queue != self.queue;
        self.queue = queue;
        let clamped = self.cursor.min(self.queue.last_index());
        let cursor_changed = clamped != self.cursor;
        self.cursor = clamped;
        Transition {
            queue_changed,
            cursor_changed,
        }
    }

    pub fn clear(&mut self) -> Transition {
        let transition = Transition {
            queue_changed: !self.queue.is_empty(),
            cursor_changed: self.cursor != 0,
        };
        self.queue = NumberQueue::new();
        self.cursor = 0;
        transition
    }

    pub fn prev(&mut self) -> Transition {
        if !self.can_move_prev() {
            return Transition::NONE;
        }
        self.cursor -= 1;
        Transition {
            queue_changed: false,
            cursor_changed: true,
        }
    }

    pub fn next(&mut self) -> Transition {
        if !self.can_move_next() {
            return Transition::NONE;
        }
        self.cursor += 1;
        Transition {
            queue_changed: false,
            cursor_changed: true,
        }
    }

    /// Moves the cursor to `value`, clamped into the queue's bounds. Negative
    /// values clamp to zero.
    pub fn set_cursor(&mut self, value: i64) -> Transition {
        let clamped = clamp_index(value, self.queue.last_index());
        if clamped == self.cursor {
            return Transition::NONE;
        }
        self.cursor = clamped;
        Transition {
            queue_changed: false,
            cursor_changed: true,
        }
    }
}

/// Clamps a signed cursor request into `[0, last_index]`.
pub fn clamp_index(value: i64, last_index: usize) -> usize {
    if value <= 0 {
        0
    } else {
        usize::try_from(value).map_or(last_index, |v| v.min(last_index))
    }
}
