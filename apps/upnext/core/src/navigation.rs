use crate::queue::{NumberQueue, QueueState};

/// What a renderer needs to draw the "previous > current > next" strip and the
/// progress bar. Absent neighbours are `None`; they render as a placeholder,
/// never as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub previous: Option<u64>,
    pub current: Option<u64>,
    pub next: Option<u64>,
    pub can_move_prev: bool,
    pub can_move_next: bool,
    pub progress: f64,
}

impl Navigation {
    pub fn of(state: &QueueState) -> Self {
        Self::at(state.queue(), state.cursor())
    }

    /// Derives the view for an arbitrary (queue, cursor) pair. The pair may come
    /// straight off the wire, so the cursor is not assumed to be in bounds.
    pub fn at(queue: &NumberQueue, cursor: usize) -> Self {
        let previous = cursor.checked_sub(1).and_then(|i| queue.get(i));
        let next = cursor.checked_add(1).and_then(|i| queue.get(i));
        Self {
            previous,
            current: queue.get(cursor),
            next,
            can_move_prev: cursor > 0,
            can_move_next: !queue.is_empty() && cursor < queue.last_index(),
            progress: progress_percent(cursor, queue.len()),
        }
    }
}

/// `cursor / (len - 1) * 100`, clamped to `[0, 100]`.
///
/// An empty queue reports 0%. A single-item queue has nowhere left to go and
/// reports 100%.
pub fn progress_percent(cursor: usize, len: usize) -> f64 {
    match len {
        0 => 0.0,
        1 => 100.0,
        _ => {
            let ratio = cursor as f64 / (len - 1) as f64;
            (ratio * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// Comma-separated listing of the whole queue, e.g. `"7, 13, 42"`.
pub fn listing(queue: &NumberQueue) -> String {
    queue
        .as_slice()
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(numbers: &[u64]) -> NumberQueue {
        NumberQueue::from_unsorted(numbers.to_vec())
    }

    #[test]
    fn neighbours_at_start_middle_end() {
        let q = queue(&[7, 13, 42]);

        let start = Navigation::at(&q, 0);
        assert_eq!(start.previous, None);
        assert_eq!(start.current, Some(7));
        assert_eq!(start.next, Some(13));
        assert!(!start.can_move_prev);
        assert!(start.can_move_next);

        let middle = Navigation::at(&q, 1);
        assert_eq!(
            (middle.previous, middle.current, middle.next),
            (Some(7), Some(13), Some(42))
        );
        assert_eq!(middle.progress, 50.0);

        let end = Navigation::at(&q, 2);
        assert_eq!(end.next, None);
        assert!(!end.can_move_next);
        assert_eq!(end.progress, 100.0);
    }

    #[test]
    fn empty_queue_has_nothing_to_show() {
        let view = Navigation::at(&NumberQueue::new(), 0);
        assert_eq!((view.previous, view.current, view.next), (None, None, None));
        assert!(!view.can_move_next);
        assert_eq!(view.progress, 0.0);
    }

    #[test]
    fn single_item_progress_is_defined() {
        let view = Navigation::at(&queue(&[5]), 0);
        assert_eq!(view.current, Some(5));
        assert_eq!(view.progress, 100.0);
        assert!(view.progress.is_finite());
    }

    #[test]
    fn stale_cursor_from_the_wire_is_tolerated() {
        let view = Navigation::at(&queue(&[1, 2]), 9);
        assert_eq!(view.current, None);
        assert_eq!(view.previous, None);
        assert_eq!(view.progress, 100.0);
    }

    #[test]
    fn listing_joins_with_commas() {
        assert_eq!(listing(&queue(&[42, 7, 13])), "7, 13, 42");
        assert_eq!(listing(&NumberQueue::new()), "");
    }
}
