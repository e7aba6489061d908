//! Outbox paging and grouping.
//!
//! A flush walks the durable queue one page at a time, ordered by message
//! id. Each page is split by destination so that one worker per peer can
//! deliver that peer's messages in order. The cursor only ever moves forward:
//! messages that stay queued are picked up by the next flush, not re-read by
//! the current one.

use serde::{Deserialize, Serialize};
use threadpost_types::{MessageId, PeerId};

/// Messages loaded per page when no size is configured.
pub const DEFAULT_PAGE_SIZE: usize = 16;

/// Split a page into per-destination groups.
///
/// Groups come back in order of each destination's first appearance, and
/// items keep their page order within a group.
pub fn partition_by_peer<T, F>(items: Vec<T>, destination: F) -> Vec<(PeerId, Vec<T>)>
where
    F: Fn(&T) -> PeerId,
{
    let mut groups: Vec<(PeerId, Vec<T>)> = Vec::new();
    for item in items {
        let peer = destination(&item);
        match groups.iter_mut().find(|(p, _)| *p == peer) {
            Some((_, group)) => group.push(item),
            None => groups.push((peer, vec![item])),
        }
    }
    groups
}

/// Position of a flush in the durable queue.
#[derive(Debug, Clone)]
pub struct PageCursor {
    after: Option<MessageId>,
    page_size: usize,
}

impl PageCursor {
    /// Start at the smallest id. A page size of zero is treated as one.
    pub fn new(page_size: usize) -> Self {
        Self {
            after: None,
            page_size: page_size.max(1),
        }
    }

    /// Exclusive lower bound for the next page.
    pub fn after(&self) -> Option<MessageId> {
        self.after
    }

    /// Maximum number of messages to load.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Move past a processed page.
    ///
    /// Returns `false` when the page was empty and the walk is finished.
    pub fn advance<I>(&mut self, page_ids: I) -> bool
    where
        I: IntoIterator<Item = MessageId>,
    {
        match page_ids.into_iter().max() {
            Some(last) => {
                self.after = Some(last);
                true
            }
            None => false,
        }
    }
}

/// What one flush did, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Non-empty pages processed
    pub pages: usize,
    /// Messages a delivery was attempted for
    pub attempted: usize,
    /// Delivered over a direct connection
    pub direct: usize,
    /// Handed to a relay outbox
    pub relayed: usize,
    /// Removed from the durable queue
    pub deleted: usize,
    /// Left queued for a later flush
    pub pending: usize,
}

impl FlushReport {
    /// Whether every attempted message left the queue.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.deleted == self.attempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_first_seen_order() {
        let a = PeerId::random();
        let b = PeerId::random();
        let items = vec![(a, 1), (b, 2), (a, 3), (b, 4), (a, 5)];

        let groups = partition_by_peer(items, |(peer, _)| *peer);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, a);
        assert_eq!(
            groups[0].1.iter().map(|(_, n)| *n).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        assert_eq!(groups[1].0, b);
        assert_eq!(
            groups[1].1.iter().map(|(_, n)| *n).collect::<Vec<_>>(),
            vec![2, 4]
        );
    }

    #[test]
    fn partition_empty_page() {
        let groups = partition_by_peer(Vec::<(PeerId, u8)>::new(), |(peer, _)| *peer);
        assert!(groups.is_empty());
    }

    #[test]
    fn cursor_walks_forward() {
        let mut cursor = PageCursor::new(DEFAULT_PAGE_SIZE);
        assert_eq!(cursor.after(), None);
        assert_eq!(cursor.page_size(), 16);

        let ids: Vec<MessageId> = (0..3).map(|_| MessageId::new()).collect();
        assert!(cursor.advance(ids.clone()));
        assert_eq!(cursor.after(), Some(ids[2]));

        assert!(!cursor.advance(Vec::new()));
        assert_eq!(cursor.after(), Some(ids[2]));
    }

    #[test]
    fn cursor_uses_largest_id_regardless_of_order() {
        let mut cursor = PageCursor::new(4);
        let first = MessageId::new();
        let second = MessageId::new();
        cursor.advance([second, first]);
        assert_eq!(cursor.after(), Some(second));
    }

    #[test]
    fn zero_page_size_is_clamped() {
        assert_eq!(PageCursor::new(0).page_size(), 1);
    }

    #[test]
    fn report_drained() {
        let mut report = FlushReport {
            attempted: 2,
            relayed: 2,
            deleted: 2,
            ..Default::default()
        };
        assert!(report.is_drained());
        report.pending = 1;
        assert!(!report.is_drained());
    }

    #[test]
    fn report_serializes() {
        let report = FlushReport {
            pages: 1,
            attempted: 3,
            direct: 1,
            relayed: 1,
            deleted: 2,
            pending: 1,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"relayed\":1"));
    }
}
