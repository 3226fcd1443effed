//! K-way merge of per-node sorted partials under an offset/count window.
//!
//! Elements compare by sub-key in the request's direction. Equal sub-keys
//! order by key ascending, then by the arrival position of the partial
//! they came from, which makes the merge a total, stable order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use cachemesh_types::{Direction, SmgetElement};

struct Head {
    element: SmgetElement,
    source: usize,
    direction: Direction,
}

impl Head {
    fn order(&self, other: &Self) -> Ordering {
        self.direction
            .compare(self.element.bkey, other.element.bkey)
            .then_with(|| self.element.key.cmp(&other.element.key))
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // Reversed: `BinaryHeap` pops the greatest, the merge wants the first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.order(self)
    }
}

/// Merges `partials`, given in arrival order and each already sorted in
/// `direction`, skipping `offset` elements and keeping at most `count`.
///
/// Elements past the window are dropped unread.
pub fn merge_window(
    partials: Vec<Vec<SmgetElement>>,
    direction: Direction,
    offset: usize,
    count: usize,
) -> Vec<SmgetElement> {
    let mut sources: Vec<_> = partials.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (source, elements) in sources.iter_mut().enumerate() {
        if let Some(element) = elements.next() {
            heap.push(Head {
                element,
                source,
                direction,
            });
        }
    }

    let mut skipped = 0;
    let mut merged = Vec::with_capacity(count.min(1024));
    while merged.len() < count {
        let Some(head) = heap.pop() else {
            break;
        };
        if let Some(next) = sources[head.source].next() {
            heap.push(Head {
                element: next,
                source: head.source,
                direction,
            });
        }

        if skipped < offset {
            skipped += 1;
        } else {
            merged.push(head.element);
        }
    }
    merged
}

/// Orders `missed` by first appearance in `keys`, dropping duplicates.
pub(crate) fn missed_in_request_order(keys: &[String], missed: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(missed.len());
    keys.iter()
        .filter(|key| missed.contains(*key) && seen.insert(key.as_str()))
        .cloned()
        .collect()
}
