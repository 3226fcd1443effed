//! Sorted merge get requests and results.

use cachemesh_types::{BKeyRange, Direction, ElementFlagFilter, SmgetElement};

use crate::{Result, SmgetError};

/// A sorted merge get over `keys`.
///
/// Keys keep the order given; duplicates are accepted and served once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmgetRequest {
    keys: Vec<String>,
    range: BKeyRange,
    filter: ElementFlagFilter,
    offset: usize,
    count: usize,
}

impl SmgetRequest {
    pub fn new(
        keys: Vec<String>,
        range: BKeyRange,
        filter: ElementFlagFilter,
        offset: usize,
        count: usize,
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(SmgetError::InvalidRequest("key list is empty".to_string()));
        }
        if count == 0 {
            return Err(SmgetError::InvalidRequest("count must be positive".to_string()));
        }
        if let Some(key) = keys.iter().find(|key| key.is_empty() || key.contains([',', ' '])) {
            return Err(SmgetError::InvalidRequest(format!("invalid key: {key:?}")));
        }
        if offset.checked_add(count).is_none() {
            return Err(SmgetError::InvalidRequest("offset + count overflows".to_string()));
        }

        Ok(Self {
            keys,
            range,
            filter,
            offset,
            count,
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn range(&self) -> BKeyRange {
        self.range
    }

    pub fn filter(&self) -> &ElementFlagFilter {
        &self.filter
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn direction(&self) -> Direction {
        self.range.direction()
    }

    /// Elements each node is asked for: enough to fill the window on its own.
    pub fn per_node_count(&self) -> usize {
        self.offset + self.count
    }
}

/// The merged window plus the keys no node held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedResult {
    elements: Vec<SmgetElement>,
    missed_keys: Vec<String>,
}

impl MergedResult {
    pub(crate) fn new(elements: Vec<SmgetElement>, missed_keys: Vec<String>) -> Self {
        Self {
            elements,
            missed_keys,
        }
    }

    /// Elements in the request's direction.
    pub fn elements(&self) -> &[SmgetElement] {
        &self.elements
    }

    /// Missed keys, deduplicated, in the order they appear in the request.
    pub fn missed_keys(&self) -> &[String] {
        &self.missed_keys
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_parts(self) -> (Vec<SmgetElement>, Vec<String>) {
        (self.elements, self.missed_keys)
    }
}
