//! Sorted merge get payloads exchanged with cache nodes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BKey, BKeyRange, ElementFlagFilter};

/// One element returned by a sorted merge get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmgetElement {
    pub key: String,
    pub bkey: BKey,
    pub eflag: Option<Bytes>,
    pub value: Bytes,
}

impl SmgetElement {
    pub fn new(key: impl Into<String>, bkey: u64, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            bkey: BKey::new(bkey),
            eflag: None,
            value: value.into(),
        }
    }

    pub fn with_eflag(mut self, eflag: impl Into<Bytes>) -> Self {
        self.eflag = Some(eflag.into());
        self
    }
}

/// The slice of a sorted merge get addressed to a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSmgetRequest {
    /// Keys owned by the node, in request order.
    pub keys: Vec<String>,
    pub range: BKeyRange,
    pub filter: ElementFlagFilter,
    /// Maximum number of elements the node returns across all its keys.
    pub count: usize,
}

impl NodeSmgetRequest {
    /// Renders the command arguments: `<lenkeys> <numkeys> <range> [<filter>] <count>`.
    ///
    /// `lenkeys` is the byte length of the comma-joined key line that
    /// follows the command.
    pub fn stringify(&self) -> String {
        let key_line_len = self.keys.iter().map(String::len).sum::<usize>()
            + self.keys.len().saturating_sub(1);

        let mut out = format!("{} {} {}", key_line_len, self.keys.len(), self.range);
        if !self.filter.is_pass_through() {
            out.push(' ');
            out.push_str(&self.filter.stringify());
        }
        out.push(' ');
        out.push_str(&self.count.to_string());
        out
    }

    /// The comma-joined key line sent after the command.
    pub fn key_line(&self) -> String {
        self.keys.join(",")
    }
}

/// Result of one node's part of a sorted merge get.
///
/// `elements` are already ordered in the request's direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmgetPartial {
    pub elements: Vec<SmgetElement>,
    /// Keys assigned to the node that it does not hold.
    pub missed_keys: Vec<String>,
}
