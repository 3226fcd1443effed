//! # cachemesh-types: Core types for `cachemesh`
//!
//! This crate contains shared types used across the `cachemesh` client:
//! - Cluster membership ([`NodeAddress`], [`ClusterView`])
//! - Collection sub-keys and ranges ([`BKey`], [`BKeyRange`], [`Direction`])
//! - Element flag predicates ([`ElementFlagFilter`])
//! - Sorted merge get payloads ([`SmgetElement`], [`NodeSmgetRequest`], [`SmgetPartial`])
//! - Collection argument rendering ([`ListGet`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

mod bkey;
mod collection;
mod eflag;
mod element;

pub use bkey::{BKey, BKeyRange, Direction};
pub use collection::ListGet;
pub use eflag::{BitOp, CompOp, ElementFlagFilter, MAX_EFLAG_LENGTH};
pub use element::{NodeSmgetRequest, SmgetElement, SmgetPartial};

/// Errors produced while parsing or validating core types.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The address is not of the form `host:port`.
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    /// An element flag operand is empty or longer than [`MAX_EFLAG_LENGTH`].
    #[error("invalid element flag length {0} (must be 1..={MAX_EFLAG_LENGTH})")]
    InvalidFlagLength(usize),

    /// The compared flag slice would end past [`MAX_EFLAG_LENGTH`].
    #[error("element flag offset {offset} with length {length} exceeds {MAX_EFLAG_LENGTH} bytes")]
    InvalidFlagOffset { offset: usize, length: usize },

    /// The bitwise operand and the comparison value differ in length.
    #[error("bitwise operand length {operand} does not match compare value length {value}")]
    OperandLengthMismatch { operand: usize, value: usize },
}

// ============================================================================
// Cluster membership
// ============================================================================

/// Network address of one cache node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a registry child name of the form `{address}-{opaque-metadata}`.
    ///
    /// Only the prefix before the first `-` is significant; a child without
    /// any `-` is parsed as a bare address.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cachemesh_types::NodeAddress;
    /// let addr = NodeAddress::from_registry_child("10.0.0.7:11211-host7").unwrap();
    /// assert_eq!(addr, NodeAddress::new("10.0.0.7", 11211));
    /// ```
    pub fn from_registry_child(child: &str) -> Result<Self, TypesError> {
        let address = child.split_once('-').map_or(child, |(address, _)| address);
        address.parse()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;

        if host.is_empty() {
            return Err(TypesError::InvalidAddress(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| TypesError::InvalidAddress(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

/// Ordered cluster membership as last reported by the registry.
///
/// Views are replaced wholesale: [`ClusterView::successor`] builds the next
/// view with a bumped generation, an existing view is never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    addresses: Vec<NodeAddress>,
    generation: u64,
}

impl ClusterView {
    /// Creates the first view (generation 1).
    pub fn new(addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            generation: 1,
        }
    }

    /// Builds the view that replaces `self`.
    pub fn successor(&self, addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            generation: self.generation + 1,
        }
    }

    pub fn addresses(&self) -> &[NodeAddress] {
        &self.addresses
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.addresses.contains(address)
    }

    /// Returns true if `addresses` lists exactly the members of this view in
    /// the same order.
    pub fn has_members(&self, addresses: &[NodeAddress]) -> bool {
        self.addresses == addresses
    }
}
