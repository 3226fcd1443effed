//! # cachemesh-smget: Sorted merge get
//!
//! Fans a multi-key sub-key range query out to the nodes owning the keys,
//! then merges the per-node sorted partials into one ordered window.
//!
//! - Keys are grouped by owner using the pool member's routing snapshot;
//!   keys without an owner, or whose node is unreachable or fails, are
//!   reported as missed.
//! - Each node is asked for `offset + count` elements so that any single
//!   node can fill the window.
//! - The handle completes exactly once: merge, cancel or operation
//!   timeout, whichever comes first.

mod engine;
mod error;
mod handle;
mod merge;
mod request;

pub use engine::SmgetEngine;
pub use error::{Result, SmgetError};
pub use handle::{SmgetHandle, SmgetStatus};
pub use merge::merge_window;
pub use request::{MergedResult, SmgetRequest};
