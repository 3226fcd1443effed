//! Events published by registry backends.

use std::fmt::{self, Display};

/// Identifier the coordination service assigns to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Rendered as `0x{hex}`, the way session ids appear in logs.
impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Connection state of a registry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The session is established (or re-established after a transient
    /// disconnect).
    Connected,
    /// Transient loss of the server; the session may still come back.
    Disconnected,
    /// The session is gone, together with its ephemeral nodes.
    Expired,
    /// The session was closed by its owner.
    Closed,
}

impl SessionState {
    /// Returns true if the session can never deliver events again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }
}

/// Event delivered on a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    SessionStateChanged(SessionState),
    /// The children of a watched path changed; `children` is the full new list.
    ChildrenChanged { path: String, children: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_renders_hex() {
        assert_eq!(SessionId::new(255).to_string(), "0xff");
        assert_eq!(SessionId::new(255).value(), 255);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Disconnected.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }
}
