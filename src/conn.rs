//! Connection lifecycle: `connecting → connected → disconnected`.
//!
//! `disconnected` is terminal for one connection attempt; there is no
//! automatic reconnect here. Re-entering `connecting` takes an explicit new
//! connection request from the owner. The socket task in `client` drives the
//! transitions and reports each one to the session, which is where the
//! "losing the link drops opponent presence" rule lives.

use std::fmt;

/// Why a connection ended. Surfaced to the collaborator for user display;
/// the `Display` form is the human-readable reason string.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// Underlying socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller-supplied connect timeout elapsed.
    #[error("connect timed out")]
    Timeout,

    /// The owner closed the session.
    #[error("Canceled")]
    Canceled,

    /// The remote end closed the connection, with its close reason if any.
    #[error("closed by remote: {0}")]
    RemoteClose(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(Option<DisconnectReason>),
}

impl ConnectionState {
    /// The reason is only carried while disconnected; entering `Connected`
    /// inherently clears it.
    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        match self {
            ConnectionState::Disconnected(reason) => reason.as_ref(),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected(None) => write!(f, "disconnected"),
            ConnectionState::Disconnected(Some(reason)) => {
                write!(f, "disconnected: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_is_only_visible_while_disconnected() {
        let state = ConnectionState::Disconnected(Some(DisconnectReason::Timeout));
        assert_eq!(state.disconnect_reason(), Some(&DisconnectReason::Timeout));

        assert_eq!(ConnectionState::Connected.disconnect_reason(), None);
        assert_eq!(ConnectionState::Connecting.disconnect_reason(), None);
    }

    #[test]
    fn reason_strings_are_displayable() {
        assert_eq!(DisconnectReason::Canceled.to_string(), "Canceled");
        assert_eq!(
            DisconnectReason::Transport("broken pipe".to_string()).to_string(),
            "transport error: broken pipe"
        );
        assert_eq!(
            ConnectionState::Disconnected(Some(DisconnectReason::Timeout)).to_string(),
            "disconnected: connect timed out"
        );
    }
}
