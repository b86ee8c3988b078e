use crate::error::{LdapError, LdapResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progression of a connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Bound,
    Disposed,
}

impl SessionState {
    /// Fails unless the session may issue directory operations
    pub fn require_bound(&self) -> LdapResult<()> {
        match self {
            SessionState::Bound => Ok(()),
            SessionState::Initialized => Err(LdapError::NotBound),
            SessionState::Uninitialized => Err(LdapError::NotConnected),
            SessionState::Disposed => Err(LdapError::Disposed),
        }
    }

    /// Fails unless a bind may be attempted. Rebinding a bound session is allowed.
    pub fn require_initialized(&self) -> LdapResult<()> {
        match self {
            SessionState::Initialized | SessionState::Bound => Ok(()),
            SessionState::Uninitialized => Err(LdapError::NotConnected),
            SessionState::Disposed => Err(LdapError::Disposed),
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, SessionState::Disposed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::Bound => write!(f, "bound"),
            SessionState::Disposed => write!(f, "disposed"),
        }
    }
}
