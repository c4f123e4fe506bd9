use ulid::Ulid;

use super::validator::RejectionReason;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requester does not own the entity it tried to change.
    NotOwner(Ulid),
    /// The candidate reservation failed validation.
    Rejected(RejectionReason),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// The rejection reason, if this error is a validation rejection.
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            EngineError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotOwner(id) => write!(f, "not permitted to modify: {id}"),
            EngineError::Rejected(reason) => write!(f, "{reason}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RejectionReason> for EngineError {
    fn from(reason: RejectionReason) -> Self {
        EngineError::Rejected(reason)
    }
}
