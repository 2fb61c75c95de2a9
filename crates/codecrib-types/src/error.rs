use uuid::Uuid;

/// Failure taxonomy shared by the real-time core and the HTTP layer.
///
/// On the real-time channel none of these reach the client; they end up in
/// the server log and the expected broadcast simply does not happen.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Room, file or user reference missing.
    #[error("{0} not found")]
    NotFound(String),

    /// Missing join fields, upload without content or name, malformed values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Manifest points at a blob the blob store cannot produce.
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// Event for a connection that never joined or is already gone.
    #[error("connection {0} is not associated with a room")]
    TransientConnectionRace(Uuid),

    /// Underlying database or filesystem failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(why: impl Into<String>) -> Self {
        Self::InvalidInput(why.into())
    }
}
