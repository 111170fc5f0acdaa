use thiserror::Error;

/// Storage-layer failures. The core maps every variant to
/// `profile_protocol::ProtocolError::Internal` except `NotFound`/`AlreadyExists`,
/// which carry their own protocol status codes (§7 "storage transaction
/// failures roll back, log, and return INTERNAL").
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for profile_protocol::ProtocolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => profile_protocol::ProtocolError::NotFound,
            StoreError::AlreadyExists => profile_protocol::ProtocolError::AlreadyExists,
            StoreError::Backend(msg) => profile_protocol::ProtocolError::Internal(msg),
        }
    }
}
