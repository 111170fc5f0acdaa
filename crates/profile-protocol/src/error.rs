//! The protocol-visible error taxonomy of spec §7, plus the status-code
//! mapping used on the wire.

use thiserror::Error;

/// Every status a [`crate::envelope::ResponseFrame`] can carry. `Ok` is the
/// only non-error value; every other variant is fatal to the connection
/// only when produced from an actual [`ProtocolError::ProtocolViolation`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    ProtocolViolation = 1,
    Unsupported = 2,
    BadRole = 3,
    BadConversationStatus = 4,
    Unauthorized = 5,
    InvalidSignature = 6,
    InvalidValue = 7,
    NotFound = 8,
    AlreadyExists = 9,
    QuotaExceeded = 10,
    Busy = 11,
    Rejected = 12,
    NotAvailable = 13,
    Uninitialized = 14,
    Internal = 15,
}

impl StatusCode {
    pub fn from_i32(v: i32) -> Option<Self> {
        use StatusCode::*;
        Some(match v {
            0 => Ok,
            1 => ProtocolViolation,
            2 => Unsupported,
            3 => BadRole,
            4 => BadConversationStatus,
            5 => Unauthorized,
            6 => InvalidSignature,
            7 => InvalidValue,
            8 => NotFound,
            9 => AlreadyExists,
            10 => QuotaExceeded,
            11 => Busy,
            12 => Rejected,
            13 => NotAvailable,
            14 => Uninitialized,
            15 => Internal,
            _ => return None,
        })
    }

    pub fn is_fatal_to_connection(self) -> bool {
        matches!(self, StatusCode::ProtocolViolation)
    }
}

/// Protocol-visible error taxonomy (§7). Every handler and codec operation
/// returns this type (or a type that converts into it); the dispatcher is
/// the single place that turns it into a wire [`StatusCode`] + message.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("unsupported protocol version")]
    Unsupported,

    #[error("bad role for this request")]
    BadRole,

    #[error("bad conversation status for this request")]
    BadConversationStatus,

    #[error("unauthorized: conversation is not verified/authenticated")]
    Unauthorized,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("busy")]
    Busy,

    #[error("rejected")]
    Rejected,

    #[error("not available")]
    NotAvailable,

    #[error("uninitialized")]
    Uninitialized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProtocolError::ProtocolViolation(_) => StatusCode::ProtocolViolation,
            ProtocolError::Unsupported => StatusCode::Unsupported,
            ProtocolError::BadRole => StatusCode::BadRole,
            ProtocolError::BadConversationStatus => StatusCode::BadConversationStatus,
            ProtocolError::Unauthorized => StatusCode::Unauthorized,
            ProtocolError::InvalidSignature => StatusCode::InvalidSignature,
            ProtocolError::InvalidValue { .. } => StatusCode::InvalidValue,
            ProtocolError::NotFound => StatusCode::NotFound,
            ProtocolError::AlreadyExists => StatusCode::AlreadyExists,
            ProtocolError::QuotaExceeded => StatusCode::QuotaExceeded,
            ProtocolError::Busy => StatusCode::Busy,
            ProtocolError::Rejected => StatusCode::Rejected,
            ProtocolError::NotAvailable => StatusCode::NotAvailable,
            ProtocolError::Uninitialized => StatusCode::Uninitialized,
            ProtocolError::Internal(_) => StatusCode::Internal,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            ProtocolError::InvalidValue { path, reason } => Some(format!("{}: {}", path, reason)),
            ProtocolError::ProtocolViolation(m) => Some(m.clone()),
            ProtocolError::Internal(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn invalid_value(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidValue { path: path.into(), reason: reason.into() }
    }
}
