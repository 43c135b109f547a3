use crate::core::{ObjectId, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Error classes reported across the dispatch and transport boundaries.
///
/// The discriminant is the nonzero status code carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorKind {
    UnknownObject = 1,
    UnsupportedProperty = 2,
    NotWritable = 3,
    InvalidState = 4,
    DrainTimeout = 5,
    InvalidConfig = 6,
    PermissionDenied = 7,
    MessageTooLarge = 8,
    InternalFault = 9,
    InvalidArgument = 10,
}

impl ErrorKind {
    pub fn status(self) -> u32 {
        self as u32
    }

    pub fn from_status(status: u32) -> Option<Self> {
        use ErrorKind::*;

        Some(match status {
            1 => UnknownObject,
            2 => UnsupportedProperty,
            3 => NotWritable,
            4 => InvalidState,
            5 => DrainTimeout,
            6 => InvalidConfig,
            7 => PermissionDenied,
            8 => MessageTooLarge,
            9 => InternalFault,
            10 => InvalidArgument,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UnknownObject => "UnknownObject",
            Self::UnsupportedProperty => "UnsupportedProperty",
            Self::NotWritable => "NotWritable",
            Self::InvalidState => "InvalidState",
            Self::DrainTimeout => "DrainTimeout",
            Self::InvalidConfig => "InvalidConfig",
            Self::PermissionDenied => "PermissionDenied",
            Self::MessageTooLarge => "MessageTooLarge",
            Self::InternalFault => "InternalFault",
            Self::InvalidArgument => "InvalidArgument",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("{class} object {object} does not support property {selector}")]
    UnsupportedProperty {
        object: ObjectId,
        class: &'static str,
        selector: Selector,
    },

    #[error("property {selector} of object {object} is read-only")]
    NotWritable { object: ObjectId, selector: Selector },

    #[error("{0}")]
    InvalidState(String),

    #[error("IO thread of device {device} did not drain within {timeout_ms}ms")]
    DrainTimeout { device: ObjectId, timeout_ms: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("internal fault: {0}")]
    InternalFault(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An error decoded from a wire status, with the peer's message.
    #[error("{kind:?}: {message}")]
    Remote { kind: ErrorKind, message: String },
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownObject(_) => ErrorKind::UnknownObject,
            Self::UnsupportedProperty { .. } => ErrorKind::UnsupportedProperty,
            Self::NotWritable { .. } => ErrorKind::NotWritable,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::DrainTimeout { .. } => ErrorKind::DrainTimeout,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::MessageTooLarge { .. } => ErrorKind::MessageTooLarge,
            Self::InternalFault(_) => ErrorKind::InternalFault,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Remote { kind, .. } => *kind,
        }
    }

    pub fn status(&self) -> u32 {
        self.kind().status()
    }

    /// Rebuilds an error from a nonzero wire status and its message payload.
    pub fn from_status(status: u32, message: String) -> Self {
        match ErrorKind::from_status(status) {
            Some(kind) => Self::Remote { kind, message },
            None => Self::InternalFault(format!("unrecognised status {}: {}", status, message)),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalFault(msg.into())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("malformed payload: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DriverError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::InternalFault("object lock poisoned by an earlier fault".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_nonzero_and_reversible() {
        for status in 1..=10 {
            let kind = ErrorKind::from_status(status).unwrap();
            assert_eq!(kind.status(), status);
        }
        assert_eq!(ErrorKind::from_status(0), None);
        assert_eq!(ErrorKind::from_status(11), None);
    }

    #[test]
    fn test_remote_error_keeps_kind() {
        let err = DriverError::from_status(4, "device is running".to_string());
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("device is running"));
    }

    #[test]
    fn test_unknown_status_is_internal_fault() {
        let err = DriverError::from_status(77, "?".to_string());
        assert_eq!(err.kind(), ErrorKind::InternalFault);
    }
}
