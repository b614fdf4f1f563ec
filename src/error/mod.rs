//! Error module for storesync
//!
//! This module defines the error type and numeric codes used throughout the
//! store, the backing media and the peer relay. Store operations never hand
//! these errors to their callers; they are logged at the operation boundary.

use thiserror::Error;
use std::fmt;

/// Numeric error code, grouped by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Protocol errors (0x0001-0x0100)
    InvalidEventType = 0x0001,
    MalformedTlv = 0x0002,
    IncompleteMessage = 0x0003,
    MessageTooLarge = 0x0004,

    // Medium errors (0x0101-0x0200)
    QuotaExceeded = 0x0101,
    MediumUnavailable = 0x0102,
    WriteFailed = 0x0103,
    ReadFailed = 0x0104,

    // Serialization errors (0x0201-0x0300)
    EncodeFailed = 0x0201,
    DecodeFailed = 0x0202,

    // Sync errors (0x0301-0x0400)
    NamespaceMismatch = 0x0301,
    SyncDenied = 0x0302,

    // System errors (0x0401-0x0500)
    InternalError = 0x0401,
    ConfigInvalid = 0x0402,

    // Connection errors (0x0501-0x0600)
    ConnectionFailed = 0x0501,
    SendFailed = 0x0502,
    NotConnected = 0x0503,
}

impl ErrorCode {
    /// Get the error code as a u16
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the error code category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            0x0001..=0x0100 => ErrorCategory::Protocol,
            0x0101..=0x0200 => ErrorCategory::Medium,
            0x0201..=0x0300 => ErrorCategory::Serialization,
            0x0301..=0x0400 => ErrorCategory::Sync,
            0x0401..=0x0500 => ErrorCategory::System,
            0x0501..=0x0600 => ErrorCategory::Connection,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Try to convert a u16 to an ErrorCode
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::InvalidEventType),
            0x0002 => Some(Self::MalformedTlv),
            0x0003 => Some(Self::IncompleteMessage),
            0x0004 => Some(Self::MessageTooLarge),
            0x0101 => Some(Self::QuotaExceeded),
            0x0102 => Some(Self::MediumUnavailable),
            0x0103 => Some(Self::WriteFailed),
            0x0104 => Some(Self::ReadFailed),
            0x0201 => Some(Self::EncodeFailed),
            0x0202 => Some(Self::DecodeFailed),
            0x0301 => Some(Self::NamespaceMismatch),
            0x0302 => Some(Self::SyncDenied),
            0x0401 => Some(Self::InternalError),
            0x0402 => Some(Self::ConfigInvalid),
            0x0501 => Some(Self::ConnectionFailed),
            0x0502 => Some(Self::SendFailed),
            0x0503 => Some(Self::NotConnected),
            _ => None,
        }
    }

    /// Get a human-readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidEventType => "Unknown or invalid event type",
            Self::MalformedTlv => "Malformed or inconsistent TLV field",
            Self::IncompleteMessage => "Incomplete or truncated message",
            Self::MessageTooLarge => "Message size exceeds maximum",
            Self::QuotaExceeded => "Backing medium quota exceeded",
            Self::MediumUnavailable => "Backing medium is unavailable",
            Self::WriteFailed => "Failed to write to the backing medium",
            Self::ReadFailed => "Failed to read from the backing medium",
            Self::EncodeFailed => "Value could not be serialized",
            Self::DecodeFailed => "Stored value could not be deserialized",
            Self::NamespaceMismatch => "Peer uses a different storage namespace",
            Self::SyncDenied => "Synchronization denied",
            Self::InternalError => "Unexpected internal error",
            Self::ConfigInvalid => "Invalid configuration",
            Self::ConnectionFailed => "Failed to connect to peer",
            Self::SendFailed => "Failed to send message",
            Self::NotConnected => "Peer is not connected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidEventType => "INVALID_EVENT_TYPE",
            Self::MalformedTlv => "MALFORMED_TLV",
            Self::IncompleteMessage => "INCOMPLETE_MESSAGE",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::MediumUnavailable => "MEDIUM_UNAVAILABLE",
            Self::WriteFailed => "WRITE_FAILED",
            Self::ReadFailed => "READ_FAILED",
            Self::EncodeFailed => "ENCODE_FAILED",
            Self::DecodeFailed => "DECODE_FAILED",
            Self::NamespaceMismatch => "NAMESPACE_MISMATCH",
            Self::SyncDenied => "SYNC_DENIED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::SendFailed => "SEND_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
        };
        write!(f, "{} (0x{:04X})", name, self.as_u16())
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Protocol,
    Medium,
    Serialization,
    Sync,
    System,
    Connection,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "Protocol"),
            Self::Medium => write!(f, "Medium"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Sync => write!(f, "Sync"),
            Self::System => write!(f, "System"),
            Self::Connection => write!(f, "Connection"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Main error type for storesync
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{code}: {message}")]
    Standard {
        code: ErrorCode,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl StoreError {
    /// Create a new standard error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard {
            code,
            message: message.into(),
        }
    }

    /// Get the error code. I/O and serde errors map onto their closest code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Standard { code, .. } => *code,
            Self::Io(_) => ErrorCode::MediumUnavailable,
            Self::Serialization(_) => ErrorCode::DecodeFailed,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Standard { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Convert to the (code, text) pair carried by an error frame
    pub fn to_tlv_error(&self) -> (u16, String) {
        (self.code().as_u16(), self.message())
    }
}

/// Result type alias for storesync operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<String> for StoreError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

impl From<&str> for StoreError {
    fn from(message: &str) -> Self {
        Self::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_u16() {
        for code in [
            ErrorCode::MalformedTlv,
            ErrorCode::QuotaExceeded,
            ErrorCode::DecodeFailed,
            ErrorCode::NamespaceMismatch,
            ErrorCode::ConfigInvalid,
            ErrorCode::NotConnected,
        ] {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(0xFFFF), None);
    }

    #[test]
    fn categories_follow_code_ranges() {
        assert_eq!(ErrorCode::IncompleteMessage.category(), ErrorCategory::Protocol);
        assert_eq!(ErrorCode::QuotaExceeded.category(), ErrorCategory::Medium);
        assert_eq!(ErrorCode::EncodeFailed.category(), ErrorCategory::Serialization);
        assert_eq!(ErrorCode::SyncDenied.category(), ErrorCategory::Sync);
        assert_eq!(ErrorCode::InternalError.category(), ErrorCategory::System);
        assert_eq!(ErrorCode::SendFailed.category(), ErrorCategory::Connection);
    }

    #[test]
    fn display_includes_name_and_hex() {
        let err = StoreError::new(ErrorCode::QuotaExceeded, "no room for key 'user'");
        assert_eq!(err.to_string(), "QUOTA_EXCEEDED (0x0101): no room for key 'user'");
        assert_eq!(err.to_tlv_error(), (0x0101, "no room for key 'user'".to_string()));
    }

    #[test]
    fn foreign_errors_map_to_codes() {
        let io = StoreError::from(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        assert_eq!(io.code(), ErrorCode::MediumUnavailable);

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(StoreError::from(json).code(), ErrorCode::DecodeFailed);
    }
}
