use log::{debug, error};
use crate::error::{ErrorCode, StoreError};

/// Frame event types of the change relay protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Changes
    Set = 0x01,
    Delete = 0x03,
    Clear = 0x05,

    // Sync
    SyncInit = 0x22,
    SyncAck = 0x23,

    // Handshake rejection
    Error = 0xF0,
}

impl EventType {
    /// Convert a u8 to an EventType
    pub fn from_u8(value: u8) -> Result<Self, StoreError> {
        debug!("Converting u8 to EventType: value = 0x{:02X}", value);

        match value {
            0x01 => Ok(Self::Set),
            0x03 => Ok(Self::Delete),
            0x05 => Ok(Self::Clear),
            0x22 => Ok(Self::SyncInit),
            0x23 => Ok(Self::SyncAck),
            0xF0 => Ok(Self::Error),
            _ => {
                error!("Unknown event type: 0x{:02X}", value);
                Err(StoreError::new(
                    ErrorCode::InvalidEventType,
                    format!("Unknown event type: 0x{:02X}", value),
                ))
            },
        }
    }

    /// Whether the frame carries a change to the shared medium
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Set | Self::Delete | Self::Clear)
    }
}


/// Field types of the change relay protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Key = 0x01,
    Value = 0x02,
    Origin = 0x03,
    Namespace = 0x04,
    ErrorCode = 0x08,
    ErrorText = 0x09,
}

impl FieldType {
    /// Convert a u8 to a FieldType
    pub fn from_u8(value: u8) -> Result<Self, StoreError> {
        match value {
            0x01 => Ok(Self::Key),
            0x02 => Ok(Self::Value),
            0x03 => Ok(Self::Origin),
            0x04 => Ok(Self::Namespace),
            0x08 => Ok(Self::ErrorCode),
            0x09 => Ok(Self::ErrorText),
            _ => Err(StoreError::new(
                ErrorCode::MalformedTlv,
                format!("Unknown field type: 0x{:02X}", value),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = EventType::from_u8(0x42).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEventType);
    }

    #[test]
    fn change_types() {
        assert!(EventType::from_u8(0x01).unwrap().is_change());
        assert!(EventType::from_u8(0x05).unwrap().is_change());
        assert!(!EventType::from_u8(0x22).unwrap().is_change());
    }

    #[test]
    fn unknown_field_type_is_malformed() {
        assert_eq!(FieldType::from_u8(0x77).unwrap_err().code(), ErrorCode::MalformedTlv);
        assert_eq!(FieldType::from_u8(0x04).unwrap(), FieldType::Namespace);
    }
}
