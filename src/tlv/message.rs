use std::collections::HashMap;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use crate::error::{ErrorCode, StoreError};
use crate::tlv::types::{EventType, FieldType};

/// Frame header: 4 bytes total length + 1 byte event type
pub const HEADER_SIZE: usize = 5;

/// Largest frame accepted on the wire
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Debug, Clone, PartialEq)]
pub struct TLVMessage {
    pub event_type: EventType,
    fields: HashMap<FieldType, Bytes>,
}

impl TLVMessage {
    /// Create an empty message of the given type
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: HashMap::new(),
        }
    }

    /// Parse a complete frame, header included
    pub fn parse(raw: Bytes) -> Result<Self, StoreError> {
        if raw.len() < HEADER_SIZE {
            return Err(StoreError::new(
                ErrorCode::MalformedTlv,
                "Message too short",
            ));
        }

        debug!("Parsing message: first bytes = {:?}", &raw[..std::cmp::min(10, raw.len())]);

        let mut cursor = raw.clone();
        let declared = cursor.get_u32() as usize;
        if declared != raw.len() {
            return Err(StoreError::new(
                ErrorCode::IncompleteMessage,
                format!("Declared length {} does not match frame length {}", declared, raw.len()),
            ));
        }

        let event_type = EventType::from_u8(cursor.get_u8())?;

        let mut fields = HashMap::new();
        let mut offset = HEADER_SIZE;

        while cursor.has_remaining() {
            if cursor.remaining() < 5 {
                return Err(StoreError::new(
                    ErrorCode::MalformedTlv,
                    "Truncated TLV field header",
                ));
            }

            let field_type = FieldType::from_u8(cursor.get_u8())?;
            let field_len = cursor.get_u32() as usize;
            offset += 5;

            if cursor.remaining() < field_len {
                return Err(StoreError::new(
                    ErrorCode::MalformedTlv,
                    "Incomplete TLV field",
                ));
            }

            // Slice the original buffer without copying
            fields.insert(field_type, raw.slice(offset..offset + field_len));
            cursor.advance(field_len);
            offset += field_len;
        }

        Ok(Self { event_type, fields })
    }

    /// Size of the frame `encode` would produce, header included
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.fields.values().map(|value| 5 + value.len()).sum::<usize>()
    }

    /// Whether the frame fits under `MAX_MESSAGE_SIZE`
    pub fn fits_on_wire(&self) -> bool {
        self.encoded_len() <= MAX_MESSAGE_SIZE
    }

    /// Serialize the message into a length-prefixed frame
    pub fn encode(&self) -> Result<Bytes, StoreError> {
        let total_size = self.encoded_len();

        if total_size > MAX_MESSAGE_SIZE {
            debug!("Message too large: {} bytes (maximum: {} bytes)", total_size, MAX_MESSAGE_SIZE);
            return Err(StoreError::new(
                ErrorCode::MessageTooLarge,
                format!("Frame of {} bytes exceeds {} bytes", total_size, MAX_MESSAGE_SIZE),
            ));
        }

        let mut msg = BytesMut::with_capacity(total_size);
        msg.put_u32(total_size as u32);
        msg.put_u8(self.event_type as u8);

        for (field_type, value) in &self.fields {
            msg.put_u8(*field_type as u8);
            msg.put_u32(value.len() as u32);
            msg.extend_from_slice(value);
        }

        debug!("Encoded {:?} frame of {} bytes", self.event_type, msg.len());
        Ok(msg.freeze())
    }

    /// Read only the event type of a raw frame
    pub fn extract_event(raw: &[u8]) -> Result<EventType, StoreError> {
        if raw.len() < HEADER_SIZE {
            return Err(StoreError::new(ErrorCode::MalformedTlv, "Message too short"));
        }
        EventType::from_u8(raw[4])
    }

    /// Get a field
    pub fn get_field(&self, field: FieldType) -> Option<&Bytes> {
        self.fields.get(&field)
    }

    /// Get a field decoded as UTF-8
    pub fn get_str(&self, field: FieldType) -> Result<Option<&str>, StoreError> {
        match self.fields.get(&field) {
            Some(value) => std::str::from_utf8(value)
                .map(Some)
                .map_err(|e| StoreError::new(ErrorCode::MalformedTlv, format!("Field {:?} is not UTF-8: {}", field, e))),
            None => Ok(None),
        }
    }

    /// Set or overwrite a field
    pub fn insert_field<V: Into<Bytes>>(&mut self, field: FieldType, value: V) {
        self.fields.insert(field, value.into());
    }

    /// Builder-style variant of `insert_field`
    pub fn with_field<V: Into<Bytes>>(mut self, field: FieldType, value: V) -> Self {
        self.insert_field(field, value);
        self
    }
}
