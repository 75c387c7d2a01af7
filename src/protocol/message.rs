//! Message types and their fixed binary layouts.
//!
//! Pure data transformation; reading and writing happen in `stream`.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Length of the type code that opens every message.
pub const TYPE_LEN: usize = 2;

/// Length of the `u32` that follows the type code in Init and payload frames.
pub const FIELD_LEN: usize = 4;

/// Largest payload a frame may declare (16 MiB).
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Type code carried in the first two bytes of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Init = 1,
    Agree = 2,
    ReverseRequest = 3,
    ReverseResponse = 4,
}

impl MessageType {
    /// Wire value of this type.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Map a wire value back to a known type.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(MessageType::Init),
            2 => Some(MessageType::Agree),
            3 => Some(MessageType::ReverseRequest),
            4 => Some(MessageType::ReverseResponse),
            _ => None,
        }
    }

    /// Size of the fixed header for this type, payload excluded.
    pub const fn header_len(self) -> usize {
        match self {
            MessageType::Agree => TYPE_LEN,
            _ => TYPE_LEN + FIELD_LEN,
        }
    }

    fn name(self) -> &'static str {
        match self {
            MessageType::Init => "Init",
            MessageType::Agree => "Agree",
            MessageType::ReverseRequest => "ReverseRequest",
            MessageType::ReverseResponse => "ReverseResponse",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type {})", self.name(), self.code())
    }
}

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client opens the session and declares how many blocks follow.
    Init { num_blocks: u32 },
    /// Server accepts the session.
    Agree,
    /// One block to be reversed.
    ReverseRequest { payload: Bytes },
    /// The reversal of the preceding request's payload.
    ReverseResponse { payload: Bytes },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Init { .. } => MessageType::Init,
            Message::Agree => MessageType::Agree,
            Message::ReverseRequest { .. } => MessageType::ReverseRequest,
            Message::ReverseResponse { .. } => MessageType::ReverseResponse,
        }
    }

    /// Payload bytes, empty for messages that carry none.
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::ReverseRequest { payload } | Message::ReverseResponse { payload } => &payload[..],
            _ => &[],
        }
    }

    /// Take the payload out, empty for messages that carry none.
    pub fn into_payload(self) -> Bytes {
        match self {
            Message::ReverseRequest { payload } | Message::ReverseResponse { payload } => payload,
            _ => Bytes::new(),
        }
    }

    /// Total bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        self.message_type().header_len() + self.payload().len()
    }

    /// Append the wire form of this message to `buf`.
    ///
    /// Fails without touching `buf` if the payload exceeds [`MAX_PAYLOAD_LEN`].
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = self.payload();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        buf.reserve(self.encoded_len());
        buf.put_u16(self.message_type().code());
        match self {
            Message::Init { num_blocks } => buf.put_u32(*num_blocks),
            Message::Agree => {}
            Message::ReverseRequest { payload } | Message::ReverseResponse { payload } => {
                buf.put_u32(payload.len() as u32);
                buf.extend_from_slice(payload);
            }
        }
        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Build the message announced by `header` from its payload bytes.
    pub fn from_parts(header: Header, payload: Bytes) -> Self {
        match header {
            Header::Init { num_blocks } => Message::Init { num_blocks },
            Header::Agree => Message::Agree,
            Header::ReverseRequest { .. } => Message::ReverseRequest { payload },
            Header::ReverseResponse { .. } => Message::ReverseResponse { payload },
        }
    }
}

/// A decoded fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Init { num_blocks: u32 },
    Agree,
    ReverseRequest { length: u32 },
    ReverseResponse { length: u32 },
}

impl Header {
    /// Decode a header, requiring it to be of type `expected`.
    ///
    /// `buf` must hold exactly `expected.header_len()` bytes. A type code
    /// other than `expected` is a protocol violation; a declared payload
    /// above [`MAX_PAYLOAD_LEN`] is rejected before anything is allocated.
    pub fn decode(expected: MessageType, mut buf: &[u8]) -> Result<Self, ProtocolError> {
        debug_assert_eq!(buf.len(), expected.header_len());

        let code = buf.get_u16();
        if code != expected.code() {
            return Err(ProtocolError::UnexpectedMessage {
                expected,
                actual: Some(code),
            });
        }

        let header = match expected {
            MessageType::Init => Header::Init {
                num_blocks: buf.get_u32(),
            },
            MessageType::Agree => Header::Agree,
            MessageType::ReverseRequest => Header::ReverseRequest {
                length: buf.get_u32(),
            },
            MessageType::ReverseResponse => Header::ReverseResponse {
                length: buf.get_u32(),
            },
        };

        let len = header.payload_len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        Ok(header)
    }

    /// The u32 that follows the type code: the block count of an Init, the
    /// payload length of a request or response. Agree has none.
    pub fn field(&self) -> u32 {
        match self {
            Header::Init { num_blocks } => *num_blocks,
            Header::Agree => 0,
            Header::ReverseRequest { length } | Header::ReverseResponse { length } => *length,
        }
    }

    /// Number of payload bytes that follow this header.
    pub fn payload_len(&self) -> usize {
        match self {
            Header::ReverseRequest { length } | Header::ReverseResponse { length } => {
                *length as usize
            }
            _ => 0,
        }
    }
}
