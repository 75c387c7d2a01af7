//! Block reversal wire protocol.
//!
//! A client declares how many blocks it will send, the server agrees, and
//! then each block is sent as a request and answered with its byte-reversal.
//! The exchange is strictly sequential: request N+1 is never written before
//! response N has been read in full.
//!
//! ## Protocol Format
//!
//! Binary, big-endian, no padding. Every message starts with a 2-byte type
//! code; messages that carry a payload declare its length up front.
//!
//! ```text
//! Init:            u16 type=1 | u32 num_blocks
//! Agree:           u16 type=2
//! ReverseRequest:  u16 type=3 | u32 length | length bytes
//! ReverseResponse: u16 type=4 | u32 length | length bytes
//!
//! Example (one block "abc"):
//! C -> S: 00 01 00 00 00 01
//! S -> C: 00 02
//! C -> S: 00 03 00 00 00 03 61 62 63
//! S -> C: 00 04 00 00 00 03 63 62 61
//! ```
//!
//! Payloads are ASCII text, one byte per character. The server treats them
//! as opaque bytes and reverses them without any character-set awareness.

pub mod message;
pub mod stream;

pub use message::{Header, Message, MessageType, MAX_PAYLOAD_LEN};
pub use stream::{recv_exact, recv_header, recv_message, send_all, send_message};
