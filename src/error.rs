//! Error types for the reversal protocol and the programs built on it.
//!
//! `ProtocolError` covers everything that can go wrong on the wire and is
//! terminal to the session that hit it. `ChunkError` is a caller error
//! raised before any connection exists. `Error` is what the binaries see.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::MessageType;

/// Errors raised while speaking the protocol over one connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed or reset the stream in the middle of a transfer.
    #[error("connection broken: transferred {transferred} of {expected} bytes")]
    ConnectionBroken {
        /// Bytes moved before the stream broke.
        transferred: usize,
        /// Bytes the operation needed to move.
        expected: usize,
    },

    /// The initial connect attempt failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectionFailed {
        /// Address that was dialed.
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A message arrived whose type code does not fit the session state.
    #[error("unexpected message: expected {expected}, got {}", describe_code(.actual))]
    UnexpectedMessage {
        /// The message the current state requires.
        expected: MessageType,
        /// Type code actually received, `None` if the peer closed first.
        actual: Option<u16>,
    },

    /// A frame declared a payload longer than the protocol allows.
    #[error("payload too large: {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The block count does not fit the Init message's `u32` field.
    #[error("too many blocks for one session: {count}")]
    TooManyBlocks { count: usize },

    /// A reversed payload did not decode as ASCII text.
    #[error("payload is not ASCII text")]
    NonAsciiPayload,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_code(code: &Option<u16>) -> String {
    match code {
        Some(code) => format!("type {code}"),
        None => "end of stream".to_string(),
    }
}

/// Errors raised when splitting text into blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("invalid block length bounds: min {min}, max {max}")]
    InvalidBounds { min: usize, max: usize },

    /// Payloads are one byte per character; anything else cannot be framed.
    #[error("text contains a non-ASCII character at byte {position}")]
    NonAscii { position: usize },
}

/// Top-level error for the client and server programs.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to read source file '{}': {source}", .path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output file '{}': {source}", .path.display())]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
