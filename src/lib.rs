//! reverse-tcp: reverse text over a framed TCP protocol.
//!
//! A client splits a text into randomly sized blocks and sends them to a
//! server one at a time, last block first. The server answers each block
//! with its byte-reversal, and the client joins the answers into the
//! reversal of the whole text.
//!
//! Modules:
//! - `protocol`: wire messages and exact-length stream I/O
//! - `chunker`: splitting text into blocks
//! - `client`: session orchestration, source and output files
//! - `server`: connection acceptor and per-connection session
//! - `config`: CLI arguments and TOML configuration file

pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::{ChunkError, Error, ProtocolError, Result};
