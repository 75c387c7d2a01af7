//! Client side of the reversal protocol.
//!
//! Splits the source text into blocks, sends them last block first, and
//! joins the reversed payloads in the order they come back. Because
//! `reverse(a ++ b) == reverse(b) ++ reverse(a)`, that order yields the
//! reversal of the whole text.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::chunker::{self, Block, LengthPicker};
use crate::config::ClientConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{recv_message, send_message, Message, MessageType};

/// Suffix appended to the source file stem to name the output file.
const OUTPUT_SUFFIX: &str = "_reversed.txt";

/// Run one full client session with randomly sized blocks.
///
/// Returns the path the reversed text was written to.
pub async fn run(config: &ClientConfig) -> Result<PathBuf> {
    run_with(config, &mut chunker::random_lengths()).await
}

/// Run one full client session, drawing block lengths from `picker`.
///
/// Nothing is written unless every block came back.
pub async fn run_with<P>(config: &ClientConfig, picker: &mut P) -> Result<PathBuf>
where
    P: LengthPicker + ?Sized,
{
    let text = tokio::fs::read_to_string(&config.source)
        .await
        .map_err(|source| Error::ReadSource {
            path: config.source.clone(),
            source,
        })?;

    let blocks = chunker::split(&text, config.min_len, config.max_len, picker)?;
    debug!(
        blocks = blocks.len(),
        bytes = text.len(),
        min_len = config.min_len,
        max_len = config.max_len,
        "Split source text"
    );

    let addr = config.server_addr();
    let mut stream = connect(&addr).await?;
    info!(server = %addr, blocks = blocks.len(), "Connected");

    let reversed = reverse_blocks(&mut stream, &blocks).await?;

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| output_path(&config.source));
    tokio::fs::write(&output, reversed.as_bytes())
        .await
        .map_err(|source| Error::WriteOutput {
            path: output.clone(),
            source,
        })?;

    info!(output = %output.display(), "Final reversed file saved");
    Ok(output)
}

/// Open the connection to the server.
pub async fn connect(addr: &str) -> Result<TcpStream, ProtocolError> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| ProtocolError::ConnectionFailed {
            addr: addr.to_string(),
            source,
        })
}

/// Drive the handshake and one request/response cycle per block.
///
/// Blocks go out from the highest index down to zero; responses are joined
/// in receipt order. Any wrong type code or short read aborts the session.
pub async fn reverse_blocks<S>(stream: &mut S, blocks: &[Block<'_>]) -> Result<String, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let num_blocks = u32::try_from(blocks.len())
        .map_err(|_| ProtocolError::TooManyBlocks {
            count: blocks.len(),
        })?;

    send_message(stream, &Message::Init { num_blocks }).await?;

    match recv_message(stream, MessageType::Agree).await {
        Ok(_) => {}
        Err(ProtocolError::ConnectionBroken { .. }) => {
            return Err(ProtocolError::UnexpectedMessage {
                expected: MessageType::Agree,
                actual: None,
            });
        }
        Err(e) => return Err(e),
    }

    let mut reassembly: Vec<String> = Vec::with_capacity(blocks.len());

    for block in blocks.iter().rev() {
        let request = Message::ReverseRequest {
            payload: Bytes::copy_from_slice(block.text.as_bytes()),
        };
        send_message(stream, &request).await?;

        let response = recv_message(stream, MessageType::ReverseResponse).await?;
        let reversed = decode_ascii(response.payload())?;

        debug!(block = reassembly.len() + 1, reversed = %reversed, "Received reversed block");
        reassembly.push(reversed);
    }

    Ok(reassembly.concat())
}

fn decode_ascii(payload: &[u8]) -> Result<String, ProtocolError> {
    if !payload.is_ascii() {
        return Err(ProtocolError::NonAsciiPayload);
    }
    String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::NonAsciiPayload)
}

/// Derive the output path: the source path minus its extension, plus
/// `_reversed.txt`, in the same directory.
pub fn output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}{OUTPUT_SUFFIX}"))
}
