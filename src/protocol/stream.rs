//! Exact-length reads and writes over a byte stream.
//!
//! TCP gives no message boundaries and may move fewer bytes per call than
//! asked for. Everything here loops until the full amount has moved, and
//! never reads past what the caller asked for.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::message::{Header, Message, MessageType};
use crate::error::ProtocolError;

/// Write all of `data`, looping over partial writes.
///
/// A write that accepts zero bytes means the peer is gone.
pub async fn send_all<S>(stream: &mut S, data: &[u8]) -> Result<(), ProtocolError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;
    while sent < data.len() {
        let n = stream
            .write(&data[sent..])
            .await
            .map_err(|e| broken_or_io(e, sent, data.len()))?;
        if n == 0 {
            return Err(ProtocolError::ConnectionBroken {
                transferred: sent,
                expected: data.len(),
            });
        }
        sent += n;
    }
    stream
        .flush()
        .await
        .map_err(|e| broken_or_io(e, sent, data.len()))?;
    Ok(())
}

/// Read exactly `n` bytes, looping over partial reads.
///
/// End of stream before `n` bytes have arrived is `ConnectionBroken`.
pub async fn recv_exact<S>(stream: &mut S, n: usize) -> Result<BytesMut, ProtocolError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(n);
    let mut filled = 0;
    while filled < n {
        let read = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|e| broken_or_io(e, filled, n))?;
        if read == 0 {
            return Err(ProtocolError::ConnectionBroken {
                transferred: filled,
                expected: n,
            });
        }
        filled += read;
    }
    Ok(buf)
}

/// Encode and write one message.
pub async fn send_message<S>(stream: &mut S, message: &Message) -> Result<usize, ProtocolError>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let bytes = message.to_bytes()?;
    trace!(message_type = %message.message_type(), len = bytes.len(), "Sending message");
    send_all(stream, &bytes).await?;
    Ok(bytes.len())
}

/// Read and validate the fixed header of a message of type `expected`.
///
/// The payload, if any, is left unread.
pub async fn recv_header<S>(stream: &mut S, expected: MessageType) -> Result<Header, ProtocolError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let header_bytes = recv_exact(stream, expected.header_len()).await?;
    Header::decode(expected, &header_bytes)
}

/// Read one message that must be of type `expected`.
///
/// Reads the fixed header for `expected`, validates its type code, then
/// reads exactly the declared payload.
pub async fn recv_message<S>(stream: &mut S, expected: MessageType) -> Result<Message, ProtocolError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let header = recv_header(stream, expected).await?;

    let payload = match header.payload_len() {
        0 => Bytes::new(),
        len => recv_exact(stream, len).await?.freeze(),
    };

    trace!(message_type = %expected, len = payload.len(), "Received message");
    Ok(Message::from_parts(header, payload))
}

/// Resets and aborts are the peer going away, same as a zero-length transfer.
fn broken_or_io(err: io::Error, transferred: usize, expected: usize) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionBroken {
            transferred,
            expected,
        },
        _ => ProtocolError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;

    /// A writer whose every write accepts nothing.
    struct ZeroWriter;

    impl AsyncWrite for ZeroWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_send_all_zero_write_is_broken() {
        match send_all(&mut ZeroWriter, b"abcdef").await {
            Err(ProtocolError::ConnectionBroken {
                transferred,
                expected,
            }) => {
                assert_eq!(transferred, 0);
                assert_eq!(expected, 6);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_all_peer_reset_is_broken() {
        for kind in [io::ErrorKind::BrokenPipe, io::ErrorKind::ConnectionReset] {
            let mut mock = tokio_test::io::Builder::new()
                .write(b"ab")
                .write_error(io::Error::from(kind))
                .build();

            assert!(matches!(
                send_all(&mut mock, b"abcdef").await,
                Err(ProtocolError::ConnectionBroken {
                    transferred: 2,
                    expected: 6
                })
            ));
        }
    }

    #[tokio::test]
    async fn test_send_all_other_write_error_is_io() {
        let mut mock = tokio_test::io::Builder::new()
            .write_error(io::Error::from(io::ErrorKind::PermissionDenied))
            .build();

        match send_all(&mut mock, b"abc").await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_all_and_recv_exact_over_small_pipe() {
        // An 8-byte pipe forces partial reads and writes on both ends.
        let (mut a, mut b) = duplex(8);
        let data: Vec<u8> = (0..100u8).collect();

        let expected = data.clone();
        let writer = tokio::spawn(async move { send_all(&mut a, &data).await });

        let received = recv_exact(&mut b, 100).await.unwrap();
        assert_eq!(&received[..], &expected[..]);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_recv_exact_does_not_over_read() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"abcdef")
            .build();

        let first = recv_exact(&mut mock, 2).await.unwrap();
        let rest = recv_exact(&mut mock, 4).await.unwrap();
        assert_eq!(&first[..], b"ab");
        assert_eq!(&rest[..], b"cdef");
    }

    #[tokio::test]
    async fn test_recv_exact_zero_len() {
        let mut mock = tokio_test::io::Builder::new().build();
        let buf = recv_exact(&mut mock, 0).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_recv_exact_peer_closed_early() {
        let mut mock = tokio_test::io::Builder::new().read(b"abc").build();

        match recv_exact(&mut mock, 6).await {
            Err(ProtocolError::ConnectionBroken {
                transferred,
                expected,
            }) => {
                assert_eq!(transferred, 3);
                assert_eq!(expected, 6);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recv_exact_across_split_reads() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 4])
            .read(&[0, 0])
            .read(&[0, 3, b'c'])
            .read(b"ba")
            .build();

        let msg = recv_message(&mut mock, MessageType::ReverseResponse)
            .await
            .unwrap();
        assert_eq!(
            msg,
            Message::ReverseResponse {
                payload: Bytes::from_static(b"cba")
            }
        );
    }

    #[tokio::test]
    async fn test_send_message() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&[0, 3, 0, 0, 0, 2, b'h', b'i'])
            .build();

        let written = send_message(
            &mut mock,
            &Message::ReverseRequest {
                payload: Bytes::from_static(b"hi"),
            },
        )
        .await
        .unwrap();
        assert_eq!(written, 8);
    }

    #[tokio::test]
    async fn test_recv_header_leaves_payload_unread() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 3, 0, 0, 0, 2])
            .read(b"xy")
            .build();

        let header = recv_header(&mut mock, MessageType::ReverseRequest)
            .await
            .unwrap();
        assert_eq!(header, Header::ReverseRequest { length: 2 });
        assert_eq!(&recv_exact(&mut mock, 2).await.unwrap()[..], b"xy");
    }

    #[tokio::test]
    async fn test_recv_message_wrong_type() {
        let mut mock = tokio_test::io::Builder::new().read(&[0, 9]).build();

        match recv_message(&mut mock, MessageType::Agree).await {
            Err(ProtocolError::UnexpectedMessage { expected, actual }) => {
                assert_eq!(expected, MessageType::Agree);
                assert_eq!(actual, Some(9));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recv_message_truncated_payload() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 3, 0, 0, 0, 5, b'a', b'b'])
            .build();

        assert!(matches!(
            recv_message(&mut mock, MessageType::ReverseRequest).await,
            Err(ProtocolError::ConnectionBroken {
                transferred: 2,
                expected: 5
            })
        ));
    }
}
