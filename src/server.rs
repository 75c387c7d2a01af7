//! TCP server for the reversal protocol.
//!
//! Accepts connections and runs one independent session per connection.
//! A session that fails only closes its own connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::protocol::{recv_header, recv_message, send_message, Message, MessageType};

/// Server instance
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let addr = tokio::net::lookup_host(config.listen_addr())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", config.listen_addr()),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr, config.backlog)?)?;
        let permits = config.max_connections.clamp(1, Semaphore::MAX_PERMITS);
        let connection_limit = Arc::new(Semaphore::new(permits));

        Ok(Server {
            config,
            listener,
            connection_limit,
        })
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process is terminated.
    pub async fn run(self) -> io::Result<()> {
        info!(
            address = %self.local_addr()?,
            backlog = self.config.backlog,
            max_connections = self.config.max_connections,
            "Server listening"
        );

        loop {
            // Wait for a connection slot
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");

                    tokio::spawn(async move {
                        handle_connection(stream, peer).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Run one session to completion and log how it ended.
async fn handle_connection(stream: TcpStream, peer: SocketAddr) {
    let mut session = Session::new(stream);

    match session.run().await {
        Ok(stats) => {
            info!(
                peer = %peer,
                blocks = stats.blocks,
                bytes_in = stats.bytes_in,
                bytes_out = stats.bytes_out,
                "Session complete"
            );
        }
        Err(e @ ProtocolError::UnexpectedMessage { .. })
        | Err(e @ ProtocolError::PayloadTooLarge { .. }) => {
            warn!(
                peer = %peer,
                error = %e,
                state = ?session.failed_in(),
                "Protocol violation, closing connection"
            );
        }
        Err(e) => {
            debug!(peer = %peer, error = %e, "Connection error");
        }
    }
}

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client's Init.
    AwaitingInit,
    /// Init accepted, Agree not yet sent.
    Agreed { num_blocks: u32 },
    /// Waiting for the next ReverseRequest.
    AwaitingRequest { remaining: u32 },
    /// Every declared block has been answered.
    Done,
    /// Dropped after a protocol violation or broken stream.
    Closed,
}

/// Per-session counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub blocks: u32,
    pub bytes_in: usize,
    pub bytes_out: usize,
}

/// Server-side session over any byte stream.
pub struct Session<S> {
    stream: S,
    state: SessionState,
    failed_in: Option<SessionState>,
    stats: SessionStats,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Session {
            stream,
            state: SessionState::AwaitingInit,
            failed_in: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// The state whose transition failed, once the session is `Closed`.
    pub fn failed_in(&self) -> Option<SessionState> {
        self.failed_in
    }

    /// Drive the session until it is done, then close the stream.
    ///
    /// On error the session is left `Closed` and nothing more is written.
    pub async fn run(&mut self) -> Result<SessionStats, ProtocolError> {
        loop {
            match self.state {
                SessionState::Done => {
                    if let Err(e) = self.stream.shutdown().await {
                        trace!(error = %e, "Shutdown after completed session failed");
                    }
                    return Ok(self.stats);
                }
                SessionState::Closed => {
                    return Err(ProtocolError::Io(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "session already closed",
                    )));
                }
                _ => {
                    if let Err(e) = self.step().await {
                        self.failed_in = Some(self.state);
                        self.state = SessionState::Closed;
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Perform one state transition and return the new state.
    pub async fn step(&mut self) -> Result<SessionState, ProtocolError> {
        let next = match self.state {
            SessionState::AwaitingInit => {
                let header = recv_header(&mut self.stream, MessageType::Init).await?;
                self.stats.bytes_in += MessageType::Init.header_len();
                SessionState::Agreed {
                    num_blocks: header.field(),
                }
            }

            SessionState::Agreed { num_blocks } => {
                self.stats.bytes_out += send_message(&mut self.stream, &Message::Agree).await?;
                trace!(num_blocks, "Session agreed");
                if num_blocks == 0 {
                    SessionState::Done
                } else {
                    SessionState::AwaitingRequest {
                        remaining: num_blocks,
                    }
                }
            }

            SessionState::AwaitingRequest { remaining } => {
                let message = recv_message(&mut self.stream, MessageType::ReverseRequest).await?;
                self.stats.bytes_in += message.encoded_len();
                let payload = message.into_payload();

                let response = Message::ReverseResponse {
                    payload: reverse_payload(&payload),
                };
                self.stats.bytes_out += send_message(&mut self.stream, &response).await?;
                self.stats.blocks += 1;

                match remaining - 1 {
                    0 => SessionState::Done,
                    remaining => SessionState::AwaitingRequest { remaining },
                }
            }

            state @ (SessionState::Done | SessionState::Closed) => state,
        };

        self.state = next;
        Ok(next)
    }
}

/// Reverse the byte order of a payload, with no character-set awareness.
pub fn reverse_payload(payload: &[u8]) -> Bytes {
    let mut reversed = payload.to_vec();
    reversed.reverse();
    Bytes::from(reversed)
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_payload() {
        assert_eq!(&reverse_payload(b"HELLO")[..], b"OLLEH");
        assert_eq!(&reverse_payload(b"")[..], b"");
        let twice = reverse_payload(&reverse_payload(b"WORL"));
        assert_eq!(&twice[..], b"WORL");
    }

    #[tokio::test]
    async fn test_session_answers_declared_blocks() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 0, 0, 2])
            .write(&[0, 2])
            .read(&[0, 3, 0, 0, 0, 1, b'D'])
            .write(&[0, 4, 0, 0, 0, 1, b'D'])
            .read(&[0, 3, 0, 0, 0, 4, b'W', b'O', b'R', b'L'])
            .write(&[0, 4, 0, 0, 0, 4, b'L', b'R', b'O', b'W'])
            .build();

        let mut session = Session::new(mock);
        let stats = session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.failed_in(), None);
        assert_eq!(
            stats,
            SessionStats {
                blocks: 2,
                bytes_in: 6 + 7 + 10,
                bytes_out: 2 + 7 + 10,
            }
        );
    }

    #[tokio::test]
    async fn test_session_state_transitions() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 0, 0, 1])
            .write(&[0, 2])
            .read(&[0, 3, 0, 0, 0, 2, b'a', b'b'])
            .write(&[0, 4, 0, 0, 0, 2, b'b', b'a'])
            .build();

        let mut session = Session::new(mock);
        assert_eq!(session.state(), SessionState::AwaitingInit);
        assert_eq!(
            session.step().await.unwrap(),
            SessionState::Agreed { num_blocks: 1 }
        );
        assert_eq!(
            session.step().await.unwrap(),
            SessionState::AwaitingRequest { remaining: 1 }
        );
        assert_eq!(session.step().await.unwrap(), SessionState::Done);
        assert_eq!(session.step().await.unwrap(), SessionState::Done);
    }

    #[tokio::test]
    async fn test_zero_blocks_done_after_agree() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 0, 0, 0])
            .write(&[0, 2])
            .build();

        let mut session = Session::new(mock);
        let stats = session.run().await.unwrap();
        assert_eq!(stats.blocks, 0);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn test_wrong_init_type_closes_without_reply() {
        // No write is scripted: any reply would fail the mock.
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 3, 0, 0, 0, 1])
            .build();

        let mut session = Session::new(mock);
        match session.run().await {
            Err(ProtocolError::UnexpectedMessage { expected, actual }) => {
                assert_eq!(expected, MessageType::Init);
                assert_eq!(actual, Some(3));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.failed_in(), Some(SessionState::AwaitingInit));
    }

    #[tokio::test]
    async fn test_wrong_request_type_closes() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 0, 0, 3])
            .write(&[0, 2])
            .read(&[0, 3, 0, 0, 0, 1, b'x'])
            .write(&[0, 4, 0, 0, 0, 1, b'x'])
            .read(&[0, 1, 0, 0, 0, 9])
            .build();

        let mut session = Session::new(mock);
        match session.run().await {
            Err(ProtocolError::UnexpectedMessage { expected, actual }) => {
                assert_eq!(expected, MessageType::ReverseRequest);
                assert_eq!(actual, Some(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.failed_in(),
            Some(SessionState::AwaitingRequest { remaining: 2 })
        );
        assert_eq!(session.stats().blocks, 1);
    }

    #[tokio::test]
    async fn test_client_hangs_up_mid_session() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 1, 0, 0, 0, 2])
            .write(&[0, 2])
            .read(&[0, 3, 0, 0])
            .build();

        let mut session = Session::new(mock);
        assert!(matches!(
            session.run().await,
            Err(ProtocolError::ConnectionBroken {
                transferred: 4,
                expected: 6
            })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_clamps_huge_connection_limit() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: usize::MAX,
            ..ServerConfig::default()
        };
        let server = Server::bind(config).await.unwrap();
        assert_eq!(
            server.connection_limit.available_permits(),
            Semaphore::MAX_PERMITS
        );
    }
}
