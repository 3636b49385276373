//! Per-Client Session
//!
//! A session alternates between two steps until the client goes away:
//!
//! 1. read whatever the socket has into the input buffer;
//! 2. decode every complete frame at the front of the buffer, execute each
//!    one in order and encode its reply into the output buffer, then write
//!    the output buffer in one go.
//!
//! A read may end in the middle of a frame; the tail stays buffered until
//! the next read completes it. Several frames in one read are answered
//! with a single write.
//!
//! A clean end of stream between frames ends the session with `Ok(())`.
//! Ending inside a frame is [`ConnectionError::UnexpectedEof`] and nothing
//! from that frame runs. A frame that breaks the grammar is answered with
//! `-ERR Protocol error: <detail>` and the connection is closed; replies to
//! frames decoded before it are still delivered. A frame that grows past
//! the 16 MB input cap before completing is treated the same way.

use crate::commands::CommandHandler;
use crate::protocol::{parse_command, ParseError, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

/// Largest amount of undecoded input a session will hold (16 MB)
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Input buffer grows in steps of this size
const READ_CHUNK: usize = 4096;

/// Counters shared by every session.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    commands: AtomicU64,
    framing_errors: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// A plain copy of [`ConnectionStats`] at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Sessions started
    pub accepted: u64,
    /// Sessions still running
    pub active: u64,
    /// Commands executed (including ones answered with an error reply)
    pub commands: u64,
    /// Sessions closed because input could not be framed (malformed or oversized)
    pub framing_errors: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// One client's session.
///
/// Generic over the transport so the same logic runs over a `TcpStream`
/// in production and an in-memory stream in tests.
pub struct ConnectionHandler<S> {
    stream: S,
    peer: SocketAddr,
    /// Bytes read but not yet decoded
    input: BytesMut,
    /// Encoded replies not yet written
    output: BytesMut,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        ConnectionStats::add(&stats.accepted, 1);
        ConnectionStats::add(&stats.active, 1);

        Self {
            stream,
            peer,
            input: BytesMut::with_capacity(READ_CHUNK),
            output: BytesMut::new(),
            commands,
            stats,
        }
    }

    /// Serves the client until it disconnects or the session fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.peer, "Session started");

        let result = self.serve().await;

        match &result {
            Ok(()) => debug!(client = %self.peer, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Session ended"),
        }

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Replies for everything decoded so far go out before any error closes us
            let outcome = self.process_input();
            self.flush_output().await?;
            outcome?;

            if !self.fill_input().await? {
                return Ok(());
            }
        }
    }

    /// Executes every complete frame in the input buffer, queueing replies.
    ///
    /// On a framing error the protocol error reply is queued last and the
    /// error is returned so the caller closes the session after writing.
    fn process_input(&mut self) -> Result<(), ConnectionError> {
        loop {
            let (tokens, consumed) = match parse_command(&self.input) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => {
                    // Nothing from the bad frame runs; queue the error and close
                    let e = ConnectionError::Parse(e);
                    self.reject(&e);
                    return Err(e);
                }
            };
            let _ = self.input.split_to(consumed);

            // Execute and queue the reply; written once the buffer is drained
            let reply = self.commands.execute(&tokens);
            ConnectionStats::add(&self.stats.commands, 1);
            trace!(client = %self.peer, consumed = consumed, reply = %reply, "Executed frame");
            reply.encode(&mut self.output);
        }
    }

    /// Queues `-ERR Protocol error: ...` for input that cannot be framed.
    fn reject(&mut self, e: &ConnectionError) {
        warn!(client = %self.peer, error = %e, "Unframeable input, closing");
        ConnectionStats::add(&self.stats.framing_errors, 1);
        self.input.clear();

        let detail = match e {
            ConnectionError::Parse(parse) => parse.to_string(),
            other => other.to_string(),
        };
        RespValue::error(format!("ERR Protocol error: {}", detail)).encode(&mut self.output);
    }

    /// Writes and clears the output buffer.
    async fn flush_output(&mut self) -> Result<(), ConnectionError> {
        if self.output.is_empty() {
            return Ok(());
        }

        self.stream.write_all(&self.output).await?;
        self.stream.flush().await?;
        ConnectionStats::add(&self.stats.bytes_written, self.output.len());
        trace!(client = %self.peer, bytes = self.output.len(), "Wrote replies");
        self.output.clear();
        Ok(())
    }

    /// Reads more input. Returns `false` on a clean end of stream.
    ///
    /// A frame that outgrows the input cap gets a protocol error reply
    /// before the session ends, like any other unframeable input.
    async fn fill_input(&mut self) -> Result<bool, ConnectionError> {
        if self.input.len() >= MAX_BUFFER_SIZE {
            let e = ConnectionError::BufferFull(MAX_BUFFER_SIZE);
            self.reject(&e);
            self.flush_output().await?;
            return Err(e);
        }
        self.input.reserve(READ_CHUNK);

        let n = self.stream.read_buf(&mut self.input).await?;

        // Zero bytes: the client closed its side
        if n == 0 {
            return if self.input.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        ConnectionStats::add(&self.stats.bytes_read, n);
        trace!(client = %self.peer, bytes = n, buffered = self.input.len(), "Read");
        Ok(true)
    }
}

/// Reasons a session ends other than a clean disconnect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame; the client has been sent a protocol error reply
    #[error("Protocol error: {0}")]
    Parse(#[from] ParseError),

    /// The client closed the stream partway through a frame
    #[error("Stream ended inside a frame")]
    UnexpectedEof,

    /// A frame outgrew the session's input cap (in bytes)
    #[error("frame exceeds the {0} byte input limit")]
    BufferFull(usize),
}

/// Runs a session for an accepted client to completion.
///
/// Failures end only this session; they are logged, not returned.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(client = %peer, "Client connected");
    if let Err(e) = ConnectionHandler::new(stream, peer, commands, stats).run().await {
        debug!(client = %peer, error = %e, "Session closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn session<S>(stream: S) -> (ConnectionHandler<S>, Arc<StorageEngine>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            stream,
            peer(),
            CommandHandler::new(Arc::clone(&storage)),
            Arc::clone(&stats),
        );
        (handler, storage, stats)
    }

    #[tokio::test]
    async fn test_session_ping() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();
        let (handler, _, stats) = session(mock);

        handler.run().await.unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.commands, 1);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.active, 0);
        assert_eq!(snap.bytes_read, 14);
        assert_eq!(snap.bytes_written, 7);
    }

    #[tokio::test]
    async fn test_session_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$2\r")
            .read(b"\nhi\r\n")
            .write(b"+hi\r\n")
            .build();
        let (handler, _, _) = session(mock);

        handler.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_pipelined_frames_single_write() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
            .write(b"+OK\r\n+v\r\n$-1\r\n")
            .build();
        let (handler, _, stats) = session(mock);

        handler.run().await.unwrap();
        assert_eq!(stats.snapshot().commands, 3);
    }

    #[tokio::test]
    async fn test_session_recovers_from_command_errors() {
        let mock = Builder::new()
            .read(b"*1\r\n$3\r\nFOO\r\n")
            .write(b"-ERR unknown command\r\n")
            .read(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$3\r\n100\r\n")
            .write(b"-ERR syntax error\r\n")
            .read(b"*1\r\n$4\r\nping\r\n")
            .write(b"+PONG\r\n")
            .build();
        let (handler, storage, _) = session(mock);

        handler.run().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_session_framing_error_closes() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nvXX*1\r\n$4\r\nPING\r\n")
            .write(b"-ERR Protocol error: missing CRLF after payload\r\n")
            .build();
        let (handler, storage, stats) = session(mock);

        let result = handler.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Parse(ParseError::MissingCrlf("payload")))
        ));
        assert!(storage.is_empty());
        let snap = stats.snapshot();
        assert_eq!(snap.commands, 0);
        assert_eq!(snap.framing_errors, 1);
        assert_eq!(snap.active, 0);
    }

    #[tokio::test]
    async fn test_session_replies_before_framing_error_are_sent() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*1\r\n#4\r\nPING\r\n")
            .write(b"+PONG\r\n-ERR Protocol error: expected '$', found '#'\r\n")
            .build();
        let (handler, _, stats) = session(mock);

        assert!(handler.run().await.is_err());
        assert_eq!(stats.snapshot().commands, 1);
    }

    #[tokio::test]
    async fn test_session_oversized_frame_gets_error_reply() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handler, storage, stats) = session(server);
        let served = tokio::spawn(handler.run());

        // 20 MB value: legal for the parser, larger than one session will buffer
        let value_len = 20 * 1024 * 1024;
        let mut frame =
            format!("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n${}\r\n", value_len).into_bytes();
        frame.resize(frame.len() + value_len, b'x');
        frame.extend_from_slice(b"\r\n");

        let (mut rx, mut tx) = tokio::io::split(client);
        let writer = tokio::spawn(async move {
            // The server hangs up partway through
            let _ = tx.write_all(&frame).await;
        });

        let mut reply = Vec::new();
        rx.read_to_end(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            b"-ERR Protocol error: frame exceeds the 16777216 byte input limit\r\n"
        );

        let result = served.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::BufferFull(MAX_BUFFER_SIZE))));
        writer.await.unwrap();

        assert!(storage.is_empty());
        let snap = stats.snapshot();
        assert_eq!(snap.commands, 0);
        assert_eq!(snap.framing_errors, 1);
        assert_eq!(snap.active, 0);
    }

    #[tokio::test]
    async fn test_session_eof_mid_frame() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n$1").build();
        let (handler, storage, _) = session(mock);

        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
        assert_eq!(storage.stats().get_ops, 0);
    }

    async fn spawn_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let (server_storage, server_stats) = (Arc::clone(&storage), Arc::clone(&stats));
        tokio::spawn(async move {
            while let Ok((stream, client)) = listener.accept().await {
                let commands = CommandHandler::new(Arc::clone(&server_storage));
                tokio::spawn(handle_connection(stream, client, commands, Arc::clone(&server_stats)));
            }
        });

        (addr, storage, stats)
    }

    async fn request(client: &mut TcpStream, frame: &[u8], expected: &[u8]) {
        client.write_all(frame).await.unwrap();

        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn test_tcp_ping() {
        let (addr, _, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_tcp_set_get() {
        let (addr, _, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n",
            b"+OK\r\n",
        )
        .await;
        request(&mut client, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n", b"+Ariz\r\n").await;
    }

    #[tokio::test]
    async fn test_tcp_store_shared_across_connections() {
        let (addr, _, _) = spawn_server().await;

        let mut writer = TcpStream::connect(addr).await.unwrap();
        let mut reader = TcpStream::connect(addr).await.unwrap();

        request(
            &mut writer,
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$5\r\n60000\r\n",
            b"+OK\r\n",
        )
        .await;
        request(&mut reader, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"+v\r\n").await;
    }

    #[tokio::test]
    async fn test_tcp_concurrent_clients() {
        let (addr, storage, _) = spawn_server().await;

        let clients: Vec<_> = (0..16)
            .map(|i| {
                tokio::spawn(async move {
                    let mut client = TcpStream::connect(addr).await.unwrap();
                    let key = format!("key{:02}", i);
                    let value = format!("val{:02}", i);
                    let set =
                        RespValue::command(["SET".to_string(), key.clone(), value.clone()])
                            .serialize();
                    let get = RespValue::command(["GET".to_string(), key]).serialize();

                    request(&mut client, &set, b"+OK\r\n").await;
                    request(&mut client, &get, format!("+{}\r\n", value).as_bytes()).await;
                })
            })
            .collect();

        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(storage.len(), 16);
    }

    #[tokio::test]
    async fn test_tcp_framing_error_closes_connection() {
        let (addr, _, stats) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$x\r\n").await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"-ERR Protocol error: "));
        assert_eq!(stats.snapshot().framing_errors, 1);
    }

    #[tokio::test]
    async fn test_tcp_stats_track_sessions() {
        let (addr, _, stats) = spawn_server().await;
        assert_eq!(stats.snapshot().active, 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        request(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.commands, 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.snapshot().active, 0);
    }
}
