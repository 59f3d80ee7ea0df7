//! Native binary protocol transport
//!
//! Accepts TCP connections and serves the frames described in
//! [`throttr::protocol`]. Each connection runs on its own task:
//!
//! 1. Read whatever bytes are available into a connection buffer
//! 2. Decode, execute and encode every complete frame in the buffer
//! 3. Write and flush the batch of responses, in request order
//! 4. Repeat
//!
//! Nothing more is read while a write is pending, so a slow reader on the
//! client side throttles its own connection. The read buffer never holds
//! more than one partial frame plus one read chunk.
//!
//! The idle timeout bounds two things: the gap between frames, and the time
//! from the first byte of a frame to its last. A client trickling a frame
//! one byte at a time is cut off once the frame has been open for the full
//! timeout, however recently its last byte arrived.
//!
//! A frame that fails to decode gets a `MalformedFrame` response and the
//! connection is closed, since frame boundaries can no longer be trusted.
//! Every other failure is reported in its response and the connection
//! continues.

use super::Transport;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use throttr::protocol::MAX_REQUEST_LEN;
use throttr::{QuotaEngine, QuotaError, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const READ_CHUNK_SIZE: usize = 4096;
const WRITE_BUFFER_SIZE: usize = 1024;

/// Native binary protocol transport implementation
pub struct NativeTransport {
    listener: TcpListener,
    idle_timeout: Option<Duration>,
    metrics: Arc<Metrics>,
}

impl NativeTransport {
    /// Bind the listener
    ///
    /// Binding happens before [`Transport::start`] so callers can learn the
    /// local address when binding to port 0.
    pub async fn bind(
        addr: &str,
        idle_timeout: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind native transport to {addr}"))?;

        Ok(NativeTransport {
            listener,
            idle_timeout,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn start(self, engine: Arc<QuotaEngine>, shutdown: CancellationToken) -> Result<()> {
        let NativeTransport {
            listener,
            idle_timeout,
            metrics,
        } = self;

        info!(addr = %listener.local_addr()?, "Native protocol transport listening");

        let handler = ConnectionHandler::new(engine, Arc::clone(&metrics), idle_timeout);
        let tracker = TaskTracker::new();

        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            if let Err(e) = socket.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let handler = handler.clone();
            let metrics = Arc::clone(&metrics);
            let shutdown = shutdown.clone();

            tracker.spawn(async move {
                metrics.connection_opened();
                debug!(%peer, "Connection opened");

                match handler.run(socket, &shutdown).await {
                    Ok(CloseReason::Eof) => debug!(%peer, "Connection closed by peer"),
                    Ok(CloseReason::Idle { mid_frame: true }) => {
                        warn!(%peer, "Connection stalled mid-frame, closing")
                    }
                    Ok(CloseReason::Idle { mid_frame: false }) => {
                        debug!(%peer, "Idle connection closed")
                    }
                    Ok(CloseReason::Malformed(error)) => {
                        warn!(%peer, %error, "Malformed frame, closing connection")
                    }
                    Ok(CloseReason::Shutdown) => debug!(%peer, "Connection closed for shutdown"),
                    Err(e) => debug!(%peer, error = %e, "Connection error"),
                }

                metrics.connection_closed();
            });
        }

        // Refuse new connections while the open ones drain
        drop(listener);
        tracker.close();
        info!(
            connections = tracker.len(),
            "Native transport draining connections"
        );
        tracker.wait().await;
        info!("Native transport stopped");

        Ok(())
    }
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side
    Eof,
    /// No bytes arrived within the idle timeout
    Idle {
        /// Part of a frame had already arrived
        mid_frame: bool,
    },
    /// A frame failed to decode; its response was sent
    Malformed(QuotaError),
    /// The server is shutting down
    Shutdown,
}

/// Serves the protocol over one byte stream
///
/// Generic over the stream so it runs the same against a `TcpStream` and
/// an in-memory mock.
#[derive(Clone)]
pub struct ConnectionHandler {
    engine: Arc<QuotaEngine>,
    metrics: Arc<Metrics>,
    idle_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(
        engine: Arc<QuotaEngine>,
        metrics: Arc<Metrics>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        ConnectionHandler {
            engine,
            metrics,
            idle_timeout,
        }
    }

    /// Serve `stream` until it closes, idles out, sends a malformed frame
    /// or `shutdown` is cancelled
    ///
    /// On shutdown, frames already buffered are answered before returning.
    pub async fn run<S>(&self, mut stream: S, shutdown: &CancellationToken) -> io::Result<CloseReason>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut read_buffer = BytesMut::with_capacity(MAX_REQUEST_LEN + READ_CHUNK_SIZE);
        let mut write_buffer = BytesMut::with_capacity(WRITE_BUFFER_SIZE);
        // Deadline for the partial frame at the front of `read_buffer`
        let mut frame_deadline: Option<Instant> = None;

        loop {
            let processed = self.process_frames(&mut read_buffer, &mut write_buffer);

            if !write_buffer.is_empty() {
                stream.write_all(&write_buffer).await?;
                stream.flush().await?;
                write_buffer.clear();
            }

            let completed = match processed {
                Ok(completed) => completed,
                Err(error) => return Ok(CloseReason::Malformed(error)),
            };

            frame_deadline = match self.idle_timeout {
                Some(limit) if !read_buffer.is_empty() => match frame_deadline {
                    Some(deadline) if completed == 0 => Some(deadline),
                    _ => Some(Instant::now() + limit),
                },
                _ => None,
            };
            let deadline =
                frame_deadline.or_else(|| self.idle_timeout.map(|limit| Instant::now() + limit));

            read_buffer.reserve(READ_CHUNK_SIZE);
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(CloseReason::Shutdown),
                read = read_some(&mut stream, &mut read_buffer, deadline) => read?,
            };

            match read {
                Some(0) => return Ok(CloseReason::Eof),
                Some(_) => {}
                None => {
                    self.metrics.record_idle_timeout();
                    return Ok(CloseReason::Idle {
                        mid_frame: !read_buffer.is_empty(),
                    });
                }
            }
        }
    }

    /// Execute every complete frame in `read_buffer`, appending responses
    ///
    /// Returns how many frames were answered. Stops at the first malformed
    /// frame and returns its error after appending the `MalformedFrame`
    /// response.
    fn process_frames(
        &self,
        read_buffer: &mut BytesMut,
        write_buffer: &mut BytesMut,
    ) -> Result<usize, QuotaError> {
        let mut completed = 0;
        loop {
            match Request::parse(read_buffer) {
                Ok(Some(request)) => {
                    let verb = request.verb();
                    let started = Instant::now();
                    let response = self.engine.execute(request, SystemTime::now());
                    self.metrics.record_request(
                        verb,
                        response.status(),
                        started.elapsed().as_micros() as u64,
                    );
                    response.encode(write_buffer);
                    completed += 1;
                }
                Ok(None) => return Ok(completed),
                Err(error) => {
                    self.metrics.record_malformed();
                    Response::from(&error).encode(write_buffer);
                    return Err(error);
                }
            }
        }
    }
}

/// Read into `buf`; `Ok(None)` means `deadline` passed first
async fn read_some<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    deadline: Option<Instant>,
) -> io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, stream.read_buf(buf)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read_buf(buf).await.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use throttr::{KeyStore, Reply, Status, TtlSpec};
    use tokio_test::io::Builder;

    fn handler(idle_timeout: Option<Duration>) -> (ConnectionHandler, Arc<Metrics>) {
        let engine = Arc::new(QuotaEngine::new(KeyStore::new()));
        let metrics = Arc::new(Metrics::new());
        (
            ConnectionHandler::new(engine, Arc::clone(&metrics), idle_timeout),
            metrics,
        )
    }

    fn request(request: Request) -> Vec<u8> {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        buf.to_vec()
    }

    fn response(response: Response) -> Vec<u8> {
        let mut buf = BytesMut::new();
        response.encode(&mut buf);
        buf.to_vec()
    }

    fn insert(key: &'static str, counter: u64) -> Vec<u8> {
        request(Request::Insert {
            key: key.into(),
            counter,
            ttl: TtlSpec::none(),
        })
    }

    fn consume(key: &'static str, amount: u64) -> Vec<u8> {
        request(Request::Consume {
            key: key.into(),
            amount,
        })
    }

    #[tokio::test]
    async fn test_request_response_cycle() {
        let (handler, metrics) = handler(None);
        let stream = Builder::new()
            .read(&insert("user:42", 100))
            .write(&response(Response::Success(Reply::Empty)))
            .read(&consume("user:42", 30))
            .write(&response(Response::Success(Reply::Counter(70))))
            .read(&consume("user:42", 80))
            .write(&response(Response::Failure(Status::InsufficientQuota)))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();

        assert_eq!(reason, CloseReason::Eof);
        assert_eq!(metrics.responses_for(Status::Ok), 2);
        assert_eq!(metrics.responses_for(Status::InsufficientQuota), 1);
    }

    #[tokio::test]
    async fn test_pipelined_frames_answered_in_order() {
        let (handler, _) = handler(None);

        let mut pipelined = insert("a", 10);
        pipelined.extend(consume("a", 4));
        pipelined.extend(consume("missing", 1));
        pipelined.extend(consume("a", 6));

        let mut expected = response(Response::Success(Reply::Empty));
        expected.extend(response(Response::Success(Reply::Counter(6))));
        expected.extend(response(Response::Failure(Status::NotFound)));
        expected.extend(response(Response::Success(Reply::Counter(0))));

        let stream = Builder::new().read(&pipelined).write(&expected).build();
        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(reason, CloseReason::Eof);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let (handler, _) = handler(None);
        let frame = insert("split-key", 5);

        let stream = Builder::new()
            .read(&frame[..1])
            .read(&frame[1..5])
            .read(&frame[5..])
            .write(&response(Response::Success(Reply::Empty)))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(reason, CloseReason::Eof);
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let (handler, metrics) = handler(None);

        // Frames after the bad one are never answered
        let mut bytes = insert("ok", 1);
        bytes.extend([0x7F, 0x00]);
        bytes.extend(consume("ok", 1));

        let mut expected = response(Response::Success(Reply::Empty));
        expected.push(Status::MalformedFrame.as_u8());

        let stream = Builder::new().read(&bytes).write(&expected).build();
        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            reason,
            CloseReason::Malformed(QuotaError::MalformedFrame("unknown verb"))
        );
        assert_eq!(metrics.malformed_frames.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_request_errors_keep_connection_open() {
        let engine = Arc::new(QuotaEngine::new(
            KeyStore::builder().max_key_length(16).build(),
        ));
        let handler = ConnectionHandler::new(engine, Arc::new(Metrics::new()), None);

        let stream = Builder::new()
            .read(&request(Request::Insert {
                key: "k".repeat(17).into(),
                counter: 1,
                ttl: TtlSpec::none(),
            }))
            .write(&[Status::KeyTooLong.as_u8()])
            .read(&insert("k", 1))
            .write(&[Status::Ok.as_u8()])
            .read(&insert("k", 1))
            .write(&[Status::AlreadyExists.as_u8()])
            .read(&request(Request::Purge { key: "nope".into() }))
            .write(&[Status::NotFound.as_u8()])
            .read(&consume("k", 1))
            .write(&response(Response::Success(Reply::Counter(0))))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(reason, CloseReason::Eof);
    }

    #[tokio::test]
    async fn test_idle_timeout_between_frames() {
        let (handler, metrics) = handler(Some(Duration::from_millis(50)));
        let stream = Builder::new()
            .read(&insert("idle", 1))
            .write(&response(Response::Success(Reply::Empty)))
            .wait(Duration::from_secs(30))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();

        assert_eq!(reason, CloseReason::Idle { mid_frame: false });
        assert_eq!(metrics.idle_timeouts.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_mid_frame() {
        let (handler, _) = handler(Some(Duration::from_millis(50)));
        let frame = insert("stalled", 1);
        let stream = Builder::new()
            .read(&frame[..4])
            .wait(Duration::from_secs(30))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(reason, CloseReason::Idle { mid_frame: true });
    }

    #[tokio::test]
    async fn test_trickled_frame_times_out_from_first_byte() {
        let (handler, metrics) = handler(Some(Duration::from_millis(100)));
        let frame = insert("trickle", 1);
        let gap = Duration::from_millis(30);
        let stream = Builder::new()
            .read(&frame[..1])
            .wait(gap)
            .read(&frame[1..2])
            .wait(gap)
            .read(&frame[2..3])
            .wait(gap)
            .read(&frame[3..4])
            .wait(Duration::from_secs(30))
            .build();

        let started = std::time::Instant::now();
        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        let elapsed = started.elapsed();

        // Each byte lands well inside the timeout, but the frame as a whole does not
        assert_eq!(reason, CloseReason::Idle { mid_frame: true });
        assert!(elapsed < Duration::from_millis(160), "closed after {elapsed:?}");
        assert_eq!(metrics.idle_timeouts.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_frame_deadline_resets_after_completed_frame() {
        let (handler, _) = handler(Some(Duration::from_millis(100)));
        let first = insert("first", 1);
        let second = consume("first", 1);
        let gap = Duration::from_millis(60);
        let stream = Builder::new()
            .read(&first[..2])
            .wait(gap)
            .read(&first[2..])
            .write(&response(Response::Success(Reply::Empty)))
            .wait(gap)
            .read(&second[..2])
            .wait(gap)
            .read(&second[2..])
            .write(&response(Response::Success(Reply::Counter(0))))
            .build();

        let reason = handler.run(stream, &CancellationToken::new()).await.unwrap();
        assert_eq!(reason, CloseReason::Eof);
    }

    #[tokio::test]
    async fn test_shutdown_closes_waiting_connection() {
        let (handler, _) = handler(None);
        let shutdown = CancellationToken::new();

        let stream = Builder::new()
            .read(&insert("drain", 3))
            .write(&response(Response::Success(Reply::Empty)))
            .wait(Duration::from_secs(30))
            .build();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { handler.run(stream, &shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let reason = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
    }
}
