//! Socket transport for the cccc daemon
//!
//! Two exchange patterns run over a fresh connection each time:
//!
//! - **one-shot**: write one request line, read one response line, close
//! - **stream**: write one request line, read the handshake line, then hand
//!   the live socket plus any bytes that arrived after the handshake to a
//!   [`LineReader`]
//!
//! Connections are never pooled or reused. Connect, writes and reads of the
//! request/handshake phase each run under the caller's timeout; once a
//! stream handshake succeeds reads wait indefinitely.

use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::lines::LineReader;
use crate::types::{Endpoint, Request, Response};

/// Longest response line accepted from a one-shot call (4 MB)
pub const MAX_LINE_SIZE: usize = 4_000_000;

/// Default request timeout (30 s)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Byte stream a daemon connection can run over
///
/// Implemented for every `AsyncRead + AsyncWrite + Unpin + Send` type, which
/// covers Unix and TCP sockets as well as `tokio::io::DuplexStream` in tests.
pub trait DaemonIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DaemonIo for T {}

/// Type-erased daemon connection
pub type DaemonSocket = Box<dyn DaemonIo>;

/// Result of opening a stream subscription
///
/// The handshake has not been checked for `ok`; that is the caller's job.
pub struct StreamConnection {
    /// Handshake response (first line)
    pub handshake: Response,
    /// Line reader over the live socket, seeded with the bytes that followed
    /// the handshake
    pub lines: LineReader<DaemonSocket>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("handshake", &self.handshake)
            .field("buffered", &self.lines.buffered_len())
            .finish()
    }
}

/// Run `fut` under `limit`, mapping both I/O failure and expiry to
/// [`ClientError::Unavailable`]
async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ClientError::unavailable(e.to_string())),
        Err(_) => Err(ClientError::unavailable(format!(
            "{} timed out after {} ms",
            what,
            limit.as_millis()
        ))),
    }
}

/// Open a connection to `endpoint`
///
/// # Errors
///
/// Returns `ClientError::Unavailable` on connect failure, timeout, or when
/// the endpoint has no usable transport.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<DaemonSocket, ClientError> {
    let started = Instant::now();

    let socket: DaemonSocket = match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = match tokio::time::timeout(
                timeout,
                TcpStream::connect((host.as_str(), *port)),
            )
            .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(ClientError::unavailable(e.to_string())),
                Err(_) => return Err(ClientError::unavailable("Connection timeout")),
            };
            // Request lines are small and latency-bound
            if let Err(e) = stream.set_nodelay(true) {
                debug!(endpoint = %endpoint, error = %e, "Failed to set TCP_NODELAY");
            }
            Box::new(stream)
        }
        #[cfg(unix)]
        Endpoint::Unix { path } => {
            match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
                Ok(Ok(stream)) => Box::new(stream),
                Ok(Err(e)) => {
                    return Err(ClientError::unavailable(format!(
                        "{} ({})",
                        e,
                        path.display()
                    )))
                }
                Err(_) => return Err(ClientError::unavailable("Connection timeout")),
            }
        }
        #[cfg(not(unix))]
        Endpoint::Unix { .. } => {
            return Err(ClientError::unavailable(
                "Unix domain sockets are not supported on this platform",
            ))
        }
        Endpoint::Unset => {
            return Err(ClientError::unavailable(format!(
                "Invalid endpoint transport: {:?}",
                endpoint.transport().as_str()
            )))
        }
    };

    debug!(
        endpoint = %endpoint,
        connect_ms = started.elapsed().as_micros() as f64 / 1000.0,
        "Connected to daemon"
    );

    Ok(socket)
}

async fn write_request<W>(socket: &mut W, request: &Request, timeout: Duration) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let line = request
        .to_line()
        .map_err(|e| ClientError::unavailable(format!("Failed to serialize request: {}", e)))?;

    trace!(op = %request.op, bytes = line.len(), "Sending request");

    with_timeout(timeout, "Request write", async {
        socket.write_all(&line).await?;
        socket.flush().await
    })
    .await
}

/// How a line read ended without producing a line
enum ReadLineFailure {
    Closed,
    TooLarge,
    Error(ClientError),
}

/// Read exactly one raw line, leaving anything after it in `lines`
async fn read_one_line<R>(
    lines: &mut LineReader<R>,
    limit: Option<usize>,
    timeout: Duration,
) -> Result<Vec<u8>, ReadLineFailure>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(line) = lines.take_line() {
            if limit.is_some_and(|max| line.len() > max) {
                return Err(ReadLineFailure::TooLarge);
            }
            return Ok(line);
        }

        if limit.is_some_and(|max| lines.buffered_len() > max) {
            return Err(ReadLineFailure::TooLarge);
        }

        let n = with_timeout(timeout, "Response read", lines.fill())
            .await
            .map_err(ReadLineFailure::Error)?;
        if n == 0 {
            return Err(ReadLineFailure::Closed);
        }
    }
}

/// One request/response exchange over an already-connected socket
///
/// The socket is consumed and dropped (closed) on every outcome.
pub async fn exchange<S>(socket: S, request: &Request, timeout: Duration) -> Result<Response, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut lines = LineReader::new(socket, Vec::new());

    write_request(lines.get_mut(), request, timeout).await?;

    let line = match read_one_line(&mut lines, Some(MAX_LINE_SIZE), timeout).await {
        Ok(line) => line,
        Err(ReadLineFailure::Closed) => {
            return Err(ClientError::unavailable("Connection closed unexpectedly"))
        }
        Err(ReadLineFailure::TooLarge) => {
            return Err(ClientError::unavailable("Response too large"))
        }
        Err(ReadLineFailure::Error(e)) => return Err(e),
    };
    drop(lines);

    let response: Response = serde_json::from_slice(&line)
        .map_err(|e| ClientError::unavailable(format!("Invalid JSON response: {}", e)))?;

    debug!(
        op = %request.op,
        ok = response.ok,
        total_ms = started.elapsed().as_micros() as f64 / 1000.0,
        "Daemon call complete"
    );

    Ok(response)
}

/// Send one request and return the parsed response
///
/// Opens a dedicated connection, closes it afterwards. The response's `ok`
/// flag is not interpreted here.
///
/// # Errors
///
/// Returns `ClientError::Unavailable` on connect/write/read failure, timeout,
/// an unterminated line longer than [`MAX_LINE_SIZE`], early close, or a
/// response that is not a JSON envelope.
pub async fn call_daemon(
    endpoint: &Endpoint,
    request: &Request,
    timeout: Duration,
) -> Result<Response, ClientError> {
    let socket = connect(endpoint, timeout).await?;
    exchange(socket, request, timeout).await
}

/// Write the subscribe request and read the handshake over `socket`
///
/// Bytes received after the handshake newline stay buffered in the returned
/// line reader. The handshake read is not size-limited.
pub async fn handshake(
    socket: DaemonSocket,
    request: &Request,
    timeout: Duration,
) -> Result<StreamConnection, ClientError> {
    let mut lines = LineReader::new(socket, Vec::new());

    write_request(lines.get_mut(), request, timeout).await?;

    let line = match read_one_line(&mut lines, None, timeout).await {
        Ok(line) => line,
        Err(ReadLineFailure::Closed) => {
            return Err(ClientError::unavailable("Connection closed during handshake"))
        }
        Err(ReadLineFailure::TooLarge) => {
            return Err(ClientError::unavailable("Handshake too large"))
        }
        Err(ReadLineFailure::Error(e)) => return Err(e),
    };

    // Dropping `lines` on this path closes the socket
    let handshake: Response = serde_json::from_slice(&line)
        .map_err(|e| ClientError::unavailable(format!("Invalid handshake JSON: {}", e)))?;

    debug!(
        op = %request.op,
        ok = handshake.ok,
        residual = lines.buffered_len(),
        "Stream handshake received"
    );

    Ok(StreamConnection { handshake, lines })
}

/// Open a streaming subscription
///
/// # Errors
///
/// Returns `ClientError::Unavailable` on connect/write failure, timeout,
/// close before the handshake line, or an unparsable handshake.
pub async fn open_events_stream(
    endpoint: &Endpoint,
    request: &Request,
    timeout: Duration,
) -> Result<StreamConnection, ClientError> {
    let socket = connect(endpoint, timeout).await?;
    handshake(socket, request, timeout).await
}
