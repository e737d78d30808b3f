use crate::config::ConnectionOptions;
use crate::error::{DecodeError, Result, StormError};
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest status line accepted from the processor
const MAX_LINE_LENGTH: usize = 1024;

/// Framed halves of an open TCP session
struct LineStream {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

/// Low-level line transport to one processor
///
/// Owns the socket exclusively. Any read or write failure other than a
/// timeout drops the socket; `ensure_connected` dials again.
pub struct Connection {
    host: String,
    port: u16,
    options: ConnectionOptions,
    stream: Option<LineStream>,
}

impl Connection {
    /// Create an unconnected transport for `host:port`
    pub fn new(host: impl Into<String>, port: u16, options: ConnectionOptions) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            stream: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the TCP session and clear the status dump the processor sends on connect
    pub async fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!("Connecting to {}", addr);

        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(StormError::Connection { addr, source }),
            Err(_) => {
                return Err(StormError::Connection {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        let (read, write) = stream.into_split();
        self.stream = Some(LineStream {
            reader: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(write, LinesCodec::new()),
        });

        let cleared = self.drain_initial().await;
        if !self.is_connected() {
            return Err(StormError::ConnectionClosed);
        }

        tracing::info!("Connected to StormAudio at {} ({} initial line(s) cleared)", addr, cleared);
        Ok(())
    }

    /// Read and drop lines until the processor goes quiet or the settle window ends
    async fn drain_initial(&mut self) -> usize {
        let deadline = Instant::now() + self.options.settle_window;
        let mut cleared = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.read_line(remaining.min(self.options.settle_quiet)).await {
                Ok(line) => {
                    tracing::debug!("Cleared initial: {}", line);
                    cleared += 1;
                }
                Err(StormError::Timeout) => break,
                Err(StormError::Decode(_)) => cleared += 1,
                Err(e) => {
                    tracing::debug!("Error clearing initial responses: {}", e);
                    break;
                }
            }
        }

        cleared
    }

    /// Reconnect if needed, making at most `reconnect_attempts` attempts
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let attempts = self.options.reconnect_attempts.max(1);
        let mut last_error = StormError::NotConnected;

        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} to {}:{} failed: {}",
                        attempt,
                        attempts,
                        self.host,
                        self.port,
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Write one line; the codec appends the `\n` terminator
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(StormError::NotConnected)?;

        tracing::debug!("Sending: {}", line);
        let sent = stream.writer.send(line).await;

        if let Err(e) = sent {
            tracing::warn!("Write to {}:{} failed: {}", self.host, self.port, e);
            self.stream = None;
            return Err(StormError::Transport(codec_io_error(e)));
        }

        Ok(())
    }

    /// Wait up to `wait` for the next line, terminator stripped
    pub async fn read_line(&mut self, wait: Duration) -> Result<String> {
        let stream = self.stream.as_mut().ok_or(StormError::NotConnected)?;

        let next = timeout(wait, stream.reader.next()).await;

        match next {
            Err(_) => Err(StormError::Timeout),
            Ok(Some(Ok(line))) => {
                tracing::debug!("Received: {}", line);
                Ok(line)
            }
            Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                tracing::warn!("Discarding over-long line from {}:{}", self.host, self.port);
                Err(DecodeError::LineTooLong.into())
            }
            Ok(Some(Err(LinesCodecError::Io(e)))) => {
                tracing::warn!("Read from {}:{} failed: {}", self.host, self.port, e);
                self.stream = None;
                Err(StormError::Transport(e))
            }
            Ok(None) => {
                tracing::info!("Connection closed by {}:{}", self.host, self.port);
                self.stream = None;
                Err(StormError::ConnectionClosed)
            }
        }
    }

    /// Drop every line that has already arrived, without waiting
    ///
    /// Returns the number of discarded lines.
    pub fn discard_pending(&mut self) -> usize {
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };

        let mut discarded = 0;
        let mut closed = false;

        loop {
            match stream.reader.next().now_or_never() {
                Some(Some(Ok(line))) => {
                    tracing::debug!("Discarding stale line: {}", line);
                    discarded += 1;
                }
                Some(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => discarded += 1,
                Some(Some(Err(LinesCodecError::Io(e)))) => {
                    tracing::warn!("Read from {}:{} failed: {}", self.host, self.port, e);
                    closed = true;
                    break;
                }
                Some(None) => {
                    tracing::info!("Connection closed by {}:{}", self.host, self.port);
                    closed = true;
                    break;
                }
                None => break,
            }
        }

        if closed {
            self.stream = None;
        }

        discarded
    }

    /// Close the session if one is open
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = SinkExt::<&str>::close(&mut stream.writer).await {
                tracing::debug!("Error closing connection: {}", e);
            }
            tracing::info!("Disconnected from {}:{}", self.host, self.port);
        }
    }
}

fn codec_io_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
