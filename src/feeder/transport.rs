//! Line-oriented transport over the printer's serial port.
//!
//! The feeder talks to one printer at 115200 8-N-1. The transport owns the
//! two halves of the stream and exposes exactly what the protocol driver
//! needs: read one line, write-and-flush, close. `close` wakes any reader
//! blocked in `read_line` so the session can unwind.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

pub const BAUD_RATE: u32 = 115_200;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        source: tokio_serial::Error,
    },
    #[error("serial port is closed")]
    Closed,
    #[error("serial I/O failed: {0}")]
    Io(#[from] io::Error),
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct SerialTransport {
    reader: Mutex<BufReader<BoxedReader>>,
    writer: Mutex<BoxedWriter>,
    closed: CancellationToken,
}

impl SerialTransport {
    /// Open `device` at 115200 baud. Data bits, parity and stop bits are
    /// the builder defaults (8-N-1).
    pub fn open(device: &str) -> Result<Self, TransportError> {
        let stream = tokio_serial::new(device, BAUD_RATE)
            .open_native_async()
            .map_err(|source| TransportError::Open {
                device: device.to_string(),
                source,
            })?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream. The serial port is the production
    /// instance; tests drive the protocol over an in-memory duplex.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(BufReader::new(Box::new(reader) as BoxedReader)),
            writer: Mutex::new(Box::new(writer) as BoxedWriter),
            closed: CancellationToken::new(),
        }
    }

    /// Read one line, stripping the trailing LF and any CR. Fails with
    /// [`TransportError::Closed`] on EOF or once `close` was called.
    pub async fn read_line(&self) -> Result<String, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let read = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            read = reader.read_line(&mut line) => read?,
        };
        if read == 0 {
            return Err(TransportError::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Write the byte string and flush it out to the wire.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Idempotent. Any in-flight `read_line` fails promptly.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
