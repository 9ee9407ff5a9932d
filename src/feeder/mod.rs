//! Protocol driver for a line-oriented G-code printer.
//!
//! The printer accepts one command at a time and answers each with a line
//! starting with `ok`, interleaved with free-form status chatter. The
//! feeder owns the serial port for the lifetime of one print session:
//! handshake, flow-controlled line streaming, status parsing, and a safing
//! sequence (heaters and fan off) on every exit path.

pub mod transport;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use transport::{SerialTransport, TransportError, BAUD_RATE};

/// Settle time after the printer announces `start` before the first
/// command goes out.
const HANDSHAKE_SETTLE: Duration = Duration::from_secs(2);

/// Poll interval while the print is manually paused.
const PAUSE_POLL: Duration = Duration::from_secs(5);

/// Hotend off, bed off, fan off. Written on every exit path.
const SAFING_SEQUENCE: [&[u8]; 3] = [b"M104 S0\n", b"M140 S0\n", b"M107\n"];

/// States the feeder publishes while driving a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FeederStatus {
    #[default]
    Connecting = 0,
    ConnectionFail = 1,
    FSensorBusy = 2,
    Ready = 3,
    Printing = 4,
    ManuallyPaused = 5,
    MMUBusy = 6,
    Finished = 7,
    Error = 8,
}

impl FeederStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FeederStatus::Connecting,
            1 => FeederStatus::ConnectionFail,
            2 => FeederStatus::FSensorBusy,
            3 => FeederStatus::Ready,
            4 => FeederStatus::Printing,
            5 => FeederStatus::ManuallyPaused,
            6 => FeederStatus::MMUBusy,
            7 => FeederStatus::Finished,
            _ => FeederStatus::Error,
        }
    }
}

impl fmt::Display for FeederStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeederStatus::Connecting => "Connecting",
            FeederStatus::ConnectionFail => "ConnectionFail",
            FeederStatus::FSensorBusy => "FSensorBusy",
            FeederStatus::Ready => "Ready",
            FeederStatus::Printing => "Printing",
            FeederStatus::ManuallyPaused => "ManuallyPaused",
            FeederStatus::MMUBusy => "MMUBusy",
            FeederStatus::Finished => "Finished",
            FeederStatus::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Lock-free publication of the current status; the state machine samples
/// it concurrently with the session tasks.
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: FeederStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn load(&self) -> FeederStatus {
        FeederStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, status: FeederStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

#[derive(Debug, Error)]
pub enum FeederError {
    #[error("failed to connect to printer: {0}")]
    Connect(TransportError),
    #[error("failed to open {}: file does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("session cancelled")]
    Cancelled,
    #[error("failed to read job file: {0}")]
    JobFile(std::io::Error),
    #[error("failed to write to printer: {0}")]
    Write(TransportError),
}

pub struct Feeder {
    port: SerialTransport,
    job_path: PathBuf,
    status: StatusCell,
    progress: AtomicU8,
    ack_tx: mpsc::Sender<()>,
    ack_rx: Mutex<mpsc::Receiver<()>>,
    session: CancellationToken,
    safed: AtomicBool,
    progress_re: Regex,
}

impl Feeder {
    /// Open the serial device and verify the job file exists. On success
    /// the feeder is `Ready` and owns the port.
    pub fn new(device: &str, job_path: impl AsRef<Path>) -> Result<Self, FeederError> {
        let port = SerialTransport::open(device).map_err(FeederError::Connect)?;
        let job_path = job_path.as_ref().to_path_buf();
        if !job_path.exists() {
            return Err(FeederError::MissingFile(job_path));
        }
        Ok(Self::with_transport(port, job_path))
    }

    /// Build a feeder over an already-connected transport.
    pub fn with_transport(port: SerialTransport, job_path: impl Into<PathBuf>) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(1);
        Self {
            port,
            job_path: job_path.into(),
            status: StatusCell::new(FeederStatus::Ready),
            progress: AtomicU8::new(0),
            ack_tx,
            ack_rx: Mutex::new(ack_rx),
            session: CancellationToken::new(),
            safed: AtomicBool::new(false),
            progress_re: Regex::new(r"^M73 P(\d+)").expect("progress pattern is valid"),
        }
    }

    pub fn status(&self) -> FeederStatus {
        self.status.load()
    }

    /// Progress percentage extracted from `M73` markers, `0..=100`.
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.status.store(FeederStatus::ManuallyPaused);
    }

    pub fn start(&self) {
        self.status.store(FeederStatus::Printing);
    }

    /// Run the print session once: handshake, then stream the job file
    /// line by line. Whatever happens, the port ends up closed and the
    /// printer safed.
    pub async fn feed(self: Arc<Self>) -> Result<(), FeederError> {
        let reader = {
            let feeder = Arc::clone(&self);
            tokio::spawn(async move {
                feeder.read_loop().await;
                feeder.cancel().await;
            })
        };

        let result = self.stream_file().await;
        self.cancel().await;
        let _ = reader.await;
        result
    }

    /// Stop the session and leave the printer safe: heaters and fan off,
    /// port closed. Callable from any task at any time; the second call is
    /// a no-op beyond closing the already-closed port.
    pub async fn cancel(&self) {
        if self.safed.swap(true, Ordering::SeqCst) {
            self.port.close();
            self.session.cancel();
            return;
        }
        debug!("feeder: cancel requested");
        for command in SAFING_SEQUENCE {
            if let Err(err) = self.port.send(command).await {
                error!("feeder: error writing safing instruction: {err}");
            }
        }
        self.port.close();
        self.session.cancel();
        if self.status() != FeederStatus::Error {
            self.status.store(FeederStatus::Finished);
        }
    }

    async fn stream_file(&self) -> Result<(), FeederError> {
        // Flush whatever junk sits in the printer's input buffer, then ask
        // the firmware to echo a start marker: MK3 announces "start" on
        // its own, Buddy firmwares answer the M118.
        let _ = self.port.send(b"\n").await;
        let _ = self.port.send(b"M118 start\n").await;
        self.wait_ack().await?;
        self.start();

        let file = match File::open(&self.job_path).await {
            Ok(file) => file,
            Err(err) => {
                self.status.store(FeederStatus::Error);
                return Err(FeederError::JobFile(err));
            }
        };
        let mut lines = BufReader::new(file).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    self.status.store(FeederStatus::Error);
                    return Err(FeederError::JobFile(err));
                }
            };
            let command = strip_comment(&line);
            if command.is_empty() {
                continue;
            }

            while self.status() == FeederStatus::ManuallyPaused {
                tokio::select! {
                    _ = self.session.cancelled() => return Err(FeederError::Cancelled),
                    _ = tokio::time::sleep(PAUSE_POLL) => info!("feeder: paused manually"),
                }
            }

            self.status.store(FeederStatus::Printing);
            debug!("feeder: writing: {command}");
            if let Err(err) = self.port.send(format!("{command}\n").as_bytes()).await {
                return Err(self.session_failure(FeederError::Write(err)));
            }

            if let Some(captures) = self.progress_re.captures(command) {
                // Not every slicer injects progress markers, and a value
                // that does not fit a percentage is just ignored.
                if let Ok(percent) = captures[1].parse::<u8>() {
                    self.progress.store(percent, Ordering::SeqCst);
                }
            }

            self.wait_ack().await?;
        }

        self.status.store(FeederStatus::Finished);
        Ok(())
    }

    async fn wait_ack(&self) -> Result<(), FeederError> {
        let mut ack_rx = self.ack_rx.lock().await;
        tokio::select! {
            _ = self.session.cancelled() => Err(FeederError::Cancelled),
            ack = ack_rx.recv() => match ack {
                Some(()) => Ok(()),
                None => Err(FeederError::Cancelled),
            },
        }
    }

    fn session_failure(&self, err: FeederError) -> FeederError {
        if self.session.is_cancelled() {
            return FeederError::Cancelled;
        }
        self.status.store(FeederStatus::Error);
        err
    }

    /// Classify every line the printer emits. Runs until the session is
    /// cancelled, the port fails, or the printer resets.
    async fn read_loop(&self) {
        let mut seen_start = false;
        loop {
            let line = tokio::select! {
                _ = self.session.cancelled() => return,
                line = self.port.read_line() => line,
            };
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    if self.session.is_cancelled() || self.port.is_closed() {
                        return;
                    }
                    error!("feeder: error reading from printer: {err}");
                    self.status.store(FeederStatus::Error);
                    return;
                }
            };

            debug!("feeder: reading: {line}");
            if line.starts_with("ok") && seen_start {
                if self.release_ack().await.is_err() {
                    return;
                }
            } else if line.contains("fsensor") {
                self.status.store(FeederStatus::FSensorBusy);
            } else if line.contains("MMU") {
                if line.contains("DISABLED") {
                    continue;
                }
                self.status.store(FeederStatus::MMUBusy);
            } else if line.contains("start") {
                // The first "start" means the printer is ready; a second
                // one means somebody reset it mid-print.
                if !seen_start {
                    tokio::time::sleep(HANDSHAKE_SETTLE).await;
                    seen_start = true;
                    if self.release_ack().await.is_err() {
                        return;
                    }
                } else if line.ends_with("start") {
                    warn!("feeder: second 'start' sequence, printer was reset");
                    self.status.store(FeederStatus::Error);
                    return;
                }
            }
        }
    }

    async fn release_ack(&self) -> Result<(), ()> {
        tokio::select! {
            _ = self.session.cancelled() => Err(()),
            sent = self.ack_tx.send(()) => sent.map_err(|_| ()),
        }
    }
}

/// Drop everything from `;` to the end of the line, then trailing
/// whitespace. Comment-only lines collapse to the empty string.
fn strip_comment(line: &str) -> &str {
    match line.split_once(';') {
        Some((code, _)) => code.trim_end(),
        None => line.trim_end(),
    }
}
