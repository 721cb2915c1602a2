//! Framed transport over a TCP stream.
//!
//! The transport owns one connected socket. Outbound frames are written under
//! a single lock so concurrent senders never interleave partial frames.
//! Inbound bytes are buffered on a background thread, split at [`END`], and
//! delivered one whole frame at a time in arrival order.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use crate::framing::END;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Largest frame accepted from a peer, terminator included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const READ_CHUNK_BYTES: usize = 4096;

/// Why the inbound side of a transport stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end of the connection.
    PeerClosed,
    /// Reading failed; the error has already been logged.
    ReadFailed,
    /// [`FramedTransport::close`] was called locally.
    Local,
}

/// Errors raised by the framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Cloning the socket handle for the reader failed.
    #[error("failed to clone socket handle: {source}")]
    Clone {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a frame failed.
    #[error("failed to write frame: {source}")]
    Write {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Shutting the socket down failed.
    #[error("failed to shut down socket: {source}")]
    Shutdown {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the reader thread failed.
    #[error("failed to spawn reader thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The reader was already started.
    #[error("transport reader already started")]
    AlreadyStarted,
    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
    /// The reader thread panicked.
    #[error("transport reader thread panicked")]
    ReaderPanicked,
    /// Reading the peer address failed.
    #[error("failed to read socket address: {source}")]
    Address {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// A connected socket that exchanges whole frames.
#[derive(Debug)]
pub struct FramedTransport {
    writer: Mutex<TcpStream>,
    control: TcpStream,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl FramedTransport {
    /// Wraps a connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Clone`] when the socket handle cannot be
    /// duplicated.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let control = stream
            .try_clone()
            .map_err(|source| TransportError::Clone { source })?;
        Ok(Self {
            writer: Mutex::new(stream),
            control,
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Local address of the socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Address`] if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.control
            .local_addr()
            .map_err(|source| TransportError::Address { source })
    }

    /// Returns `true` once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writes one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after the transport was closed and
    /// [`TransportError::Write`] when the socket write fails.
    pub fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(frame)
            .and_then(|()| writer.flush())
            .map_err(|source| TransportError::Write { source })
    }

    /// Starts delivering inbound frames on a background thread.
    ///
    /// `on_frame` receives each frame without its terminator. `on_close` runs
    /// once when the inbound side stops.
    ///
    /// # Errors
    ///
    /// Returns an error when the reader is already running, the socket cannot
    /// be cloned, or the thread cannot be spawned.
    pub fn start<F, C>(&self, thread_name: &str, on_frame: F, on_close: C) -> Result<(), TransportError>
    where
        F: FnMut(&[u8]) + Send + 'static,
        C: FnOnce(CloseReason) + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        let stream = self
            .control
            .try_clone()
            .map_err(|source| TransportError::Clone { source })?;
        let closed = Arc::clone(&self.closed);
        let handle = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || run_read_loop(FrameReader::new(stream), &closed, on_frame, on_close))
            .map_err(|source| TransportError::Spawn { source })?;
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Shuts the socket down in both directions and waits for the reader.
    ///
    /// Closing from inside the reader thread (for example from a frame
    /// callback) skips the join. Calling `close` twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Shutdown`] when the OS refuses the shutdown
    /// and [`TransportError::ReaderPanicked`] when the reader panicked.
    pub fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shutdown = match self.control.shutdown(Shutdown::Both) {
            Err(source) if source.kind() != io::ErrorKind::NotConnected => {
                Err(TransportError::Shutdown { source })
            }
            _ => Ok(()),
        };
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            return Err(TransportError::ReaderPanicked);
        }
        shutdown
    }
}

fn run_read_loop<R, F, C>(mut reader: FrameReader<R>, closed: &AtomicBool, mut on_frame: F, on_close: C)
where
    R: Read,
    F: FnMut(&[u8]),
    C: FnOnce(CloseReason),
{
    let reason = loop {
        match reader.next_frame() {
            Ok(Some(frame)) => on_frame(&frame),
            Ok(None) => break CloseReason::PeerClosed,
            Err(_) if closed.load(Ordering::SeqCst) => break CloseReason::Local,
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, %error, "frame read failed");
                break CloseReason::ReadFailed;
            }
        }
    };
    let reason = if closed.load(Ordering::SeqCst) {
        CloseReason::Local
    } else {
        reason
    };
    debug!(target: TRANSPORT_TARGET, ?reason, "frame reader stopped");
    on_close(reason);
}

/// Buffers a byte stream and yields frames split at [`END`].
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte stream.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    /// Returns the next frame without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. Trailing bytes without a
    /// terminator are a truncated frame; they are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns an IO error when reading fails or a frame grows beyond
    /// [`MAX_FRAME_BYTES`].
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            if let Some(position) = self.buffer.iter().position(|byte| *byte == END) {
                let remainder = self.buffer.split_off(position + 1);
                let mut frame = mem::replace(&mut self.buffer, remainder);
                frame.pop();
                return Ok(Some(frame));
            }
            enforce_frame_limit(self.buffer.len())?;

            let read = read_with_retry(&mut self.inner, &mut chunk)?;
            if read == 0 {
                let truncated = mem::take(&mut self.buffer);
                if !truncated.is_empty() {
                    warn!(
                        target: TRANSPORT_TARGET,
                        bytes = truncated.len(),
                        tail = %String::from_utf8_lossy(&truncated),
                        "dropping unterminated frame at end of stream"
                    );
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(chunk.get(..read).unwrap_or_default());
        }
    }
}

fn read_with_retry<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

fn enforce_frame_limit(size: usize) -> io::Result<()> {
    if size > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {size} bytes exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    Ok(())
}
