//! In-process byte pipe between the HTTP endpoint and the encode/decode side.
//!
//! Each end can be closed from outside through a [`PipeCloser`], which is how the
//! driver unblocks a consumer after an error and how the orchestrator releases
//! an end the callback did not drop. Closing an end twice is a no-op.
//!
//! Closing the write end makes the reader see EOF once buffered bytes are
//! drained. Closing the read end makes further writes fail with `BrokenPipe`.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

#[derive(Debug)]
struct PipeEnd {
    stream: Mutex<Option<DuplexStream>>,
}

impl PipeEnd {
    fn new(stream: DuplexStream) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(Some(stream)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<DuplexStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

/// Creates a pipe buffering at most `capacity` bytes.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (write_half, read_half) = tokio::io::duplex(capacity.max(1));
    (
        PipeWriter {
            end: PipeEnd::new(write_half),
        },
        PipeReader {
            end: PipeEnd::new(read_half),
        },
    )
}

/// Handle that can close one end of the pipe from anywhere.
#[derive(Debug, Clone)]
pub struct PipeCloser {
    end: Arc<PipeEnd>,
}

impl PipeCloser {
    /// Closes the end. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.end.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end.is_closed()
    }
}

/// Read end of the pipe.
#[derive(Debug)]
pub struct PipeReader {
    end: Arc<PipeEnd>,
}

impl PipeReader {
    #[must_use]
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            end: Arc::clone(&self.end),
        }
    }

    /// Closes the read end; pending and later writes fail.
    pub fn close(&mut self) {
        self.end.close();
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.end.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            // A closed reader reads as EOF.
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Write end of the pipe.
#[derive(Debug)]
pub struct PipeWriter {
    end: Arc<PipeEnd>,
}

impl PipeWriter {
    #[must_use]
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            end: Arc::clone(&self.end),
        }
    }

    /// Closes the write end; the reader sees EOF after draining.
    pub fn close(&mut self) {
        self.end.close();
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe write end is closed")
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.end.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.end.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.end.close();
        Poll::Ready(Ok(()))
    }
}
