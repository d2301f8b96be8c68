//! Endpoint driver: waits for the database's request on the tunnel and serves it.
//!
//! The driver polls the tunnel socket with a short timeout so that it notices an
//! error recorded by the statement trigger (the database may never connect if the
//! statement fails). It serves exactly one request and then stops. Faults are
//! recorded in the session's error slot rather than returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use super::session::{Direction, TransferSession};
use crate::error::{TransferError, TransportError};
use crate::transport::endpoint::ChunkedTransferEndpoint;
use crate::transport::http::HttpMethod;
use crate::transport::pipe::{PipeReader, PipeWriter};

/// Socket the driver serves.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Makes closing the socket send a reset instead of an orderly shutdown.
    fn reset_on_close(&self) {}
}

impl TunnelStream for TcpStream {
    fn reset_on_close(&self) {
        if let Err(e) = self.set_linger(Some(Duration::ZERO)) {
            debug!(error = %e, "failed to set SO_LINGER");
        }
    }
}

impl TunnelStream for DuplexStream {}

/// The driver's end of the pipe, fixed by the session direction.
#[derive(Debug)]
pub enum EndpointRole {
    /// Export: the uploaded body is written into `sink`.
    Upload { sink: PipeWriter },
    /// Import: `source` is streamed to the database.
    Download {
        source: PipeReader,
        /// Fired once the response head is on the wire.
        started: oneshot::Sender<()>,
        /// Fired once the body is finished, however that happened.
        done: oneshot::Sender<()>,
    },
}

impl EndpointRole {
    fn direction(&self) -> Direction {
        match self {
            EndpointRole::Upload { .. } => Direction::Export,
            EndpointRole::Download { .. } => Direction::Import,
        }
    }

    fn close_pipe(&mut self) {
        match self {
            EndpointRole::Upload { sink } => sink.close(),
            EndpointRole::Download { source, .. } => source.close(),
        }
    }
}

/// Serves one request for one session.
#[derive(Debug)]
pub struct EndpointDriver<S> {
    session: Arc<TransferSession>,
    stream: S,
    poll_interval: Duration,
}

impl<S: TunnelStream> EndpointDriver<S> {
    pub fn new(session: Arc<TransferSession>, stream: S, poll_interval: Duration) -> Self {
        Self {
            session,
            stream,
            poll_interval,
        }
    }

    /// Runs until the request is served, the peer goes away, or an error is
    /// recorded. Dropping the pipe end and the socket on return releases both.
    pub async fn run(self, mut role: EndpointRole) {
        let Self {
            session,
            stream,
            poll_interval,
        } = self;
        debug_assert_eq!(role.direction(), session.direction());
        let mut stream = BufReader::new(stream);

        loop {
            if session.error_slot().is_set() {
                debug!(direction = %session.direction(), "error recorded, stopping endpoint");
                role.close_pipe();
                return;
            }

            let polled = match timeout(poll_interval, stream.fill_buf()).await {
                Err(_) => None,
                Ok(Ok(buf)) => Some(Ok(buf.is_empty())),
                Ok(Err(e)) => Some(Err(e)),
            };

            match polled {
                None => {
                    debug!(interval = ?poll_interval, "no request yet");
                    continue;
                }
                Some(Ok(true)) => {
                    debug!("tunnel closed before any request");
                    role.close_pipe();
                    return;
                }
                Some(Ok(false)) => break,
                Some(Err(e)) => {
                    session
                        .error_slot()
                        .set(TransferError::Io(format!("Tunnel read failed: {e}")));
                    role.close_pipe();
                    return;
                }
            }
        }

        let mut endpoint = ChunkedTransferEndpoint::new(stream);
        match role {
            EndpointRole::Upload { mut sink } => {
                if let Err(e) = serve_upload(&mut endpoint, &mut sink).await {
                    session.error_slot().set(e.into());
                }
                sink.close();
            }
            EndpointRole::Download {
                mut source,
                started,
                done,
            } => {
                let result = serve_download(&mut endpoint, &session, &mut source, started).await;
                if let Err(e) = result {
                    session.error_slot().set(e.into());
                }
                source.close();

                let mut stream = endpoint.into_inner();
                if session.is_aborted() {
                    debug!("local side failed, resetting tunnel");
                    stream.get_ref().reset_on_close();
                } else if let Err(e) = stream.shutdown().await {
                    debug!(error = %e, "tunnel shutdown failed");
                }
                drop(stream);
                let _ = done.send(());
            }
        }
    }
}

fn check_method(expected: HttpMethod, actual: HttpMethod) -> Result<(), TransportError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TransportError::ProtocolError(format!(
            "Expected {expected} request, got {actual}"
        )))
    }
}

async fn serve_upload<S: TunnelStream>(
    endpoint: &mut ChunkedTransferEndpoint<BufReader<S>>,
    sink: &mut PipeWriter,
) -> Result<u64, TransportError> {
    let request = endpoint.read_request().await?;
    check_method(HttpMethod::Put, request.method)?;
    if !request.is_chunked() {
        return Err(TransportError::ProtocolError(
            "PUT request without chunked transfer encoding".to_string(),
        ));
    }
    endpoint.serve_upload(sink).await
}

async fn serve_download<S: TunnelStream>(
    endpoint: &mut ChunkedTransferEndpoint<BufReader<S>>,
    session: &TransferSession,
    source: &mut PipeReader,
    started: oneshot::Sender<()>,
) -> Result<u64, TransportError> {
    let request = endpoint.read_request().await?;
    check_method(HttpMethod::Get, request.method)?;
    endpoint
        .serve_download(session.file_name(), source, move || {
            let _ = started.send(());
        })
        .await
}
