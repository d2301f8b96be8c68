//! Transfer orchestration.
//!
//! One call runs three things at once:
//! - the endpoint driver task, serving the database's HTTP request on the tunnel
//! - the statement trigger task, executing the EXPORT/IMPORT statement
//! - the caller's consumer or producer, on the calling task, against the pipe
//!
//! Background faults go into the session's error slot and are raised only after
//! both tasks have been joined. An error in the slot takes precedence over the
//! callback's own error unless the callback failed first.

pub mod driver;
pub mod session;
pub mod trigger;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::{ByteConsumer, ByteProducer};
use crate::connection::TransferConfig;
use crate::error::{BoxError, TransferError};
use crate::query::{ExportQuery, ImportQuery};
use crate::transport::pipe::pipe;
use crate::transport::tunnel::ProxyTunnel;

pub use driver::{EndpointDriver, EndpointRole, TunnelStream};
pub use session::{random_file_name, Direction, ErrorSlot, TransferSession};
pub use trigger::{run_trigger, SharedExecutor, SqlExecutor};

/// Handle to a spawned task that aborts the task when dropped.
struct TaskGuard {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskGuard {
    fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    async fn join(&mut self) -> Result<(), TransferError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let result = handle.await;
        self.handle = None;
        result.map_err(|e| TransferError::TaskFailed(format!("{} task: {e}", self.name)))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Joins both tasks, keeping the first join failure.
async fn join_tasks(driver: &mut TaskGuard, trigger: &mut TaskGuard) -> Result<(), TransferError> {
    let driver_result = driver.join().await;
    let trigger_result = trigger.join().await;
    driver_result.and(trigger_result)
}

/// Picks the error to raise once both tasks are joined.
fn settle<T, E>(
    session: &TransferSession,
    joined: Result<(), TransferError>,
    outcome: Result<T, E>,
) -> Result<T, TransferError>
where
    E: Into<BoxError>,
{
    if let Some(err) = session.error_slot().take() {
        return Err(err);
    }
    joined?;
    outcome.map_err(|e| TransferError::Callback(e.into()))
}

async fn open_tunnel(config: &TransferConfig) -> Result<ProxyTunnel, TransferError> {
    config.validate()?;
    ProxyTunnel::connect(&config.server_address)
        .await
        .map_err(|e| TransferError::Handshake(e.to_string()))
}

/// Exports the result of `query` and feeds it to `consumer`.
///
/// Returns whatever the consumer returns once the full stream, header line
/// included, has been consumed.
///
/// # Errors
///
/// - `Handshake` if the tunnel cannot be opened; nothing has been started then
/// - the recorded background error (`Statement`, `Protocol`, `Io`) if any
/// - `Callback` if the consumer failed and nothing was recorded before it did
pub async fn export_with<C>(
    executor: SharedExecutor,
    config: &TransferConfig,
    query: &str,
    consumer: C,
) -> Result<C::Output, TransferError>
where
    C: ByteConsumer,
{
    let (stream, proxy_address) = open_tunnel(config).await?.into_parts();
    let file_name = random_file_name();
    let statement = ExportQuery::new(query)
        .at_address(&proxy_address)
        .file_name(&file_name)
        .build();
    let session = Arc::new(TransferSession::new(
        Direction::Export,
        proxy_address,
        file_name,
        statement,
    ));

    let (writer, reader) = pipe(config.pipe_capacity);
    let reader_closer = reader.closer();

    let mut driver = TaskGuard::spawn(
        "endpoint driver",
        EndpointDriver::new(Arc::clone(&session), stream, config.poll_interval_duration())
            .run(EndpointRole::Upload { sink: writer }),
    );
    let mut trigger = TaskGuard::spawn("statement trigger", run_trigger(executor, Arc::clone(&session)));

    let outcome = consumer.consume(reader).await;
    if outcome.is_err() {
        session.error_slot().seal();
    }
    reader_closer.close();

    let joined = join_tasks(&mut driver, &mut trigger).await;
    debug!(file = session.file_name(), "export session finished");
    settle(&session, joined, outcome)
}

/// Imports what `producer` writes into the table described by `target`.
///
/// The producer is started only once the database has requested the data, and
/// the call returns only after the last byte has been relayed.
///
/// # Errors
///
/// As for [`export_with`]; additionally `EndpointClosed` if the endpoint
/// stopped before the database asked for data and no cause was recorded.
pub async fn import_with<P>(
    executor: SharedExecutor,
    config: &TransferConfig,
    target: ImportQuery,
    producer: P,
) -> Result<P::Output, TransferError>
where
    P: ByteProducer,
{
    let (stream, proxy_address) = open_tunnel(config).await?.into_parts();
    let file_name = random_file_name();
    let statement = target
        .at_address(&proxy_address)
        .file_name(&file_name)
        .build();
    let session = Arc::new(TransferSession::new(
        Direction::Import,
        proxy_address,
        file_name,
        statement,
    ));

    let (writer, reader) = pipe(config.pipe_capacity);
    let writer_closer = writer.closer();
    let (started_tx, started_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let mut driver = TaskGuard::spawn(
        "endpoint driver",
        EndpointDriver::new(Arc::clone(&session), stream, config.poll_interval_duration()).run(
            EndpointRole::Download {
                source: reader,
                started: started_tx,
                done: done_tx,
            },
        ),
    );
    let mut trigger = TaskGuard::spawn("statement trigger", run_trigger(executor, Arc::clone(&session)));

    let outcome = if started_rx.await.is_ok() {
        let outcome = producer.produce(writer).await;
        if outcome.is_err() {
            session.error_slot().seal();
            session.abort();
        }
        writer_closer.close();
        // a dropped sender also means the body is finished
        let _ = done_rx.await;
        Some(outcome)
    } else {
        debug!("endpoint stopped before the database requested data");
        writer_closer.close();
        None
    };

    let joined = join_tasks(&mut driver, &mut trigger).await;
    debug!(file = session.file_name(), "import session finished");
    match outcome {
        Some(outcome) => settle(&session, joined, outcome),
        None => {
            settle::<(), BoxError>(&session, joined, Ok(()))?;
            Err(TransferError::EndpointClosed)
        }
    }
}
