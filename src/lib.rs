//! # exabulk
//!
//! Tunnelled bulk import and export for Exasol.
//!
//! Instead of fetching rows one by one over the client protocol, a transfer
//! asks the database to push (`EXPORT`) or pull (`IMPORT`) a CSV stream over
//! HTTP. The database cannot usually reach the client, so the HTTP connection
//! is tunnelled back over a socket the client opened to the database.
//!
//! ## Features
//!
//! - **Proxy tunnel**: EXA tunnelling handshake to obtain a proxy address
//! - **One-shot HTTP endpoint**: chunked `PUT` uploads and streamed `GET` downloads
//! - **Concurrent orchestration**: endpoint and statement run as tasks next to the caller's codec
//! - **Codecs**: rows of strings (CSV) or typed Arrow record batches, or bring your own
//!
//! ## Export Example
//!
//! ```no_run
//! use exabulk::*;
//!
//! # async fn example(client: impl SqlExecutor + 'static) -> Result<(), TransferError> {
//! let config = TransferConfig::new("exasol.local:8563".parse()?).default_codec(Codec::Csv);
//! let connection = BulkConnection::new(client, config);
//!
//! let rows = connection.read_csv("SELECT id, name FROM users").await?;
//! println!("Exported {} rows", rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Import Example
//!
//! ```no_run
//! use exabulk::*;
//!
//! # async fn example(connection: &BulkConnection) -> Result<(), TransferError> {
//! let target = ImportTarget::new("users").columns(["id", "name"]);
//! let rows = vec![
//!     vec!["1".to_string(), "alice".to_string()],
//!     vec!["2".to_string(), "bob".to_string()],
//! ];
//!
//! let written = connection.write_csv(rows, &target).await?;
//! println!("Imported {} rows", written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Consumer Example
//!
//! ```no_run
//! use exabulk::*;
//! use tokio::io::AsyncReadExt;
//!
//! # async fn example(connection: &BulkConnection) -> Result<(), TransferError> {
//! let bytes = connection
//!     .read_with("SELECT * FROM logs", |mut reader: PipeReader| async move {
//!         let mut buf = Vec::new();
//!         reader.read_to_end(&mut buf).await?;
//!         Ok::<_, std::io::Error>(buf.len())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod query;
pub mod transfer;
pub mod transport;

// =============================================================================
// Connection
// =============================================================================

pub use connection::{BulkConnection, ImportTarget, TransferConfig};

// =============================================================================
// Error Types
// =============================================================================

pub use error::{BoxError, TransferError, TransportError};

// =============================================================================
// Codecs
// =============================================================================

pub use codec::{
    ArrowDecoder, ArrowEncoder, ByteConsumer, ByteProducer, Codec, CodecError, CsvDecoder,
    CsvEncoder, CsvFormat, TableData,
};

// =============================================================================
// Transfer Engine
// =============================================================================

pub use query::{ExportQuery, ImportQuery, QuotingMode};
pub use transfer::{export_with, import_with, SharedExecutor, SqlExecutor};
pub use transport::pipe::{PipeReader, PipeWriter};
pub use transport::tunnel::{ProxyTunnel, TunnelAddress};
