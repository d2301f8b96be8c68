//! Bulk transfer facade over a database client.
//!
//! [`BulkConnection`] pairs a [`SqlExecutor`] with a [`TransferConfig`] and
//! exposes export (`read_*`) and import (`write_*`) entry points, either with
//! the built-in codecs or with a caller-supplied capability.

pub mod config;

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use tokio::sync::Mutex;

use crate::codec::{
    ArrowDecoder, ArrowEncoder, ByteConsumer, ByteProducer, Codec, CodecError, CsvDecoder,
    CsvEncoder, TableData,
};
use crate::error::TransferError;
use crate::query::{ImportQuery, QuotingMode};
use crate::transfer::{export_with, import_with, SharedExecutor, SqlExecutor};

pub use config::TransferConfig;

/// Table (and optionally columns) an import writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    table: String,
    columns: Option<Vec<String>>,
    quoting: Option<QuotingMode>,
}

impl ImportTarget {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            quoting: None,
        }
    }

    /// Columns receiving the stream's fields, in order.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the connection's quoting mode for this import.
    #[must_use]
    pub fn quoting(mut self, quoting: QuotingMode) -> Self {
        self.quoting = Some(quoting);
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn to_query(&self, default_quoting: QuotingMode) -> ImportQuery {
        let query = ImportQuery::new(&self.table).quoting(self.quoting.unwrap_or(default_quoting));
        match self.columns {
            Some(ref cols) => query.columns(cols.clone()),
            None => query,
        }
    }
}

impl From<&str> for ImportTarget {
    fn from(table: &str) -> Self {
        ImportTarget::new(table)
    }
}

/// Database client plus transfer options.
///
/// While a transfer runs, its statement holds the client lock; calling
/// [`execute`](Self::execute) from inside a capability therefore waits until
/// the transfer has finished.
#[derive(Clone)]
pub struct BulkConnection {
    executor: SharedExecutor,
    config: TransferConfig,
}

impl std::fmt::Debug for BulkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkConnection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BulkConnection {
    /// Wraps a client that is used for nothing else.
    pub fn new<E>(executor: E, config: TransferConfig) -> Self
    where
        E: SqlExecutor + 'static,
    {
        Self {
            executor: Arc::new(Mutex::new(executor)),
            config,
        }
    }

    /// Wraps a client shared with other code.
    pub fn from_shared(executor: SharedExecutor, config: TransferConfig) -> Self {
        Self { executor, config }
    }

    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Runs a statement on the underlying client.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Statement` if the client reports a failure.
    pub async fn execute(&self, sql: &str) -> Result<u64, TransferError> {
        self.executor
            .lock()
            .await
            .execute(sql)
            .await
            .map_err(|e| TransferError::Statement {
                message: e.to_string(),
            })
    }

    /// Exports `sql` through a custom consumer.
    pub async fn read_with<C: ByteConsumer>(
        &self,
        sql: &str,
        consumer: C,
    ) -> Result<C::Output, TransferError> {
        export_with(Arc::clone(&self.executor), &self.config, sql, consumer).await
    }

    /// Exports `sql` as rows of strings.
    pub async fn read_csv(&self, sql: &str) -> Result<Vec<Vec<String>>, TransferError> {
        self.read_with(sql, CsvDecoder::new(self.config.csv.clone()))
            .await
    }

    /// Exports `sql` as Arrow record batches.
    pub async fn read_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, TransferError> {
        self.read_with(sql, ArrowDecoder::new(self.config.csv.clone()))
            .await
    }

    /// Exports `sql` with the configured default codec.
    pub async fn read_data(&self, sql: &str) -> Result<TableData, TransferError> {
        match self.config.default_codec {
            Codec::Csv => self.read_csv(sql).await.map(TableData::Rows),
            Codec::Arrow => self.read_arrow(sql).await.map(TableData::Batches),
        }
    }

    /// Imports whatever `producer` writes.
    pub async fn write_with<P: ByteProducer>(
        &self,
        target: &ImportTarget,
        producer: P,
    ) -> Result<P::Output, TransferError> {
        let query = target.to_query(self.config.quoting);
        import_with(Arc::clone(&self.executor), &self.config, query, producer).await
    }

    /// Imports rows of strings. Returns the number of rows written.
    pub async fn write_csv(
        &self,
        rows: Vec<Vec<String>>,
        target: &ImportTarget,
    ) -> Result<u64, TransferError> {
        self.write_with(target, CsvEncoder::new(rows, self.config.csv.clone()))
            .await
    }

    /// Imports Arrow record batches. Returns the number of rows written.
    pub async fn write_arrow(
        &self,
        batches: Vec<RecordBatch>,
        target: &ImportTarget,
    ) -> Result<u64, TransferError> {
        self.write_with(target, ArrowEncoder::new(batches, self.config.csv.clone()))
            .await
    }

    /// Imports `data` with the configured default codec.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Codec` before any transfer starts if `data` does
    /// not match the default codec.
    pub async fn write_data(
        &self,
        data: TableData,
        target: &ImportTarget,
    ) -> Result<u64, TransferError> {
        match (self.config.default_codec, data) {
            (Codec::Csv, TableData::Rows(rows)) => self.write_csv(rows, target).await,
            (Codec::Arrow, TableData::Batches(batches)) => self.write_arrow(batches, target).await,
            (codec, data) => Err(CodecError::Mismatch(format!(
                "{:?} codec cannot write {:?} data",
                codec,
                data.codec()
            ))
            .into()),
        }
    }
}
