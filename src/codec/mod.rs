//! Encode/decode capabilities run against the local pipe.
//!
//! An export hands the read end of the pipe to a [`ByteConsumer`]; an import
//! hands the write end to a [`ByteProducer`]. The byte stream is always CSV with
//! a newline row terminator, and an exported stream starts with one header line.
//!
//! Besides the built-in [`csv`] and [`arrow`] codecs, any async closure taking
//! the pipe end and returning a `Result` works as a capability:
//!
//! ```no_run
//! use exabulk::PipeReader;
//! use tokio::io::AsyncReadExt;
//!
//! let count_bytes = |mut reader: PipeReader| async move {
//!     let mut buf = Vec::new();
//!     reader.read_to_end(&mut buf).await?;
//!     Ok::<_, std::io::Error>(buf.len())
//! };
//! # let _ = count_bytes;
//! ```

pub mod arrow;
pub mod csv;

use std::future::Future;

use ::arrow::error::ArrowError;
use ::arrow::record_batch::RecordBatch;
use serde::Deserialize;
use thiserror::Error;

use crate::error::BoxError;
use crate::transport::pipe::{PipeReader, PipeWriter};

pub use self::arrow::{ArrowDecoder, ArrowEncoder};
pub use self::csv::{CsvDecoder, CsvEncoder, CsvRecordReader};

/// Errors raised by the built-in codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Reading from or writing to the pipe failed.
    #[error("Pipe I/O error: {0}")]
    Io(String),

    /// Malformed CSV at the given record (1-based, header included).
    #[error("CSV error at record {row}: {message}")]
    Csv { row: usize, message: String },

    /// Arrow schema inference, parsing or serialization failed.
    #[error("Arrow error: {0}")]
    Arrow(String),

    /// Data handed to a codec that cannot encode it.
    #[error("Data does not match codec: {0}")]
    Mismatch(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Io(err.to_string())
    }
}

impl From<ArrowError> for CodecError {
    fn from(err: ArrowError) -> Self {
        CodecError::Arrow(err.to_string())
    }
}

/// Decode side of a transfer: consumes the exported CSV stream.
pub trait ByteConsumer {
    type Output;
    type Error: Into<BoxError>;

    fn consume(
        self,
        reader: PipeReader,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Encode side of a transfer: produces the CSV stream to import.
pub trait ByteProducer {
    type Output;
    type Error: Into<BoxError>;

    fn produce(
        self,
        writer: PipeWriter,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

impl<F, Fut, T, E> ByteConsumer for F
where
    F: FnOnce(PipeReader) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send,
    E: Into<BoxError>,
{
    type Output = T;
    type Error = E;

    fn consume(self, reader: PipeReader) -> impl Future<Output = Result<T, E>> + Send {
        self(reader)
    }
}

impl<F, Fut, T, E> ByteProducer for F
where
    F: FnOnce(PipeWriter) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send,
    E: Into<BoxError>,
{
    type Output = T;
    type Error = E;

    fn produce(self, writer: PipeWriter) -> impl Future<Output = Result<T, E>> + Send {
        self(writer)
    }
}

/// Which built-in codec the default-codec entry points use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Arrow record batches with inferred column types.
    #[default]
    Arrow,
    /// Rows of strings.
    Csv,
}

/// CSV dialect options shared by the built-in codecs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CsvFormat {
    /// Column separator character (default: ',').
    pub column_separator: char,
    /// Quote character (default: '"').
    pub column_delimiter: char,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            column_separator: ',',
            column_delimiter: '"',
        }
    }
}

impl CsvFormat {
    #[must_use]
    pub fn column_separator(mut self, sep: char) -> Self {
        self.column_separator = sep;
        self
    }

    #[must_use]
    pub fn column_delimiter(mut self, delim: char) -> Self {
        self.column_delimiter = delim;
        self
    }

    /// Both characters as single bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Mismatch` if either character is not ASCII.
    pub fn as_bytes(&self) -> Result<(u8, u8), CodecError> {
        let to_byte = |c: char| {
            u8::try_from(c)
                .ok()
                .filter(u8::is_ascii)
                .ok_or_else(|| CodecError::Mismatch(format!("'{c}' is not an ASCII character")))
        };
        Ok((to_byte(self.column_separator)?, to_byte(self.column_delimiter)?))
    }
}

/// Table contents as produced or accepted by the default-codec entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    /// Row-major string values (CSV codec).
    Rows(Vec<Vec<String>>),
    /// Arrow record batches (Arrow codec).
    Batches(Vec<RecordBatch>),
}

impl TableData {
    /// Total number of data rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self {
            TableData::Rows(rows) => rows.len(),
            TableData::Batches(batches) => batches.iter().map(RecordBatch::num_rows).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// The codec that handles this variant.
    #[must_use]
    pub fn codec(&self) -> Codec {
        match self {
            TableData::Rows(_) => Codec::Csv,
            TableData::Batches(_) => Codec::Arrow,
        }
    }

    #[must_use]
    pub fn into_rows(self) -> Option<Vec<Vec<String>>> {
        match self {
            TableData::Rows(rows) => Some(rows),
            TableData::Batches(_) => None,
        }
    }

    #[must_use]
    pub fn into_batches(self) -> Option<Vec<RecordBatch>> {
        match self {
            TableData::Batches(batches) => Some(batches),
            TableData::Rows(_) => None,
        }
    }
}

impl From<Vec<Vec<String>>> for TableData {
    fn from(rows: Vec<Vec<String>>) -> Self {
        TableData::Rows(rows)
    }
}

impl From<Vec<RecordBatch>> for TableData {
    fn from(batches: Vec<RecordBatch>) -> Self {
        TableData::Batches(batches)
    }
}
