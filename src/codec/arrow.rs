//! Arrow codec: typed record batches over the CSV stream.
//!
//! Decoding buffers the exported stream and parses it into record batches,
//! either with a caller-declared schema or with one inferred from the header
//! and values. Inference reads `12.50` as a float, so columns that must keep a
//! decimal scale need a declared `Decimal128` field. Encoding writes each batch
//! as header-less CSV.

use std::io::Cursor;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{ByteConsumer, ByteProducer, CodecError, CsvFormat};
use crate::transport::pipe::{PipeReader, PipeWriter};

/// Default number of rows per decoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Decodes an exported stream into record batches with inferred types.
#[derive(Debug, Clone)]
pub struct ArrowDecoder {
    format: CsvFormat,
    batch_size: usize,
    schema: Option<SchemaRef>,
}

impl Default for ArrowDecoder {
    fn default() -> Self {
        Self::new(CsvFormat::default())
    }
}

impl ArrowDecoder {
    #[must_use]
    pub fn new(format: CsvFormat) -> Self {
        Self {
            format,
            batch_size: DEFAULT_BATCH_SIZE,
            schema: None,
        }
    }

    /// Uses `schema` instead of inferring one. Fields are matched by position
    /// and the header line is skipped.
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Parses a complete CSV document (header line first) into batches.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Arrow` if inference or parsing fails, including a
    /// value that does not fit the declared type.
    pub fn decode_bytes(&self, data: &[u8]) -> Result<Vec<RecordBatch>, CodecError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let (separator, quote) = self.format.as_bytes()?;
        let schema = match self.schema {
            Some(ref schema) => Arc::clone(schema),
            None => {
                let (schema, records) = Format::default()
                    .with_header(true)
                    .with_delimiter(separator)
                    .with_quote(quote)
                    .infer_schema(Cursor::new(data), None)?;
                debug!(columns = schema.fields().len(), records, "inferred arrow schema");
                Arc::new(schema)
            }
        };

        let reader = ReaderBuilder::new(schema)
            .with_header(true)
            .with_delimiter(separator)
            .with_quote(quote)
            .with_batch_size(self.batch_size)
            .build(Cursor::new(data))?;

        reader
            .map(|batch| batch.map_err(CodecError::from))
            .collect()
    }
}

impl ByteConsumer for ArrowDecoder {
    type Output = Vec<RecordBatch>;
    type Error = CodecError;

    async fn consume(self, mut reader: PipeReader) -> Result<Vec<RecordBatch>, CodecError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.decode_bytes(&data)
    }
}

/// Encodes record batches into the stream of an import. Returns the number of rows written.
#[derive(Debug, Clone)]
pub struct ArrowEncoder {
    batches: Vec<RecordBatch>,
    format: CsvFormat,
}

impl ArrowEncoder {
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>, format: CsvFormat) -> Self {
        Self { batches, format }
    }

    /// Serializes one batch as header-less CSV.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Arrow` if a column type cannot be written as CSV.
    pub fn encode_batch(&self, batch: &RecordBatch) -> Result<Vec<u8>, CodecError> {
        let (separator, quote) = self.format.as_bytes()?;
        let mut writer = WriterBuilder::new()
            .with_header(false)
            .with_delimiter(separator)
            .with_quote(quote)
            .build(Vec::new());
        writer.write(batch)?;
        Ok(writer.into_inner())
    }
}

impl ByteProducer for ArrowEncoder {
    type Output = u64;
    type Error = CodecError;

    async fn produce(self, mut writer: PipeWriter) -> Result<u64, CodecError> {
        let mut count = 0u64;
        for batch in &self.batches {
            let bytes = self.encode_batch(batch)?;
            writer.write_all(&bytes).await?;
            count += batch.num_rows() as u64;
        }
        writer.flush().await?;
        Ok(count)
    }
}
