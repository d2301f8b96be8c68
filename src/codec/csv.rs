//! CSV codec producing and consuming rows of strings.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};

use super::{ByteConsumer, ByteProducer, CodecError, CsvFormat};
use crate::transport::pipe::{PipeReader, PipeWriter};

/// Buffer size for the encoder's pipe writer.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming CSV record reader.
///
/// Records may span lines when a quoted field contains a line break. Both `\n`
/// and `\r\n` terminate a record.
#[derive(Debug)]
pub struct CsvRecordReader<R> {
    reader: BufReader<R>,
    format: CsvFormat,
    records_read: usize,
}

impl<R: AsyncRead + Unpin> CsvRecordReader<R> {
    pub fn new(reader: R, format: CsvFormat) -> Self {
        Self {
            reader: BufReader::new(reader),
            format,
            records_read: 0,
        }
    }

    /// Reads the next record, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Csv` for invalid UTF-8 or an unterminated quoted
    /// field, and `CodecError::Io` if the reader fails.
    pub async fn next_record(&mut self) -> Result<Option<Vec<String>>, CodecError> {
        let row = self.records_read + 1;
        let quote = self.format.column_delimiter as u32;
        let mut raw = Vec::new();

        loop {
            let n = self.reader.read_until(b'\n', &mut raw).await?;
            let quotes_open = raw
                .iter()
                .filter(|&&b| u32::from(b) == quote)
                .count()
                % 2
                == 1;

            if n == 0 || !quotes_open {
                if raw.is_empty() {
                    return Ok(None);
                }
                if quotes_open {
                    return Err(CodecError::Csv {
                        row,
                        message: "unterminated quoted field".to_string(),
                    });
                }
                break;
            }
        }

        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }

        let line = String::from_utf8(raw).map_err(|e| CodecError::Csv {
            row,
            message: e.to_string(),
        })?;

        self.records_read = row;
        Ok(Some(parse_record(
            &line,
            self.format.column_separator,
            self.format.column_delimiter,
        )))
    }
}

/// Splits one record into fields, undoing quoting.
fn parse_record(line: &str, separator: char, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == delimiter {
                // doubled delimiter is an escaped one
                if chars.peek() == Some(&delimiter) {
                    current_field.push(delimiter);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current_field.push(c);
            }
        } else if c == delimiter {
            in_quotes = true;
        } else if c == separator {
            fields.push(std::mem::take(&mut current_field));
        } else {
            current_field.push(c);
        }
    }

    fields.push(current_field);
    fields
}

/// Formats one row, quoting fields only where needed, with a `\n` terminator.
pub(crate) fn format_csv_row<I, T>(row: I, separator: char, delimiter: char) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut line = String::new();
    let mut first = true;

    for field in row {
        if !first {
            line.push(separator);
        }
        first = false;

        let value = field.as_ref();
        let needs_quoting = value.contains(separator)
            || value.contains(delimiter)
            || value.contains('\n')
            || value.contains('\r');

        if needs_quoting {
            line.push(delimiter);
            for ch in value.chars() {
                if ch == delimiter {
                    line.push(delimiter);
                }
                line.push(ch);
            }
            line.push(delimiter);
        } else {
            line.push_str(value);
        }
    }

    line.push('\n');
    line
}

/// Decodes an exported stream into rows, skipping the header line.
#[derive(Debug, Clone, Default)]
pub struct CsvDecoder {
    format: CsvFormat,
}

impl CsvDecoder {
    #[must_use]
    pub fn new(format: CsvFormat) -> Self {
        Self { format }
    }
}

impl ByteConsumer for CsvDecoder {
    type Output = Vec<Vec<String>>;
    type Error = CodecError;

    async fn consume(self, reader: PipeReader) -> Result<Vec<Vec<String>>, CodecError> {
        let mut records = CsvRecordReader::new(reader, self.format);

        // header
        if records.next_record().await?.is_none() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        while let Some(record) = records.next_record().await? {
            rows.push(record);
        }
        Ok(rows)
    }
}

/// Encodes rows into the stream of an import. Returns the number of rows written.
#[derive(Debug, Clone, Default)]
pub struct CsvEncoder {
    rows: Vec<Vec<String>>,
    format: CsvFormat,
}

impl CsvEncoder {
    #[must_use]
    pub fn new(rows: Vec<Vec<String>>, format: CsvFormat) -> Self {
        Self { rows, format }
    }
}

impl ByteProducer for CsvEncoder {
    type Output = u64;
    type Error = CodecError;

    async fn produce(self, writer: PipeWriter) -> Result<u64, CodecError> {
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, writer);
        let mut count = 0u64;

        for row in &self.rows {
            let line = format_csv_row(
                row,
                self.format.column_separator,
                self.format.column_delimiter,
            );
            writer.write_all(line.as_bytes()).await?;
            count += 1;
        }

        writer.flush().await?;
        Ok(count)
    }
}
