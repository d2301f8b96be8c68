//! One-shot HTTP endpoint served over the tunnelled socket.
//!
//! The endpoint relays bytes and never looks at the CSV inside them:
//! - upload (`PUT`): de-chunks the request body into a sink
//! - download (`GET`): streams a source back as a connection-delimited body

use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::http::{
    build_download_response, build_upload_complete_response, parse_chunk_size,
    parse_http_request, read_line, HttpRequest, DOWNLOAD_BLOCK_SIZE,
};
use crate::error::TransportError;

/// One chunk of an upload, as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    /// Declared chunk size.
    pub length: usize,
    pub payload: Vec<u8>,
    /// Whether the two bytes after the payload were CRLF.
    pub trailing_delimiter_valid: bool,
}

impl PendingChunk {
    /// The zero-length chunk that ends the body.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.length == 0
    }
}

/// Largest chunk accepted from the peer; one chunk is buffered at a time.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

fn io_error(context: &str) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
    move |e| TransportError::IoError(format!("{context}: {e}"))
}

/// Like [`io_error`], but an overlong or non-UTF-8 line is a framing error.
fn line_error(context: &str) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::InvalidData => TransportError::ProtocolError(format!("{context}: {e}")),
        _ => TransportError::IoError(format!("{context}: {e}")),
    }
}

/// Reads one chunk: hex size line, payload, and the 2-byte delimiter.
///
/// For the last chunk the trailer section is consumed instead of a delimiter.
///
/// # Errors
///
/// Returns `ProtocolError` for a bad size line or a size above [`MAX_CHUNK_SIZE`],
/// and `IoError` if the stream ends early.
pub async fn read_chunk<S: AsyncBufRead + Unpin>(
    stream: &mut S,
) -> Result<PendingChunk, TransportError> {
    let size_line = read_line(stream)
        .await
        .map_err(line_error("Failed to read chunk size"))?;
    let length = parse_chunk_size(&size_line)?;
    if length > MAX_CHUNK_SIZE {
        return Err(TransportError::ProtocolError(format!(
            "Chunk size {length} exceeds limit of {MAX_CHUNK_SIZE} bytes"
        )));
    }

    if length == 0 {
        // Trailer headers end with an empty line; a peer that closes right
        // after the zero chunk is tolerated.
        loop {
            match read_line(stream).await {
                Ok(line) if line.is_empty() => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(line_error("Failed to read chunk trailer")(e)),
            }
        }
        return Ok(PendingChunk {
            length,
            payload: Vec::new(),
            trailing_delimiter_valid: true,
        });
    }

    let mut payload = vec![0u8; length];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(io_error("Failed to read chunk data"))?;

    let mut delimiter = [0u8; 2];
    stream
        .read_exact(&mut delimiter)
        .await
        .map_err(io_error("Failed to read chunk delimiter"))?;

    Ok(PendingChunk {
        length,
        payload,
        trailing_delimiter_valid: &delimiter == b"\r\n",
    })
}

/// HTTP endpoint for exactly one request on one connection.
#[derive(Debug)]
pub struct ChunkedTransferEndpoint<S> {
    stream: S,
}

impl<S> ChunkedTransferEndpoint<S>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Reads the request line and headers.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the request is malformed.
    pub async fn read_request(&mut self) -> Result<HttpRequest, TransportError> {
        let request = parse_http_request(&mut self.stream).await?;
        debug!(method = %request.method, path = %request.path, "request received");
        Ok(request)
    }

    /// Relays a chunked request body into `sink`, then answers `200 OK`.
    ///
    /// Returns the number of payload bytes relayed. The sink is not closed here;
    /// the caller owns it and closes it on every outcome.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if a chunk is not followed by CRLF, in which case
    /// no response is sent. Returns `IoError` if the socket or sink fails.
    pub async fn serve_upload<W>(&mut self, sink: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut total = 0u64;

        loop {
            let chunk = read_chunk(&mut self.stream).await?;
            if chunk.is_last() {
                break;
            }
            if !chunk.trailing_delimiter_valid {
                return Err(TransportError::ProtocolError(format!(
                    "Chunk of {} bytes is not followed by CRLF",
                    chunk.length
                )));
            }

            sink.write_all(&chunk.payload)
                .await
                .map_err(io_error("Failed to write to pipe"))?;
            total += chunk.length as u64;
        }

        sink.flush()
            .await
            .map_err(io_error("Failed to flush pipe"))?;

        self.stream
            .write_all(&build_upload_complete_response())
            .await
            .map_err(io_error("Failed to send response"))?;
        self.stream
            .flush()
            .await
            .map_err(io_error("Failed to flush response"))?;

        debug!(bytes = total, "upload relayed");
        Ok(total)
    }

    /// Answers `200 OK` and streams `source` to the peer until EOF.
    ///
    /// `on_started` runs once the response head has been written, before the
    /// first body byte is read from `source`.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the socket or source fails.
    pub async fn serve_download<R, F>(
        &mut self,
        file_name: &str,
        source: &mut R,
        on_started: F,
    ) -> Result<u64, TransportError>
    where
        R: AsyncRead + Unpin,
        F: FnOnce(),
    {
        self.stream
            .write_all(&build_download_response(file_name))
            .await
            .map_err(io_error("Failed to send response head"))?;
        self.stream
            .flush()
            .await
            .map_err(io_error("Failed to flush response head"))?;
        on_started();

        let mut block = vec![0u8; DOWNLOAD_BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = source
                .read(&mut block)
                .await
                .map_err(io_error("Failed to read from pipe"))?;
            if n == 0 {
                break;
            }
            self.stream
                .write_all(&block[..n])
                .await
                .map_err(io_error("Failed to send data"))?;
            self.stream
                .flush()
                .await
                .map_err(io_error("Failed to flush data"))?;
            total += n as u64;
        }

        debug!(bytes = total, "download relayed");
        Ok(total)
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    use crate::transport::http::{encode_chunk, HttpMethod};

    fn put_request(body: &[u8]) -> Vec<u8> {
        let mut raw = b"PUT /F.csv HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        raw.extend_from_slice(body);
        raw
    }

    #[tokio::test]
    async fn test_read_chunk() {
        let mut reader = BufReader::new(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
        let chunk = read_chunk(&mut reader).await.unwrap();
        assert_eq!(chunk.length, 5);
        assert_eq!(chunk.payload, b"hello");
        assert!(chunk.trailing_delimiter_valid);

        let last = read_chunk(&mut reader).await.unwrap();
        assert!(last.is_last());
    }

    #[tokio::test]
    async fn test_read_chunk_rejects_oversized_chunk() {
        for size_line in ["FFFFFFFFFFFFFFFF", "FFFFFFFFFFF", "1000001"] {
            let raw = format!("{size_line}\r\nabc");
            let mut reader = BufReader::new(raw.as_bytes());
            let result = read_chunk(&mut reader).await;
            assert!(
                matches!(result, Err(TransportError::ProtocolError(_))),
                "size line {size_line}: {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_read_chunk_bad_delimiter() {
        let mut reader = BufReader::new(&b"5\r\nhelloXX"[..]);
        let chunk = read_chunk(&mut reader).await.unwrap();
        assert!(!chunk.trailing_delimiter_valid);
    }

    #[tokio::test]
    async fn test_serve_upload_relays_chunks_in_order() {
        let (client, server) = tokio::io::duplex(1024);
        let mut endpoint = ChunkedTransferEndpoint::new(BufReader::new(server));

        let peer = tokio::spawn(async move {
            let mut client = client;
            let mut body = Vec::new();
            body.extend(encode_chunk(b"x\r\n1\r\n"));
            body.extend(encode_chunk(b"2\r\n3\r\n"));
            body.extend(encode_chunk(&[]));
            client.write_all(&put_request(&body)).await.unwrap();

            let mut response = Vec::new();
            client.read_to_end(&mut response).await.unwrap();
            String::from_utf8(response).unwrap()
        });

        let request = endpoint.read_request().await.unwrap();
        assert_eq!(request.method, HttpMethod::Put);

        let mut sink = Vec::new();
        let total = endpoint.serve_upload(&mut sink).await.unwrap();
        drop(endpoint);

        assert_eq!(total, 12);
        assert_eq!(sink, b"x\r\n1\r\n2\r\n3\r\n");
        let response = peer.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn test_serve_upload_rejects_bad_delimiter_without_response() {
        let (client, server) = tokio::io::duplex(1024);
        let mut endpoint = ChunkedTransferEndpoint::new(BufReader::new(server));

        let peer = tokio::spawn(async move {
            let mut client = client;
            let mut body = encode_chunk(b"a,b\n");
            body.extend_from_slice(b"3\r\nabcXY");
            client.write_all(&put_request(&body)).await.unwrap();

            let mut response = Vec::new();
            client.read_to_end(&mut response).await.unwrap();
            response
        });

        endpoint.read_request().await.unwrap();
        let mut sink = Vec::new();
        let result = endpoint.serve_upload(&mut sink).await;
        drop(endpoint);

        assert!(matches!(result, Err(TransportError::ProtocolError(_))));
        assert_eq!(sink, b"a,b\n", "only chunks before the bad one are relayed");
        assert!(peer.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serve_upload_truncated_body() {
        let (client, server) = tokio::io::duplex(1024);
        let mut endpoint = ChunkedTransferEndpoint::new(BufReader::new(server));

        let mut client = client;
        client.write_all(&put_request(b"A\r\nabc")).await.unwrap();
        drop(client);

        endpoint.read_request().await.unwrap();
        let mut sink = Vec::new();
        let result = endpoint.serve_upload(&mut sink).await;
        assert!(matches!(result, Err(TransportError::IoError(_))));
    }

    #[tokio::test]
    async fn test_serve_download_streams_source() {
        let (client, server) = tokio::io::duplex(1 << 20);
        let mut endpoint = ChunkedTransferEndpoint::new(BufReader::new(server));

        let mut client = client;
        client
            .write_all(b"GET /F.csv HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap();

        let request = endpoint.read_request().await.unwrap();
        assert_eq!(request.method, HttpMethod::Get);

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = &data[..];
        let mut started = false;
        let total = endpoint
            .serve_download("F.csv", &mut source, || started = true)
            .await
            .unwrap();
        drop(endpoint);

        assert!(started);
        assert_eq!(total, data.len() as u64);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let head_end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap()
            + 4;
        let head = String::from_utf8(response[..head_end].to_vec()).unwrap();
        assert!(head.contains("Content-Disposition: attachment; filename=F.csv"));
        assert!(head.contains("Connection: close"));
        assert_eq!(&response[head_end..], &data[..]);
    }
}
