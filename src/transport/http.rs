//! Minimal HTTP/1.1 primitives for the tunnelled endpoint.
//!
//! Only what the database sends over the tunnel is supported: a `PUT` with a
//! chunked body (EXPORT) or a `GET` answered with a connection-delimited body
//! (IMPORT).

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::TransportError;

/// Block size used when relaying a download to the peer.
pub const DOWNLOAD_BLOCK_SIZE: usize = 65535;

/// Longest request, header or chunk-size line accepted, terminator included.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Reads one line, stripping the trailing CRLF (or bare LF).
///
/// # Errors
///
/// Returns `io::ErrorKind::UnexpectedEof` if the stream ends before a line
/// terminator, or `InvalidData` if the line is longer than [`MAX_LINE_LENGTH`]
/// or not UTF-8.
pub async fn read_line<S: AsyncBufRead + Unpin>(stream: &mut S) -> io::Result<String> {
    let mut line = Vec::new();
    let n = (&mut *stream)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if line.last() != Some(&b'\n') {
        if n >= MAX_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_LENGTH} bytes"),
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended before end of line",
        ));
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// HTTP method of a request sent by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Database requests data (IMPORT).
    Get,
    /// Database sends data (EXPORT).
    Put,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Request path, e.g. `/3FQ0....csv`.
    pub path: String,
    /// Header map with lowercased keys.
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Returns true if the request uses chunked transfer encoding.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map(|v| v.to_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

/// Parses the request line and headers. The body is left on the stream.
///
/// # Errors
///
/// Returns `TransportError::ProtocolError` if the request is malformed or uses
/// a method other than GET or PUT.
pub async fn parse_http_request<S: AsyncBufRead + Unpin>(
    stream: &mut S,
) -> Result<HttpRequest, TransportError> {
    let request_line = read_line(stream)
        .await
        .map_err(|e| TransportError::ProtocolError(format!("Failed to read request line: {e}")))?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(TransportError::ProtocolError(format!(
            "Invalid HTTP request line: '{request_line}'"
        )));
    }

    let method = match parts[0] {
        "GET" => HttpMethod::Get,
        "PUT" => HttpMethod::Put,
        other => {
            return Err(TransportError::ProtocolError(format!(
                "Unsupported HTTP method: '{other}'"
            )))
        }
    };

    let mut headers = HashMap::new();
    loop {
        let line = read_line(stream).await.map_err(|e| {
            TransportError::ProtocolError(format!("Failed to read header line: {e}"))
        })?;

        if line.is_empty() {
            break;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    Ok(HttpRequest {
        method,
        path: parts[1].to_string(),
        headers,
    })
}

/// Builds a response head (status line and headers). The body, if any, is
/// streamed separately.
#[must_use]
pub fn build_http_response(status_code: u16, status_text: &str, headers: &[(&str, &str)]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {status_code} {status_text}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.into_bytes()
}

/// Response head sent before a download body.
#[must_use]
pub fn build_download_response(file_name: &str) -> Vec<u8> {
    let disposition = format!("attachment; filename={file_name}");
    build_http_response(
        200,
        "OK",
        &[
            ("Content-Type", "application/octet-stream"),
            ("Content-Disposition", disposition.as_str()),
            ("Connection", "close"),
        ],
    )
}

/// Response sent once an upload has been fully received.
#[must_use]
pub fn build_upload_complete_response() -> Vec<u8> {
    build_http_response(200, "OK", &[("Connection", "close")])
}

/// Encodes data as one HTTP chunk. An empty slice yields the final chunk.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        b"0\r\n\r\n".to_vec()
    } else {
        let size_hex = format!("{:X}\r\n", data.len());
        let mut result = Vec::with_capacity(size_hex.len() + data.len() + 2);
        result.extend_from_slice(size_hex.as_bytes());
        result.extend_from_slice(data);
        result.extend_from_slice(b"\r\n");
        result
    }
}

/// Parses a chunk size line (without CRLF), ignoring chunk extensions.
///
/// # Errors
///
/// Returns `TransportError::ProtocolError` if the size is not valid hex.
pub fn parse_chunk_size(size_line: &str) -> Result<usize, TransportError> {
    let size_str = size_line.split(';').next().unwrap_or(size_line).trim();

    usize::from_str_radix(size_str, 16)
        .map_err(|e| TransportError::ProtocolError(format!("Invalid chunk size '{size_str}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_line_strips_crlf_and_lf() {
        let mut reader = BufReader::new(&b"first\r\nsecond\nthird"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap(), "first");
        assert_eq!(read_line(&mut reader).await.unwrap(), "second");
        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_read_line_rejects_overlong_line() {
        let mut data = vec![b'a'; MAX_LINE_LENGTH * 2];
        data.extend_from_slice(b"\r\n");
        let mut reader = BufReader::new(&data[..]);
        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut line = vec![b'b'; MAX_LINE_LENGTH - 2];
        line.extend_from_slice(b"\r\n");
        let mut reader = BufReader::new(&line[..]);
        assert_eq!(read_line(&mut reader).await.unwrap().len(), MAX_LINE_LENGTH - 2);
    }

    #[tokio::test]
    async fn test_parse_request_rejects_overlong_header() {
        let mut raw = b"PUT /x HTTP/1.1\r\nX-Padding: ".to_vec();
        raw.extend(std::iter::repeat(b'p').take(MAX_LINE_LENGTH));
        raw.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            parse_http_request(&mut reader).await,
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_put_request() {
        let raw = b"PUT /ABC.csv HTTP/1.1\r\nHost: 10.0.0.5:20001\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let request = parse_http_request(&mut reader).await.unwrap();

        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.path, "/ABC.csv");
        assert!(request.is_chunked());
        assert_eq!(
            request.headers.get("host").map(String::as_str),
            Some("10.0.0.5:20001")
        );

        // body is left untouched
        assert_eq!(read_line(&mut reader).await.unwrap(), "4");
    }

    #[tokio::test]
    async fn test_parse_get_request() {
        let raw = b"GET /XYZ.csv HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let request = parse_http_request(&mut reader).await.unwrap();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(!request.is_chunked());
    }

    #[tokio::test]
    async fn test_parse_request_rejects_unknown_method() {
        let mut reader = BufReader::new(&b"POST /x HTTP/1.1\r\n\r\n"[..]);
        let result = parse_http_request(&mut reader).await;
        assert!(matches!(result, Err(TransportError::ProtocolError(m)) if m.contains("POST")));
    }

    #[tokio::test]
    async fn test_parse_request_rejects_short_request_line() {
        let mut reader = BufReader::new(&b"GET\r\n\r\n"[..]);
        assert!(parse_http_request(&mut reader).await.is_err());
    }

    #[test]
    fn test_build_download_response() {
        let response = String::from_utf8(build_download_response("ABC.csv")).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/octet-stream\r\n"));
        assert!(response.contains("Content-Disposition: attachment; filename=ABC.csv\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_encode_chunk() {
        assert_eq!(encode_chunk(b"Hello"), b"5\r\nHello\r\n");
        assert_eq!(encode_chunk(&[0u8; 255])[..4], *b"FF\r\n");
        assert_eq!(encode_chunk(&[]), b"0\r\n\r\n");
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("5").unwrap(), 5);
        assert_eq!(parse_chunk_size("ff").unwrap(), 255);
        assert_eq!(parse_chunk_size("FFFF").unwrap(), 65535);
        assert_eq!(parse_chunk_size("10;name=value").unwrap(), 16);
        assert_eq!(parse_chunk_size(" 0 ").unwrap(), 0);
        assert!(matches!(
            parse_chunk_size("xyz"),
            Err(TransportError::ProtocolError(_))
        ));
    }
}
