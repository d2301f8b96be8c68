//! EXA tunnelling handshake.
//!
//! The database cannot reach the client directly, so the client opens a TCP
//! connection to the database and asks it to proxy one inbound HTTP connection
//! back over that same socket:
//!
//! 1. Client connects to the database address (the same host/port the SQL client uses)
//! 2. Client sends a 12-byte request: magic `0x02212102`, then `1`, `1`
//! 3. Database answers with 24 bytes: an unused `i32`, the proxy port as `i32`,
//!    and the proxy host as a 16-byte NUL-padded string
//! 4. The proxy address goes into the `AT 'http://host:port'` clause of the
//!    EXPORT/IMPORT statement; the database then speaks HTTP over the socket

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{TransferError, TransportError};

/// EXA tunnelling protocol magic number, sent as the first 4 bytes of the request.
pub const EXA_MAGIC_NUMBER: i32 = 0x0221_2102;

/// Number of tunnels requested.
pub const EXA_TUNNEL_COUNT: i32 = 1;

/// Bind mode of the requested tunnel (1 = bound to this connection).
pub const EXA_TUNNEL_BIND_LOCAL: i32 = 1;

/// Size of the handshake request (magic + two fields).
pub const EXA_MAGIC_PACKET_SIZE: usize = 12;

/// Size of the handshake response (status + port + 16-byte host).
pub const EXA_RESPONSE_PACKET_SIZE: usize = 24;

/// A host/port pair.
///
/// Two of these exist per transfer: the database address the tunnel is opened
/// against, and the proxy address the database hands back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct TunnelAddress {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl TunnelAddress {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the `http://host:port` URL used in EXPORT/IMPORT statements.
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Returns true if both host and port are set.
    #[must_use]
    pub fn is_specified(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

impl fmt::Display for TunnelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for TunnelAddress {
    type Err = TransferError;

    /// Parses `"host:port"`, as reported by the database client for its server name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| {
            TransferError::InvalidConfig(format!("Address '{s}' is not in host:port form"))
        })?;

        if host.is_empty() {
            return Err(TransferError::InvalidConfig(format!(
                "Address '{s}' has an empty host"
            )));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| TransferError::InvalidConfig(format!("Invalid port in '{s}': {e}")))?;

        Ok(Self::new(host, port))
    }
}

/// Generates the 12-byte tunnel request.
///
/// All three fields are native-endian `i32`s, which on every platform the
/// database supports means little-endian.
#[must_use]
pub fn generate_magic_packet() -> [u8; EXA_MAGIC_PACKET_SIZE] {
    let mut packet = [0u8; EXA_MAGIC_PACKET_SIZE];
    packet[0..4].copy_from_slice(&EXA_MAGIC_NUMBER.to_le_bytes());
    packet[4..8].copy_from_slice(&EXA_TUNNEL_COUNT.to_le_bytes());
    packet[8..12].copy_from_slice(&EXA_TUNNEL_BIND_LOCAL.to_le_bytes());
    packet
}

/// Parses a tunnel request. Used by the server side and by tests.
///
/// # Errors
///
/// Returns `TransportError::ProtocolError` if the packet is short or the magic is wrong.
pub fn parse_magic_packet(packet: &[u8]) -> Result<(i32, i32, i32), TransportError> {
    if packet.len() < EXA_MAGIC_PACKET_SIZE {
        return Err(TransportError::ProtocolError(format!(
            "Magic packet too short: expected {} bytes, got {}",
            EXA_MAGIC_PACKET_SIZE,
            packet.len()
        )));
    }

    let magic = i32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
    let count = i32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let bind = i32::from_le_bytes([packet[8], packet[9], packet[10], packet[11]]);

    if magic != EXA_MAGIC_NUMBER {
        return Err(TransportError::ProtocolError(format!(
            "Invalid magic number: expected 0x{:08X}, got 0x{:08X}",
            EXA_MAGIC_NUMBER, magic
        )));
    }

    Ok((magic, count, bind))
}

/// Builds a 24-byte tunnel response. Used by the server side and by tests.
///
/// Hosts longer than 16 bytes are truncated.
#[must_use]
pub fn build_response_packet(address: &TunnelAddress) -> [u8; EXA_RESPONSE_PACKET_SIZE] {
    let mut packet = [0u8; EXA_RESPONSE_PACKET_SIZE];
    packet[4..8].copy_from_slice(&i32::from(address.port).to_le_bytes());
    let host = address.host.as_bytes();
    let len = host.len().min(16);
    packet[8..8 + len].copy_from_slice(&host[..len]);
    packet
}

/// Parses the 24-byte tunnel response into the proxy address.
///
/// Layout, little-endian:
/// - Bytes 0-3: status, ignored
/// - Bytes 4-7: proxy port as `i32`
/// - Bytes 8-23: proxy host, NUL-padded
///
/// # Errors
///
/// Returns `TransportError::ProtocolError` if the packet is short, the port is out
/// of range, or the host is empty.
pub fn parse_response_packet(packet: &[u8]) -> Result<TunnelAddress, TransportError> {
    if packet.len() < EXA_RESPONSE_PACKET_SIZE {
        return Err(TransportError::ProtocolError(format!(
            "Response packet too short: expected {} bytes, got {}",
            EXA_RESPONSE_PACKET_SIZE,
            packet.len()
        )));
    }

    let port = i32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let port = u16::try_from(port).map_err(|_| {
        TransportError::ProtocolError(format!("Invalid port in response packet: {port}"))
    })?;

    let host = String::from_utf8_lossy(&packet[8..24])
        .trim_end_matches('\0')
        .to_string();

    if host.is_empty() {
        return Err(TransportError::ProtocolError(
            "Empty host in response packet".to_string(),
        ));
    }

    Ok(TunnelAddress::new(host, port))
}

/// Performs the tunnel handshake over an already connected stream.
///
/// # Errors
///
/// Returns `TransportError` on I/O failure, short read, or malformed response.
pub async fn perform_handshake<S>(stream: &mut S) -> Result<TunnelAddress, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&generate_magic_packet())
        .await
        .map_err(|e| TransportError::IoError(format!("Failed to send magic packet: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::IoError(format!("Failed to flush magic packet: {e}")))?;

    let mut response = [0u8; EXA_RESPONSE_PACKET_SIZE];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| TransportError::IoError(format!("Failed to read response packet: {e}")))?;

    parse_response_packet(&response)
}

/// A tunnelled connection to the database with its proxy address.
///
/// The socket is handed to the endpoint driver, which serves the one HTTP
/// request the database sends back over it.
#[derive(Debug)]
pub struct ProxyTunnel {
    stream: TcpStream,
    proxy_address: TunnelAddress,
}

impl ProxyTunnel {
    /// Connects to the database and performs the tunnel handshake.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the connection is refused or the handshake fails.
    pub async fn connect(server: &TunnelAddress) -> Result<Self, TransportError> {
        let addr = server.to_string();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransportError::IoError(format!("Failed to connect to {addr}: {e}")))?;
        // Best effort; the relay flushes explicitly anyway.
        let _ = stream.set_nodelay(true);

        let proxy_address = perform_handshake(&mut stream).await?;
        debug!(server = %server, proxy = %proxy_address, "tunnel handshake complete");

        Ok(Self {
            stream,
            proxy_address,
        })
    }

    /// Returns the address the database will use to reach us.
    #[must_use]
    pub fn proxy_address(&self) -> &TunnelAddress {
        &self.proxy_address
    }

    /// Consumes the tunnel, returning the socket and the proxy address.
    #[must_use]
    pub fn into_parts(self) -> (TcpStream, TunnelAddress) {
        (self.stream, self.proxy_address)
    }
}
