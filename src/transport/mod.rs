//! Wire-level pieces of a transfer.
//!
//! - `tunnel` - EXA tunnelling handshake against the database
//! - `http` - the HTTP/1.1 subset the database speaks over the tunnel
//! - `endpoint` - one-shot upload/download handler built on `http`
//! - `pipe` - local byte pipe between the endpoint and the codec

pub mod endpoint;
pub mod http;
pub mod pipe;
pub mod tunnel;

pub use endpoint::{ChunkedTransferEndpoint, PendingChunk};
pub use pipe::{pipe, PipeCloser, PipeReader, PipeWriter};
pub use tunnel::{ProxyTunnel, TunnelAddress};
