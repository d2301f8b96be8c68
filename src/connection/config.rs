//! Transfer configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::codec::{Codec, CsvFormat};
use crate::error::TransferError;
use crate::query::QuotingMode;
use crate::transport::tunnel::TunnelAddress;

/// Default Endpoint Driver poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default local pipe buffer.
pub const DEFAULT_PIPE_CAPACITY: usize = 65535;

/// Options applied to every transfer of a [`BulkConnection`](super::BulkConnection).
///
/// Can be embedded in an application's own configuration:
///
/// ```
/// use exabulk::TransferConfig;
///
/// let config: TransferConfig = serde_json::from_str(
///     r#"{ "server_address": { "host": "exasol.local", "port": 8563 }, "default_codec": "csv" }"#,
/// ).unwrap();
/// assert_eq!(config.poll_interval_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Database address the tunnel is opened against.
    pub server_address: TunnelAddress,

    /// Identifier quoting for IMPORT targets (default: unquoted).
    pub quoting: QuotingMode,

    /// Codec used by `read_data` / `write_data` (default: Arrow).
    pub default_codec: Codec,

    /// How often the endpoint driver checks for errors while waiting (default: 1000 ms).
    pub poll_interval_ms: u64,

    /// Local pipe buffer in bytes (default: 65535).
    pub pipe_capacity: usize,

    /// CSV dialect for the built-in codecs.
    pub csv: CsvFormat,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            server_address: TunnelAddress::default(),
            quoting: QuotingMode::default(),
            default_codec: Codec::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            csv: CsvFormat::default(),
        }
    }
}

impl TransferConfig {
    /// Creates a configuration for the given database address.
    pub fn new(server_address: TunnelAddress) -> Self {
        Self {
            server_address,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn quoting(mut self, quoting: QuotingMode) -> Self {
        self.quoting = quoting;
        self
    }

    #[must_use]
    pub fn default_codec(mut self, codec: Codec) -> Self {
        self.default_codec = codec;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    #[must_use]
    pub fn csv_format(mut self, format: CsvFormat) -> Self {
        self.csv = format;
        self
    }

    /// The poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Checks that a transfer can be started with this configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<(), TransferError> {
        if !self.server_address.is_specified() {
            return Err(TransferError::InvalidConfig(format!(
                "server address '{}' needs a host and a non-zero port",
                self.server_address
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(TransferError::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.pipe_capacity == 0 {
            return Err(TransferError::InvalidConfig(
                "pipe_capacity must be greater than zero".to_string(),
            ));
        }

        let (separator, delimiter) = self
            .csv
            .as_bytes()
            .map_err(|e| TransferError::InvalidConfig(e.to_string()))?;
        if separator == delimiter {
            return Err(TransferError::InvalidConfig(
                "column separator and delimiter must differ".to_string(),
            ));
        }

        Ok(())
    }
}
