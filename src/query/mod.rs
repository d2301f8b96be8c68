//! SQL statements that trigger a tunnelled transfer.
//!
//! The statement tells the database to connect to the proxy address and either
//! upload (`EXPORT`) or download (`IMPORT`) the CSV stream. The file name it
//! carries is required by the grammar but otherwise unused.

pub mod export;
pub mod import;

use serde::Deserialize;

pub use export::ExportQuery;
pub use import::ImportQuery;

/// How table and column identifiers are rendered in generated SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotingMode {
    /// Identifiers are passed through as given.
    #[default]
    Unquoted,
    /// Identifiers are wrapped in double quotes, embedded quotes doubled.
    Quoted,
}

impl QuotingMode {
    /// Renders one identifier under this policy.
    #[must_use]
    pub fn apply(self, identifier: &str) -> String {
        match self {
            QuotingMode::Unquoted => identifier.to_string(),
            QuotingMode::Quoted => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }
}
