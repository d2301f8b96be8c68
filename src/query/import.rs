//! IMPORT statement builder.

use super::QuotingMode;
use crate::transport::tunnel::TunnelAddress;

/// Builder for `IMPORT INTO <table>[(<columns>)] FROM CSV AT ... FILE ...`.
///
/// Table and column names are rendered through the chosen [`QuotingMode`].
///
/// # Example
///
/// ```
/// use exabulk::query::{ImportQuery, QuotingMode};
/// use exabulk::TunnelAddress;
///
/// let sql = ImportQuery::new("t")
///     .columns(vec!["a", "b"])
///     .quoting(QuotingMode::Quoted)
///     .at_address(&TunnelAddress::new("10.0.0.5", 20001))
///     .file_name("ABC.csv")
///     .build();
///
/// assert_eq!(
///     sql,
///     "IMPORT INTO \"t\"(\"a\", \"b\") FROM CSV AT 'http://10.0.0.5:20001' FILE 'ABC.csv'"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ImportQuery {
    table: String,
    columns: Option<Vec<String>>,
    quoting: QuotingMode,
    address: Option<TunnelAddress>,
    file_name: String,
}

impl ImportQuery {
    /// Creates an import into `table`.
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: None,
            quoting: QuotingMode::default(),
            address: None,
            file_name: "000.csv".to_string(),
        }
    }

    /// Restricts the import to the given columns, in stream order.
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, cols: Vec<S>) -> Self {
        self.columns = Some(cols.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    #[must_use]
    pub fn quoting(mut self, quoting: QuotingMode) -> Self {
        self.quoting = quoting;
        self
    }

    #[must_use]
    pub fn at_address(mut self, address: &TunnelAddress) -> Self {
        self.address = Some(address.clone());
        self
    }

    #[must_use]
    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    /// Renders the statement.
    #[must_use]
    pub fn build(&self) -> String {
        let mut sql = String::with_capacity(256);

        sql.push_str("IMPORT INTO ");
        sql.push_str(&self.quoting.apply(&self.table));

        if let Some(ref cols) = self.columns {
            let rendered: Vec<String> = cols.iter().map(|c| self.quoting.apply(c)).collect();
            sql.push('(');
            sql.push_str(&rendered.join(", "));
            sql.push(')');
        }

        sql.push_str(" FROM CSV AT '");
        if let Some(ref address) = self.address {
            sql.push_str(&address.http_url());
        }
        sql.push_str("' FILE '");
        sql.push_str(&self.file_name);
        sql.push('\'');

        sql
    }
}
