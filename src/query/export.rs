//! EXPORT statement builder.

use crate::transport::tunnel::TunnelAddress;

/// Builder for `EXPORT (<query>) INTO CSV AT ... FILE ... WITH COLUMN NAMES`.
///
/// # Example
///
/// ```
/// use exabulk::query::ExportQuery;
/// use exabulk::TunnelAddress;
///
/// let sql = ExportQuery::new("SELECT x FROM t")
///     .at_address(&TunnelAddress::new("10.0.0.5", 20001))
///     .file_name("ABC.csv")
///     .build();
///
/// assert_eq!(
///     sql,
///     "EXPORT (SELECT x FROM t) INTO CSV AT 'http://10.0.0.5:20001' FILE 'ABC.csv' WITH COLUMN NAMES"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ExportQuery {
    query: String,
    address: Option<TunnelAddress>,
    file_name: String,
}

impl ExportQuery {
    /// Creates an export of the result of `query`.
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            address: None,
            file_name: "000.csv".to_string(),
        }
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
        let mut sql = String::with_capacity(self.query.len() + 96);

        sql.push_str("EXPORT (");
        sql.push_str(&self.query);
        sql.push_str(") INTO CSV AT '");
        if let Some(ref address) = self.address {
            sql.push_str(&address.http_url());
        }
        sql.push_str("' FILE '");
        sql.push_str(&self.file_name);
        sql.push_str("' WITH COLUMN NAMES");

        sql
    }
}
