//! In-process stand-in for the database side of a tunnelled transfer.
//!
//! `MockEngine` listens for tunnel handshakes and hands out a distinct proxy
//! address per tunnel. `MockExecutor` plays the SQL client: it parses the
//! EXPORT/IMPORT statement, finds the tunnel by the address in the `AT` clause,
//! and speaks HTTP over it the way the database does.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use exabulk::codec::CsvRecordReader;
use exabulk::transport::http::encode_chunk;
use exabulk::transport::tunnel::{
    build_response_packet, parse_magic_packet, EXA_MAGIC_PACKET_SIZE,
};
use exabulk::{BoxError, CsvFormat, SqlExecutor, TransferConfig, TunnelAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Poll interval used by the integration tests.
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Bytes per chunk the mock sends for an export.
const EXPORT_CHUNK_SIZE: usize = 4000;

/// Installs a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Misbehaviour the engine applies to the next transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Export: the second chunk is followed by `XX` instead of CRLF.
    BadDelimiter,
    /// Import: close the tunnel without requesting data, then report success.
    DropTunnel,
    /// Import: read the response head, close the tunnel mid-body, then report success.
    DropAfterHead,
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Default)]
struct EngineState {
    tunnels: Mutex<HashMap<String, TcpStream>>,
    tables: Mutex<HashMap<String, Table>>,
    assigned: Mutex<Vec<TunnelAddress>>,
    statements: Mutex<Vec<String>>,
    fault: Mutex<Option<Fault>>,
}

pub struct MockEngine {
    address: TunnelAddress,
    state: Arc<EngineState>,
    accept_task: JoinHandle<()>,
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl MockEngine {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(EngineState::default());

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            let next = AtomicU16::new(1);
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut request = [0u8; EXA_MAGIC_PACKET_SIZE];
                if stream.read_exact(&mut request).await.is_err()
                    || parse_magic_packet(&request).is_err()
                {
                    continue;
                }

                let n = next.fetch_add(1, Ordering::SeqCst);
                let proxy = TunnelAddress::new(format!("10.0.0.{n}"), 20000 + n);
                if stream.write_all(&build_response_packet(&proxy)).await.is_err() {
                    continue;
                }
                accept_state.assigned.lock().unwrap().push(proxy.clone());
                accept_state
                    .tunnels
                    .lock()
                    .unwrap()
                    .insert(proxy.to_string(), stream);
            }
        });

        Self {
            address: TunnelAddress::new("127.0.0.1", port),
            state,
            accept_task,
        }
    }

    pub fn address(&self) -> TunnelAddress {
        self.address.clone()
    }

    /// A configuration pointing at this engine with a short poll interval.
    pub fn config(&self) -> TransferConfig {
        TransferConfig::new(self.address()).poll_interval(TEST_POLL_INTERVAL)
    }

    pub fn executor(&self) -> MockExecutor {
        MockExecutor {
            state: Arc::clone(&self.state),
        }
    }

    pub fn create_table(&self, name: &str, columns: &[&str], rows: Vec<Vec<String>>) {
        self.state.tables.lock().unwrap().insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.state.tables.lock().unwrap().get(name).cloned()
    }

    pub fn inject(&self, fault: Fault) {
        *self.state.fault.lock().unwrap() = Some(fault);
    }

    pub fn assigned_addresses(&self) -> Vec<TunnelAddress> {
        self.state.assigned.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().unwrap().clone()
    }

    /// Returns true once the client has closed the tunnel for `proxy`.
    pub async fn tunnel_closed_by_client(&self, proxy: &TunnelAddress) -> bool {
        let stream = self.state.tunnels.lock().unwrap().remove(&proxy.to_string());
        let Some(mut stream) = stream else {
            return false;
        };
        let mut buf = [0u8; 16];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

/// Integer rows `1..=n` for a single-column table.
pub fn int_rows(n: usize) -> Vec<Vec<String>> {
    (1..=n).map(|i| vec![i.to_string()]).collect()
}

/// Two-column rows `(i, name_i)`.
pub fn named_rows(n: usize) -> Vec<Vec<String>> {
    (1..=n).map(|i| vec![i.to_string(), format!("name_{i}")]).collect()
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = s.find(start)? + start.len();
    let len = s[from..].find(end)?;
    Some(&s[from..from + len])
}

fn unquote(identifier: &str) -> String {
    let identifier = identifier.trim();
    if identifier.len() >= 2 && identifier.starts_with('"') && identifier.ends_with('"') {
        identifier[1..identifier.len() - 1].replace("\"\"", "\"")
    } else {
        identifier.to_string()
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

pub struct MockExecutor {
    state: Arc<EngineState>,
}

impl MockExecutor {
    fn take_fault(&self) -> Option<Fault> {
        self.state.fault.lock().unwrap().take()
    }

    async fn take_tunnel(&self, key: &str) -> Result<TcpStream, BoxError> {
        // The handshake reply can reach the client just before the tunnel is
        // registered.
        for _ in 0..200 {
            let stream = self.state.tunnels.lock().unwrap().remove(key);
            if let Some(stream) = stream {
                return Ok(stream);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(format!("no tunnel registered for {key}").into())
    }

    /// `SELECT <cols> FROM <table>` against the in-memory tables.
    fn run_query(&self, query: &str) -> Result<(Vec<String>, Vec<Vec<String>>), BoxError> {
        let cols = between(query, "SELECT ", " FROM ").ok_or("unsupported query")?;
        let table_name = query
            .split(" FROM ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or("unsupported query")?;

        let tables = self.state.tables.lock().unwrap();
        let table = tables
            .get(table_name)
            .ok_or_else(|| format!("object {table_name} not found"))?;

        if cols.trim() == "*" {
            return Ok((table.columns.clone(), table.rows.clone()));
        }

        let mut indices = Vec::new();
        let mut names = Vec::new();
        for col in cols.split(',') {
            let col = col.trim();
            let index = table
                .columns
                .iter()
                .position(|c| c == col)
                .ok_or_else(|| format!("column {col} not found"))?;
            indices.push(index);
            names.push(col.to_string());
        }
        let rows = table
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok((names, rows))
    }

    async fn export(&self, sql: &str) -> Result<u64, BoxError> {
        let query = between(sql, "EXPORT (", ") INTO CSV AT").ok_or("bad EXPORT")?;
        let key = between(sql, "AT 'http://", "'").ok_or("bad AT clause")?;
        let file = between(sql, "FILE '", "'").ok_or("bad FILE clause")?;
        if !sql.ends_with("WITH COLUMN NAMES") {
            return Err("missing WITH COLUMN NAMES".into());
        }
        let (columns, rows) = self.run_query(query)?;
        let fault = self.take_fault();

        let mut body = csv_line(&columns);
        for row in &rows {
            body.push_str(&csv_line(row));
        }

        let mut stream = self.take_tunnel(key).await?;
        let head = format!(
            "PUT /{file} HTTP/1.1\r\nHost: {key}\r\nTransfer-Encoding: chunked\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await?;

        for (i, chunk) in body.as_bytes().chunks(EXPORT_CHUNK_SIZE).enumerate() {
            if fault == Some(Fault::BadDelimiter) && i == 1 {
                let mut bad = format!("{:X}\r\n", chunk.len()).into_bytes();
                bad.extend_from_slice(chunk);
                bad.extend_from_slice(b"XX");
                stream.write_all(&bad).await?;
                break;
            }
            stream.write_all(&encode_chunk(chunk)).await?;
        }
        if fault != Some(Fault::BadDelimiter) {
            stream.write_all(&encode_chunk(&[])).await?;
        }

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        if response.starts_with(b"HTTP/1.1 200") {
            Ok(rows.len() as u64)
        } else {
            Err("HTTP upload was not acknowledged".into())
        }
    }

    async fn import(&self, sql: &str) -> Result<u64, BoxError> {
        let target = between(sql, "IMPORT INTO ", " FROM CSV AT").ok_or("bad IMPORT")?;
        let key = between(sql, "AT 'http://", "'").ok_or("bad AT clause")?;
        let file = between(sql, "FILE '", "'").ok_or("bad FILE clause")?;

        let (table_name, columns) = match target.find('(') {
            Some(open) => {
                let cols = target[open + 1..].trim_end_matches(')');
                (
                    unquote(&target[..open]),
                    Some(cols.split(", ").map(unquote).collect::<Vec<_>>()),
                )
            }
            None => (unquote(target), None),
        };

        let arity = {
            let tables = self.state.tables.lock().unwrap();
            let table = tables
                .get(&table_name)
                .ok_or_else(|| format!("object {table_name} not found"))?;
            match columns {
                Some(ref cols) => {
                    for col in cols {
                        if !table.columns.contains(col) {
                            return Err(format!("column {col} not found").into());
                        }
                    }
                    cols.len()
                }
                None => table.columns.len(),
            }
        };

        let mut stream = self.take_tunnel(key).await?;
        let fault = self.take_fault();
        if fault == Some(Fault::DropTunnel) {
            drop(stream);
            return Ok(0);
        }

        let request = format!("GET /{file} HTTP/1.1\r\nHost: {key}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        if fault == Some(Fault::DropAfterHead) {
            let mut head = Vec::new();
            let mut buf = [0u8; 512];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            drop(stream);
            return Ok(0);
        }

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        let head_end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or("incomplete HTTP response")?
            + 4;
        if !response.starts_with(b"HTTP/1.1 200") {
            return Err("HTTP download was rejected".into());
        }

        let mut reader = CsvRecordReader::new(&response[head_end..], CsvFormat::default());
        let mut rows = Vec::new();
        while let Some(record) = reader.next_record().await? {
            if record.len() != arity {
                return Err(format!(
                    "row {} has {} columns, expected {arity}",
                    rows.len() + 1,
                    record.len()
                )
                .into());
            }
            rows.push(record);
        }

        let count = rows.len() as u64;
        let mut tables = self.state.tables.lock().unwrap();
        let table = tables
            .get_mut(&table_name)
            .ok_or_else(|| format!("object {table_name} not found"))?;
        table.rows.extend(rows);
        Ok(count)
    }
}

#[async_trait]
impl SqlExecutor for MockExecutor {
    async fn execute(&mut self, sql: &str) -> Result<u64, BoxError> {
        self.state.statements.lock().unwrap().push(sql.to_string());
        if sql.starts_with("EXPORT ") {
            self.export(sql).await
        } else if sql.starts_with("IMPORT ") {
            self.import(sql).await
        } else {
            Ok(0)
        }
    }
}
