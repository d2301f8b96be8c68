//! Per-call transfer state shared by the orchestrator and its two tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

use crate::error::TransferError;
use crate::transport::tunnel::TunnelAddress;

/// Length of the random part of a session file name.
pub const FILE_NAME_LENGTH: usize = 32;

/// Which way rows flow in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Database to client: the database uploads with `PUT`.
    Export,
    /// Client to database: the database downloads with `GET`.
    Import,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Export => write!(f, "export"),
            Direction::Import => write!(f, "import"),
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    error: Option<TransferError>,
    sealed: bool,
}

/// First-error-wins cell for faults raised on background tasks.
///
/// Once an error is recorded, later ones are discarded. After [`seal`](Self::seal)
/// nothing new is recorded, but an error recorded before sealing is kept.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    state: Mutex<SlotState>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `err` unless an error is already present or the slot is sealed.
    ///
    /// Returns true if `err` was recorded.
    pub fn set(&self, err: TransferError) -> bool {
        let mut state = self.lock();
        if state.error.is_some() || state.sealed {
            warn!(error = %err, "discarding error, slot already settled");
            return false;
        }
        warn!(error = %err, "recording transfer error");
        state.error = Some(err);
        true
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.lock().error.is_some()
    }

    /// Stops recording further errors.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// Removes and returns the recorded error.
    pub fn take(&self) -> Option<TransferError> {
        self.lock().error.take()
    }
}

/// Generates the file name used in the triggering statement.
#[must_use]
pub fn random_file_name() -> String {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FILE_NAME_LENGTH)
        .map(char::from)
        .collect();
    format!("{}.csv", name.to_uppercase())
}

/// One import or export call.
///
/// Created after the tunnel handshake and dropped when the call returns. Pipe
/// ends and signals are owned by whichever task uses them.
#[derive(Debug)]
pub struct TransferSession {
    direction: Direction,
    proxy_address: TunnelAddress,
    file_name: String,
    statement: String,
    error_slot: ErrorSlot,
    aborted: AtomicBool,
}

impl TransferSession {
    pub fn new(
        direction: Direction,
        proxy_address: TunnelAddress,
        file_name: String,
        statement: String,
    ) -> Self {
        Self {
            direction,
            proxy_address,
            file_name,
            statement,
            error_slot: ErrorSlot::new(),
            aborted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Address the database connects back to.
    #[must_use]
    pub fn proxy_address(&self) -> &TunnelAddress {
        &self.proxy_address
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The rendered EXPORT or IMPORT statement.
    #[must_use]
    pub fn statement(&self) -> &str {
        &self.statement
    }

    #[must_use]
    pub fn error_slot(&self) -> &ErrorSlot {
        &self.error_slot
    }

    /// Marks the local side as failed; an in-flight download is reset
    /// instead of being ended cleanly.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}
