use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::engine::error::{CloseError, RosterError};
use crate::engine::transport::ConnectionHandle;

/// Set on `messages` once teardown has closed the connection.
const CLOSED: u64 = 1 << 63;

/// Upper bound on close calls in flight during teardown.
const TEARDOWN_CONCURRENCY: usize = 256;

/// Counters owned by one client and shared with its reader task.
#[derive(Debug, Default)]
pub struct ClientCounters {
    messages: AtomicU64,
    bytes: AtomicU64,
    read_errors: AtomicU64,
}

impl ClientCounters {
    /// Counts one received message. Returns `false`, without counting, if the
    /// connection has already been closed by teardown.
    pub fn record_message(&self, len: usize) -> bool {
        let counted = self
            .messages
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v & CLOSED == 0).then_some(v + 1)
            })
            .is_ok();
        if counted {
            self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        }
        counted
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_closed(&self) {
        self.messages.fetch_or(CLOSED, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.messages.load(Ordering::Acquire) & CLOSED != 0
    }

    pub fn messages_received(&self) -> u64 {
        self.messages.load(Ordering::Acquire) & !CLOSED
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }
}

pub struct ClientRecord<H> {
    id: usize,
    counters: Arc<ClientCounters>,
    connection: Mutex<Option<H>>,
}

impl<H> ClientRecord<H> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn counters(&self) -> &Arc<ClientCounters> {
        &self.counters
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }
}

/// Outcome of one teardown pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownSummary {
    pub closed: usize,
    pub close_errors: usize,
}

/// Fixed-size table of per-client records, indexed by client id.
pub struct Roster<H> {
    records: Vec<ClientRecord<H>>,
}

impl<H: ConnectionHandle> Roster<H> {
    pub fn new(size: usize) -> Self {
        let records = (0..size)
            .map(|id| ClientRecord {
                id,
                counters: Arc::new(ClientCounters::default()),
                connection: Mutex::new(None),
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ClientRecord<H>> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &ClientRecord<H>> {
        self.records.iter()
    }

    /// Stores the live connection for `id`. Each slot accepts exactly one
    /// handle; a rejected handle is given back to the caller.
    pub fn register(
        &self,
        id: usize,
        handle: H,
    ) -> Result<Arc<ClientCounters>, (RosterError, H)> {
        let Some(record) = self.records.get(id) else {
            return Err((RosterError::OutOfRange(id), handle));
        };
        let mut slot = record.connection.lock();
        if slot.is_some() {
            return Err((RosterError::Occupied(id), handle));
        }
        *slot = Some(handle);
        Ok(Arc::clone(&record.counters))
    }

    pub fn connected(&self) -> usize {
        self.records.iter().filter(|r| r.is_connected()).count()
    }

    pub fn total_read_errors(&self) -> u64 {
        self.records.iter().map(|r| r.counters.read_errors()).sum()
    }

    /// Closes every present connection once. Handles are taken out of their
    /// slots, so a second pass finds nothing to close.
    pub async fn teardown(&self, close_timeout: Duration) -> TeardownSummary {
        let results: Vec<Option<Result<(), CloseError>>> = stream::iter(self.records.iter())
            .map(|record| async move {
                record.counters.mark_closed();
                let Some(mut handle) = record.connection.lock().take() else {
                    return None;
                };
                let result = match timeout(close_timeout, handle.close()).await {
                    Ok(result) => result,
                    Err(_) => Err(CloseError::Timeout(close_timeout)),
                };
                match &result {
                    Ok(()) => debug!(client = record.id, "Connection closed"),
                    Err(e) => warn!(client = record.id, error = %e, "Error closing connection"),
                }
                Some(result)
            })
            .buffer_unordered(TEARDOWN_CONCURRENCY)
            .collect()
            .await;

        results
            .into_iter()
            .flatten()
            .fold(TeardownSummary::default(), |mut summary, result| {
                match result {
                    Ok(()) => summary.closed += 1,
                    Err(_) => summary.close_errors += 1,
                }
                summary
            })
    }
}
