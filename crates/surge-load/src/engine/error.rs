use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why a dial attempt failed. Only [`DialError::Busy`] is retried.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("server busy (status {status}), try again later")]
    Busy { status: u16 },
    #[error("handshake rejected with status {status}")]
    Rejected { status: u16 },
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl DialError {
    pub fn is_busy(&self) -> bool {
        matches!(self, DialError::Busy { .. })
    }

    /// Stable label used for the connect-error breakdown in the report.
    pub fn kind(&self) -> &'static str {
        match self {
            DialError::Busy { .. } => "busy",
            DialError::Rejected { .. } => "rejected",
            DialError::Timeout(_) => "timeout",
            DialError::Io(_) => "io",
            DialError::Handshake(_) => "handshake",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("connection closed")]
    Closed,
    #[error("peer sent close frame (code {code:?})")]
    ClosedByPeer { code: Option<u16> },
    #[error("reader cancelled during drain")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("close timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("client {0} is outside the roster")]
    OutOfRange(usize),
    #[error("client {0} already holds a connection")]
    Occupied(usize),
}
