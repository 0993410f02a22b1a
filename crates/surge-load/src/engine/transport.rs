//! The transport capability set the engine is written against.
//!
//! A dial yields two halves: a [`ConnectionHandle`] that the roster keeps for
//! teardown, and a [`MessageReader`] that is moved into the client's reader
//! task. Closing the handle must make a pending `receive` fail.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::engine::error::{CloseError, DialError, ReadError};

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: ConnectionHandle;
    type Reader: MessageReader;

    /// Opens one connection, failing with [`DialError::Timeout`] once
    /// `handshake_timeout` elapses.
    async fn dial(
        &self,
        url: &str,
        handshake_timeout: Duration,
    ) -> Result<(Self::Handle, Self::Reader), DialError>;
}

#[async_trait]
pub trait MessageReader: Send + 'static {
    /// Waits for the next data message and returns its payload.
    async fn receive(&mut self) -> Result<Bytes, ReadError>;
}

#[async_trait]
pub trait ConnectionHandle: Send + 'static {
    /// Closes the connection. Calling it again after success is a no-op.
    async fn close(&mut self) -> Result<(), CloseError>;
}
