#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_load::engine::error::{CloseError, DialError, ReadError};
use surge_load::engine::transport::{ConnectionHandle, MessageReader, Transport};
use tokio::net::TcpListener;
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tokio_util::sync::CancellationToken;

pub const URL: &str = "ws://scripted.test/average-price";

/// What every dial of a [`ScriptedTransport`] does.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Accept and stream one message per `every`.
    Accept { every: Duration },
    /// Answer every dial with the busy signal.
    AlwaysBusy,
    /// Fail every dial with a non-retryable error.
    Refuse,
    /// Busy for the first `busy` dials, then accept.
    BusyThenAccept { busy: usize, every: Duration },
    /// Accept even-numbered dials, refuse odd ones.
    Alternate { every: Duration },
    /// Accept, but the reader ignores close and never returns.
    Stubborn,
}

/// In-memory transport that records when it was dialled and how often
/// connections were closed.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Script,
    dials: Arc<Mutex<Vec<Instant>>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            dials: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn open(&self, every: Option<Duration>) -> (ScriptedHandle, ScriptedReader) {
        let token = CancellationToken::new();
        (
            ScriptedHandle {
                token: token.clone(),
                closes: Arc::clone(&self.closes),
                closed: false,
                cancel_on_close: every.is_some(),
            },
            ScriptedReader { token, every },
        )
    }
}

fn refused() -> DialError {
    DialError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Handle = ScriptedHandle;
    type Reader = ScriptedReader;

    async fn dial(
        &self,
        _url: &str,
        _handshake_timeout: Duration,
    ) -> Result<(ScriptedHandle, ScriptedReader), DialError> {
        let attempt = {
            let mut dials = self.dials.lock();
            dials.push(Instant::now());
            dials.len() - 1
        };

        match self.script {
            Script::Accept { every } => Ok(self.open(Some(every))),
            Script::AlwaysBusy => Err(DialError::Busy { status: 503 }),
            Script::Refuse => Err(refused()),
            Script::BusyThenAccept { busy, every } => {
                if attempt < busy {
                    Err(DialError::Busy { status: 503 })
                } else {
                    Ok(self.open(Some(every)))
                }
            }
            Script::Alternate { every } => {
                if attempt % 2 == 0 {
                    Ok(self.open(Some(every)))
                } else {
                    Err(refused())
                }
            }
            Script::Stubborn => Ok(self.open(None)),
        }
    }
}

pub struct ScriptedHandle {
    token: CancellationToken,
    closes: Arc<AtomicUsize>,
    closed: bool,
    cancel_on_close: bool,
}

impl ScriptedHandle {
    /// A handle that is not attached to any transport.
    pub fn detached(closes: Arc<AtomicUsize>) -> Self {
        Self {
            token: CancellationToken::new(),
            closes,
            closed: false,
            cancel_on_close: true,
        }
    }
}

#[async_trait]
impl ConnectionHandle for ScriptedHandle {
    async fn close(&mut self) -> Result<(), CloseError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.cancel_on_close {
            self.token.cancel();
        }
        Ok(())
    }
}

pub struct ScriptedReader {
    token: CancellationToken,
    /// `None` never yields a message and ignores close.
    every: Option<Duration>,
}

#[async_trait]
impl MessageReader for ScriptedReader {
    async fn receive(&mut self) -> Result<Bytes, ReadError> {
        let Some(every) = self.every else {
            std::future::pending::<()>().await;
            unreachable!();
        };
        tokio::select! {
            _ = self.token.cancelled() => Err(ReadError::Closed),
            _ = sleep(every) => Ok(Bytes::from_static(b"{\"price\":42.0}")),
        }
    }
}

/// Handle whose close always fails.
pub struct FailingHandle;

#[async_trait]
impl ConnectionHandle for FailingHandle {
    async fn close(&mut self) -> Result<(), CloseError> {
        Err(CloseError::Transport("broken pipe".to_string()))
    }
}

/// Handle whose close never completes.
pub struct HangingHandle;

#[async_trait]
impl ConnectionHandle for HangingHandle {
    async fn close(&mut self) -> Result<(), CloseError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// WebSocket server that sends a text message to every client once per
/// `every` until the client goes away.
pub async fn spawn_stream_server(every: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut source) = ws.split();
                let mut ticker = interval(every);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if sink.send(Message::Text("{\"price\":42.0}".into())).await.is_err() {
                                return;
                            }
                        }
                        msg = source.next() => match msg {
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            });
        }
    });

    format!("ws://{}/average-price", addr)
}

fn reject_with(
    status: StatusCode,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    move |_req, _resp| {
        let mut rejection = ErrorResponse::new(Some("try again later".to_string()));
        *rejection.status_mut() = status;
        Err(rejection)
    }
}

/// WebSocket server that refuses every handshake with `status`.
pub async fn spawn_rejecting_server(status: StatusCode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = accept_hdr_async(stream, reject_with(status)).await;
            });
        }
    });

    format!("ws://{}/average-price", addr)
}

/// TCP server that accepts connections and never answers the handshake.
pub async fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _held = stream;
                sleep(Duration::from_secs(30)).await;
            });
        }
    });

    format!("ws://{}/average-price", addr)
}
