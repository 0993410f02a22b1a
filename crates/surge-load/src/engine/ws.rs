use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::engine::error::{CloseError, DialError, ReadError};
use crate::engine::transport::{ConnectionHandle, MessageReader, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

pub struct WsHandle {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

/// Maps a failed handshake onto the dial taxonomy. A `503 Service Unavailable`
/// answer is the server's way of saying "try again later".
fn classify(err: WsError) -> DialError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                DialError::Busy {
                    status: status.as_u16(),
                }
            } else {
                DialError::Rejected {
                    status: status.as_u16(),
                }
            }
        }
        WsError::Io(e) => DialError::Io(e),
        other => DialError::Handshake(other.to_string()),
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Handle = WsHandle;
    type Reader = WsReader;

    async fn dial(
        &self,
        url: &str,
        handshake_timeout: Duration,
    ) -> Result<(WsHandle, WsReader), DialError> {
        match timeout(handshake_timeout, connect_async(url)).await {
            Ok(Ok((ws, response))) => {
                debug!(url = %url, status = %response.status(), "Handshake complete");
                let (sink, stream) = ws.split();
                Ok((
                    WsHandle {
                        sink,
                        closed: false,
                    },
                    WsReader { stream },
                ))
            }
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(DialError::Timeout(handshake_timeout)),
        }
    }
}

#[async_trait]
impl MessageReader for WsReader {
    async fn receive(&mut self) -> Result<Bytes, ReadError> {
        loop {
            match self.stream.next().await {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    return Ok(msg.into_data())
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(ReadError::ClosedByPeer {
                        code: frame.map(|f| u16::from(f.code)),
                    })
                }
                // Ping/pong are answered by tungstenite and are not payload.
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(ReadError::Closed)
                }
                Some(Err(e)) => return Err(ReadError::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl ConnectionHandle for WsHandle {
    async fn close(&mut self) -> Result<(), CloseError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(CloseError::Transport(e.to_string())),
        }
    }
}
