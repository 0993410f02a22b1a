//! Minimal price-feed server to point `surge-load` at.
//!
//! ```text
//! cargo run --example stream_server -- --listen 127.0.0.1:8081 --rate 10
//! cargo run --release -- --clients 500 --duration 5
//! ```
//!
//! `--busy-every N` answers every Nth handshake with `503 Service Unavailable`
//! to exercise the client retry path.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tracing::{debug, info};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8081")]
    listen: String,

    /// Messages per second sent to each connection
    #[arg(long, default_value_t = 10)]
    rate: u32,

    /// Reject every Nth handshake as busy (0 disables)
    #[arg(long, default_value_t = 0)]
    busy_every: usize,
}

fn busy(_req: &Request, _resp: Response) -> Result<Response, ErrorResponse> {
    let mut rejection = ErrorResponse::new(Some("try again later".to_string()));
    *rejection.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    Err(rejection)
}

async fn serve(stream: TcpStream, period: Duration, reject: bool) {
    if reject {
        let _ = accept_hdr_async(stream, busy).await;
        return;
    }
    let Ok(ws) = accept_async(stream).await else {
        return;
    };

    let (mut sink, mut source) = ws.split();
    let mut ticker = interval(period);
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                seq += 1;
                let payload = format!("{{\"seq\":{},\"price\":{:.2}}}", seq, 100.0 + (seq % 50) as f64 / 10.0);
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    return;
                }
            }
            msg = source.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let period = Duration::from_secs(1) / args.rate.max(1);
    let listener = TcpListener::bind(&args.listen).await?;
    let accepted = Arc::new(AtomicUsize::new(0));
    info!(listen = %args.listen, rate = args.rate, "Stream server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let n = accepted.fetch_add(1, Ordering::Relaxed) + 1;
        let reject = args.busy_every > 0 && n % args.busy_every == 0;
        debug!(peer = %peer, reject, "Accepted connection");
        tokio::spawn(serve(stream, period, reject));
    }
}
