//! WebSocket link to the Baileys sidecar.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, anyhow, bail},
    futures::{SinkExt, StreamExt},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Default port of the sidecar WebSocket server.
pub const DEFAULT_SIDECAR_PORT: u16 = 3710;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Invoked for every frame received from the sidecar, in arrival order.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

type SidecarSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sending half of a live sidecar connection. Cheap to clone.
#[derive(Clone)]
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<GatewayMessage>,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.write_tx.is_closed()
    }

    /// Queue a frame for the sidecar.
    pub fn send(&self, msg: GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            bail!("WhatsApp sidecar is not connected");
        }
        self.write_tx
            .send(msg)
            .map_err(|_| anyhow!("WhatsApp sidecar connection closed"))
    }

    /// A handle whose frames go to the returned receiver instead of a socket.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<GatewayMessage>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let handle = Self {
            write_tx,
            connected: Arc::new(AtomicBool::new(true)),
        };
        (handle, write_rx)
    }
}

pub fn sidecar_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}")
}

/// Connect once. The returned receiver fires when the connection ends.
pub async fn connect(
    port: u16,
    callback: MessageCallback,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let url = sidecar_url(port);
    let (socket, _response) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to WhatsApp sidecar at {url}"))?;
    info!(%url, "connected to WhatsApp sidecar");

    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(run_connection(
        socket,
        write_rx,
        callback,
        Arc::clone(&connected),
        closed_tx,
    ));

    Ok((
        SidecarHandle {
            write_tx,
            connected,
        },
        closed_rx,
    ))
}

/// Connect with linear backoff, for a sidecar process that may still be
/// starting up.
pub async fn connect_with_retry(
    port: u16,
    callback: MessageCallback,
    attempts: u32,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect(port, Arc::clone(&callback)).await {
            Ok(connection) => return Ok(connection),
            Err(e) if attempt < attempts => {
                debug!(attempt, error = %e, "WhatsApp sidecar not reachable yet");
                tokio::time::sleep(RETRY_DELAY * attempt).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

async fn run_connection(
    socket: SidecarSocket,
    mut write_rx: mpsc::UnboundedReceiver<GatewayMessage>,
    callback: MessageCallback,
    connected: Arc<AtomicBool>,
    closed_tx: oneshot::Sender<()>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SidecarMessage>(&text) {
                        Ok(msg) => callback(msg),
                        Err(e) => warn!(error = %e, frame = text.as_str(), "unrecognized sidecar frame"),
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!(error = %e, "failed to answer sidecar ping");
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WhatsApp sidecar closed the connection");
                    break;
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!(error = %e, "WhatsApp sidecar connection error");
                    break;
                },
            },
            outgoing = write_rx.recv() => match outgoing {
                Some(msg) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to encode sidecar frame");
                            continue;
                        },
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        warn!(error = %e, "failed to write to WhatsApp sidecar");
                        break;
                    }
                },
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                },
            },
        }
    }

    connected.store(false, Ordering::Release);
    let _ = closed_tx.send(());
}
