//! Minimal Chrome DevTools Protocol client over a WebSocket.
//!
//! Commands are JSON objects `{id, method, params}`; the browser answers with
//! `{id, result}` or `{id, error}` and pushes unsolicited `{method, params}`
//! events on the same socket. A background task owns the read half: replies
//! are routed to the waiting caller through a oneshot channel, events are
//! handed to the [`EventHandler`] supplied at connect time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::lock;
use crate::error::{Result, ScrapeError};

/// Called from the reader task for every event, in arrival order.
pub type EventHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = std::result::Result<Value, String>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Frame received from the browser: either a reply or an event.
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<CdpError>,
}

#[derive(Debug, Deserialize)]
struct CdpError {
    code: i64,
    message: String,
}

pub struct CdpConnection {
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a DevTools WebSocket endpoint and start the reader task.
    pub async fn connect(ws_url: &str, on_event: EventHandler) -> Result<Self> {
        info!("[cdp] Connecting to {}", ws_url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_url).await?;
        info!("[cdp] Connected");

        let (write, read) = ws_stream.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            read_loop(read, reader_pending, on_event).await;
        });

        Ok(CdpConnection {
            writer: tokio::sync::Mutex::new(write),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Send a command and wait for its reply.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let frame = serde_json::json!({ "id": id, "method": method, "params": params });
        debug!("[cdp] -> {} #{}", method, id);
        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await;
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(ScrapeError::Browser(format!("{}: {}", method, message))),
            Ok(Err(_)) => Err(ScrapeError::Browser(format!(
                "{}: connection closed before reply",
                method
            ))),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ScrapeError::timeout(format!("reply to {}", method), COMMAND_TIMEOUT))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stop the reader task; outstanding calls fail with a browser error.
    pub async fn close(&self) {
        let _ = self.writer.lock().await.close().await;
        self.reader.abort();
        fail_pending(&self.pending, "connection closed");
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut read: futures_util::stream::SplitStream<WsStream>,
    pending: PendingMap,
    on_event: EventHandler,
) {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => dispatch(&text, &pending, &on_event),
            Some(Ok(Message::Close(_))) => {
                warn!("[cdp] Browser closed the connection");
                break;
            }
            Some(Err(e)) => {
                error!("[cdp] WebSocket error: {}", e);
                break;
            }
            None => {
                warn!("[cdp] WebSocket stream ended");
                break;
            }
            _ => {}
        }
    }
    fail_pending(&pending, "connection closed");
}

fn dispatch(text: &str, pending: &PendingMap, on_event: &EventHandler) {
    let incoming: Incoming = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("[cdp] Unparseable frame ({}): {:.200}", e, text);
            return;
        }
    };

    if let Some(id) = incoming.id {
        let Some(tx) = lock(pending).remove(&id) else {
            warn!("[cdp] Reply for unknown command #{}", id);
            return;
        };
        let reply = match incoming.error {
            Some(err) => Err(format!("{} (code {})", err.message, err.code)),
            None => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(reply);
    } else if let Some(method) = incoming.method {
        on_event(&method, &incoming.params);
    }
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(reason.to_string()));
    }
}
