use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::broadcast::{Observer, ObserverError};
use crate::models::StreamMessage;
use crate::AppState;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half of an accepted WebSocket
pub struct WsObserver {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    send_timeout: Duration,
}

impl WsObserver {
    pub fn new(sink: SplitSink<WebSocket, Message>, send_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            send_timeout,
        }
    }
}

#[async_trait]
impl Observer for WsObserver {
    async fn send(&self, frame: &str) -> Result<(), ObserverError> {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(frame.into())).await
        };
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ObserverError::Send(e.to_string())),
            Err(_) => Err(ObserverError::Timeout),
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one observer until it goes away
///
/// Each connection owns a summary reader on the shared live group; the
/// reader is stopped once the socket closes.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let observer = Arc::new(WsObserver::new(sink, SEND_TIMEOUT));
    let id = state.broadcaster.connect(observer.clone()).await;
    let reader = state.summary_reader().spawn();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) if text.as_str() == "ping" => {
                let pong = match StreamMessage::Pong.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize pong");
                        continue;
                    }
                };
                if let Err(e) = observer.send(&pong).await {
                    tracing::debug!(observer = %id, error = %e, "Pong not delivered");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(observer = %id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.broadcaster.disconnect(id).await;
    reader.stop().await;
}
