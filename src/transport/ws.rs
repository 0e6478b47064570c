//! WebSocket hub: remotes connect to `/ws?jid=<id>&token=<secret>`.
//!
//! Every text frame is a JSON [`Envelope`]. A connection counts as presence;
//! closing it makes the remote unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent, encode_for};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::{Message, PresenceStatus};

/// A WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Presence {
        /// Set by the hub on outbound frames; ignored inbound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        available: bool,
        #[serde(default)]
        status: Option<serde_json::Value>,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        body: String,
    },
}

impl Envelope {
    /// Attribute an inbound frame to the connection it arrived on.
    fn into_event(self, from: &str) -> TransportEvent {
        match self {
            Self::Presence {
                available, status, ..
            } => TransportEvent::Presence {
                from: from.to_string(),
                available,
                status: status.filter(|s| !s.is_null()).map(|s| s.to_string()),
            },
            Self::Message { body, .. } => TransportEvent::Message {
                from: from.to_string(),
                body,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    jid: String,
    #[serde(default)]
    token: Option<String>,
}

pub struct WsHub {
    config: TransportConfig,
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
    events: mpsc::Sender<TransportEvent>,
}

impl WsHub {
    /// Inbound presence and messages are delivered to `events`.
    pub fn new(config: TransportConfig, events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .with_state(Arc::clone(self))
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn serve(self: Arc<Self>) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "WebSocket hub listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Identities with an open session.
    pub async fn connected(&self) -> Vec<String> {
        let mut jids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        jids.sort();
        jids
    }

    /// Drop the session slot if it still belongs to `tx`. A reconnect may
    /// already own it, in which case the remote is still present.
    async fn release_session(&self, jid: &str, tx: &mpsc::UnboundedSender<String>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(jid).is_some_and(|current| current.same_channel(tx)) {
            sessions.remove(jid);
            true
        } else {
            false
        }
    }

    fn authorized(&self, token: Option<&str>) -> bool {
        match &self.config.token {
            Some(expected) => token == Some(expected.expose_secret()),
            None => true,
        }
    }
}

async fn health(State(hub): State<Arc<WsHub>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "optimizer-hub",
        "sessions": hub.sessions.read().await.len(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(hub): State<Arc<WsHub>>,
) -> Response {
    if params.jid.is_empty() {
        return (StatusCode::BAD_REQUEST, "jid is required").into_response();
    }
    if !hub.authorized(params.token.as_deref()) {
        warn!(jid = %params.jid, "Rejected connection with bad token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    info!(jid = %params.jid, "Remote connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, params.jid, hub))
}

async fn handle_socket(mut socket: WebSocket, jid: String, hub: Arc<WsHub>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if hub
        .sessions
        .write()
        .await
        .insert(jid.clone(), tx.clone())
        .is_some()
    {
        info!(jid = %jid, "Replaced existing session");
    }

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else { break };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    debug!(jid = %jid, "Remote disconnected during send");
                    break;
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => {
                                if hub.events.send(envelope.into_event(&jid)).await.is_err() {
                                    debug!("Event consumer gone");
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(jid = %jid, error = %e, "Unrecognized frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(jid = %jid, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if !hub.release_session(&jid, &tx).await {
        debug!(jid = %jid, "Superseded session closed");
        return;
    }
    info!(jid = %jid, "Remote disconnected");
    let _ = hub
        .events
        .send(TransportEvent::Presence {
            from: jid,
            available: false,
            status: None,
        })
        .await;
}

#[async_trait]
impl Transport for WsHub {
    async fn send(&self, to: &str, message: &Message) -> Result<(), TransportError> {
        let frame = serde_json::to_string(&Envelope::Message {
            from: Some(self.config.hub_jid.clone()),
            body: encode_for(to, message)?,
        })?;
        let sessions = self.sessions.read().await;
        let session = sessions.get(to).ok_or_else(|| TransportError::NotConnected {
            to: to.to_string(),
        })?;
        session.send(frame).map_err(|_| TransportError::SendFailed {
            to: to.to_string(),
            reason: "session closed".to_string(),
        })
    }

    async fn publish_status(&self, status: &PresenceStatus) -> Result<(), TransportError> {
        let frame = serde_json::to_string(&Envelope::Presence {
            from: Some(self.config.hub_jid.clone()),
            available: true,
            status: Some(serde_json::to_value(status)?),
        })?;
        for (jid, session) in self.sessions.read().await.iter() {
            if session.send(frame.clone()).is_err() {
                debug!(jid = %jid, "Skipped status for closing session");
            }
        }
        Ok(())
    }
}
