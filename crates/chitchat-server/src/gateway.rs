//! Realtime WebSocket gateway.
//!
//! One socket is one engine session. The token is resolved before the
//! upgrade; afterwards every inbound frame counts as a heartbeat and the
//! server pings on the heartbeat interval. When the socket closes, or the
//! reaper ends the session, the session's on-disconnect removals run.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chitchat_shared::constants::{DEFAULT_RECENT_LIMIT, PROTOCOL_VERSION};
use chitchat_shared::protocol::{ClientFrame, CloseReason, ServerFrame};
use chitchat_shared::{Channel, ChannelId, MessageId};

use crate::api::AppState;
use crate::directory::ChannelFeed;
use crate::error::{ChatError, ReadError, ServerError, WriteError};
use crate::identity::AuthenticatedUser;
use crate::message_log::{MessageEvent, MessageFeed};
use crate::presence::TypingFeed;
use crate::session::SessionId;

/// Frames queued for one socket before the connection is considered stuck.
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    token: String,
}

pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
) -> Result<Response, ServerError> {
    let user = state.identity.resolve(&params.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let session = state.engine.open_session(user.user_id.clone()).await;
    info!(session = %session, user = %user.user_id, "Realtime connection opened");

    let (mut sink, mut inbound) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    let ping_every = state.config.heartbeat_interval;
    let mut forward = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_every);
        ticker.tick().await;
        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match frame.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut conn = Connection::new(state.clone(), session, user, out_tx);
    conn.send(ServerFrame::Hello {
        user_id: conn.user.user_id.clone(),
        protocol: PROTOCOL_VERSION.to_string(),
    })
    .await;

    loop {
        tokio::select! {
            msg = inbound.next() => {
                let Some(Ok(msg)) = msg else { break };
                if !state.engine.touch(&session).await {
                    debug!(session = %session, "Session already ended, closing socket");
                    break;
                }
                match msg {
                    WsMessage::Text(text) => match ClientFrame::from_json(&text) {
                        Ok(frame) => conn.handle(frame).await,
                        Err(e) => {
                            conn.send(ServerFrame::Error {
                                id: None,
                                message: format!("Malformed frame: {e}"),
                            })
                            .await
                        }
                    },
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            _ = &mut forward => break,
        }
    }

    conn.shutdown();
    forward.abort();
    state.engine.close_session(&session).await;
    info!(session = %session, "Realtime connection closed");
}

/// A subscription stream that can report being dropped for lag.
trait Feed: Stream + Unpin + Send + 'static {
    fn lagged(&self) -> bool;
}

impl Feed for ChannelFeed {
    fn lagged(&self) -> bool {
        ChannelFeed::lagged(self)
    }
}

impl Feed for MessageFeed {
    fn lagged(&self) -> bool {
        MessageFeed::lagged(self)
    }
}

impl Feed for TypingFeed {
    fn lagged(&self) -> bool {
        TypingFeed::lagged(self)
    }
}

/// Per-socket protocol state.
struct Connection {
    state: AppState,
    session: SessionId,
    user: AuthenticatedUser,
    out: mpsc::Sender<ServerFrame>,
    subs: HashMap<u64, JoinHandle<()>>,
}

impl Connection {
    fn new(
        state: AppState,
        session: SessionId,
        user: AuthenticatedUser,
        out: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            state,
            session,
            user,
            out,
            subs: HashMap::new(),
        }
    }

    async fn send(&self, frame: ServerFrame) {
        if self.out.send(frame).await.is_err() {
            debug!(session = %self.session, "Outbound queue closed");
        }
    }

    async fn handle(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Ping => self.send(ServerFrame::Pong).await,

            ClientFrame::SubscribeChannels { sub } => {
                let result = self.state.directory.subscribe_channel_added().await;
                self.start(sub, result, move |channel: Channel| ServerFrame::ChannelAdded { sub, channel })
                    .await;
            }

            ClientFrame::SubscribeMessages {
                sub,
                channel_id,
                limit,
            } => {
                let limit = limit
                    .unwrap_or(DEFAULT_RECENT_LIMIT)
                    .min(self.state.config.recent_limit_max);
                let result = self.state.log.subscribe_recent(&channel_id, limit).await;
                self.start(sub, result, move |ev: MessageEvent| ServerFrame::Message {
                    sub,
                    event: ev.kind,
                    message: ev.message,
                })
                .await;
            }

            ClientFrame::SubscribeTyping { sub, channel_id } => {
                let result = self
                    .state
                    .presence
                    .subscribe_anyone_typing(&channel_id, &self.user.user_id)
                    .await;
                self.start(sub, result, move |anyone_typing: bool| ServerFrame::Typing {
                    sub,
                    anyone_typing,
                })
                .await;
            }

            ClientFrame::Unsubscribe { sub } => {
                if let Some(task) = self.subs.remove(&sub) {
                    task.abort();
                    self.send(ServerFrame::SubscriptionClosed {
                        sub,
                        reason: CloseReason::Unsubscribed,
                    })
                    .await;
                }
            }

            ClientFrame::CreateChannel { id, name } => {
                let result = self.state.directory.create_channel(&name).await;
                self.reply(id, result.map(|ch| (Some(ch), None))).await;
            }

            ClientFrame::SendText {
                id,
                channel_id,
                text,
            } => {
                let result = self
                    .state
                    .log
                    .append_text(&channel_id, &self.user.user_id, &self.user.display_name, &text)
                    .await;
                self.reply(id, result.map(|m| (Some(channel_id), Some(m)))).await;
            }

            ClientFrame::SendPhotoPlaceholder { id, channel_id } => {
                let result = self
                    .state
                    .log
                    .append_photo_placeholder(
                        &channel_id,
                        &self.user.user_id,
                        Some(&self.user.display_name),
                    )
                    .await;
                self.reply(id, result.map(|m| (Some(channel_id), Some(m)))).await;
            }

            ClientFrame::AttachPhoto {
                id,
                channel_id,
                message_id,
                url,
            } => {
                let result = self
                    .state
                    .log
                    .attach_photo_url(&channel_id, &message_id, &url)
                    .await;
                self.reply(id, result.map(|()| (Some(channel_id), Some(message_id))))
                    .await;
            }

            ClientFrame::SetTyping {
                id,
                channel_id,
                typing,
            } => {
                let result = self
                    .state
                    .presence
                    .set_typing(&self.session, &channel_id, &self.user.user_id, typing)
                    .await;
                self.reply(id, result.map(|()| (Some(channel_id), None))).await;
            }
        }
    }

    async fn reply(
        &self,
        id: u64,
        result: Result<(Option<ChannelId>, Option<MessageId>), ChatError>,
    ) {
        let frame = match result {
            Ok((channel_id, message_id)) => ServerFrame::Ack {
                id,
                channel_id,
                message_id,
            },
            Err(e) => ServerFrame::Error {
                id: Some(id),
                message: client_message(&e),
            },
        };
        self.send(frame).await;
    }

    /// Forward a feed to the socket under `sub`, replacing any previous
    /// subscription with the same tag.
    async fn start<F, M>(&mut self, sub: u64, feed: Result<F, ChatError>, to_frame: M)
    where
        F: Feed,
        F::Item: Send,
        M: Fn(F::Item) -> ServerFrame + Send + 'static,
    {
        let mut feed = match feed {
            Ok(feed) => feed,
            Err(e) => {
                self.send(ServerFrame::Error {
                    id: None,
                    message: client_message(&e),
                })
                .await;
                return;
            }
        };

        if let Some(previous) = self.subs.remove(&sub) {
            previous.abort();
        }

        let out = self.out.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = feed.next().await {
                if out.send(to_frame(item)).await.is_err() {
                    return;
                }
            }
            let reason = if feed.lagged() {
                CloseReason::Lagged
            } else {
                CloseReason::Ended
            };
            let _ = out.send(ServerFrame::SubscriptionClosed { sub, reason }).await;
        });
        self.subs.insert(sub, task);
    }

    fn shutdown(&mut self) {
        for (_, task) in self.subs.drain() {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Error text safe to show a client.  Storage failures stay in the log.
fn client_message(e: &ChatError) -> String {
    match e {
        ChatError::Write(WriteError::Storage(_)) | ChatError::Read(ReadError::Storage(_)) => {
            warn!(error = %e, "Realtime request failed");
            "Internal server error".to_string()
        }
        other => other.to_string(),
    }
}
