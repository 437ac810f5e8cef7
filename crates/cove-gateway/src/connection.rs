//! Per-connection conversation session.
//!
//! Each WebSocket connection walks an explicit state machine:
//! `Connecting -> Authenticating -> Authenticated -> Closed`, with
//! `AuthenticationFailed` as a terminal exit from `Authenticating`. The
//! first frame must be an `Identify` command carrying a verifiable token;
//! nothing else is processed before the handshake completes. Teardown
//! always drains to a presence deregistration, however it was triggered.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use cove_core::error::CoreError;
use cove_core::{conversation, groups, users};
use cove_types::api::Claims;
use cove_types::events::{GatewayCommand, GatewayEvent};
use cove_types::models::User;

use crate::GatewayState;
use crate::admission;
use crate::presence::ConnectionHandle;

/// The authentication handshake must complete within this window.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Connecting,
    Authenticating,
    Authenticated,
    AuthenticationFailed,
    Closed,
}

/// Handle a single WebSocket connection from raw transport to teardown.
pub async fn handle_socket(socket: WebSocket, state: GatewayState, country: Option<String>) {
    let mut phase = SessionPhase::Connecting;
    let (mut sender, mut receiver) = socket.split();
    trace!(?phase, "transport established");

    phase = SessionPhase::Authenticating;
    trace!(?phase, "awaiting identify");
    let user = match authenticate(&mut receiver, &state, country.as_deref()).await {
        Ok(user) => user,
        Err(err) => {
            phase = SessionPhase::AuthenticationFailed;
            let event = GatewayEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = sender.send(Message::Text(text.into())).await;
            }
            warn!(?phase, "session terminated: {err}");
            return;
        }
    };
    phase = SessionPhase::Authenticated;
    trace!(?phase, "session authenticated");
    info!("{} ({}) connected to gateway", user.username, user.id);

    run_session(sender, receiver, state, user).await;

    phase = SessionPhase::Closed;
    debug!(?phase, "session torn down");
}

/// Wait for the Identify frame, verify its token, and load the account.
/// Any failure here is terminal for the connection.
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    state: &GatewayState,
    country: Option<&str>,
) -> Result<User, CoreError> {
    let handshake = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return Some(text);
            }
        }
        None
    });

    let Ok(Some(text)) = handshake.await else {
        return Err(CoreError::Authentication(
            "authentication handshake not completed".into(),
        ));
    };

    let Ok(GatewayCommand::Identify { token }) = serde_json::from_str(&text) else {
        return Err(CoreError::Authentication(
            "expected an identify command".into(),
        ));
    };

    let claims = verify_token(&token, &state.jwt_secret)
        .ok_or_else(|| CoreError::Authentication("invalid token".into()))?;

    let user = users::get_user(&state.store, claims.sub)
        .map_err(|_| CoreError::Authentication("unknown identity".into()))?;

    if !admission::admit(&user, country, state.geo_strict) {
        return Err(CoreError::authorization(
            "connection not permitted from this region",
        ));
    }

    Ok(user)
}

/// The verify capability: token in, identity claims out.
fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

async fn run_session(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    state: GatewayState,
    user: User,
) {
    let conn_id = Uuid::new_v4();
    let (tx, mut user_rx) = mpsc::unbounded_channel();

    state
        .presence
        .register(user.id, ConnectionHandle::new(conn_id, tx.clone()))
        .await;

    // Subscription snapshot at authentication time: the private channel is
    // implicit (targeted pushes), group channels come from current
    // membership. Later membership changes need explicit join/leave events.
    let initial: HashSet<String> = match groups::groups_of(&state.store, user.id) {
        Ok(memberships) => memberships
            .iter()
            .map(|g| conversation::group(g.id))
            .collect(),
        Err(err) => {
            warn!("failed to load group snapshot for {}: {err}", user.id);
            HashSet::new()
        }
    };
    let subscriptions: Arc<std::sync::RwLock<HashSet<String>>> =
        Arc::new(std::sync::RwLock::new(initial));

    let ready = GatewayEvent::Ready {
        user_id: user.id,
        username: user.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        state.presence.unregister(user.id, conn_id).await;
        return;
    }

    let mut broadcast_rx = state.router.subscribe();
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted pushes to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = event.conversation_id() {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(&conversation_id) {
                            continue;
                        }
                    }

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client, one processed to completion before the
    // next, so ordering on a single connection is preserved.
    let session = Session {
        state: state.clone(),
        user: user.clone(),
        self_tx: tx,
        subscriptions,
    };
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let cmd = match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => cmd,
                        Err(err) => {
                            // Malformed payloads are recoverable: report and
                            // keep the session.
                            session.report(CoreError::validation(format!(
                                "malformed event payload: {err}"
                            )));
                            continue;
                        }
                    };
                    match session.handle_command(cmd).await {
                        Ok(()) => {}
                        Err(err) if err.is_fatal() => {
                            warn!("fatal session error for {}: {err}", session.user.id);
                            session.report(err);
                            break;
                        }
                        Err(err) => session.report(err),
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.presence.unregister(user.id, conn_id).await;
    info!("{} ({}) disconnected from gateway", user.username, user.id);
}

struct Session {
    state: GatewayState,
    user: User,
    self_tx: mpsc::UnboundedSender<GatewayEvent>,
    subscriptions: Arc<std::sync::RwLock<HashSet<String>>>,
}

impl Session {
    /// Report a recoverable error back to the originating session.
    fn report(&self, err: CoreError) {
        let _ = self.self_tx.send(GatewayEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    async fn handle_command(&self, cmd: GatewayCommand) -> Result<(), CoreError> {
        match cmd {
            // Handshake already done; a stray Identify is ignored.
            GatewayCommand::Identify { .. } => Ok(()),

            GatewayCommand::JoinGroup { group_id } => {
                if !groups::is_member(&self.state.store, group_id, self.user.id)? {
                    return Err(CoreError::authorization("not a member of this group"));
                }
                self.subscriptions
                    .write()
                    .expect("subscription lock poisoned")
                    .insert(conversation::group(group_id));
                self.state.router.broadcast(GatewayEvent::JoinedGroup {
                    group_id,
                    user_id: self.user.id,
                });
                debug!("{} joined group channel {}", self.user.id, group_id);
                Ok(())
            }

            GatewayCommand::LeaveGroup { group_id } => {
                let was_subscribed = self
                    .subscriptions
                    .write()
                    .expect("subscription lock poisoned")
                    .remove(&conversation::group(group_id));
                if was_subscribed {
                    self.state.router.broadcast(GatewayEvent::LeftGroup {
                        group_id,
                        user_id: self.user.id,
                    });
                }
                Ok(())
            }

            GatewayCommand::SendDirectMessage(req) => {
                let receipt = self.state.router.send_direct(&self.user, req).await?;
                let _ = self.self_tx.send(GatewayEvent::MessageDelivered {
                    message_id: receipt.message_id,
                    conversation_id: receipt.conversation_id,
                    delivered: receipt.delivered,
                });
                Ok(())
            }

            GatewayCommand::SendGroupMessage(req) => {
                let receipt = self.state.router.send_group(&self.user, req).await?;
                let _ = self.self_tx.send(GatewayEvent::MessageDelivered {
                    message_id: receipt.message_id,
                    conversation_id: receipt.conversation_id,
                    delivered: receipt.delivered,
                });
                Ok(())
            }

            GatewayCommand::Typing { conversation_id } => {
                self.state.router.typing(self.user.id, &conversation_id).await
            }

            // Accepted without error; read receipts are not tracked yet.
            GatewayCommand::MarkAsRead { conversation_id } => {
                trace!("{} mark-as-read {}", self.user.id, conversation_id);
                Ok(())
            }
        }
    }
}
