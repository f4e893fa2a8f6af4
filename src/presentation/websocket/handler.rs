//! WebSocket Connection Handler
//!
//! One task per live connection plus a writer task draining the session's
//! outbound channel. The token is verified before the upgrade, so a failed
//! connect never creates a registry entry.

use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;
use validator::Validate;

use crate::application::dto::request::{SendMessageRequest, SendTarget};
use crate::application::events::{ClientEvent, ErrorPayload, ReadyPayload, ServerEvent};
use crate::application::services::{DeliveryTarget, SendMessageDto};
use crate::domain::IdentityRepository;
use crate::infrastructure::metrics;
use crate::presentation::middleware::Claims;
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Connection parameters: the externally issued token rides the query
/// string, as browser WebSocket clients cannot set headers.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: String,
}

/// WebSocket upgrade handler. Rejects unauthenticated connects before any
/// session state exists.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let identity = verify_token(&params.token, &state.settings.jwt.secret)?;

    let max_message_size = state.settings.gateway.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

/// Validate the externally issued JWT and extract the identity.
fn verify_token(token: &str, secret: &str) -> Result<i64, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".into())
        }
        _ => AppError::Unauthorized("Invalid token".into()),
    })?;

    token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("Invalid token claims".into()))
}

/// Handle one live connection from registration to cleanup.
async fn handle_socket(socket: WebSocket, state: AppState, identity: i64) {
    let session_id = Uuid::new_v4();

    // The token was valid, but the identity must still exist.
    let profile = match state.identities.find_by_id(identity).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            tracing::debug!(identity, "Connect rejected, unknown identity");
            return;
        }
        Err(e) => {
            tracing::error!(identity, error = %e, "Failed to load identity on connect");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: serialize and forward everything routed to this session.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let first = state.registry.register(identity, session_id, tx.clone());
    metrics::set_active_sessions(state.registry.session_count() as i64);

    let _ = tx.send(ServerEvent::Ready(ReadyPayload {
        session_id: session_id.to_string(),
        identity: profile.into(),
    }));

    state.presence.session_opened(identity, first);

    // Backlog flush: anything sent while every device was offline flips to
    // delivered now, independent of any live race at the original send.
    if let Err(e) = state.delivery.connection_ready(identity).await {
        tracing::error!(identity, error = %e, "Connect-time delivery flush failed");
    }

    let idle_timeout = Duration::from_secs(state.settings.gateway.idle_timeout_secs);
    let mut idle_check = interval(idle_timeout / 2);
    idle_check.tick().await; // skip the immediate first tick
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        handle_frame(&text, identity, session_id, &state, &tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %session_id, "Connection closed");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            _ = idle_check.tick() => {
                if last_activity.elapsed() > idle_timeout {
                    tracing::info!(session_id = %session_id, "Idle timeout, closing connection");
                    break;
                }
            }
        }
    }

    // Presence offline fires synchronously with the disconnect, after the
    // registry entry is gone so the broadcast reflects the new roster.
    if let Some((identity, last)) = state.registry.unregister(&session_id) {
        metrics::set_active_sessions(state.registry.session_count() as i64);
        state.presence.session_closed(identity, last).await;
    }
    writer.abort();

    tracing::info!(identity, session_id = %session_id, "Session disconnected");
}

/// Deserialize and exhaustively dispatch one inbound frame.
async fn handle_frame(
    text: &str,
    identity: i64,
    session_id: Uuid,
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            send_error(tx, &AppError::BadRequest(format!("Malformed frame: {}", e)));
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(request) => {
            if let Err(e) = request.validate() {
                send_error(tx, &validation_error(e));
                return;
            }
            let dto = match parse_send_request(request) {
                Ok(dto) => dto,
                Err(e) => {
                    send_error(tx, &e);
                    return;
                }
            };
            match state
                .delivery
                .send_message(identity, Some(session_id), dto)
                .await
            {
                // The originating device gets the created message back as
                // its acknowledgment; other devices got the echo.
                Ok(response) => {
                    let _ = tx.send(ServerEvent::NewMessage(response));
                }
                Err(e) => send_error(tx, &AppError::from(e)),
            }
        }

        ClientEvent::MarkSeen(request) => {
            let conversation_id = match parse_id(&request.conversation_id, "conversation ID") {
                Ok(id) => id,
                Err(e) => {
                    send_error(tx, &e);
                    return;
                }
            };
            let up_to = match parse_id(&request.up_to, "message ID") {
                Ok(id) => id,
                Err(e) => {
                    send_error(tx, &e);
                    return;
                }
            };
            if let Err(e) = state
                .delivery
                .mark_seen(identity, conversation_id, Some(up_to))
                .await
            {
                send_error(tx, &AppError::from(e));
            }
        }

        ClientEvent::MarkAllSeen(request) => {
            let conversation_id = match parse_id(&request.conversation_id, "conversation ID") {
                Ok(id) => id,
                Err(e) => {
                    send_error(tx, &e);
                    return;
                }
            };
            if let Err(e) = state
                .delivery
                .mark_seen(identity, conversation_id, None)
                .await
            {
                send_error(tx, &AppError::from(e));
            }
        }

        ClientEvent::Typing(request) => {
            let conversation_id = match parse_id(&request.conversation_id, "conversation ID") {
                Ok(id) => id,
                Err(e) => {
                    send_error(tx, &e);
                    return;
                }
            };
            // Membership is checked while resolving the peer set; typing
            // never reaches anyone outside the conversation.
            match state.delivery.participants(identity, conversation_id).await {
                Ok(peers) => {
                    state
                        .presence
                        .typing(identity, conversation_id, peers, request.is_typing)
                }
                Err(e) => send_error(tx, &AppError::from(e)),
            }
        }

        ClientEvent::Ping => {
            let _ = tx.send(ServerEvent::Pong);
        }
    }
}

fn parse_send_request(request: SendMessageRequest) -> Result<SendMessageDto, AppError> {
    let target = match request.target {
        SendTarget::Direct { recipient_id } => {
            DeliveryTarget::Direct(parse_id(&recipient_id, "recipient ID")?)
        }
        SendTarget::Conversation { conversation_id } => {
            DeliveryTarget::Conversation(parse_id(&conversation_id, "conversation ID")?)
        }
    };

    // Reply references resolve softly downstream; an unparseable one is
    // treated the same as a dangling one.
    let reply_to = request.reply_to.and_then(|s| s.parse().ok());

    Ok(SendMessageDto {
        target,
        content: request.content,
        reply_to,
        client_key: request.client_key,
    })
}

fn parse_id(raw: &str, what: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {}", what)))
}

fn send_error(tx: &mpsc::UnboundedSender<ServerEvent>, err: &AppError) {
    let _ = tx.send(ServerEvent::Error(ErrorPayload::from(err)));
}
