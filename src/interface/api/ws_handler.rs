//! WebSocket notification feed handler

use super::call_request_handler::{AppState, Caller};
use super::dto::ApiError;
use crate::application::PartySession;
use crate::domain::notification::Notification;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Frames pushed to a connected party
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedFrame<'a> {
    Notification(&'a Notification),
    /// Updates may have been missed; the party should re-read its requests
    Resync { reason: String },
}

/// WebSocket handler
pub async fn ws_feed_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Response {
    // Resolve the subscription before upgrading so unknown accounts get a
    // plain HTTP error.
    let feed = match state.facade.subscribe(caller).await {
        Ok(feed) => feed,
        Err(e) => return ApiError(e).into_response(),
    };
    let session = PartySession::new(feed, state.media.clone());
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, mut session: PartySession) {
    let (mut sender, mut receiver) = socket.split();
    let account = session.account_id();

    info!("Feed connected for {} {}", session.party(), account);

    loop {
        // Only the cancel-safe halves race; media and the send run after.
        let item = tokio::select! {
            item = session.recv() => item,
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        debug!("Ignoring text from account {}: {}", account, text)
                    }
                    Some(Ok(_)) => {}
                }
                continue;
            }
        };

        let frame = match &item {
            Some(Ok(notification)) => {
                session.follow(notification).await;
                FeedFrame::Notification(notification)
            }
            Some(Err(e)) => {
                warn!("Feed for account {} lost updates: {}", account, e);
                FeedFrame::Resync { reason: e.to_string() }
            }
            None => break,
        };
        match serde_json::to_string(&frame) {
            Ok(json) => {
                if sender.send(Message::Text(json)).await.is_err() {
                    debug!("Failed to send frame to account {}", account);
                    break;
                }
            }
            Err(e) => error!("Failed to serialize feed frame: {}", e),
        }
    }

    session.close().await;
    info!("Feed disconnected for account {}", account);
}
