// src/http_handlers.rs
use super::{
    error::AppError,
    types::{HistoryQuery, MessageOut, PresenceSnapshot, UserProfile},
    ServerState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json as AxumJson,
};
use std::collections::HashMap;

const MAX_HISTORY_PAGE: i64 = 200;

pub async fn health_handler() -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({ "status": "ok" }))
}

/// Room history, oldest first. `before` (ms timestamp) pages strictly older
/// messages; senders are resolved to display name and role per response.
pub async fn room_messages_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<AxumJson<Vec<MessageOut>>, AppError> {
    if state.rooms.find(&room_id).await?.is_none() {
        return Err(AppError::RoomNotFound(room_id));
    }

    let limit = query
        .limit
        .unwrap_or(state.config.history_page_size)
        .clamp(1, MAX_HISTORY_PAGE);
    let messages = state.messages.list_room(&room_id, limit, query.before).await?;

    // One store read per distinct sender, not per message.
    let mut profiles: HashMap<String, Option<UserProfile>> = HashMap::new();
    for message in &messages {
        if let Some(sender) = &message.sender {
            if !profiles.contains_key(sender) {
                let profile = state.users.find(sender).await?.map(|u| u.profile());
                profiles.insert(sender.clone(), profile);
            }
        }
    }

    let out = messages
        .into_iter()
        .map(|message| {
            let resolved = message
                .sender
                .as_ref()
                .and_then(|sender| profiles.get(sender).cloned().flatten());
            MessageOut::from_stored(
                message,
                resolved.as_ref().map(|p| p.name.clone()),
                resolved.as_ref().map(|p| p.role),
            )
        })
        .collect();

    Ok(AxumJson(out))
}

pub async fn presence_handler(State(state): State<ServerState>) -> AxumJson<PresenceSnapshot> {
    AxumJson(PresenceSnapshot {
        online: state.presence.online_user_ids(),
    })
}
