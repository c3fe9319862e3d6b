// src/socket_handlers.rs
use super::{
    announcer::Announcement,
    types::{
        ConnCtx, ConnectAuth, JoinPayload, LeavePayload, MessageOut, MessagePayload, SenderType,
        SystemNotice, SystemNoticeKind, TypingPayload, UserProfile, UserRole,
    },
    ServerState,
};
use socketioxide::{
    extract::{Data, SocketRef, TryData},
    SocketIo,
};
use tracing::{debug, error, info, warn};

const ROOM_NOT_FOUND_MSG: &str = "Room not found";
const JOIN_FAILED_MSG: &str = "Failed to join room";
const MESSAGE_SAVE_FAILED_MSG: &str = "Failed to save message";

pub fn user_channel(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn register_namespace(io: &SocketIo, state: ServerState) {
    io.ns("/", move |s: SocketRef, TryData(auth): TryData<ConnectAuth>| {
        let state = state.clone();
        async move {
            on_socket_connect(s, auth.ok(), state).await;
        }
    });
}

// Handshake identity is optional. A missing, empty, or unknown userId still
// yields a working (anonymous or profile-less) connection.
pub async fn on_socket_connect(s: SocketRef, auth: Option<ConnectAuth>, state: ServerState) {
    let user_id = auth
        .and_then(|a| a.user_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    // Handlers and connection state are wired before the first await. Events
    // can arrive as soon as the client holds its connect ack, and a socket
    // that dies during identity resolution still needs a disconnect handler.
    let ctx = match &user_id {
        Some(id) => ConnCtx::identified(id.clone(), None),
        None => ConnCtx::anonymous(),
    };
    s.extensions.insert(ctx);

    register_join_handler(&s, state.clone());
    register_leave_handler(&s, state.clone());
    register_typing_handler(&s, state.clone());
    register_message_handler(&s, state.clone());
    register_disconnect_handler(&s, state.clone());

    info!(
        "🔌 [Socket.IO] Client connected: {} (user: {})",
        s.id,
        user_id.as_deref().unwrap_or("anonymous")
    );

    let Some(user_id) = user_id else {
        return;
    };

    // Personal channel so other components can address this user directly.
    s.join(user_channel(&user_id));

    let conn_id = s.id.to_string();
    state.presence.connect(&conn_id, &user_id).await;

    match state.users.find(&user_id).await {
        Ok(Some(user)) => {
            if let Some(mut ctx) = s.extensions.get::<ConnCtx>() {
                ctx.profile = Some(user.profile());
                s.extensions.insert(ctx);
            }
        }
        Ok(None) => warn!("⚠️ [CONNECT] Unknown userId in handshake: {}", user_id),
        Err(e) => warn!("⚠️ [CONNECT] Profile lookup failed for {}: {}", user_id, e),
    }

    // The socket may have closed before its disconnect handler existed. The
    // connection registry turns the duplicate call into a no-op.
    if !s.connected() {
        state.presence.disconnect(&conn_id).await;
    }
}

// Prefers the id named in the event payload, then the handshake identity. The
// cached handshake profile saves a store read on the common path.
async fn resolve_member_profile(
    state: &ServerState,
    ctx: Option<&ConnCtx>,
    user_id: Option<&str>,
) -> Option<UserProfile> {
    let target = user_id.or(ctx.and_then(|c| c.user_id.as_deref()))?;

    if let Some(profile) = ctx.and_then(|c| c.profile.as_ref()) {
        if profile.id == target {
            return Some(profile.clone());
        }
    }

    match state.users.find(target).await {
        Ok(Some(user)) => Some(user.profile()),
        Ok(None) => None,
        Err(e) => {
            warn!("🔎 [PROFILE] Lookup failed for {}: {}", target, e);
            None
        }
    }
}

async fn broadcast_announcements(state: &ServerState, room_id: &str, announcements: Vec<Announcement>) {
    for announcement in announcements {
        match announcement {
            Announcement::Message(message) => {
                state.io.to(room_id.to_string()).emit("message", &message).await.ok();
            }
            Announcement::Notice(notice) => {
                state.io.to(room_id.to_string()).emit("system", &notice).await.ok();
            }
        }
    }
}

fn register_join_handler(socket: &SocketRef, state: ServerState) {
    socket.on("join", move |s: SocketRef, Data(payload): Data<JoinPayload>| {
        let state = state.clone();
        async move {
            let room = match state.rooms.find(&payload.room_id).await {
                Ok(Some(room)) => room,
                Ok(None) => {
                    warn!("🚪 [JOIN] Unknown room {} requested by {}", payload.room_id, s.id);
                    s.emit("error", ROOM_NOT_FOUND_MSG).ok();
                    return;
                }
                Err(e) => {
                    error!("❌ [DB ERROR] Room lookup for {} failed: {}", payload.room_id, e);
                    s.emit("error", JOIN_FAILED_MSG).ok();
                    return;
                }
            };

            let ctx = s.extensions.get::<ConnCtx>();

            s.join(room.id.clone());
            if let Some(ctx) = &ctx {
                ctx.rooms.insert(room.id.clone());
            }

            // A join payload may carry an identity the handshake did not.
            if let Some(user_id) = payload.user_id.as_deref().filter(|id| !id.trim().is_empty()) {
                s.join(user_channel(user_id));
            }

            info!("🚪 [JOIN] Client {} -> {}", s.id, room.id);
            s.emit("joined", &room.id).ok();

            let profile =
                resolve_member_profile(&state, ctx.as_ref(), payload.user_id.as_deref()).await;

            let notice = match &profile {
                Some(profile) => SystemNotice::for_user(SystemNoticeKind::Join, &room.id, profile),
                None => SystemNotice::bare(
                    SystemNoticeKind::Join,
                    &room.id,
                    payload.user_id.as_deref(),
                ),
            };
            s.broadcast().to(room.id.clone()).emit("system", &notice).await.ok();

            if let Some(profile) = profile {
                match state.announcer.on_join(&room, &profile).await {
                    Ok(announcements) => {
                        broadcast_announcements(&state, &room.id, announcements).await;
                    }
                    Err(e) => error!("❌ [BANNER] Join triggers failed in {}: {}", room.id, e),
                }
            }
        }
    });
}

fn register_leave_handler(socket: &SocketRef, state: ServerState) {
    socket.on("leave", move |s: SocketRef, Data(payload): Data<LeavePayload>| {
        let state = state.clone();
        async move {
            let ctx = s.extensions.get::<ConnCtx>();

            s.leave(payload.room_id.clone());
            if let Some(ctx) = &ctx {
                ctx.rooms.remove(&payload.room_id);
            }
            info!("🚪 [LEAVE] Client {} <- {}", s.id, payload.room_id);

            // Transport-level only; durable membership is untouched.
            let notice = match ctx.as_ref().and_then(|c| c.profile.as_ref()) {
                Some(profile) => {
                    SystemNotice::for_user(SystemNoticeKind::Leave, &payload.room_id, profile)
                }
                None => SystemNotice::bare(
                    SystemNoticeKind::Leave,
                    &payload.room_id,
                    ctx.as_ref().and_then(|c| c.user_id.as_deref()),
                ),
            };
            state.io.to(payload.room_id.clone()).emit("system", &notice).await.ok();
        }
    });
}

fn register_typing_handler(socket: &SocketRef, state: ServerState) {
    socket.on("typing", move |s: SocketRef, Data(payload): Data<TypingPayload>| {
        let state = state.clone();
        async move {
            match state
                .rooms
                .set_typing(&payload.room_id, &payload.user_id, payload.role.as_str(), payload.is_typing)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!("⌨️ [TYPING] Dropped update for unknown room {}", payload.room_id);
                    return;
                }
                // The indicator is transient; a failed write must not block it.
                Err(e) => {
                    warn!("⌨️ [TYPING] Failed to persist state for {}: {}", payload.room_id, e)
                }
            }

            s.broadcast().to(payload.room_id.clone()).emit("typing", &payload).await.ok();
        }
    });
}

fn register_message_handler(socket: &SocketRef, state: ServerState) {
    socket.on("message", move |s: SocketRef, Data(payload): Data<MessagePayload>| {
        let state = state.clone();
        async move {
            let room = match state.rooms.find(&payload.room_id).await {
                Ok(Some(room)) => room,
                Ok(None) => {
                    warn!("💾 [MESSAGE] Unknown room {} from {}", payload.room_id, s.id);
                    s.emit("error", ROOM_NOT_FOUND_MSG).ok();
                    return;
                }
                Err(e) => {
                    error!("❌ [DB ERROR] Room lookup for {} failed: {}", payload.room_id, e);
                    s.emit("error", MESSAGE_SAVE_FAILED_MSG).ok();
                    return;
                }
            };

            let ctx = s.extensions.get::<ConnCtx>();
            let profile =
                resolve_member_profile(&state, ctx.as_ref(), payload.user_id.as_deref()).await;
            let sender_id = payload
                .user_id
                .clone()
                .or_else(|| ctx.as_ref().and_then(|c| c.user_id.clone()));

            let stored = match state
                .messages
                .append(
                    &room.id,
                    sender_id.as_deref(),
                    SenderType::User,
                    &payload.text,
                    &payload.attachments,
                )
                .await
            {
                Ok(stored) => stored,
                Err(e) => {
                    error!("❌ [DB ERROR] Failed to persist message in {}: {}", room.id, e);
                    s.emit("error", MESSAGE_SAVE_FAILED_MSG).ok();
                    return;
                }
            };

            let echo = MessageOut::from_stored(
                stored,
                profile.as_ref().map(|p| p.name.clone()),
                profile.as_ref().map(|p| p.role),
            );
            info!(
                "💾 [MESSAGE] {} -> {} ({} chars)",
                sender_id.as_deref().unwrap_or("anonymous"),
                room.id,
                echo.text.len()
            );

            // Mirrored to the whole room so the sender renders the stored form.
            state.io.to(room.id.clone()).emit("message", &echo).await.ok();

            state.notifier.notify_offline_members(&state, &room, &echo);
        }
    });
}

fn register_disconnect_handler(socket: &SocketRef, state: ServerState) {
    socket.on_disconnect(move |s: SocketRef| {
        let state = state.clone();
        async move {
            let ctx = s.extensions.get::<ConnCtx>();
            info!(
                "🔌 [Socket.IO] Client disconnected: {} (user: {})",
                s.id,
                ctx.as_ref()
                    .and_then(|c| c.user_id.as_deref())
                    .unwrap_or("anonymous")
            );

            // Presence is the one guaranteed disconnect action.
            state.presence.disconnect(&s.id.to_string()).await;

            let Some(ctx) = ctx else {
                return;
            };
            let Some(user_id) = ctx.user_id.clone() else {
                return;
            };

            let role = ctx.profile.as_ref().map(|p| p.role).unwrap_or(UserRole::Unknown);
            let rooms: Vec<String> = ctx.rooms.iter().map(|r| r.key().clone()).collect();
            for room_id in rooms {
                if let Err(e) = state
                    .rooms
                    .set_typing(&room_id, &user_id, role.as_str(), false)
                    .await
                {
                    warn!("🧹 [CLEANUP] Typing reset failed for {} in {}: {}", user_id, room_id, e);
                }

                let stopped = TypingPayload {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    role,
                    is_typing: false,
                };
                state.io.to(room_id).emit("typing", &stopped).await.ok();
            }
        }
    });
}
