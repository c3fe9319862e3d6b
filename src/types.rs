// src/types.rs

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ==============================================================================
// 1. Roles and sender kinds
// ==============================================================================

// Closed role set. Anything the platform sends that we don't recognize becomes
// Unknown and triggers no banner activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserRole {
    Client,
    ProjectManager,
    Engineer,
    Unknown,
}

impl UserRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" => UserRole::Client,
            "pm" | "project manager" | "projectmanager" | "project_manager" => {
                UserRole::ProjectManager
            }
            "engineer" => UserRole::Engineer,
            _ => UserRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Client => "Client",
            UserRole::ProjectManager => "Project Manager",
            UserRole::Engineer => "Engineer",
            UserRole::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UserRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(UserRole::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderType {
    User,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "User",
            SenderType::System => "System",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "System" {
            SenderType::System
        } else {
            SenderType::User
        }
    }
}

// ==============================================================================
// 2. Inbound event payloads (client -> engine)
// ==============================================================================

// Handshake `auth` payload. A missing or unparseable payload means the
// connection stays anonymous.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub room_id: String,
}

// Broadcast back out to room peers unchanged, so this one is Serialize too.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: String,
    pub user_id: String,
    pub role: UserRole,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub room_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

// ==============================================================================
// 3. Store records
// ==============================================================================

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    // Only the notifier reads this; the engine itself never does.
    pub email: Option<String>,
    pub online: bool,
    pub last_active: Option<DateTime<Utc>>,
    // Owned by the session layer. Presence writes must leave it alone.
    pub token_version: i64,
}

impl UserRecord {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

// The slice of a user the echo/banner paths care about.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub id: String,
    pub manager: Option<String>,
    // Durable membership. Never mutated by this engine.
    pub members: Vec<String>,
    // Transient userId -> role-string map; persisted but treated as volatile.
    pub typing: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub room: String,
    pub sender: Option<String>,
    pub sender_type: SenderType,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// 4. Outbound event payloads (engine -> clients)
// ==============================================================================

// Canonical chat message as every client renders it. The stored row keeps the
// sender as an opaque id; name and role are resolved per emission.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageOut {
    #[serde(rename = "_id")]
    pub id: String,
    pub room: String,
    pub sender: Option<String>,
    pub sender_type: SenderType,
    pub sender_role: Option<UserRole>,
    pub sender_name: Option<String>,
    pub text: String,
    pub attachments: Vec<Attachment>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl MessageOut {
    pub fn from_stored(
        message: StoredMessage,
        sender_name: Option<String>,
        sender_role: Option<UserRole>,
    ) -> Self {
        MessageOut {
            id: message.id,
            room: message.room,
            sender: message.sender,
            sender_type: message.sender_type,
            sender_role,
            sender_name,
            text: message.text,
            attachments: message.attachments,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SystemNoticeKind {
    Join,
    Leave,
    Inline,
}

// Ephemeral notice. Never persisted; late joiners only see these live.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    #[serde(rename = "type")]
    pub kind: SystemNoticeKind,
    pub room_id: String,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub timestamp: i64,
}

impl SystemNotice {
    pub fn for_user(kind: SystemNoticeKind, room_id: &str, profile: &UserProfile) -> Self {
        SystemNotice {
            kind,
            room_id: room_id.to_string(),
            user_id: Some(profile.id.clone()),
            name: Some(profile.name.clone()),
            role: Some(profile.role),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn bare(kind: SystemNoticeKind, room_id: &str, user_id: Option<&str>) -> Self {
        SystemNotice {
            kind,
            room_id: room_id.to_string(),
            user_id: user_id.map(str::to_string),
            name: None,
            role: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PresenceSnapshot {
    pub online: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    // Millisecond timestamp; pages strictly older messages.
    pub before: Option<i64>,
}

// ==============================================================================
// 5. Per-connection state
// ==============================================================================

// Lives in the socket's extensions for the lifetime of the connection. This is
// the only place connection identity is kept.
#[derive(Clone)]
pub struct ConnCtx {
    pub user_id: Option<String>,
    pub profile: Option<UserProfile>,
    pub rooms: Arc<DashSet<String>>,
}

impl ConnCtx {
    pub fn anonymous() -> Self {
        ConnCtx {
            user_id: None,
            profile: None,
            rooms: Arc::new(DashSet::new()),
        }
    }

    pub fn identified(user_id: String, profile: Option<UserProfile>) -> Self {
        ConnCtx {
            user_id: Some(user_id),
            profile,
            rooms: Arc::new(DashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_closed_and_case_insensitive() {
        assert_eq!(UserRole::parse("client"), UserRole::Client);
        assert_eq!(UserRole::parse("Client "), UserRole::Client);
        assert_eq!(UserRole::parse("PM"), UserRole::ProjectManager);
        assert_eq!(UserRole::parse("Project Manager"), UserRole::ProjectManager);
        assert_eq!(UserRole::parse("project_manager"), UserRole::ProjectManager);
        assert_eq!(UserRole::parse("Engineer"), UserRole::Engineer);
        assert_eq!(UserRole::parse("intern"), UserRole::Unknown);
        assert_eq!(UserRole::parse(""), UserRole::Unknown);
    }

    #[test]
    fn typing_payload_uses_camel_case_wire_names() {
        let payload: TypingPayload = serde_json::from_str(
            r#"{"roomId":"r1","userId":"u1","role":"pm","isTyping":true}"#,
        )
        .expect("parse typing payload");
        assert_eq!(payload.room_id, "r1");
        assert_eq!(payload.role, UserRole::ProjectManager);
        assert!(payload.is_typing);

        let echoed = serde_json::to_value(&payload).expect("serialize typing payload");
        assert_eq!(echoed["roomId"], "r1");
        assert_eq!(echoed["role"], "Project Manager");
        assert_eq!(echoed["isTyping"], true);
    }

    #[test]
    fn message_out_keeps_the_legacy_id_field_name() {
        let out = MessageOut::from_stored(
            StoredMessage {
                id: "m1".into(),
                room: "r1".into(),
                sender: Some("u1".into()),
                sender_type: SenderType::User,
                text: "hello".into(),
                attachments: vec![],
                created_at: Utc::now(),
            },
            Some("Dana".into()),
            Some(UserRole::Client),
        );
        let json = serde_json::to_value(&out).expect("serialize message");
        assert_eq!(json["_id"], "m1");
        assert_eq!(json["senderType"], "User");
        assert_eq!(json["senderRole"], "Client");
        assert_eq!(json["senderName"], "Dana");
        assert!(json["createdAt"].is_i64());
    }

    #[test]
    fn system_notice_type_values_are_lowercase() {
        let profile = UserProfile {
            id: "u1".into(),
            name: "Dana".into(),
            role: UserRole::Engineer,
        };
        let notice = SystemNotice::for_user(SystemNoticeKind::Inline, "r1", &profile);
        let json = serde_json::to_value(&notice).expect("serialize notice");
        assert_eq!(json["type"], "inline");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["role"], "Engineer");

        let bare = SystemNotice::bare(SystemNoticeKind::Leave, "r1", Some("u2"));
        let json = serde_json::to_value(&bare).expect("serialize notice");
        assert_eq!(json["type"], "leave");
        assert_eq!(json["userId"], "u2");
        assert!(json["name"].is_null());
    }

    #[test]
    fn malformed_auth_payload_still_deserializes_to_anonymous() {
        let auth: ConnectAuth = serde_json::from_str("{}").expect("empty auth object");
        assert!(auth.user_id.is_none());
    }
}
