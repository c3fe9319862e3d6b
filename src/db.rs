// src/db.rs

use crate::types::{Attachment, RoomRecord, SenderType, StoredMessage, UserRecord, UserRole};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
    Row,
};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 16;
const ACQUIRE_TIMEOUT_SECS: u64 = 5;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(database_url)
        .context("Invalid database URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("busy_timeout", "5000");

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(std::time::Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(opts)
        .await
        .context("Failed to connect to SQLite database")
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            email TEXT,
            online INTEGER NOT NULL DEFAULT 0,
            last_active INTEGER,
            token_version INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            manager TEXT,
            members TEXT NOT NULL DEFAULT '[]',
            typing TEXT NOT NULL DEFAULT '{}'
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            room TEXT NOT NULL,
            sender TEXT,
            sender_type TEXT NOT NULL,
            text TEXT NOT NULL,
            attachments TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_room_created
         ON messages (room, created_at)",
    )
    .execute(pool)
    .await?;

    // One System banner per (room, exact text). Concurrent inserts race into
    // this index instead of into the chat feed.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_system_banner
         ON messages (room, text) WHERE sender_type = 'System'",
    )
    .execute(pool)
    .await?;

    info!("🗃️ Database schema is ready.");
    Ok(())
}

// ==============================================================================
// Identity store
// ==============================================================================

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, role, email, online, last_active, token_version
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("DB fetch user")
    }

    // Touches only the presence columns; token_version belongs to the session
    // layer and must survive these writes.
    pub async fn set_presence(&self, user_id: &str, online: bool) -> Result<()> {
        sqlx::query("UPDATE users SET online = ?, last_active = ? WHERE id = ?")
            .bind(online)
            .bind(Utc::now().timestamp_millis())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("DB set presence")?;
        Ok(())
    }

    pub async fn create(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, role, email, online, last_active, token_version)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.email.as_deref())
        .bind(user.online)
        .bind(user.last_active.map(|t| t.timestamp_millis()))
        .bind(user.token_version)
        .execute(&self.pool)
        .await
        .context("DB insert user")?;
        Ok(())
    }
}

// ==============================================================================
// Room store
// ==============================================================================

#[derive(Clone)]
pub struct RoomStore {
    pool: SqlitePool,
}

impl RoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        sqlx::query_as::<_, RoomRecord>("SELECT id, manager, members, typing FROM rooms WHERE id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .context("DB fetch room")
    }

    // Read-modify-write on the transient typing map. Returns false when the
    // room does not exist, which the caller treats as a silent drop. The map
    // is last-write-wins across processes; typing is lossy anyway.
    pub async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        role: &str,
        is_typing: bool,
    ) -> Result<bool> {
        let Some(room) = self.find(room_id).await? else {
            return Ok(false);
        };

        let mut typing = room.typing;
        let changed = if is_typing {
            typing.insert(user_id.to_string(), role.to_string());
            true
        } else {
            typing.remove(user_id).is_some()
        };

        if changed {
            let json = serde_json::to_string(&typing).context("Serialize typing map")?;
            sqlx::query("UPDATE rooms SET typing = ? WHERE id = ?")
                .bind(json)
                .bind(room_id)
                .execute(&self.pool)
                .await
                .context("DB update typing")?;
        }
        Ok(true)
    }

    pub async fn create(&self, room: &RoomRecord) -> Result<()> {
        let members = serde_json::to_string(&room.members).context("Serialize members")?;
        let typing = serde_json::to_string(&room.typing).context("Serialize typing map")?;
        sqlx::query("INSERT INTO rooms (id, manager, members, typing) VALUES (?, ?, ?, ?)")
            .bind(&room.id)
            .bind(room.manager.as_deref())
            .bind(members)
            .bind(typing)
            .execute(&self.pool)
            .await
            .context("DB insert room")?;
        Ok(())
    }
}

// ==============================================================================
// Message store
// ==============================================================================

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        room_id: &str,
        sender: Option<&str>,
        sender_type: SenderType,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            room: room_id.to_string(),
            sender: sender.map(str::to_string),
            sender_type,
            text: text.to_string(),
            attachments: attachments.to_vec(),
            created_at: Utc::now(),
        };
        let attachments_json =
            serde_json::to_string(&message.attachments).context("Serialize attachments")?;

        sqlx::query(
            "INSERT INTO messages (id, room, sender, sender_type, text, attachments, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.room)
        .bind(message.sender.as_deref())
        .bind(message.sender_type.as_str())
        .bind(&message.text)
        .bind(&attachments_json)
        .bind(message.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("DB insert message")?;

        Ok(message)
    }

    // Insert backed by the partial unique index. None means a banner with this
    // exact text already exists in the room and nothing was written.
    pub async fn insert_system_unique(
        &self,
        room_id: &str,
        text: &str,
    ) -> Result<Option<StoredMessage>> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            room: room_id.to_string(),
            sender: None,
            sender_type: SenderType::System,
            text: text.to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT INTO messages (id, room, sender, sender_type, text, attachments, created_at)
             VALUES (?, ?, NULL, ?, ?, '[]', ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.room)
        .bind(message.sender_type.as_str())
        .bind(&message.text)
        .bind(message.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("DB insert system message")?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(message))
        }
    }

    pub async fn find_system(&self, room_id: &str, text: &str) -> Result<Option<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>(
            "SELECT id, room, sender, sender_type, text, attachments, created_at
             FROM messages WHERE room = ? AND sender_type = 'System' AND text = ? LIMIT 1",
        )
        .bind(room_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await
        .context("DB fetch system message")
    }

    pub async fn has_user_messages(&self, room_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM messages WHERE room = ? AND sender_type = 'User' LIMIT 1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .context("DB check user messages")?;
        Ok(row.is_some())
    }

    // History page, oldest-first. `before` (millis) pages strictly older rows.
    pub async fn list_room(
        &self,
        room_id: &str,
        limit: i64,
        before: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        let rows = match before {
            Some(ts) => {
                sqlx::query_as::<_, StoredMessage>(
                    "SELECT id, room, sender, sender_type, text, attachments, created_at
                     FROM messages WHERE room = ? AND created_at < ?
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(room_id)
                .bind(ts)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, StoredMessage>(
                    "SELECT id, room, sender, sender_type, text, attachments, created_at
                     FROM messages WHERE room = ?
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(room_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("DB fetch room messages")?;

        Ok(rows.into_iter().rev().collect())
    }
}

// ==============================================================================
// Row mappings
// ==============================================================================

impl sqlx::FromRow<'_, SqliteRow> for UserRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let role: String = row.try_get("role")?;
        let last_active: Option<i64> = row.try_get("last_active")?;
        Ok(UserRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            role: UserRole::parse(&role),
            email: row.try_get("email")?,
            online: row.try_get("online")?,
            last_active: last_active.and_then(DateTime::from_timestamp_millis),
            token_version: row.try_get("token_version")?,
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for RoomRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let members: String = row.try_get("members")?;
        let typing: String = row.try_get("typing")?;
        Ok(RoomRecord {
            id: row.try_get("id")?,
            manager: row.try_get("manager")?,
            members: serde_json::from_str(&members).unwrap_or_default(),
            typing: serde_json::from_str(&typing).unwrap_or_default(),
        })
    }
}

impl sqlx::FromRow<'_, SqliteRow> for StoredMessage {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let sender_type: String = row.try_get("sender_type")?;
        let attachments: String = row.try_get("attachments")?;
        let created_at: i64 = row.try_get("created_at")?;
        Ok(StoredMessage {
            id: row.try_get("id")?,
            room: row.try_get("room")?,
            sender: row.try_get("sender")?,
            sender_type: SenderType::parse(&sender_type),
            text: row.try_get("text")?,
            attachments: serde_json::from_str(&attachments).unwrap_or_default(),
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        })
    }
}
