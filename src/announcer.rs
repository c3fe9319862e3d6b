// src/announcer.rs

use crate::db::MessageStore;
use crate::types::{
    MessageOut, RoomRecord, SenderType, StoredMessage, SystemNotice, SystemNoticeKind,
    UserProfile, UserRole,
};
use anyhow::Result;
use dashmap::DashSet;
use tracing::{debug, info};

pub const MANAGER_ASSIGNED_TEXT: &str = "A project manager has been assigned to this project.";

pub fn manager_online_text(name: &str) -> String {
    format!("Project manager {} is actively online.", name)
}

pub fn engineer_joined_text(name: &str) -> String {
    format!("Engineer {} is in the room.", name)
}

pub fn manager_greeting_text(name: &str) -> String {
    format!(
        "Hi, I'm {}! I'll be managing this project. Feel free to ask me anything here.",
        name
    )
}

/// One thing the join triggers decided to send to the room, in order.
#[derive(Debug)]
pub enum Announcement {
    /// Freshly persisted row; broadcast as a normal `message` event.
    Message(MessageOut),
    /// The banner already exists; re-announce with an ephemeral `system` event.
    Notice(SystemNotice),
}

/// Idempotent system banners. The partial unique index on the message store is
/// the source of truth; the in-memory sets only short-circuit the common case
/// and are rebuilt empty on every restart.
pub struct Announcer {
    messages: MessageStore,
    // Rooms that already got the "manager assigned" banner this process.
    announced_rooms: DashSet<String>,
    // (roomId, userId) pairs whose personal banner already fired this process.
    announced_joins: DashSet<(String, String)>,
}

impl Announcer {
    pub fn new(messages: MessageStore) -> Self {
        Self {
            messages,
            announced_rooms: DashSet::new(),
            announced_joins: DashSet::new(),
        }
    }

    /// Persists a System message with exactly this text unless the room already
    /// has one. Returns the stored row only when this call created it.
    /// Concurrent calls race into the unique index; the loser sees None.
    pub async fn ensure_system_inline(
        &self,
        room_id: &str,
        text: &str,
    ) -> Result<Option<StoredMessage>> {
        match self.messages.insert_system_unique(room_id, text).await? {
            Some(stored) => {
                info!("📣 [BANNER] Created in {}: {}", room_id, text);
                Ok(Some(stored))
            }
            None => {
                debug!("📣 [BANNER] Already present in {}: {}", room_id, text);
                Ok(None)
            }
        }
    }

    /// Role triggers, run after a connection successfully joined a room.
    pub async fn on_join(
        &self,
        room: &RoomRecord,
        profile: &UserProfile,
    ) -> Result<Vec<Announcement>> {
        let mut out = Vec::new();

        match profile.role {
            UserRole::Client => {
                // The assignment banner only makes sense once a manager exists.
                if room.manager.is_some() {
                    out.extend(self.ensure_room_banner(&room.id).await?);
                }
            }
            UserRole::ProjectManager => {
                out.push(
                    self.ensure_user_banner(&room.id, &manager_online_text(&profile.name), profile)
                        .await?,
                );

                // Assignment banner and greeting run at most once per room.
                if !self.announced_rooms.contains(&room.id) {
                    out.extend(self.ensure_room_banner(&room.id).await?);

                    if !self.messages.has_user_messages(&room.id).await? {
                        let greeting = self
                            .messages
                            .append(
                                &room.id,
                                Some(&profile.id),
                                SenderType::User,
                                &manager_greeting_text(&profile.name),
                                &[],
                            )
                            .await?;
                        info!("👋 [GREETING] Seeded manager greeting in {}", room.id);
                        out.push(Announcement::Message(MessageOut::from_stored(
                            greeting,
                            Some(profile.name.clone()),
                            Some(profile.role),
                        )));
                    }
                }
            }
            UserRole::Engineer => {
                out.push(
                    self.ensure_user_banner(&room.id, &engineer_joined_text(&profile.name), profile)
                        .await?,
                );
            }
            UserRole::Unknown => {}
        }

        Ok(out)
    }

    // Room-wide banner: persisted once, silent on every later occasion.
    async fn ensure_room_banner(&self, room_id: &str) -> Result<Option<Announcement>> {
        if self.announced_rooms.contains(room_id) {
            return Ok(None);
        }

        let created = self.ensure_system_inline(room_id, MANAGER_ASSIGNED_TEXT).await?;
        self.announced_rooms.insert(room_id.to_string());

        Ok(created.map(|stored| {
            Announcement::Message(MessageOut::from_stored(stored, None, None))
        }))
    }

    // Per-user banner: persisted once, re-announced as an ephemeral notice on
    // every later join so reconnects stay visible.
    async fn ensure_user_banner(
        &self,
        room_id: &str,
        text: &str,
        profile: &UserProfile,
    ) -> Result<Announcement> {
        let guard_key = (room_id.to_string(), profile.id.clone());
        if self.announced_joins.contains(&guard_key) {
            return Ok(Announcement::Notice(SystemNotice::for_user(
                SystemNoticeKind::Inline,
                room_id,
                profile,
            )));
        }

        let created = self.ensure_system_inline(room_id, text).await?;
        self.announced_joins.insert(guard_key);

        Ok(match created {
            Some(stored) => Announcement::Message(MessageOut::from_stored(stored, None, None)),
            None => Announcement::Notice(SystemNotice::for_user(
                SystemNoticeKind::Inline,
                room_id,
                profile,
            )),
        })
    }
}
