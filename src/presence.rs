// src/presence.rs

use crate::db::UserStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

/// Per-user count of live connections, keyed by connection id so one socket
/// can never count twice in either direction. The count is the source of
/// truth for "connected right now"; the durable online flag is only written
/// when the count leaves or returns to zero, so no store read participates in
/// the decision.
pub struct PresenceTracker {
    users: UserStore,
    connections: DashMap<String, String>,
    counts: DashMap<String, usize>,
}

impl PresenceTracker {
    pub fn new(users: UserStore) -> Self {
        Self {
            users,
            connections: DashMap::new(),
            counts: DashMap::new(),
        }
    }

    /// One more live connection for this user. The first one flips the durable
    /// flag; the write is best-effort and never retried inline. A connection
    /// id that is already tracked counts nothing.
    pub async fn connect(&self, conn_id: &str, user_id: &str) {
        match self.connections.entry(conn_id.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(user_id.to_string());
            }
        }

        let (count, came_online) = {
            let mut entry = self.counts.entry(user_id.to_string()).or_insert(0);
            *entry += 1;
            (*entry, *entry == 1)
        };
        debug!("👥 [PRESENCE] {} -> {} connection(s)", user_id, count);

        if came_online {
            if let Err(e) = self.users.set_presence(user_id, true).await {
                warn!("⚠️ [PRESENCE] Failed to mark {} online: {}", user_id, e);
            }
        }
    }

    /// The connection is gone. Only the call that removes the registry entry
    /// decrements, so duplicate disconnects for one socket and sockets that
    /// never identified are no-ops.
    pub async fn disconnect(&self, conn_id: &str) {
        let Some((_, user_id)) = self.connections.remove(conn_id) else {
            return;
        };

        let went_offline = {
            match self.counts.get_mut(&user_id) {
                Some(mut entry) if *entry > 0 => {
                    *entry -= 1;
                    *entry == 0
                }
                _ => false,
            }
        };

        if went_offline {
            self.counts.remove_if(&user_id, |_, count| *count == 0);
            debug!("👥 [PRESENCE] {} -> offline", user_id);
            if let Err(e) = self.users.set_presence(&user_id, false).await {
                warn!("⚠️ [PRESENCE] Failed to mark {} offline: {}", user_id, e);
            }
        }
    }

    pub fn connections(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map(|entry| *entry).unwrap_or(0)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections(user_id) > 0
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, UserStore};
    use crate::types::{UserRecord, UserRole};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store_with_user(id: &str) -> (UserStore, sqlx::SqlitePool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::init_db(&pool).await.expect("init db");
        let store = UserStore::new(pool.clone());
        store
            .create(&UserRecord {
                id: id.to_string(),
                name: "Dana".into(),
                role: UserRole::Client,
                email: None,
                online: false,
                last_active: None,
                token_version: 3,
            })
            .await
            .expect("seed user");
        (store, pool)
    }

    #[tokio::test]
    async fn online_flag_flips_only_at_the_zero_boundary() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store.clone());

        presence.connect("tab-a", "u1").await;
        presence.connect("tab-b", "u1").await;
        assert_eq!(presence.connections("u1"), 2);
        assert!(presence.is_online("u1"));
        assert!(store.find("u1").await.expect("find").expect("user").online);

        // Still one live connection, still online.
        presence.disconnect("tab-a").await;
        assert_eq!(presence.connections("u1"), 1);
        assert!(store.find("u1").await.expect("find").expect("user").online);

        presence.disconnect("tab-b").await;
        assert_eq!(presence.connections("u1"), 0);
        assert!(!presence.is_online("u1"));
        assert!(!store.find("u1").await.expect("find").expect("user").online);
    }

    #[tokio::test]
    async fn stray_disconnects_never_underflow() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store.clone());

        presence.disconnect("never-seen").await;
        assert_eq!(presence.connections("u1"), 0);

        presence.connect("tab-a", "u1").await;
        assert_eq!(presence.connections("u1"), 1);
        assert!(store.find("u1").await.expect("find").expect("user").online);
    }

    #[tokio::test]
    async fn duplicate_disconnects_for_one_connection_count_once() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store.clone());

        presence.connect("tab-a", "u1").await;
        presence.connect("tab-b", "u1").await;

        // One socket reporting twice must not take the second tab down.
        presence.disconnect("tab-a").await;
        presence.disconnect("tab-a").await;

        assert_eq!(presence.connections("u1"), 1);
        assert!(presence.is_online("u1"));
        assert!(store.find("u1").await.expect("find").expect("user").online);
    }

    #[tokio::test]
    async fn reannounced_connections_count_once() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store.clone());

        presence.connect("tab-a", "u1").await;
        presence.connect("tab-a", "u1").await;
        assert_eq!(presence.connections("u1"), 1);

        presence.disconnect("tab-a").await;
        assert!(!presence.is_online("u1"));
        assert!(!store.find("u1").await.expect("find").expect("user").online);
    }

    #[tokio::test]
    async fn presence_flips_do_not_clobber_token_version() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store.clone());

        presence.connect("tab-a", "u1").await;
        presence.disconnect("tab-a").await;

        let user = store.find("u1").await.expect("find").expect("user");
        assert_eq!(user.token_version, 3);
        assert!(user.last_active.is_some());
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let (store, pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store);
        sqlx::query("DROP TABLE users")
            .execute(&pool)
            .await
            .expect("drop users");

        // The write fails; the refcount still advances.
        presence.connect("tab-a", "u1").await;
        assert_eq!(presence.connections("u1"), 1);
        presence.disconnect("tab-a").await;
        assert_eq!(presence.connections("u1"), 0);
    }

    #[tokio::test]
    async fn snapshot_lists_only_connected_users() {
        let (store, _pool) = store_with_user("u1").await;
        let presence = PresenceTracker::new(store);

        presence.connect("tab-a", "u1").await;
        presence.connect("tab-b", "u2").await;
        presence.disconnect("tab-b").await;

        let online = presence.online_user_ids();
        assert_eq!(online, vec!["u1".to_string()]);
    }
}
