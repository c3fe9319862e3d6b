// tests/room_flows.rs
//
// Store-observable behavior of the join/announcement/presence/message flows,
// exercised against an in-memory database without a live transport.

use huddle_backend::announcer::{manager_greeting_text, Announcer, MANAGER_ASSIGNED_TEXT};
use huddle_backend::db::{self, MessageStore, RoomStore, UserStore};
use huddle_backend::presence::PresenceTracker;
use huddle_backend::types::{
    MessageOut, RoomRecord, SenderType, StoredMessage, UserRecord, UserRole,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;

struct Fixture {
    users: UserStore,
    rooms: RoomStore,
    messages: MessageStore,
}

async fn setup() -> Fixture {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::init_db(&pool).await.expect("init db");

    let fixture = Fixture {
        users: UserStore::new(pool.clone()),
        rooms: RoomStore::new(pool.clone()),
        messages: MessageStore::new(pool),
    };

    for (id, name, role, email) in [
        ("u1", "Dana", UserRole::Client, None),
        ("pm-1", "Priya", UserRole::ProjectManager, Some("priya@example.com")),
        ("eng-1", "Miguel", UserRole::Engineer, None),
    ] {
        fixture
            .users
            .create(&user(id, name, role, email))
            .await
            .expect("seed user");
    }

    fixture
}

fn user(id: &str, name: &str, role: UserRole, email: Option<&str>) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        name: name.to_string(),
        role,
        email: email.map(str::to_string),
        online: false,
        last_active: None,
        token_version: 1,
    }
}

fn room(id: &str, manager: Option<&str>, members: &[&str]) -> RoomRecord {
    RoomRecord {
        id: id.to_string(),
        manager: manager.map(str::to_string),
        members: members.iter().map(|m| m.to_string()).collect(),
        typing: HashMap::new(),
    }
}

fn count_text(messages: &[StoredMessage], text: &str) -> usize {
    messages.iter().filter(|m| m.text == text).count()
}

#[tokio::test]
async fn client_then_manager_join_produces_each_banner_once() {
    let fx = setup().await;
    fx.rooms
        .create(&room("r1", None, &["u1", "pm-1"]))
        .await
        .expect("create room");
    let announcer = Announcer::new(fx.messages.clone());

    // Client joins before any manager exists: nothing to announce.
    let client = fx.users.find("u1").await.expect("find").expect("u1").profile();
    let r1 = fx.rooms.find("r1").await.expect("find").expect("r1");
    announcer.on_join(&r1, &client).await.expect("client join");
    assert!(fx.messages.list_room("r1", 20, None).await.expect("list").is_empty());

    // Manager joins: one assignment banner, one greeting.
    let manager = fx.users.find("pm-1").await.expect("find").expect("pm-1").profile();
    announcer.on_join(&r1, &manager).await.expect("manager join");

    let rows = fx.messages.list_room("r1", 20, None).await.expect("list");
    assert_eq!(count_text(&rows, MANAGER_ASSIGNED_TEXT), 1);
    assert_eq!(count_text(&rows, &manager_greeting_text("Priya")), 1);

    // A second manager join adds no durable rows.
    announcer.on_join(&r1, &manager).await.expect("manager rejoin");
    let rows = fx.messages.list_room("r1", 20, None).await.expect("list");
    assert_eq!(count_text(&rows, MANAGER_ASSIGNED_TEXT), 1);
    assert_eq!(count_text(&rows, &manager_greeting_text("Priya")), 1);
}

#[tokio::test]
async fn greeting_stays_unique_across_process_restarts() {
    let fx = setup().await;
    fx.rooms
        .create(&room("r1", Some("pm-1"), &["u1", "pm-1"]))
        .await
        .expect("create room");
    let r1 = fx.rooms.find("r1").await.expect("find").expect("r1");
    let manager = fx.users.find("pm-1").await.expect("find").expect("pm-1").profile();

    Announcer::new(fx.messages.clone())
        .on_join(&r1, &manager)
        .await
        .expect("join before restart");

    // Fresh in-memory guards, same database.
    Announcer::new(fx.messages.clone())
        .on_join(&r1, &manager)
        .await
        .expect("join after restart");

    let rows = fx.messages.list_room("r1", 20, None).await.expect("list");
    assert_eq!(count_text(&rows, MANAGER_ASSIGNED_TEXT), 1);
    assert_eq!(count_text(&rows, &manager_greeting_text("Priya")), 1);
}

#[tokio::test]
async fn presence_flag_follows_the_connection_refcount() {
    let fx = setup().await;
    let presence = PresenceTracker::new(fx.users.clone());

    // Two tabs, one user.
    presence.connect("tab-a", "u1").await;
    presence.connect("tab-b", "u1").await;
    assert!(fx.users.find("u1").await.expect("find").expect("u1").online);

    presence.disconnect("tab-a").await;
    assert!(fx.users.find("u1").await.expect("find").expect("u1").online);

    presence.disconnect("tab-b").await;
    assert!(!fx.users.find("u1").await.expect("find").expect("u1").online);
}

#[tokio::test]
async fn unknown_rooms_are_never_written_to() {
    let fx = setup().await;

    assert!(!fx
        .rooms
        .set_typing("ghost", "u1", "Client", true)
        .await
        .expect("typing against missing room"));
    assert!(fx.rooms.find("ghost").await.expect("find").is_none());
}

#[tokio::test]
async fn posted_messages_echo_with_id_text_and_sender_type() {
    let fx = setup().await;
    fx.rooms
        .create(&room("r1", None, &["u1"]))
        .await
        .expect("create room");

    let stored = fx
        .messages
        .append("r1", Some("u1"), SenderType::User, "hello", &[])
        .await
        .expect("append");
    assert!(!stored.id.is_empty());

    let sender = fx.users.find("u1").await.expect("find").expect("u1").profile();
    let echo = MessageOut::from_stored(stored, Some(sender.name.clone()), Some(sender.role));
    assert_eq!(echo.text, "hello");
    assert_eq!(echo.sender_type, SenderType::User);
    assert_eq!(echo.sender_name.as_deref(), Some("Dana"));

    let json = serde_json::to_value(&echo).expect("serialize");
    assert_eq!(json["text"], "hello");
    assert_eq!(json["senderType"], "User");
    assert!(json["_id"].is_string());
}
