// src/lib.rs
pub mod announcer;
pub mod config;
pub mod db;
pub mod error;
pub mod http_handlers;
pub mod notifier;
pub mod presence;
pub mod socket_handlers;
pub mod types;

use announcer::Announcer;
use config::Config;
use db::{MessageStore, RoomStore, UserStore};
use notifier::Notifier;
use presence::PresenceTracker;
use socketioxide::SocketIo;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub io: SocketIo,
    pub db_pool: SqlitePool,
    pub users: UserStore,
    pub rooms: RoomStore,
    pub messages: MessageStore,
    pub presence: Arc<PresenceTracker>,
    pub announcer: Arc<Announcer>,
    pub notifier: Arc<Notifier>,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "huddle_backend=info,tower_http=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn setup_shared_state(config: Arc<Config>, io: SocketIo) -> ServerState {
    // Database Setup
    if let Some(parent) = std::path::Path::new(&config.database_url.replace("sqlite:", "")).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).expect("Failed to create database directory");
        }
    }

    let db_pool = db::connect(&config.database_url)
        .await
        .expect("Failed to connect to SQLite database");
    db::init_db(&db_pool).await.expect("Failed to initialize database schema");

    let users = UserStore::new(db_pool.clone());
    let rooms = RoomStore::new(db_pool.clone());
    let messages = MessageStore::new(db_pool.clone());
    let presence = Arc::new(PresenceTracker::new(users.clone()));
    let announcer = Arc::new(Announcer::new(messages.clone()));
    let notifier = Arc::new(Notifier::new(
        config.email_api_url.clone(),
        config.email_api_key.clone(),
        config.email_from.clone(),
    ));

    info!("🧩 Shared state ready (db: {})", config.database_url);

    ServerState {
        config,
        io,
        db_pool,
        users,
        rooms,
        messages,
        presence,
        announcer,
        notifier,
    }
}
