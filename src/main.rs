// src/main.rs
use axum::{routing::get, Router};
use http::HeaderValue;
use huddle_backend::{
    config::Config, http_handlers, init_tracing, setup_shared_state, socket_handlers,
};
use socketioxide::SocketIo;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() {
    init_tracing();
    info!("🚀 Starting Huddle realtime backend");

    // Default is 128; widened to absorb reconnect floods after a restart.
    let (layer, io) = SocketIo::builder().max_buffer_size(40960).build_layer();
    let config = Arc::new(Config::new());
    let server_state = setup_shared_state(config.clone(), io.clone()).await;

    socket_handlers::register_namespace(&io, server_state.clone());

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>().expect("Invalid CORS origin"))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(http_handlers::health_handler))
        .route("/rooms/{room_id}/messages", get(http_handlers::room_messages_handler))
        .route("/presence", get(http_handlers::presence_handler))
        .with_state(server_state)
        .layer(cors)
        .layer(layer);

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let rustls_config = load_rustls_config(cert_path, key_path);
            info!("🔒 HTTPS server is running at https://{}", config.bind_addr);
            axum_server::bind_rustls(
                config.bind_addr.parse::<std::net::SocketAddr>().expect("Invalid bind address"),
                rustls_config,
            )
            .serve(app.into_make_service())
            .await
            .expect("Server failed to start");
        }
        _ => {
            info!("🌐 HTTP server is running at http://{}", config.bind_addr);
            let listener = tokio::net::TcpListener::bind(&config.bind_addr)
                .await
                .expect("Failed to bind server address");
            axum::serve(listener, app)
                .await
                .expect("Server failed to start");
        }
    }
}

fn load_rustls_config(cert_path: &str, key_path: &str) -> axum_server::tls_rustls::RustlsConfig {
    let cert_file = File::open(cert_path).expect("Failed to open TLS certificate");
    let key_file = File::open(key_path).expect("Failed to open TLS key");
    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .expect("Parse cert");
    let key = rustls_pemfile::private_key(&mut key_reader)
        .expect("Read key")
        .expect("No key");
    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("TLS config");
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(tls_config))
}
