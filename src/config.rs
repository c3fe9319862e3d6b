// src/config.rs
use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    // None = allow any origin (dev mode).
    pub cors_origin: Option<String>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub history_page_size: i64,
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
}

impl Config {
    pub fn new() -> Self {
        Self {
            database_url: env_or("DATABASE_URL", "sqlite:./data/huddle.db"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3001"),
            cors_origin: env::var("CORS_ORIGIN").ok(),
            tls_cert_path: env::var("TLS_CERT_PATH").ok(),
            tls_key_path: env::var("TLS_KEY_PATH").ok(),
            history_page_size: env::var("HISTORY_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            email_api_url: env_or("EMAIL_API_URL", "https://api.resend.com/emails"),
            email_api_key: env::var("EMAIL_API_KEY").ok(),
            email_from: env_or("EMAIL_FROM", "Huddle <notifications@huddle.app>"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
