// src/notifier.rs
use super::{
    types::{MessageOut, RoomRecord},
    ServerState,
};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT_SECS: u64 = 8;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Emails room members who are offline when a chat message lands. Delivery is
/// fire-and-forget; failures only log and never reach the sending connection.
pub struct Notifier {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl Notifier {
    pub fn new(api_url: String, api_key: Option<String>, from_address: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_url,
            api_key,
            from_address,
        }
    }

    pub fn notify_offline_members(&self, state: &ServerState, room: &RoomRecord, message: &MessageOut) {
        let Some(api_key) = self.api_key.clone() else {
            debug!("📧 [NOTIFY] Email delivery disabled (no API key).");
            return;
        };

        let client = self.client.clone();
        let api_url = self.api_url.clone();
        let from_address = self.from_address.clone();
        let state = state.clone();
        let members = room.members.clone();
        let room_id = room.id.clone();
        let sender_id = message.sender.clone();
        let sender_name = message
            .sender_name
            .clone()
            .unwrap_or_else(|| "Someone".to_string());
        // Names and message text are untrusted; neutralize them before they
        // land in markup.
        let html = format!(
            "<p><strong>{}</strong>: {}</p>",
            escape_html(&sender_name),
            escape_html(&message.text)
        );

        tokio::spawn(async move {
            for member in members {
                if Some(&member) == sender_id.as_ref() || state.presence.is_online(&member) {
                    continue;
                }

                let email = match state.users.find(&member).await {
                    Ok(Some(user)) => match user.email {
                        Some(email) if !email.is_empty() => email,
                        _ => continue,
                    },
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("📧 [NOTIFY] Member lookup failed for {}: {}", member, e);
                        continue;
                    }
                };

                let body = serde_json::json!({
                    "from": from_address,
                    "to": [email],
                    "subject": "New message in your project room",
                    "html": html,
                });

                match client.post(&api_url).bearer_auth(&api_key).json(&body).send().await {
                    Ok(res) if res.status().is_success() => {
                        info!("📧 [NOTIFY] Emailed {} about activity in {}", member, room_id);
                    }
                    Ok(res) => {
                        warn!("📧 [NOTIFY] Email API returned {} for {}", res.status(), member);
                    }
                    Err(e) => warn!("📧 [NOTIFY] Email send failed for {}: {}", member, e),
                }
            }
        });
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
