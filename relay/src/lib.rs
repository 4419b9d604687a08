//! # relay
//!
//! Server side of the incident reporter:
//! - **Notification relay**: `POST /api/send-incident` fans one alert out to
//!   the primary Telegram channel and the reporter's emergency contacts
//! - **Admin backend**: SQLite collections for users, incidents, media and
//!   CCTV locations behind bearer sessions
//! - **Chat-id bot**: a long-polling helper that tells users their chat id

pub mod admin;
pub mod alert;
pub mod api;
pub mod bot;
pub mod config;
pub mod error;
pub mod fanout;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::admin::AdminStore;
use crate::api::AppState;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::fanout::Relay;
use crate::telegram::TelegramClient;

/// Open the admin store, seed it and wire the relay when credentials exist.
pub fn build_state(config: RelayConfig) -> Result<AppState, RelayError> {
    let admin = AdminStore::open(&config.database_path())?;
    match config.admin_seed() {
        Some((email, password, name)) => {
            admin.seed_admin(email, password, name)?;
        }
        None if admin.user_count()? == 0 => {
            warn!("No admin user exists and ADMIN_EMAIL/ADMIN_PASSWORD are unset");
        }
        None => {}
    }

    let relay = match config.telegram_credentials() {
        Some((token, chat_id)) => {
            let client = TelegramClient::new(
                &config.telegram_api_base,
                token,
                Duration::from_secs(config.telegram_timeout_secs),
            )?;
            info!(chat_id, "Telegram relay configured");
            Some(Arc::new(Relay::new(Arc::new(client), chat_id)))
        }
        None => {
            warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID missing; relay requests will fail");
            None
        }
    };

    Ok(AppState {
        relay,
        admin: Arc::new(admin),
        config: Arc::new(config),
    })
}
