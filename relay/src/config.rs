//! Relay configuration loaded from environment variables.
//!
//! Every setting has a default so the service starts for local development.
//! Telegram credentials have none: without them the relay endpoint answers
//! with a configuration error while the admin store keeps working.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_DATABASE_URI: &str = "file:./payload-db.sqlite";
pub const DEFAULT_ADMIN_NAME: &str = "Super Admin";

#[derive(Clone)]
pub struct RelayConfig {
    /// Env: `HTTP_ADDR`, default `0.0.0.0:3000`.
    pub http_addr: SocketAddr,

    /// Env: `TELEGRAM_BOT_TOKEN`.
    pub telegram_bot_token: Option<String>,

    /// Primary channel every alert goes to.
    /// Env: `TELEGRAM_CHAT_ID`.
    pub telegram_chat_id: Option<String>,

    /// Env: `TELEGRAM_API_BASE`.
    pub telegram_api_base: String,

    /// Per-request timeout for Bot API calls.
    /// Env: `TELEGRAM_TIMEOUT_SECS`, default 15.
    pub telegram_timeout_secs: u64,

    /// SQLite location, `file:` prefixed like the admin framework expects.
    /// Env: `DATABASE_URI`.
    pub database_uri: String,

    /// Env: `MEDIA_DIR`, default `./media`.
    pub media_dir: PathBuf,

    // -- Admin seeding --
    /// Env: `ADMIN_EMAIL`.
    pub admin_email: Option<String>,
    /// Env: `ADMIN_PASSWORD`.
    pub admin_password: Option<String>,
    /// Env: `ADMIN_NAME`.
    pub admin_name: String,

    /// Largest accepted media upload (10 MiB).
    pub max_upload_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            telegram_timeout_secs: 15,
            database_uri: DEFAULT_DATABASE_URI.to_string(),
            media_dir: PathBuf::from("./media"),
            admin_email: None,
            admin_password: None,
            admin_name: DEFAULT_ADMIN_NAME.to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("http_addr", &self.http_addr)
            .field("telegram_bot_token", &self.telegram_bot_token.as_ref().map(|_| "<redacted>"))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("telegram_api_base", &self.telegram_api_base)
            .field("telegram_timeout_secs", &self.telegram_timeout_secs)
            .field("database_uri", &self.database_uri)
            .field("media_dir", &self.media_dir)
            .field("admin_email", &self.admin_email)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("admin_name", &self.admin_name)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl RelayConfig {
    /// Load configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = non_empty("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        config.telegram_bot_token = non_empty("TELEGRAM_BOT_TOKEN");
        config.telegram_chat_id = non_empty("TELEGRAM_CHAT_ID");

        if let Some(base) = non_empty("TELEGRAM_API_BASE") {
            config.telegram_api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(val) = non_empty("TELEGRAM_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.telegram_timeout_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid TELEGRAM_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(uri) = non_empty("DATABASE_URI") {
            config.database_uri = uri;
        }

        if let Some(dir) = non_empty("MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }

        config.admin_email = non_empty("ADMIN_EMAIL");
        config.admin_password = non_empty("ADMIN_PASSWORD");
        if let Some(name) = non_empty("ADMIN_NAME") {
            config.admin_name = name;
        }

        config
    }

    /// Bot token and primary chat id, only when both are configured.
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Some((token.as_str(), chat_id.as_str())),
            _ => None,
        }
    }

    /// Admin account to seed into an empty users table.
    pub fn admin_seed(&self) -> Option<(&str, &str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => {
                Some((email.as_str(), password.as_str(), self.admin_name.as_str()))
            }
            _ => None,
        }
    }

    /// Filesystem path behind `database_uri`.
    pub fn database_path(&self) -> PathBuf {
        let uri = self.database_uri.as_str();
        PathBuf::from(uri.strip_prefix("file:").unwrap_or(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> RelayConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.telegram_api_base, "https://api.telegram.org");
        assert_eq!(config.telegram_timeout_secs, 15);
        assert!(config.telegram_credentials().is_none());
        assert!(config.admin_seed().is_none());
    }

    #[test]
    fn test_credentials_need_both_values() {
        let config = config_from(&[("TELEGRAM_BOT_TOKEN", "123:abc")]);
        assert!(config.telegram_credentials().is_none());

        let config = config_from(&[("TELEGRAM_BOT_TOKEN", "123:abc"), ("TELEGRAM_CHAT_ID", " ")]);
        assert!(config.telegram_credentials().is_none());

        let config = config_from(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200"),
        ]);
        assert_eq!(config.telegram_credentials(), Some(("123:abc", "-100200")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[("HTTP_ADDR", "not an addr"), ("TELEGRAM_TIMEOUT_SECS", "0")]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.telegram_timeout_secs, 15);
    }

    #[test]
    fn test_admin_seed() {
        let config = config_from(&[("ADMIN_EMAIL", "ops@example.org"), ("ADMIN_PASSWORD", "s3cret")]);
        assert_eq!(config.admin_seed(), Some(("ops@example.org", "s3cret", "Super Admin")));
    }

    #[test]
    fn test_database_path_strips_scheme() {
        assert_eq!(RelayConfig::default().database_path(), PathBuf::from("./payload-db.sqlite"));
        let config = config_from(&[("DATABASE_URI", "/var/lib/relay.db")]);
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/relay.db"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config_from(&[("TELEGRAM_BOT_TOKEN", "123:abc"), ("ADMIN_PASSWORD", "hunter2")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("123:abc"));
        assert!(!rendered.contains("hunter2"));
    }
}
