//! Device-local preferences and the one-time storage cleanup.
//!
//! Every mutation returns the single [`PrefValue`] that has to be written
//! back, so persistence stays an explicit effect issued by the app.

use serde::{Deserialize, Serialize};

use crate::capabilities::{decode_json, decode_text, encode_json, encode_text, KvError, KvKey};
use crate::model::DeviceId;

pub const CLEANUP_CUTOFF: &str = "2026-02-12";
pub const CLEANUP_MARKER_KEY: &str = "last_data_clear";
pub const DEFAULT_USERNAME: &str = "Anonymous";
pub const MAX_CONTACTS: usize = 20;

const PURGE_PREFIX: &str = "ncp_";
const PURGE_FRAGMENTS: [&str; 4] = ["username", "user_id", "incident", "chat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Bn,
}

impl Language {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Bn => "bn",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "en" => Some(Self::En),
            "bn" => Some(Self::Bn),
            _ => None,
        }
    }

    #[must_use]
    pub const fn toggle(self) -> Self {
        match self {
            Self::En => Self::Bn,
            Self::Bn => Self::En,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// Anything other than `dark` is light.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        if code.trim() == "dark" {
            Self::Dark
        } else {
            Self::Light
        }
    }

    #[must_use]
    pub const fn is_dark(self) -> bool {
        matches!(self, Self::Dark)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefKey {
    Language,
    Theme,
    Notifications,
    Satellite,
    Contacts,
    DeviceId,
    Username,
}

impl PrefKey {
    pub const ALL: [Self; 7] = [
        Self::Language,
        Self::Theme,
        Self::Notifications,
        Self::Satellite,
        Self::Contacts,
        Self::DeviceId,
        Self::Username,
    ];

    #[must_use]
    pub const fn raw(self) -> &'static str {
        match self {
            Self::Language => "ncp_lang",
            Self::Theme => "ncp_theme",
            Self::Notifications => "ncp_notif",
            Self::Satellite => "ncp_sat",
            Self::Contacts => "ncp_contacts",
            Self::DeviceId => "ncp_user_id",
            Self::Username => "ncp_username",
        }
    }

    pub fn key(self) -> Result<KvKey, KvError> {
        KvKey::new(self.raw())
    }
}

/// A decoded stored value, or one about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefValue {
    Language(Language),
    Theme(Theme),
    Notifications(bool),
    Satellite(bool),
    Contacts(Vec<String>),
    DeviceId(DeviceId),
    Username(Option<String>),
}

impl PrefValue {
    #[must_use]
    pub const fn key(&self) -> PrefKey {
        match self {
            Self::Language(_) => PrefKey::Language,
            Self::Theme(_) => PrefKey::Theme,
            Self::Notifications(_) => PrefKey::Notifications,
            Self::Satellite(_) => PrefKey::Satellite,
            Self::Contacts(_) => PrefKey::Contacts,
            Self::DeviceId(_) => PrefKey::DeviceId,
            Self::Username(_) => PrefKey::Username,
        }
    }

    pub fn decode(key: PrefKey, bytes: &[u8]) -> Result<Self, KvError> {
        let kv_key = key.key()?;
        let value = match key {
            PrefKey::Language => {
                let code = decode_text(&kv_key, bytes)?;
                let language = Language::from_code(&code).ok_or_else(|| {
                    KvError::Serialization {
                        key: kv_key.to_string(),
                        message: format!("unknown language '{code}'"),
                    }
                })?;
                Self::Language(language)
            }
            PrefKey::Theme => Self::Theme(Theme::from_code(&decode_text(&kv_key, bytes)?)),
            PrefKey::Notifications => Self::Notifications(decode_json(&kv_key, bytes)?),
            PrefKey::Satellite => Self::Satellite(decode_json(&kv_key, bytes)?),
            PrefKey::Contacts => Self::Contacts(decode_json(&kv_key, bytes)?),
            PrefKey::DeviceId => {
                let id = decode_text(&kv_key, bytes)?;
                if id.trim().is_empty() {
                    return Err(KvError::Serialization {
                        key: kv_key.to_string(),
                        message: "empty device id".to_string(),
                    });
                }
                Self::DeviceId(DeviceId::new(id.trim()))
            }
            PrefKey::Username => {
                let name = decode_text(&kv_key, bytes)?;
                let name = name.trim();
                Self::Username((!name.is_empty()).then(|| name.to_string()))
            }
        };
        Ok(value)
    }

    pub fn encode(&self) -> Result<(KvKey, Vec<u8>), KvError> {
        let key = self.key().key()?;
        let bytes = match self {
            Self::Language(language) => encode_text(language.code())?,
            Self::Theme(theme) => encode_text(theme.code())?,
            Self::Notifications(flag) | Self::Satellite(flag) => encode_json(&key, flag)?,
            Self::Contacts(contacts) => encode_json(&key, contacts)?,
            Self::DeviceId(id) => encode_text(id.as_str())?,
            Self::Username(name) => encode_text(name.as_deref().unwrap_or_default())?,
        };
        Ok((key, bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub language: Language,
    pub theme: Theme,
    pub notifications_enabled: bool,
    pub satellite: bool,
    pub emergency_contacts: Vec<String>,
    pub username: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: Language::En,
            theme: Theme::Light,
            notifications_enabled: true,
            satellite: false,
            emergency_contacts: Vec::new(),
            username: None,
        }
    }
}

impl Preferences {
    /// Applies a loaded value; device ids are not a preference and are
    /// handed back to the caller.
    pub fn apply(&mut self, value: PrefValue) -> Option<DeviceId> {
        match value {
            PrefValue::Language(language) => self.language = language,
            PrefValue::Theme(theme) => self.theme = theme,
            PrefValue::Notifications(flag) => self.notifications_enabled = flag,
            PrefValue::Satellite(flag) => self.satellite = flag,
            PrefValue::Contacts(contacts) => self.emergency_contacts = contacts,
            PrefValue::Username(name) => self.username = name,
            PrefValue::DeviceId(id) => return Some(id),
        }
        None
    }

    pub fn toggle_language(&mut self) -> PrefValue {
        self.language = self.language.toggle();
        PrefValue::Language(self.language)
    }

    pub fn toggle_dark_mode(&mut self) -> PrefValue {
        self.theme = if self.theme.is_dark() {
            Theme::Light
        } else {
            Theme::Dark
        };
        PrefValue::Theme(self.theme)
    }

    pub fn toggle_notifications(&mut self) -> PrefValue {
        self.notifications_enabled = !self.notifications_enabled;
        PrefValue::Notifications(self.notifications_enabled)
    }

    pub fn toggle_satellite(&mut self) -> PrefValue {
        self.satellite = !self.satellite;
        PrefValue::Satellite(self.satellite)
    }

    pub fn add_emergency_contact(&mut self, raw: &str) -> Option<PrefValue> {
        let contact = raw.trim();
        if contact.is_empty() || self.emergency_contacts.len() >= MAX_CONTACTS {
            return None;
        }
        self.emergency_contacts.push(contact.to_string());
        Some(PrefValue::Contacts(self.emergency_contacts.clone()))
    }

    #[must_use]
    pub fn contacts_full(&self) -> bool {
        self.emergency_contacts.len() >= MAX_CONTACTS
    }

    pub fn remove_emergency_contact(&mut self, index: usize) -> Option<PrefValue> {
        if index >= self.emergency_contacts.len() {
            return None;
        }
        self.emergency_contacts.remove(index);
        Some(PrefValue::Contacts(self.emergency_contacts.clone()))
    }

    pub fn set_username(&mut self, name: &str) -> PrefValue {
        let name = name.trim();
        self.username = (!name.is_empty()).then(|| name.to_string());
        PrefValue::Username(self.username.clone())
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }
}

/// A Telegram recipient is an `@handle` or any text that reads as a finite number.
#[must_use]
pub fn is_valid_contact(raw: &str) -> bool {
    let contact = raw.trim();
    if contact.is_empty() {
        return false;
    }
    contact.starts_with('@') || contact.parse::<f64>().is_ok_and(f64::is_finite)
}

/// The marker holds an ISO date, so lexical order is date order.
#[must_use]
pub fn cleanup_required(marker: Option<&str>) -> bool {
    marker.map_or(true, |m| m.trim().is_empty() || m.trim() < CLEANUP_CUTOFF)
}

#[must_use]
pub fn should_purge(key: &str) -> bool {
    key.starts_with(PURGE_PREFIX) || PURGE_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// Keys gathered while paging through the store during cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupState {
    pub collected: Vec<String>,
    pub pending_deletes: usize,
}

impl CleanupState {
    pub fn collect(&mut self, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            if !self.collected.contains(&key) {
                self.collected.push(key);
            }
        }
    }

    #[must_use]
    pub fn purge_plan(&self) -> Vec<String> {
        self.collected
            .iter()
            .filter(|k| should_purge(k))
            .cloned()
            .collect()
    }

    /// Returns true once the last outstanding delete has completed.
    pub fn delete_finished(&mut self) -> bool {
        self.pending_deletes = self.pending_deletes.saturating_sub(1);
        self.pending_deletes == 0
    }
}
