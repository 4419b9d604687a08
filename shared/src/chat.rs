//! Community chat over the `public_chats` table.
//!
//! Every message carries an explicit audience. Public tabs never see support
//! or admin traffic, and the nearby tab additionally requires both positions
//! and a great-circle distance under the configured radius.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{ChannelSpec, Filter, SelectQuery, Table};
use crate::model::{DeviceId, MessageId};
use crate::prefs::DEFAULT_USERNAME;
use crate::{
    format_distance, format_time_ago, iso_from_millis, millis_from_datetime, AppError, AppResult,
    Attachment, BoundingBox, ErrorKind, ValidatedCoordinate,
};

pub const CHAT_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;
pub const CHAT_CHANNEL: &str = "public_chat_room";
pub const ADMIN_DISPLAY_NAME: &str = "NCP Admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatTab {
    #[default]
    Nearby,
    Nationwide,
    Official,
    Support,
}

impl ChatTab {
    #[must_use]
    pub const fn audience(self) -> Audience {
        match self {
            Self::Nearby | Self::Nationwide => Audience::Public,
            Self::Official => Audience::Admin,
            Self::Support => Audience::Support,
        }
    }

    /// Official announcements are read-only.
    #[must_use]
    pub const fn can_post(self) -> bool {
        !matches!(self, Self::Official)
    }

    #[must_use]
    pub const fn attaches_location(self) -> bool {
        matches!(self, Self::Nearby)
    }

    #[must_use]
    pub fn matches_audience(self, msg: &ChatMessage) -> bool {
        match self {
            Self::Official => msg.audience == Audience::Admin || msg.is_admin,
            tab => msg.audience == tab.audience(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Public,
    Admin,
    Support,
}

impl Audience {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Admin => "admin",
            Self::Support => "support",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
    Video,
    #[serde(other)]
    Unknown,
}

impl MediaKind {
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Video
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default, rename = "media_type")]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

impl ChatMessage {
    #[must_use]
    pub fn position(&self) -> Option<ValidatedCoordinate> {
        ValidatedCoordinate::new(self.lat?, self.lng?).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub content: String,
    pub media_url: Option<String>,
    #[serde(rename = "media_type")]
    pub media_kind: Option<MediaKind>,
    pub audience: Audience,
    pub username: String,
    pub user_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// True when both positions are known and strictly closer than `radius_m`.
#[must_use]
pub fn within_radius(
    viewer: Option<ValidatedCoordinate>,
    msg: &ChatMessage,
    radius_m: f64,
) -> bool {
    match (viewer, msg.position()) {
        (Some(viewer), Some(at)) => viewer.distance_to(at) < radius_m,
        _ => false,
    }
}

#[must_use]
pub fn belongs_to(
    tab: ChatTab,
    msg: &ChatMessage,
    viewer: Option<ValidatedCoordinate>,
    radius_m: f64,
) -> bool {
    tab.matches_audience(msg) && (tab != ChatTab::Nearby || within_radius(viewer, msg, radius_m))
}

/// Messages of the last window, oldest first. `fallback` selects the
/// `is_admin` flag instead of the audience column for the official tab.
#[must_use]
pub fn feed_query(
    tab: ChatTab,
    viewer: Option<ValidatedCoordinate>,
    now_ms: u64,
    window_ms: u64,
    radius_m: f64,
    fallback: bool,
) -> SelectQuery {
    let mut query = SelectQuery::from(Table::PublicChats)
        .filter(Filter::gt(
            "created_at",
            iso_from_millis(now_ms.saturating_sub(window_ms)),
        ))
        .order_by("created_at", true);

    query = match (tab, fallback) {
        (ChatTab::Official, true) => query.filter(Filter::eq("is_admin", true)),
        _ => query.filter(Filter::eq("audience", tab.audience().as_str())),
    };

    if let (ChatTab::Nearby, Some(viewer)) = (tab, viewer) {
        let bbox = BoundingBox::around(viewer, radius_m);
        query = query
            .filter(Filter::gte("lat", bbox.min_lat))
            .filter(Filter::lte("lat", bbox.max_lat));
        // Filters are ANDed, so a box split by the antimeridian is left to the
        // haversine check.
        if !bbox.crosses_antimeridian() {
            query = query
                .filter(Filter::gte("lng", bbox.min_lng))
                .filter(Filter::lte("lng", bbox.max_lng));
        }
    }

    query
}

#[must_use]
pub fn channel_spec() -> ChannelSpec {
    ChannelSpec::inserts(CHAT_CHANNEL, Table::PublicChats)
}

/// Own when the display name matches (and is not the anonymous default) or
/// the device id matches.
#[must_use]
pub fn is_own(msg: &ChatMessage, username: &str, device_id: Option<&DeviceId>) -> bool {
    if username != DEFAULT_USERNAME && msg.username == username {
        return true;
    }
    matches!(
        (msg.user_id.as_deref(), device_id),
        (Some(id), Some(own)) if id == own.as_str()
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatDraft {
    pub content: String,
    #[serde(default)]
    pub media: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub username: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    #[default]
    Idle,
    Locating,
    Uploading,
    Inserting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendStep {
    Locate,
    Upload {
        path: String,
        content_type: String,
        data: Vec<u8>,
    },
    Insert(NewChatMessage),
}

#[derive(Debug, Clone, PartialEq)]
struct PendingSend {
    tab: ChatTab,
    content: String,
    media: Option<Attachment>,
    media_url: Option<String>,
    media_kind: Option<MediaKind>,
    at: Option<ValidatedCoordinate>,
    sender: Sender,
}

impl PendingSend {
    fn row(&self) -> NewChatMessage {
        NewChatMessage {
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            media_kind: self.media_kind,
            audience: self.tab.audience(),
            username: self.sender.username.clone(),
            user_id: self.sender.user_id.clone(),
            lat: self.at.map(ValidatedCoordinate::lat),
            lng: self.at.map(ValidatedCoordinate::lng),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatState {
    pub tab: ChatTab,
    pub open: bool,
    messages: Vec<ChatMessage>,
    pub loading: bool,
    pub used_fallback: bool,
    pub scroll_token: u64,
    send_phase: SendPhase,
    pending: Option<PendingSend>,
}

impl ChatState {
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub const fn send_phase(&self) -> SendPhase {
        self.send_phase
    }

    #[must_use]
    pub const fn is_sending(&self) -> bool {
        !matches!(self.send_phase, SendPhase::Idle)
    }

    /// Clears the feed for a fresh fetch of `tab`.
    pub fn switch_to(&mut self, tab: ChatTab) {
        self.tab = tab;
        self.messages.clear();
        self.loading = true;
        self.used_fallback = false;
    }

    pub fn close(&mut self) {
        self.open = false;
        self.loading = false;
        self.messages.clear();
    }

    fn bump_scroll(&mut self) {
        self.scroll_token = self.scroll_token.wrapping_add(1);
    }

    pub fn apply_snapshot(&mut self, rows: Vec<ChatMessage>) {
        let tab = self.tab;
        self.messages = rows
            .into_iter()
            .filter(|m| tab.matches_audience(m))
            .collect();
        self.loading = false;
        self.bump_scroll();
    }

    /// Empty state after both query shapes failed.
    pub fn give_up(&mut self) {
        self.messages.clear();
        self.loading = false;
    }

    /// Appends a streamed insert in receipt order. Returns false for other
    /// audiences and for ids already shown.
    pub fn append(&mut self, msg: ChatMessage) -> bool {
        if !self.tab.matches_audience(&msg) || self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.messages.push(msg);
        self.bump_scroll();
        true
    }

    pub fn visible(
        &self,
        viewer: Option<ValidatedCoordinate>,
        radius_m: f64,
    ) -> impl Iterator<Item = &ChatMessage> {
        let tab = self.tab;
        self.messages
            .iter()
            .filter(move |m| belongs_to(tab, m, viewer, radius_m))
    }

    /// Validates the draft and returns the first step. `None` means there is
    /// nothing to send or a send is already in flight.
    pub fn begin_send(
        &mut self,
        draft: ChatDraft,
        sender: Sender,
        own_location: Option<ValidatedCoordinate>,
        now_ms: u64,
    ) -> AppResult<Option<SendStep>> {
        if !self.tab.can_post() {
            return Err(AppError::new(
                ErrorKind::Validation,
                "Official announcements are read-only",
            ));
        }
        let content = draft.content.trim().to_string();
        if self.is_sending() || (content.is_empty() && draft.media.is_none()) {
            return Ok(None);
        }

        self.pending = Some(PendingSend {
            tab: self.tab,
            content,
            media: draft.media,
            media_url: None,
            media_kind: None,
            at: own_location,
            sender,
        });

        if self.tab.attaches_location() && own_location.is_none() {
            self.send_phase = SendPhase::Locating;
            return Ok(Some(SendStep::Locate));
        }
        Ok(self.next_step(now_ms))
    }

    /// Continues a nearby send. A failed fix still sends, without position.
    pub fn location_resolved(
        &mut self,
        fix: Option<ValidatedCoordinate>,
        now_ms: u64,
    ) -> Option<SendStep> {
        if self.send_phase != SendPhase::Locating {
            return None;
        }
        self.pending.as_mut()?.at = fix;
        self.next_step(now_ms)
    }

    pub fn media_uploaded(&mut self, public_url: String) -> Option<NewChatMessage> {
        if self.send_phase != SendPhase::Uploading {
            return None;
        }
        let pending = self.pending.as_mut()?;
        pending.media_url = Some(public_url);
        self.send_phase = SendPhase::Inserting;
        Some(pending.row())
    }

    pub fn send_finished(&mut self) {
        self.pending = None;
        self.send_phase = SendPhase::Idle;
    }

    fn next_step(&mut self, now_ms: u64) -> Option<SendStep> {
        let pending = self.pending.as_mut()?;
        if let Some(file) = pending.media.take() {
            pending.media_kind = Some(MediaKind::from_mime(&file.content_type));
            self.send_phase = SendPhase::Uploading;
            return Some(SendStep::Upload {
                path: file.storage_name(now_ms),
                content_type: file.content_type,
                data: file.data,
            });
        }
        self.send_phase = SendPhase::Inserting;
        Some(SendStep::Insert(pending.row()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessageView {
    pub id: String,
    pub author: String,
    pub content: String,
    pub is_own: bool,
    pub is_admin: bool,
    pub media_url: Option<String>,
    pub media_kind: Option<MediaKind>,
    pub time_ago: Option<String>,
    pub distance: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    pub tab: ChatTab,
    pub can_post: bool,
    pub loading: bool,
    pub sending: bool,
    pub used_fallback: bool,
    pub location_known: bool,
    pub messages: Vec<ChatMessageView>,
    pub scroll_token: u64,
}

impl ChatView {
    #[must_use]
    pub fn build(
        state: &ChatState,
        viewer: Option<ValidatedCoordinate>,
        radius_m: f64,
        username: &str,
        device_id: Option<&DeviceId>,
        now_ms: u64,
    ) -> Self {
        let messages = state
            .visible(viewer, radius_m)
            .map(|m| {
                let own = is_own(m, username, device_id);
                let author = if m.is_admin {
                    ADMIN_DISPLAY_NAME.to_string()
                } else if own {
                    "You".to_string()
                } else {
                    m.username.clone()
                };
                ChatMessageView {
                    id: m.id.as_str().to_string(),
                    author,
                    content: m.content.clone(),
                    is_own: own,
                    is_admin: m.is_admin,
                    media_url: m.media_url.clone(),
                    media_kind: m.media_kind,
                    time_ago: m
                        .created_at
                        .as_ref()
                        .map(|at| format_time_ago(millis_from_datetime(at), now_ms)),
                    distance: match (viewer, m.position()) {
                        (Some(v), Some(at)) if state.tab == ChatTab::Nearby => {
                            Some(format_distance(v.distance_to(at)))
                        }
                        _ => None,
                    },
                }
            })
            .collect();

        Self {
            tab: state.tab,
            can_post: state.tab.can_post(),
            loading: state.loading,
            sending: state.is_sending(),
            used_fallback: state.used_fallback,
            location_known: viewer.is_some(),
            messages,
            scroll_token: state.scroll_token,
        }
    }
}
