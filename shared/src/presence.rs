//! Live location sharing between volunteers.
//!
//! Staleness is evaluated at read time: a peer whose `last_seen` falls
//! outside the active window is evicted on the next heartbeat and never
//! rendered, whether or not a delete event ever arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{ChangeKind, ChannelSpec, Filter, RowChange, SelectQuery, Table};
use crate::markers::{Locatable, MarkerChange, MarkerSet};
use crate::model::DeviceId;
use crate::{iso_from_millis, millis_from_datetime, CoordinateError, ValidatedCoordinate};

pub const PRESENCE_CHANNEL: &str = "users_tracking";
pub const HEARTBEAT_INTERVAL: &str = "presence_heartbeat";
pub const HEARTBEAT_PERIOD_MS: u64 = 10_000;
pub const ACTIVE_WINDOW_MS: u64 = 5 * 60 * 1000;

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRow {
    pub id: DeviceId,
    pub lat: f64,
    pub lng: f64,
    pub last_seen: DateTime<Utc>,
}

impl PresenceRow {
    #[must_use]
    pub fn heartbeat(own: &DeviceId, at: ValidatedCoordinate, now_ms: u64) -> Self {
        let millis = i64::try_from(now_ms).unwrap_or(i64::MAX);
        Self {
            id: own.clone(),
            lat: at.lat(),
            lng: at.lng(),
            last_seen: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn last_seen_ms(&self) -> u64 {
        millis_from_datetime(&self.last_seen)
    }

    #[must_use]
    pub fn is_active(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms()) <= window_ms
    }
}

impl Locatable for PresenceRow {
    fn marker_id(&self) -> String {
        self.id.as_str().to_string()
    }

    fn position(&self) -> Result<ValidatedCoordinate, CoordinateError> {
        ValidatedCoordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingState {
    #[default]
    Idle,
    Subscribing,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
    Created(String),
    Moved(String),
    Removed(String),
    Ignored,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    state: SharingState,
    peers: MarkerSet<PresenceRow>,
}

impl PresenceTracker {
    #[must_use]
    pub const fn state(&self) -> SharingState {
        self.state
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        !matches!(self.state, SharingState::Idle)
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.state, SharingState::Live)
    }

    /// Returns false when already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.state = SharingState::Subscribing;
        true
    }

    /// Returns false when nothing was running. Peer markers are kept; they
    /// age out through the active window.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.state = SharingState::Idle;
        true
    }

    /// Returns true on the first confirmation, when the initial upsert is due.
    pub fn on_subscribed(&mut self) -> bool {
        if self.state == SharingState::Subscribing {
            self.state = SharingState::Live;
            return true;
        }
        false
    }

    pub fn apply_snapshot(
        &mut self,
        own: &DeviceId,
        rows: Vec<PresenceRow>,
        now_ms: u64,
        window_ms: u64,
    ) -> usize {
        self.peers.upsert_all(
            rows.into_iter()
                .filter(|row| &row.id != own && row.is_active(now_ms, window_ms)),
        )
    }

    pub fn apply_change(&mut self, own: &DeviceId, change: &RowChange) -> PeerChange {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(row) = change.new_row::<PresenceRow>() else {
                    return PeerChange::Ignored;
                };
                if &row.id == own {
                    return PeerChange::Ignored;
                }
                let id = row.id.as_str().to_string();
                match self.peers.upsert(row) {
                    Ok(MarkerChange::Created) => PeerChange::Created(id),
                    Ok(MarkerChange::Moved) => PeerChange::Moved(id),
                    Err(e) => {
                        tracing::warn!(peer = %id, error = %e, "ignoring peer with bad position");
                        PeerChange::Ignored
                    }
                }
            }
            ChangeKind::Delete => match change.row_id() {
                Some(id) if self.peers.remove(&id) => PeerChange::Removed(id),
                _ => PeerChange::Ignored,
            },
        }
    }

    pub fn evict_stale(&mut self, now_ms: u64, window_ms: u64) -> Vec<String> {
        self.peers.retain(|row| row.is_active(now_ms, window_ms))
    }

    pub fn active_peers(&self, now_ms: u64, window_ms: u64) -> impl Iterator<Item = &PresenceRow> {
        self.peers
            .values()
            .filter(move |row| row.is_active(now_ms, window_ms))
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[must_use]
pub fn channel_spec() -> ChannelSpec {
    ChannelSpec::all_changes(PRESENCE_CHANNEL, Table::Users)
}

#[must_use]
pub fn peer_query(now_ms: u64, window_ms: u64) -> SelectQuery {
    SelectQuery::from(Table::Users).filter(Filter::gt(
        "last_seen",
        iso_from_millis(now_ms.saturating_sub(window_ms)),
    ))
}
