use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::{CameraEntry, CameraRegistry};
use crate::chat::ChatState;
use crate::incident::{HistoryState, IncidentReport, ReportState};
use crate::markers::{MarkerSet, DEFAULT_PITCH};
use crate::prefs::{CleanupState, Preferences};
use crate::presence::PresenceTracker;
use crate::{
    get_current_time_ms, AppError, CoreConfig, FlyTo, Panel, ToastKind, ToastMessage,
    ValidatedCoordinate,
};

/// Backend ids arrive either as text (uuid) or as integers (bigint keys).
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(from = "RawId")]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(String::from(raw))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(DeviceId);
typed_id!(IncidentId);
typed_id!(CameraId);
typed_id!(MessageId);

pub const DEVICE_ID_PREFIX: &str = "user_";
pub const DEVICE_ID_RANDOM_LEN: usize = 9;

impl DeviceId {
    /// Fresh locally generated identity. Advisory only: nothing on the
    /// backend binds it to a person.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!(
            "{DEVICE_ID_PREFIX}{}",
            crate::random_base36(DEVICE_ID_RANDOM_LEN)
        ))
    }
}

/// Startup sequence: one-time cleanup, then preference loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootPhase {
    #[default]
    NotStarted,
    CheckingCleanup,
    Purging,
    LoadingPreferences,
    Ready,
}

#[derive(Debug)]
pub struct Model {
    pub config: CoreConfig,
    pub boot: BootPhase,
    pub prefs_pending: usize,
    pub cleanup: CleanupState,
    pub prefs: Preferences,
    pub device_id: Option<DeviceId>,

    pub panel: Panel,
    pub map_open: bool,
    pub map_3d: bool,
    pub map_pitch: f64,
    pub share_location: bool,
    pub watching_location: bool,
    pub own_location: Option<ValidatedCoordinate>,
    pub fly_to: Option<FlyTo>,
    pub fly_token: u64,
    pub picking_location: bool,
    pub picked_location: Option<ValidatedCoordinate>,

    pub presence: PresenceTracker,
    pub incidents: MarkerSet<IncidentReport>,
    pub incident_feed_live: bool,
    pub selected_incident: Option<IncidentId>,
    pub map_cameras: MarkerSet<CameraEntry>,
    pub camera_feed_live: bool,

    pub report: ReportState,
    pub history: HistoryState,
    pub camera_registry: CameraRegistry,
    pub chat: ChatState,

    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
    pub view_timestamp_ms: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            config: CoreConfig::default(),
            boot: BootPhase::default(),
            prefs_pending: 0,
            cleanup: CleanupState::default(),
            prefs: Preferences::default(),
            device_id: None,
            panel: Panel::None,
            map_open: false,
            map_3d: true,
            map_pitch: DEFAULT_PITCH,
            share_location: false,
            watching_location: false,
            own_location: None,
            fly_to: None,
            fly_token: 0,
            picking_location: false,
            picked_location: None,
            presence: PresenceTracker::default(),
            incidents: MarkerSet::new(),
            incident_feed_live: false,
            selected_incident: None,
            map_cameras: MarkerSet::new(),
            camera_feed_live: false,
            report: ReportState::default(),
            history: HistoryState::default(),
            camera_registry: CameraRegistry::default(),
            chat: ChatState::default(),
            active_error: None,
            active_toast: None,
            view_timestamp_ms: get_current_time_ms(),
        }
    }
}

impl Model {
    pub fn update_timestamp(&mut self) {
        self.view_timestamp_ms = get_current_time_ms();
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) {
        self.active_toast = Some(ToastMessage::new(message, kind));
    }

    pub fn clear_toast(&mut self) {
        self.active_toast = None;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.boot == BootPhase::Ready
    }

    /// Presence runs only while the map is mounted, sharing is on and a fix
    /// is known.
    #[must_use]
    pub fn should_share_presence(&self) -> bool {
        self.map_open
            && self.share_location
            && self.own_location.is_some()
            && self.device_id.is_some()
    }

    /// Owner scope for the camera registry; `anon` until a device id exists.
    #[must_use]
    pub fn owner_scope(&self) -> String {
        self.device_id
            .as_ref()
            .map_or_else(|| "anon".to_string(), |id| id.as_str().to_string())
    }

    pub fn request_fly_to(&mut self, at: ValidatedCoordinate, zoom: f64) {
        self.fly_token = self.fly_token.wrapping_add(1);
        self.fly_to = Some(FlyTo {
            lat: at.lat(),
            lng: at.lng(),
            zoom,
            token: self.fly_token,
        });
    }
}
