use crate::camera::CameraDraft;
use crate::capabilities::{BackendResult, GeolocationResult, IntervalTick, RealtimeMessage};
use crate::chat::{ChatDraft, ChatTab};
use crate::incident::{RelayResponse, ReportDraft};
use crate::prefs::PrefKey;
use crate::{AppError, CoreConfig, Panel};

/// Storage results arrive with the key-value error already rendered.
pub type StoreResult<T> = Result<T, String>;

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    AppStarted,
    Configure(CoreConfig),

    CleanupMarkerLoaded(StoreResult<Option<Vec<u8>>>),
    StoredKeysListed(StoreResult<(Vec<String>, u64)>),
    StoredKeyDeleted {
        key: String,
        result: StoreResult<()>,
    },
    CleanupMarkerWritten(StoreResult<()>),
    PreferenceLoaded {
        key: PrefKey,
        result: StoreResult<Option<Vec<u8>>>,
    },
    PreferenceWritten {
        key: PrefKey,
        result: StoreResult<()>,
    },

    MapOpened,
    MapClosed,
    LocationUpdated(GeolocationResult),
    ToggleSharing,
    ToggleSatellite,
    Toggle3d,
    LocateMe,
    IncidentSelected {
        id: String,
    },
    IncidentDeselected,
    StartLocationPick,
    CancelLocationPick,
    MapClicked {
        lat: f64,
        lng: f64,
    },

    PresenceMessage(RealtimeMessage),
    PeersFetched(BackendResult),
    PresenceUpserted(BackendResult),
    HeartbeatTick(IntervalTick),

    MapIncidentsFetched(BackendResult),
    IncidentFeedMessage(RealtimeMessage),
    ActiveCamerasFetched(BackendResult),
    CameraFeedMessage(RealtimeMessage),

    OpenPanel(Panel),
    ClosePanel,

    ReportVideoLinkEdited(String),
    SubmitReport(ReportDraft),
    EvidenceUploaded(BackendResult),
    ReportInserted(BackendResult),
    RelayResponded(Result<RelayResponse, AppError>),

    HistoryFetched(BackendResult),
    HistoryFeedMessage(RealtimeMessage),

    OwnCamerasFetched(BackendResult),
    SaveCamera(CameraDraft),
    CameraSaved(BackendResult),
    DeleteCamera {
        id: String,
    },
    CameraDeleted {
        id: String,
        result: BackendResult,
    },
    ToggleCameraActive {
        id: String,
    },
    CameraToggleResult {
        mutation_id: String,
        result: BackendResult,
    },

    ChatTabSelected(ChatTab),
    ChatFetched {
        tab: ChatTab,
        fallback: bool,
        result: BackendResult,
    },
    ChatFeedMessage(RealtimeMessage),
    SendChatMessage(ChatDraft),
    ChatLocationResolved(GeolocationResult),
    ChatMediaUploaded(BackendResult),
    ChatMessageInserted(BackendResult),

    ToggleLanguage,
    ToggleDarkMode,
    ToggleNotifications,
    AddEmergencyContact(String),
    RemoveEmergencyContact(usize),
    SetUsername(String),

    DismissError,
    DismissToast,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::AppStarted => "app_started",
            Self::Configure(_) => "configure",
            Self::CleanupMarkerLoaded(_) => "cleanup_marker_loaded",
            Self::StoredKeysListed(_) => "stored_keys_listed",
            Self::StoredKeyDeleted { .. } => "stored_key_deleted",
            Self::CleanupMarkerWritten(_) => "cleanup_marker_written",
            Self::PreferenceLoaded { .. } => "preference_loaded",
            Self::PreferenceWritten { .. } => "preference_written",
            Self::MapOpened => "map_opened",
            Self::MapClosed => "map_closed",
            Self::LocationUpdated(_) => "location_updated",
            Self::ToggleSharing => "toggle_sharing",
            Self::ToggleSatellite => "toggle_satellite",
            Self::Toggle3d => "toggle_3d",
            Self::LocateMe => "locate_me",
            Self::IncidentSelected { .. } => "incident_selected",
            Self::IncidentDeselected => "incident_deselected",
            Self::StartLocationPick => "start_location_pick",
            Self::CancelLocationPick => "cancel_location_pick",
            Self::MapClicked { .. } => "map_clicked",
            Self::PresenceMessage(_) => "presence_message",
            Self::PeersFetched(_) => "peers_fetched",
            Self::PresenceUpserted(_) => "presence_upserted",
            Self::HeartbeatTick(_) => "heartbeat_tick",
            Self::MapIncidentsFetched(_) => "map_incidents_fetched",
            Self::IncidentFeedMessage(_) => "incident_feed_message",
            Self::ActiveCamerasFetched(_) => "active_cameras_fetched",
            Self::CameraFeedMessage(_) => "camera_feed_message",
            Self::OpenPanel(_) => "open_panel",
            Self::ClosePanel => "close_panel",
            Self::ReportVideoLinkEdited(_) => "report_video_link_edited",
            Self::SubmitReport(_) => "submit_report",
            Self::EvidenceUploaded(_) => "evidence_uploaded",
            Self::ReportInserted(_) => "report_inserted",
            Self::RelayResponded(_) => "relay_responded",
            Self::HistoryFetched(_) => "history_fetched",
            Self::HistoryFeedMessage(_) => "history_feed_message",
            Self::OwnCamerasFetched(_) => "own_cameras_fetched",
            Self::SaveCamera(_) => "save_camera",
            Self::CameraSaved(_) => "camera_saved",
            Self::DeleteCamera { .. } => "delete_camera",
            Self::CameraDeleted { .. } => "camera_deleted",
            Self::ToggleCameraActive { .. } => "toggle_camera_active",
            Self::CameraToggleResult { .. } => "camera_toggle_result",
            Self::ChatTabSelected(_) => "chat_tab_selected",
            Self::ChatFetched { .. } => "chat_fetched",
            Self::ChatFeedMessage(_) => "chat_feed_message",
            Self::SendChatMessage(_) => "send_chat_message",
            Self::ChatLocationResolved(_) => "chat_location_resolved",
            Self::ChatMediaUploaded(_) => "chat_media_uploaded",
            Self::ChatMessageInserted(_) => "chat_message_inserted",
            Self::ToggleLanguage => "toggle_language",
            Self::ToggleDarkMode => "toggle_dark_mode",
            Self::ToggleNotifications => "toggle_notifications",
            Self::AddEmergencyContact(_) => "add_emergency_contact",
            Self::RemoveEmergencyContact(_) => "remove_emergency_contact",
            Self::SetUsername(_) => "set_username",
            Self::DismissError => "dismiss_error",
            Self::DismissToast => "dismiss_toast",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::MapOpened
                | Self::MapClosed
                | Self::ToggleSharing
                | Self::ToggleSatellite
                | Self::Toggle3d
                | Self::LocateMe
                | Self::IncidentSelected { .. }
                | Self::IncidentDeselected
                | Self::StartLocationPick
                | Self::CancelLocationPick
                | Self::MapClicked { .. }
                | Self::OpenPanel(_)
                | Self::ClosePanel
                | Self::SubmitReport(_)
                | Self::SaveCamera(_)
                | Self::DeleteCamera { .. }
                | Self::ToggleCameraActive { .. }
                | Self::ChatTabSelected(_)
                | Self::SendChatMessage(_)
                | Self::ToggleLanguage
                | Self::ToggleDarkMode
                | Self::ToggleNotifications
                | Self::AddEmergencyContact(_)
                | Self::RemoveEmergencyContact(_)
                | Self::SetUsername(_)
                | Self::DismissError
                | Self::DismissToast
        )
    }
}
