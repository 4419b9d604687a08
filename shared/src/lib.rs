#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod camera;
pub mod chat;
pub mod embed;
pub mod event;
pub mod incident;
pub mod markers;
pub mod model;
pub mod prefs;
pub mod presence;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use model::Model;

use crate::capabilities::{BackendError, GeolocationError, KvError, UrlError};
use crate::markers::{MapLayers, MapPin};
use crate::prefs::{Language, Theme};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const DEFAULT_RELAY_URL: &str = "http://localhost:3000/api/send-incident";
pub const DEFAULT_NEARBY_RADIUS_M: f64 = 5_000.0;
pub const DESCRIPTION_PREVIEW_LENGTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    UploadTooLarge,
    Location,
    LocationPermissionDenied,
    Backend,
    Realtime,
    FeatureUnavailable,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::UploadTooLarge => "UPLOAD_TOO_LARGE",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::Backend => "BACKEND_ERROR",
            Self::Realtime => "REALTIME_ERROR",
            Self::FeatureUnavailable => "FEATURE_UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::RateLimited
            | Self::Storage
            | Self::Location
            | Self::Realtime => ErrorSeverity::Transient,

            Self::Serialization
            | Self::Deserialization
            | Self::Internal => ErrorSeverity::Fatal,

            Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::UploadTooLarge
            | Self::LocationPermissionDenied
            | Self::Backend
            | Self::FeatureUnavailable
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::Storage
                | Self::Conflict
                | Self::Location
                | Self::Realtime
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authorization => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation | ErrorKind::FeatureUnavailable | ErrorKind::Backend => {
                self.message.clone()
            }
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Conflict => {
                "This action conflicts with a recent change. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.".into(),
            ErrorKind::Storage => {
                "Unable to save settings on this device. Please free up some storage space.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::UploadTooLarge => format!(
                "The file is too large. Please use a file smaller than {} MB.",
                capabilities::MAX_UPLOAD_BYTES / (1024 * 1024)
            ),
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required. Please enable location permissions in Settings."
                    .into()
            }
            ErrorKind::Realtime => "Live updates are temporarily unavailable.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 | 403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::Timeout,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(|e| e.error.or(e.message))
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        let kind = match &e {
            KvError::InvalidKey { .. } => ErrorKind::Internal,
            KvError::ValueTooLarge { .. } | KvError::Storage(_) => ErrorKind::Storage,
            KvError::Serialization { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<BackendError> for AppError {
    fn from(e: BackendError) -> Self {
        let kind = match &e {
            BackendError::Network(_) => ErrorKind::Network,
            BackendError::Rejected { .. } => ErrorKind::Backend,
            BackendError::PermissionDenied(_) => ErrorKind::Authorization,
            BackendError::UploadTooLarge { .. } => ErrorKind::UploadTooLarge,
            BackendError::UnexpectedResponse(_) => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<GeolocationError> for AppError {
    fn from(e: GeolocationError) -> Self {
        let kind = match &e {
            GeolocationError::PermissionDenied => ErrorKind::LocationPermissionDenied,
            GeolocationError::Unavailable(_) => ErrorKind::Location,
            GeolocationError::Timeout => ErrorKind::Timeout,
            GeolocationError::Unsupported => ErrorKind::FeatureUnavailable,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<UrlError> for AppError {
    fn from(e: UrlError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<crux_http::HttpError> for AppError {
    fn from(e: crux_http::HttpError) -> Self {
        match e {
            crux_http::HttpError::Http { code, body, .. } => {
                Self::from_http_status(u16::from(code), body.as_deref())
            }
            crux_http::HttpError::Timeout => AppError::new(ErrorKind::Timeout, e.to_string()),
            crux_http::HttpError::Json(_) => {
                AppError::new(ErrorKind::Deserialization, e.to_string())
            }
            crux_http::HttpError::Url(_) => AppError::new(ErrorKind::Validation, e.to_string()),
            crux_http::HttpError::Io(_) => AppError::new(ErrorKind::Network, e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lng: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lng(self) -> f64 {
        self.lng
    }

    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        haversine_distance(self, other)
    }
}

impl TryFrom<(f64, f64)> for ValidatedCoordinate {
    type Error = CoordinateError;

    fn try_from((lat, lng): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(lat, lng)
    }
}

#[must_use]
pub fn haversine_distance(p1: ValidatedCoordinate, p2: ValidatedCoordinate) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (p1.lat - p2.lat).abs() < EPSILON && (p1.lng - p2.lng).abs() < EPSILON {
        return 0.0;
    }

    let lat1_rad = p1.lat.to_radians();
    let lat2_rad = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lng = (p2.lng - p1.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);

    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().asin();

    let result = EARTH_RADIUS_M * c;

    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

/// Lat/lng rectangle enclosing a circle; a cheap pre-filter that the exact
/// haversine check refines.
///
/// When the box crosses the antimeridian `min_lng > max_lng`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn around(center: ValidatedCoordinate, radius_m: f64) -> Self {
        let angular = radius_m.max(0.0) / EARTH_RADIUS_M;
        let d_lat = angular.to_degrees();
        let min_lat = (center.lat - d_lat).max(-90.0);
        let max_lat = (center.lat + d_lat).min(90.0);

        // A circle reaching over a pole covers every longitude.
        let cos_lat = center.lat.to_radians().cos();
        if angular >= std::f64::consts::FRAC_PI_2 || angular.sin() >= cos_lat {
            return Self {
                min_lat,
                max_lat,
                min_lng: -180.0,
                max_lng: 180.0,
            };
        }

        let d_lng = (angular.sin() / cos_lat).asin().to_degrees();
        Self {
            min_lat,
            max_lat,
            min_lng: wrap_longitude(center.lng - d_lng),
            max_lng: wrap_longitude(center.lng + d_lng),
        }
    }

    #[must_use]
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    #[must_use]
    pub fn contains(&self, point: ValidatedCoordinate) -> bool {
        let lat_ok = (self.min_lat..=self.max_lat).contains(&point.lat);
        let lng_ok = if self.crosses_antimeridian() {
            point.lng >= self.min_lng || point.lng <= self.max_lng
        } else {
            (self.min_lng..=self.max_lng).contains(&point.lng)
        };
        lat_ok && lng_ok
    }
}

fn wrap_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        lng
    } else {
        (lng + 540.0).rem_euclid(360.0) - 180.0
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    if timestamp_ms > now_ms {
        return "Just now".into();
    }

    let diff_secs = now_ms.saturating_sub(timestamp_ms) / 1000;

    if diff_secs < 5 {
        return "Just now".into();
    }
    if diff_secs < 60 {
        return format!("{diff_secs}s ago");
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins}m ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours}h ago");
    }

    let diff_days = diff_hours / 24;
    if diff_days < 7 {
        return format!("{diff_days}d ago");
    }
    if diff_days < 30 {
        return format!("{}w ago", diff_days / 7);
    }
    if diff_days < 365 {
        return format!("{}mo ago", diff_days / 30);
    }

    format!("{}y ago", diff_days / 365)
}

#[must_use]
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(max_chars).collect();
    preview.push_str("...");
    preview
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// RFC 3339 timestamp as the backend stores it.
#[must_use]
pub fn iso_from_millis(ms: u64) -> String {
    let millis = i64::try_from(ms).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[must_use]
pub fn millis_from_datetime(at: &DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

/// A file picked or recorded by the user, handed over by the shell.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Attachment {
    #[must_use]
    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(char::is_alphanumeric))
            .unwrap_or("bin")
    }

    /// `<millis>_<random9>.<ext>`
    #[must_use]
    pub fn storage_name(&self, now_ms: u64) -> String {
        format!("{now_ms}_{}.{}", random_base36(9), self.extension())
    }
}

#[must_use]
pub fn random_base36(len: usize) -> String {
    use rand::Rng;

    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at_ms: get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.duration_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}

/// Settings the shell may override at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub relay_url: String,
    pub nearby_radius_m: f64,
    pub heartbeat_period_ms: u64,
    pub presence_window_ms: u64,
    pub chat_window_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            nearby_radius_m: DEFAULT_NEARBY_RADIUS_M,
            heartbeat_period_ms: presence::HEARTBEAT_PERIOD_MS,
            presence_window_ms: presence::ACTIVE_WINDOW_MS,
            chat_window_ms: chat::CHAT_WINDOW_MS,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> AppResult<()> {
        capabilities::ValidatedUrl::new(&self.relay_url, capabilities::HostPolicy::AllowPrivate)?;

        if !self.nearby_radius_m.is_finite() || self.nearby_radius_m <= 0.0 {
            return Err(AppError::new(
                ErrorKind::Validation,
                "Nearby radius must be a positive distance",
            )
            .with_context("nearby_radius_m", self.nearby_radius_m.to_string()));
        }

        if self.heartbeat_period_ms == 0 || self.heartbeat_period_ms >= self.presence_window_ms {
            return Err(AppError::new(
                ErrorKind::Validation,
                "Heartbeat period must be shorter than the presence window",
            ));
        }

        if self.chat_window_ms == 0 {
            return Err(AppError::new(ErrorKind::Validation, "Chat window cannot be empty"));
        }

        Ok(())
    }
}

/// Overlay shown on top of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    #[default]
    None,
    Report,
    History,
    Chat,
    Cameras,
    Settings,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MapView {
    pub layers: MapLayers,
    pub center_lat: f64,
    pub center_lng: f64,
    pub zoom: f64,
    pub pitch: f64,
    pub fly_to: Option<FlyTo>,
    pub pins: Vec<MapPin>,
    pub features: geojson::FeatureCollection,
    pub picking_location: bool,
    pub selected_incident: Option<incident::IncidentPopup>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlyTo {
    pub lat: f64,
    pub lng: f64,
    pub zoom: f64,
    pub token: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SharingView {
    pub enabled: bool,
    pub live: bool,
    pub location_known: bool,
    pub active_peers: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactView {
    pub value: String,
    pub valid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SettingsView {
    pub dark_mode: bool,
    pub notifications: bool,
    pub satellite: bool,
    pub contacts: Vec<ContactView>,
    pub username: String,
    pub device_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelView {
    None,
    Report(incident::ReportFormView),
    History(incident::HistoryView),
    Chat(chat::ChatView),
    Cameras(camera::CameraRegistryView),
    Settings(SettingsView),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewState {
    Loading {
        message: Option<String>,
    },
    Ready {
        map: Box<MapView>,
        sharing: SharingView,
        panel: PanelView,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToastView {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl From<&ToastMessage> for ToastView {
    fn from(t: &ToastMessage) -> Self {
        Self {
            message: t.message.clone(),
            kind: t.kind,
            duration_ms: t.duration_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub state: ViewState,
    pub language: Language,
    pub theme: Theme,
    pub error: Option<UserFacingError>,
    pub toast: Option<ToastView>,
}

pub mod app {
    use crate::camera::{self, CameraEntry, CameraRegistryView};
    use crate::capabilities::{
        BackendResponse, Bucket, ChangeKind, GeolocationError, HostPolicy,
        RealtimeMessage, Table, ValidatedUrl,
    };
    use crate::chat::{self, ChatMessage, ChatTab, ChatView, SendStep, Sender};
    use crate::incident::{
        self, HistoryView, IncidentPopup, IncidentReport, NewReport, RelayRequest,
        RelayResponse, ReportFormView, ReportStep,
    };
    use crate::markers::{
        feature_collection, pitch_for, MapLayers, MapPin, PinKind, DEFAULT_CENTER_LAT,
        DEFAULT_CENTER_LNG, DEFAULT_ZOOM, FIRST_FIX_ZOOM, LOCATE_ZOOM,
    };
    use crate::model::{BootPhase, CameraId, DeviceId, IncidentId};
    use crate::prefs::{
        cleanup_required, is_valid_contact, PrefKey, PrefValue, CLEANUP_CUTOFF,
        CLEANUP_MARKER_KEY, MAX_CONTACTS,
    };
    use crate::presence::{self, PresenceRow, HEARTBEAT_INTERVAL, PRESENCE_CHANNEL};
    use crate::{
        AppError, Capabilities, ContactView, ErrorKind, Event, MapView, Model, Panel, PanelView,
        SettingsView, SharingView, ToastKind, ToastView, UserFacingError, ValidatedCoordinate,
        ViewModel, ViewState,
    };

    const OWN_PIN_ID: &str = "self";
    const PEER_LABEL: &str = "Volunteer";
    const CHAT_SEND_FAILED: &str = "Failed to send message. Please try again.";

    #[derive(Default)]
    pub struct App;

    impl App {
        fn persist(value: &PrefValue, model: &mut Model, caps: &Capabilities) {
            match value.encode() {
                Ok((key, bytes)) => {
                    let pref = value.key();
                    caps.key_value.set(key.into_string(), bytes, move |result| {
                        Event::PreferenceWritten {
                            key: pref,
                            result: result.map(|_| ()).map_err(|e| e.to_string()),
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(key = value.key().raw(), error = %e, "preference encode failed");
                    model.set_error(e.into());
                }
            }
        }

        fn load_preferences(model: &mut Model, caps: &Capabilities) {
            model.boot = BootPhase::LoadingPreferences;
            model.prefs_pending = PrefKey::ALL.len();
            for key in PrefKey::ALL {
                caps.key_value.get(key.raw().to_string(), move |result| {
                    Event::PreferenceLoaded {
                        key,
                        result: result.map_err(|e| e.to_string()),
                    }
                });
            }
        }

        fn list_stored_keys(cursor: u64, caps: &Capabilities) {
            caps.key_value.list_keys(String::new(), cursor, |result| {
                Event::StoredKeysListed(result.map_err(|e| e.to_string()))
            });
        }

        fn write_cleanup_marker(caps: &Capabilities) {
            caps.key_value.set(
                CLEANUP_MARKER_KEY.to_string(),
                CLEANUP_CUTOFF.as_bytes().to_vec(),
                |result| Event::CleanupMarkerWritten(result.map(|_| ()).map_err(|e| e.to_string())),
            );
        }

        fn finish_boot(model: &mut Model, caps: &Capabilities) {
            if model.device_id.is_none() {
                let id = DeviceId::generate();
                tracing::info!(device_id = %id, "generated device id");
                Self::persist(&PrefValue::DeviceId(id.clone()), model, caps);
                model.device_id = Some(id);
            }
            model.boot = BootPhase::Ready;
            tracing::info!("core ready");
        }

        fn now(model: &Model) -> u64 {
            model.view_timestamp_ms
        }

        fn sync_presence(model: &mut Model, caps: &Capabilities) {
            let should = model.should_share_presence();
            if should && !model.presence.is_running() {
                Self::start_presence(model, caps);
            } else if !should && model.presence.is_running() {
                Self::stop_presence(model, caps);
            }
        }

        fn start_presence(model: &mut Model, caps: &Capabilities) {
            if !model.presence.start() {
                return;
            }
            let now = Self::now(model);
            caps.realtime
                .subscribe(presence::channel_spec(), Event::PresenceMessage);
            caps.backend.select(
                presence::peer_query(now, model.config.presence_window_ms),
                Event::PeersFetched,
            );
            caps.interval.start(
                HEARTBEAT_INTERVAL,
                model.config.heartbeat_period_ms,
                Event::HeartbeatTick,
            );
            tracing::info!("location sharing started");
        }

        fn stop_presence(model: &mut Model, caps: &Capabilities) {
            if model.presence.stop() {
                caps.interval.cancel(HEARTBEAT_INTERVAL);
                caps.realtime.unsubscribe(PRESENCE_CHANNEL);
                tracing::info!("location sharing stopped");
            }
        }

        fn upsert_presence(model: &Model, caps: &Capabilities) {
            let (Some(id), Some(at)) = (&model.device_id, model.own_location) else {
                return;
            };
            let row = PresenceRow::heartbeat(id, at, Self::now(model));
            match serde_json::to_value(&row) {
                Ok(value) => caps.backend.upsert(Table::Users, value, Event::PresenceUpserted),
                Err(e) => tracing::error!(error = %e, "presence row encode failed"),
            }
        }

        fn open_map(model: &mut Model, caps: &Capabilities) {
            model.map_open = true;

            if !model.watching_location {
                caps.geolocation.watch(Event::LocationUpdated);
                model.watching_location = true;
            }

            caps.backend
                .select(incident::map_query(), Event::MapIncidentsFetched);
            caps.realtime
                .subscribe(incident::map_channel(), Event::IncidentFeedMessage);
            model.incident_feed_live = true;

            caps.backend
                .select(camera::active_query(), Event::ActiveCamerasFetched);
            caps.realtime
                .subscribe(camera::channel_spec(), Event::CameraFeedMessage);
            model.camera_feed_live = true;

            Self::sync_presence(model, caps);
        }

        /// Every watch, interval and channel the map started is released here.
        fn close_map(model: &mut Model, caps: &Capabilities) {
            model.map_open = false;

            if model.watching_location {
                caps.geolocation.clear_watch();
                model.watching_location = false;
            }
            if model.incident_feed_live {
                caps.realtime.unsubscribe(incident::INCIDENT_MAP_CHANNEL);
                model.incident_feed_live = false;
            }
            if model.camera_feed_live {
                caps.realtime.unsubscribe(camera::CAMERA_CHANNEL);
                model.camera_feed_live = false;
            }
            Self::stop_presence(model, caps);

            model.picking_location = false;
            model.selected_incident = None;
        }

        fn open_panel(panel: Panel, model: &mut Model, caps: &Capabilities) {
            Self::close_panel(model, caps);
            model.panel = panel;

            match panel {
                Panel::Report => model.report.reset(),
                Panel::History => {
                    model.history.start();
                    caps.backend
                        .select(incident::history_query(), Event::HistoryFetched);
                    caps.realtime
                        .subscribe(incident::history_channel(), Event::HistoryFeedMessage);
                    model.history.live = true;
                }
                Panel::Chat => {
                    model.chat.open = true;
                    model.chat.switch_to(model.chat.tab);
                    Self::fetch_chat(false, model, caps);
                    caps.realtime
                        .subscribe(chat::channel_spec(), Event::ChatFeedMessage);
                }
                Panel::Cameras => Self::fetch_own_cameras(model, caps),
                Panel::Settings | Panel::None => {}
            }
        }

        fn close_panel(model: &mut Model, caps: &Capabilities) {
            match model.panel {
                Panel::History => {
                    if model.history.live {
                        caps.realtime.unsubscribe(incident::HISTORY_CHANNEL);
                    }
                    model.history.stop();
                }
                Panel::Chat => {
                    if model.chat.open {
                        caps.realtime.unsubscribe(chat::CHAT_CHANNEL);
                    }
                    model.chat.close();
                }
                Panel::Cameras => model.picking_location = false,
                Panel::Report | Panel::Settings | Panel::None => {}
            }
            model.panel = Panel::None;
        }

        fn fetch_own_cameras(model: &mut Model, caps: &Capabilities) {
            model.camera_registry.start_loading();
            caps.backend.select(
                camera::owned_query(&model.owner_scope()),
                Event::OwnCamerasFetched,
            );
        }

        fn fetch_chat(fallback: bool, model: &Model, caps: &Capabilities) {
            let tab = model.chat.tab;
            let query = chat::feed_query(
                tab,
                model.own_location,
                Self::now(model),
                model.config.chat_window_ms,
                model.config.nearby_radius_m,
                fallback,
            );
            caps.backend.select(query, move |result| Event::ChatFetched {
                tab,
                fallback,
                result,
            });
        }

        fn insert_report(row: &NewReport, model: &mut Model, caps: &Capabilities) {
            match serde_json::to_value(row) {
                Ok(value) => caps.backend.insert(Table::Reports, value, Event::ReportInserted),
                Err(e) => {
                    model.report.fail();
                    model.set_error(AppError::new(ErrorKind::Serialization, e.to_string()));
                }
            }
        }

        /// Best-effort: a relay problem is logged and never reaches the user.
        fn send_relay(request: &RelayRequest, model: &Model, caps: &Capabilities) {
            let url = match ValidatedUrl::new(&model.config.relay_url, HostPolicy::AllowPrivate) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(error = %e, "relay endpoint invalid, skipping notification");
                    return;
                }
            };

            match caps.http.post(url.as_str()).body_json(request) {
                Ok(builder) => builder.expect_json::<RelayResponse>().send(|result| {
                    Event::RelayResponded(match result {
                        Ok(mut response) => response.take_body().ok_or_else(|| {
                            AppError::new(ErrorKind::Deserialization, "empty relay response")
                        }),
                        Err(e) => Err(e.into()),
                    })
                }),
                Err(e) => tracing::warn!(error = %e, "relay payload encode failed"),
            }
        }

        fn dispatch_chat_step(step: SendStep, model: &mut Model, caps: &Capabilities) {
            match step {
                SendStep::Locate => caps.geolocation.current(Event::ChatLocationResolved),
                SendStep::Upload {
                    path,
                    content_type,
                    data,
                } => caps.backend.upload(
                    Bucket::ChatMedia,
                    path,
                    content_type,
                    data,
                    Event::ChatMediaUploaded,
                ),
                SendStep::Insert(row) => match serde_json::to_value(&row) {
                    Ok(value) => {
                        caps.backend
                            .insert(Table::PublicChats, value, Event::ChatMessageInserted);
                    }
                    Err(e) => {
                        model.chat.send_finished();
                        model.set_error(
                            AppError::new(ErrorKind::Backend, CHAT_SEND_FAILED)
                                .with_internal(e.to_string()),
                        );
                    }
                },
            }
        }

        fn handle_realtime_failure(feed: &str, message: &RealtimeMessage, model: &mut Model) {
            match message {
                RealtimeMessage::Failed { reason } => {
                    let err = AppError::new(ErrorKind::Realtime, reason.clone())
                        .with_context("feed", feed);
                    tracing::warn!(feed, error = %err, "realtime subscription failed");
                    model.show_toast(err.user_facing_message(), ToastKind::Warning);
                }
                RealtimeMessage::Closed => tracing::debug!(feed, "realtime channel closed"),
                RealtimeMessage::Subscribed => tracing::debug!(feed, "realtime channel subscribed"),
                RealtimeMessage::Change(_) => {}
            }
        }

        fn map_view(model: &Model) -> MapView {
            let now = Self::now(model);
            let mut pins = Vec::new();

            if let Some(at) = model.own_location {
                pins.push(MapPin::new(
                    OWN_PIN_ID,
                    at,
                    model.prefs.display_name(),
                    PinKind::Own {
                        sharing: model.presence.is_live(),
                    },
                ));
            }

            pins.extend(
                model
                    .presence
                    .active_peers(now, model.config.presence_window_ms)
                    .filter_map(|peer| {
                        let at = ValidatedCoordinate::new(peer.lat, peer.lng).ok()?;
                        Some(MapPin::new(peer.id.as_str(), at, PEER_LABEL, PinKind::Peer))
                    }),
            );

            pins.extend(model.incidents.values().filter_map(|report| {
                let at = ValidatedCoordinate::new(report.lat, report.lng).ok()?;
                Some(MapPin::new(
                    report.id.as_str(),
                    at,
                    report.label(),
                    PinKind::Incident,
                ))
            }));

            pins.extend(model.map_cameras.values().filter_map(|cam| {
                let at = ValidatedCoordinate::new(cam.lat, cam.lng).ok()?;
                Some(MapPin::new(
                    cam.id.as_str(),
                    at,
                    cam.name.as_str(),
                    PinKind::Camera {
                        stream_url: cam.stream_url.clone(),
                    },
                ))
            }));

            let (center_lat, center_lng) = model
                .own_location
                .map_or((DEFAULT_CENTER_LAT, DEFAULT_CENTER_LNG), |at| (at.lat(), at.lng()));

            MapView {
                layers: MapLayers::compose(model.prefs.satellite, model.map_3d),
                center_lat,
                center_lng,
                zoom: DEFAULT_ZOOM,
                pitch: model.map_pitch,
                fly_to: model.fly_to,
                features: feature_collection(&pins),
                pins,
                picking_location: model.picking_location,
                selected_incident: model
                    .selected_incident
                    .as_ref()
                    .and_then(|id| model.incidents.get(id.as_str()))
                    .map(|report| IncidentPopup::from_report(report, now)),
            }
        }

        fn panel_view(model: &Model) -> PanelView {
            let now = Self::now(model);
            match model.panel {
                Panel::None => PanelView::None,
                Panel::Report => PanelView::Report(ReportFormView::build(
                    &model.report,
                    model.own_location.is_some(),
                )),
                Panel::History => PanelView::History(HistoryView::build(&model.history, now)),
                Panel::Chat => PanelView::Chat(ChatView::build(
                    &model.chat,
                    model.own_location,
                    model.config.nearby_radius_m,
                    model.prefs.display_name(),
                    model.device_id.as_ref(),
                    now,
                )),
                Panel::Cameras => PanelView::Cameras(CameraRegistryView::build(
                    &model.camera_registry,
                    model.picking_location,
                    model.picked_location,
                )),
                Panel::Settings => PanelView::Settings(SettingsView {
                    dark_mode: model.prefs.theme.is_dark(),
                    notifications: model.prefs.notifications_enabled,
                    satellite: model.prefs.satellite,
                    contacts: model
                        .prefs
                        .emergency_contacts
                        .iter()
                        .map(|c| ContactView {
                            value: c.clone(),
                            valid: is_valid_contact(c),
                        })
                        .collect(),
                    username: model.prefs.display_name().to_string(),
                    device_id: model.device_id.as_ref().map(ToString::to_string),
                }),
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            model.update_timestamp();

            let event_name = event.name();
            tracing::debug!(event = event_name, "handling event");
            if event.is_user_initiated() {
                tracing::info!(event = event_name, "user action");
            }

            match event {
                Event::Noop => {}

                Event::AppStarted => {
                    if model.boot != BootPhase::NotStarted {
                        tracing::debug!("boot already in progress");
                        return;
                    }
                    model.boot = BootPhase::CheckingCleanup;
                    caps.key_value.get(CLEANUP_MARKER_KEY.to_string(), |result| {
                        Event::CleanupMarkerLoaded(result.map_err(|e| e.to_string()))
                    });
                    caps.render.render();
                }

                Event::Configure(config) => {
                    match config.validate() {
                        Ok(()) => {
                            model.config = config;
                            tracing::info!(relay = %model.config.relay_url, "configuration applied");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "rejected configuration");
                            model.set_error(e);
                        }
                    }
                    caps.render.render();
                }

                Event::CleanupMarkerLoaded(result) => {
                    if model.boot != BootPhase::CheckingCleanup {
                        return;
                    }
                    let marker = match result {
                        Ok(bytes) => bytes.and_then(|b| String::from_utf8(b).ok()),
                        Err(e) => {
                            tracing::warn!(error = %e, "cleanup marker unreadable, skipping cleanup");
                            Self::load_preferences(model, caps);
                            return;
                        }
                    };

                    if cleanup_required(marker.as_deref()) {
                        tracing::info!(marker = ?marker, "purging legacy device data");
                        model.boot = BootPhase::Purging;
                        model.cleanup = crate::prefs::CleanupState::default();
                        Self::list_stored_keys(0, caps);
                    } else {
                        Self::load_preferences(model, caps);
                    }
                }

                Event::StoredKeysListed(result) => {
                    if model.boot != BootPhase::Purging {
                        return;
                    }
                    match result {
                        Ok((keys, next_cursor)) => {
                            model.cleanup.collect(keys);
                            if next_cursor != 0 {
                                Self::list_stored_keys(next_cursor, caps);
                                return;
                            }

                            let plan = model.cleanup.purge_plan();
                            tracing::info!(count = plan.len(), "deleting stored keys");
                            if plan.is_empty() {
                                Self::write_cleanup_marker(caps);
                                return;
                            }
                            model.cleanup.pending_deletes = plan.len();
                            for key in plan {
                                let deleted = key.clone();
                                caps.key_value.delete(key, move |result| Event::StoredKeyDeleted {
                                    key: deleted,
                                    result: result.map(|_| ()).map_err(|e| e.to_string()),
                                });
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "listing stored keys failed, cleanup retried next start");
                            Self::load_preferences(model, caps);
                        }
                    }
                }

                Event::StoredKeyDeleted { key, result } => {
                    if model.boot != BootPhase::Purging {
                        return;
                    }
                    if let Err(e) = result {
                        tracing::warn!(key = %key, error = %e, "failed to delete stored key");
                    }
                    if model.cleanup.delete_finished() {
                        Self::write_cleanup_marker(caps);
                    }
                }

                Event::CleanupMarkerWritten(result) => {
                    if model.boot != BootPhase::Purging {
                        return;
                    }
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "failed to write cleanup marker");
                    }
                    Self::load_preferences(model, caps);
                }

                Event::PreferenceLoaded { key, result } => {
                    if model.boot != BootPhase::LoadingPreferences {
                        return;
                    }
                    match result {
                        Ok(Some(bytes)) => match PrefValue::decode(key, &bytes) {
                            Ok(value) => {
                                if let Some(id) = model.prefs.apply(value) {
                                    model.device_id = Some(id);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(key = key.raw(), error = %e, "ignoring stored preference");
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(key = key.raw(), error = %e, "preference read failed");
                        }
                    }

                    model.prefs_pending = model.prefs_pending.saturating_sub(1);
                    if model.prefs_pending == 0 {
                        Self::finish_boot(model, caps);
                        caps.render.render();
                    }
                }

                Event::PreferenceWritten { key, result } => {
                    if let Err(e) = result {
                        tracing::warn!(key = key.raw(), error = %e, "preference write failed");
                        model.set_error(
                            AppError::new(ErrorKind::Storage, "Unable to save settings")
                                .with_internal(e)
                                .with_context("key", key.raw()),
                        );
                        caps.render.render();
                    }
                }

                Event::MapOpened => {
                    if model.map_open {
                        return;
                    }
                    Self::open_map(model, caps);
                    caps.render.render();
                }

                Event::MapClosed => {
                    if !model.map_open {
                        return;
                    }
                    Self::close_map(model, caps);
                    caps.render.render();
                }

                Event::LocationUpdated(result) => {
                    if !model.watching_location {
                        return;
                    }
                    match result {
                        Ok(fix) => match ValidatedCoordinate::new(fix.lat, fix.lng) {
                            Ok(at) => {
                                let first_fix = model.own_location.is_none();
                                model.own_location = Some(at);
                                if first_fix {
                                    model.request_fly_to(at, FIRST_FIX_ZOOM);
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "ignoring invalid fix"),
                        },
                        Err(GeolocationError::PermissionDenied) => {
                            model.set_error(GeolocationError::PermissionDenied.into());
                        }
                        Err(e) => tracing::warn!(error = %e, "location watch error"),
                    }
                    Self::sync_presence(model, caps);
                    caps.render.render();
                }

                Event::ToggleSharing => {
                    model.share_location = !model.share_location;
                    if model.share_location && model.own_location.is_none() {
                        model.show_toast("Detecting location...", ToastKind::Info);
                    }
                    Self::sync_presence(model, caps);
                    caps.render.render();
                }

                Event::ToggleSatellite => {
                    let value = model.prefs.toggle_satellite();
                    Self::persist(&value, model, caps);
                    caps.render.render();
                }

                Event::Toggle3d => {
                    model.map_3d = !model.map_3d;
                    model.map_pitch = pitch_for(model.map_3d);
                    caps.render.render();
                }

                Event::LocateMe => {
                    match model.own_location {
                        Some(at) => model.request_fly_to(at, LOCATE_ZOOM),
                        None => model.show_toast("Detecting location...", ToastKind::Info),
                    }
                    caps.render.render();
                }

                Event::IncidentSelected { id } => {
                    if model.incidents.contains(&id) {
                        model.selected_incident = Some(IncidentId::new(id));
                        caps.render.render();
                    }
                }

                Event::IncidentDeselected => {
                    model.selected_incident = None;
                    caps.render.render();
                }

                Event::StartLocationPick => {
                    model.picking_location = true;
                    caps.render.render();
                }

                Event::CancelLocationPick => {
                    model.picking_location = false;
                    caps.render.render();
                }

                Event::MapClicked { lat, lng } => {
                    if !model.picking_location {
                        return;
                    }
                    match ValidatedCoordinate::new(lat, lng) {
                        Ok(at) => {
                            model.picked_location = Some(at);
                            model.picking_location = false;
                        }
                        Err(e) => model.set_error(e.into()),
                    }
                    caps.render.render();
                }

                Event::PresenceMessage(message) => {
                    if !model.presence.is_running() {
                        return;
                    }
                    match &message {
                        RealtimeMessage::Subscribed => {
                            if model.presence.on_subscribed() {
                                Self::upsert_presence(model, caps);
                            }
                        }
                        RealtimeMessage::Change(change) => {
                            if let Some(own) = model.device_id.clone() {
                                let outcome = model.presence.apply_change(&own, change);
                                tracing::debug!(?outcome, "peer change");
                            }
                        }
                        _ => Self::handle_realtime_failure(PRESENCE_CHANNEL, &message, model),
                    }
                    caps.render.render();
                }

                Event::PeersFetched(result) => {
                    if !model.presence.is_running() {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<PresenceRow>) {
                        Ok(rows) => {
                            if let Some(own) = model.device_id.clone() {
                                let created = model.presence.apply_snapshot(
                                    &own,
                                    rows,
                                    Self::now(model),
                                    model.config.presence_window_ms,
                                );
                                tracing::debug!(created, "peers loaded");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "peer fetch failed"),
                    }
                    caps.render.render();
                }

                Event::PresenceUpserted(result) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "presence upsert failed");
                    }
                }

                Event::HeartbeatTick(_) => {
                    if !model.presence.is_running() {
                        return;
                    }
                    Self::upsert_presence(model, caps);
                    let evicted = model
                        .presence
                        .evict_stale(Self::now(model), model.config.presence_window_ms);
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "evicted stale peers");
                        caps.render.render();
                    }
                }

                Event::MapIncidentsFetched(result) => {
                    if !model.incident_feed_live {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<IncidentReport>) {
                        Ok(rows) => {
                            let created = model.incidents.upsert_all(rows);
                            tracing::debug!(created, "incident markers loaded");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "incident fetch failed");
                            model.show_toast("Could not load recent incidents", ToastKind::Warning);
                        }
                    }
                    caps.render.render();
                }

                Event::IncidentFeedMessage(message) => {
                    if !model.incident_feed_live {
                        return;
                    }
                    match &message {
                        RealtimeMessage::Change(change) if change.kind == ChangeKind::Insert => {
                            if let Some(report) = change.new_row::<IncidentReport>() {
                                if let Err(e) = model.incidents.upsert(report) {
                                    tracing::warn!(error = %e, "ignoring incident with bad position");
                                }
                            }
                        }
                        RealtimeMessage::Change(_) => {}
                        _ => Self::handle_realtime_failure(incident::INCIDENT_MAP_CHANNEL, &message, model),
                    }
                    caps.render.render();
                }

                Event::ActiveCamerasFetched(result) => {
                    if !model.camera_feed_live {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<CameraEntry>) {
                        Ok(rows) => {
                            let created = model
                                .map_cameras
                                .upsert_all(rows.into_iter().filter(|c| c.is_active));
                            tracing::debug!(created, "camera markers loaded");
                        }
                        Err(e) => tracing::warn!(error = %e, "camera fetch failed"),
                    }
                    caps.render.render();
                }

                Event::CameraFeedMessage(message) => {
                    if !model.camera_feed_live {
                        return;
                    }
                    match &message {
                        RealtimeMessage::Change(change) => {
                            let outcome = camera::sync_map_marker(&mut model.map_cameras, change);
                            tracing::debug!(?outcome, "camera change");
                        }
                        _ => Self::handle_realtime_failure(camera::CAMERA_CHANNEL, &message, model),
                    }
                    caps.render.render();
                }

                Event::OpenPanel(panel) => {
                    if model.panel != panel {
                        Self::open_panel(panel, model, caps);
                    }
                    caps.render.render();
                }

                Event::ClosePanel => {
                    Self::close_panel(model, caps);
                    caps.render.render();
                }

                Event::ReportVideoLinkEdited(link) => {
                    model.report.set_video_hint(&link);
                    caps.render.render();
                }

                Event::SubmitReport(draft) => {
                    let now = Self::now(model);
                    match model.report.begin(draft, model.own_location, now) {
                        Ok(None) => return,
                        Ok(Some(ReportStep::Upload {
                            path,
                            content_type,
                            data,
                        })) => caps.backend.upload(
                            Bucket::Evidence,
                            path,
                            content_type,
                            data,
                            Event::EvidenceUploaded,
                        ),
                        Ok(Some(ReportStep::Insert(row))) => Self::insert_report(&row, model, caps),
                        Err(e) => {
                            tracing::info!(error = %e, "report rejected");
                            model.set_error(e);
                        }
                    }
                    caps.render.render();
                }

                Event::EvidenceUploaded(result) => {
                    match result.and_then(BackendResponse::into_public_url) {
                        Ok(url) => {
                            if let Some(row) = model.report.evidence_uploaded(url) {
                                Self::insert_report(&row, model, caps);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "evidence upload failed");
                            model.report.fail();
                            model.set_error(e.into());
                        }
                    }
                    caps.render.render();
                }

                Event::ReportInserted(result) => {
                    match result {
                        Ok(_) => {
                            let contacts = model.prefs.emergency_contacts.clone();
                            if let Some(request) = model.report.inserted(&contacts) {
                                tracing::info!(contacts = contacts.len(), "report saved");
                                model.show_toast("Report submitted", ToastKind::Success);
                                Self::send_relay(&request, model, caps);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "report insert failed");
                            model.report.fail();
                            model.set_error(e.into());
                        }
                    }
                    caps.render.render();
                }

                Event::RelayResponded(result) => {
                    match result {
                        Ok(response) => {
                            let summary = response.summary();
                            if response.success {
                                tracing::info!(
                                    delivered = summary.delivered,
                                    recipients = summary.recipients,
                                    "incident relayed"
                                );
                            } else {
                                tracing::warn!(error = ?response.error, "relay rejected notification");
                            }
                            model.report.relay_finished(summary);
                        }
                        Err(e) => {
                            tracing::warn!(
                                code = e.code(),
                                error = %e,
                                "notification failed but report saved"
                            );
                        }
                    }
                    caps.render.render();
                }

                Event::HistoryFetched(result) => {
                    if model.panel != Panel::History {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<IncidentReport>) {
                        Ok(rows) => model.history.apply_snapshot(rows),
                        Err(e) => {
                            tracing::warn!(error = %e, "history fetch failed");
                            model.history.fail(AppError::from(e).user_facing_message());
                        }
                    }
                    caps.render.render();
                }

                Event::HistoryFeedMessage(message) => {
                    if !model.history.live {
                        return;
                    }
                    match &message {
                        RealtimeMessage::Change(change) if change.kind == ChangeKind::Insert => {
                            if let Some(report) = change.new_row::<IncidentReport>() {
                                model.history.prepend(report);
                            }
                        }
                        RealtimeMessage::Change(_) => {}
                        _ => Self::handle_realtime_failure(incident::HISTORY_CHANNEL, &message, model),
                    }
                    caps.render.render();
                }

                Event::OwnCamerasFetched(result) => {
                    if model.panel != Panel::Cameras {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<CameraEntry>) {
                        Ok(rows) => model.camera_registry.apply_snapshot(rows),
                        Err(e) => {
                            tracing::warn!(error = %e, "camera list fetch failed");
                            model
                                .camera_registry
                                .fail(AppError::from(e).user_facing_message());
                        }
                    }
                    caps.render.render();
                }

                Event::SaveCamera(draft) => {
                    if model.camera_registry.saving {
                        return;
                    }
                    let row = draft
                        .validate(&model.owner_scope(), model.picked_location)
                        .and_then(|row| {
                            serde_json::to_value(&row).map_err(|e| {
                                AppError::new(ErrorKind::Serialization, e.to_string())
                            })
                        });
                    match row {
                        Ok(value) => {
                            model.camera_registry.saving = true;
                            caps.backend.insert(Table::PublicCctv, value, Event::CameraSaved);
                        }
                        Err(e) => model.set_error(e),
                    }
                    caps.render.render();
                }

                Event::CameraSaved(result) => {
                    model.camera_registry.saving = false;
                    match result {
                        Ok(_) => {
                            model.picked_location = None;
                            model.show_toast("Camera saved", ToastKind::Success);
                            if model.panel == Panel::Cameras {
                                Self::fetch_own_cameras(model, caps);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "camera insert failed");
                            model.set_error(
                                AppError::new(ErrorKind::Backend, format!("Error saving camera: {e}"))
                                    .with_internal(e.to_string()),
                            );
                        }
                    }
                    caps.render.render();
                }

                Event::DeleteCamera { id } => {
                    let filters = camera::owned_row_filters(&CameraId::new(id.as_str()), &model.owner_scope());
                    caps.backend
                        .delete(Table::PublicCctv, filters, move |result| Event::CameraDeleted {
                            id,
                            result,
                        });
                }

                Event::CameraDeleted { id, result } => {
                    match result {
                        Ok(_) => {
                            model.camera_registry.remove(&CameraId::new(id.as_str()));
                            model.map_cameras.remove(&id);
                        }
                        Err(e) => {
                            tracing::warn!(camera = %id, error = %e, "camera delete failed");
                            model.set_error(
                                AppError::new(ErrorKind::Backend, "Delete failed")
                                    .with_internal(e.to_string()),
                            );
                        }
                    }
                    caps.render.render();
                }

                Event::ToggleCameraActive { id } => {
                    let camera_id = CameraId::new(id);
                    if let Some((mutation_id, active)) = model.camera_registry.begin_toggle(&camera_id) {
                        caps.backend.update(
                            Table::PublicCctv,
                            camera::owned_row_filters(&camera_id, &model.owner_scope()),
                            serde_json::json!({ "is_active": active }),
                            move |result| Event::CameraToggleResult {
                                mutation_id,
                                result,
                            },
                        );
                        caps.render.render();
                    }
                }

                Event::CameraToggleResult {
                    mutation_id,
                    result,
                } => {
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "camera toggle failed");
                    }
                    if let Some(camera_id) = model
                        .camera_registry
                        .finish_toggle(&mutation_id, result.is_ok())
                    {
                        model.set_error(
                            AppError::new(ErrorKind::Backend, "Update failed")
                                .with_context("camera_id", camera_id.as_str()),
                        );
                    }
                    caps.render.render();
                }

                Event::ChatTabSelected(tab) => {
                    if model.chat.tab == tab {
                        return;
                    }
                    if model.chat.open {
                        model.chat.switch_to(tab);
                        Self::fetch_chat(false, model, caps);
                    } else {
                        model.chat.tab = tab;
                    }
                    caps.render.render();
                }

                Event::ChatFetched {
                    tab,
                    fallback,
                    result,
                } => {
                    if !model.chat.open || model.chat.tab != tab {
                        return;
                    }
                    match result.and_then(BackendResponse::into_rows::<ChatMessage>) {
                        Ok(rows) => {
                            model.chat.used_fallback = fallback;
                            model.chat.apply_snapshot(rows);
                        }
                        Err(e) if tab == ChatTab::Official && !fallback => {
                            tracing::warn!(error = %e, "official feed failed, retrying with admin flag");
                            Self::fetch_chat(true, model, caps);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "chat fetch failed");
                            model.chat.give_up();
                        }
                    }
                    caps.render.render();
                }

                Event::ChatFeedMessage(message) => {
                    if !model.chat.open {
                        return;
                    }
                    match &message {
                        RealtimeMessage::Change(change) if change.kind == ChangeKind::Insert => {
                            if let Some(msg) = change.new_row::<ChatMessage>() {
                                model.chat.append(msg);
                            }
                        }
                        RealtimeMessage::Change(_) => {}
                        _ => Self::handle_realtime_failure(chat::CHAT_CHANNEL, &message, model),
                    }
                    caps.render.render();
                }

                Event::SendChatMessage(draft) => {
                    let sender = Sender {
                        username: model.prefs.display_name().to_string(),
                        user_id: model.device_id.as_ref().map(ToString::to_string),
                    };
                    let now = Self::now(model);
                    match model.chat.begin_send(draft, sender, model.own_location, now) {
                        Ok(Some(step)) => Self::dispatch_chat_step(step, model, caps),
                        Ok(None) => return,
                        Err(e) => model.set_error(e),
                    }
                    caps.render.render();
                }

                Event::ChatLocationResolved(result) => {
                    let fix = match result {
                        Ok(fix) => ValidatedCoordinate::new(fix.lat, fix.lng).ok(),
                        Err(e) => {
                            tracing::warn!(error = %e, "location unavailable for nearby chat");
                            None
                        }
                    };
                    if let Some(step) = model.chat.location_resolved(fix, Self::now(model)) {
                        Self::dispatch_chat_step(step, model, caps);
                    }
                    caps.render.render();
                }

                Event::ChatMediaUploaded(result) => {
                    match result.and_then(BackendResponse::into_public_url) {
                        Ok(url) => {
                            if let Some(row) = model.chat.media_uploaded(url) {
                                Self::dispatch_chat_step(SendStep::Insert(row), model, caps);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "chat media upload failed");
                            model.chat.send_finished();
                            model.set_error(
                                AppError::new(ErrorKind::Backend, CHAT_SEND_FAILED)
                                    .with_internal(e.to_string()),
                            );
                        }
                    }
                    caps.render.render();
                }

                Event::ChatMessageInserted(result) => {
                    model.chat.send_finished();
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "chat insert failed");
                        model.set_error(
                            AppError::new(ErrorKind::Backend, CHAT_SEND_FAILED)
                                .with_internal(e.to_string()),
                        );
                    }
                    caps.render.render();
                }

                Event::ToggleLanguage => {
                    let value = model.prefs.toggle_language();
                    Self::persist(&value, model, caps);
                    caps.render.render();
                }

                Event::ToggleDarkMode => {
                    let value = model.prefs.toggle_dark_mode();
                    Self::persist(&value, model, caps);
                    caps.render.render();
                }

                Event::ToggleNotifications => {
                    let value = model.prefs.toggle_notifications();
                    Self::persist(&value, model, caps);
                    caps.render.render();
                }

                Event::AddEmergencyContact(raw) => {
                    if model.prefs.contacts_full() && !raw.trim().is_empty() {
                        model.show_toast(
                            format!("You can keep at most {MAX_CONTACTS} emergency contacts"),
                            ToastKind::Warning,
                        );
                        caps.render.render();
                        return;
                    }
                    if let Some(value) = model.prefs.add_emergency_contact(&raw) {
                        Self::persist(&value, model, caps);
                        if !is_valid_contact(&raw) {
                            model.show_toast(
                                "Use a numeric chat id or an @handle, otherwise alerts skip this contact",
                                ToastKind::Warning,
                            );
                        }
                        caps.render.render();
                    }
                }

                Event::RemoveEmergencyContact(index) => {
                    if let Some(value) = model.prefs.remove_emergency_contact(index) {
                        Self::persist(&value, model, caps);
                        caps.render.render();
                    }
                }

                Event::SetUsername(name) => {
                    let value = model.prefs.set_username(&name);
                    Self::persist(&value, model, caps);
                    caps.render.render();
                }

                Event::DismissError => {
                    model.clear_error();
                    caps.render.render();
                }

                Event::DismissToast => {
                    model.clear_toast();
                    caps.render.render();
                }
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            let now = Self::now(model);

            let state = if model.is_ready() {
                ViewState::Ready {
                    map: Box::new(Self::map_view(model)),
                    sharing: SharingView {
                        enabled: model.share_location,
                        live: model.presence.is_live(),
                        location_known: model.own_location.is_some(),
                        active_peers: model
                            .presence
                            .active_peers(now, model.config.presence_window_ms)
                            .count(),
                    },
                    panel: Self::panel_view(model),
                }
            } else {
                let message = match model.boot {
                    BootPhase::Purging => "Clearing old data...",
                    _ => "Loading...",
                };
                ViewState::Loading {
                    message: Some(message.to_string()),
                }
            };

            ViewModel {
                state,
                language: model.prefs.language,
                theme: model.prefs.theme,
                error: model.active_error.as_ref().map(UserFacingError::from),
                toast: model
                    .active_toast
                    .as_ref()
                    .filter(|t| !t.is_expired(now))
                    .map(ToastView::from),
            }
        }
    }
}
