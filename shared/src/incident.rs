//! Incident reports: submission, relay payloads, the map feed and history.
//!
//! A report is authoritative once the backend insert succeeds. The relay call
//! that follows is best-effort and never turns a saved report into a failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::capabilities::{ChannelSpec, HostPolicy, SelectQuery, Table, ValidatedUrl};
use crate::embed::{detect_platform, embed_for, VideoEmbed, VideoPlatform};
use crate::markers::Locatable;
use crate::model::IncidentId;
use crate::{
    format_time_ago, millis_from_datetime, truncate_preview, AppError, AppResult, Attachment,
    CoordinateError, ErrorKind, ValidatedCoordinate, DESCRIPTION_PREVIEW_LENGTH,
};

pub const MAP_INCIDENT_LIMIT: u32 = 20;
pub const HISTORY_LIMIT: u32 = 100;
pub const INCIDENT_MAP_CHANNEL: &str = "incidents_map";
pub const HISTORY_CHANNEL: &str = "reports_history";
pub const DEFAULT_REPORTER: &str = "Anonymous";
pub const DEFAULT_INCIDENT_LABEL: &str = "Incident";
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "webm", "avi", "mkv"];

/// True when the media URL names a video file by its extension.
#[must_use]
pub fn is_video_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    #[serde(other)]
    Unknown,
}

/// A row of the `reports` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: IncidentId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_link: Option<String>,
    #[serde(default)]
    pub reporter_info: Option<String>,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl IncidentReport {
    #[must_use]
    pub fn label(&self) -> &str {
        self.kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(DEFAULT_INCIDENT_LABEL)
    }

    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn reporter(&self) -> &str {
        self.reporter_info
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_REPORTER)
    }

    #[must_use]
    pub fn created_at_ms(&self) -> Option<u64> {
        self.created_at.as_ref().map(millis_from_datetime)
    }

    #[must_use]
    pub fn embed(&self) -> Option<VideoEmbed> {
        embed_for(self.video_link.as_deref(), self.description())
    }
}

impl Locatable for IncidentReport {
    fn marker_id(&self) -> String {
        self.id.as_str().to_string()
    }

    fn position(&self) -> Result<ValidatedCoordinate, CoordinateError> {
        ValidatedCoordinate::new(self.lat, self.lng)
    }
}

/// Row inserted into `reports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub lat: f64,
    pub lng: f64,
    pub description: String,
    pub image_url: Option<String>,
    pub reporter_info: String,
    pub status: IncidentStatus,
}

/// The stored description carries the link inline so every reader can find it.
#[must_use]
pub fn compose_description(description: &str, video_link: Option<&str>) -> String {
    match video_link {
        Some(link) => format!("{description}\n\nVideo: {link}"),
        None => description.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReportDraft {
    pub description: String,
    #[serde(default)]
    pub video_link: Option<String>,
    #[serde(default)]
    pub reporter_info: Option<String>,
    #[serde(default)]
    pub evidence: Option<Attachment>,
}

/// Body accepted by the notification relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_link: Option<String>,
    #[serde(default)]
    pub reporter_info: Option<String>,
    #[serde(
        rename = "emergencyContacts",
        default,
        deserialize_with = "lenient_contacts"
    )]
    pub emergency_contacts: Vec<String>,
}

/// Contacts may arrive as strings or bare numbers; anything else is dropped.
fn lenient_contacts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientResult {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<RecipientResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayResponse {
    #[must_use]
    pub fn delivered(results: Vec<RecipientResult>) -> Self {
        Self {
            success: true,
            results: Some(results),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn summary(&self) -> RelaySummary {
        let results = self.results.as_deref().unwrap_or_default();
        RelaySummary {
            accepted: self.success,
            recipients: results.len(),
            delivered: results
                .iter()
                .filter(|r| r.status == DeliveryStatus::Sent)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySummary {
    pub accepted: bool,
    pub recipients: usize,
    pub delivered: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingReport {
    at: ValidatedCoordinate,
    description: String,
    video_link: Option<String>,
    reporter_info: String,
    image_url: Option<String>,
}

impl PendingReport {
    fn row(&self) -> NewReport {
        NewReport {
            lat: self.at.lat(),
            lng: self.at.lng(),
            description: compose_description(&self.description, self.video_link.as_deref()),
            image_url: self.image_url.clone(),
            reporter_info: self.reporter_info.clone(),
            status: IncidentStatus::Open,
        }
    }

    fn relay_request(&self, contacts: &[String]) -> RelayRequest {
        RelayRequest {
            lat: self.at.lat(),
            lng: self.at.lng(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            video_link: self.video_link.clone(),
            reporter_info: Some(self.reporter_info.clone()),
            emergency_contacts: contacts.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportPhase {
    #[default]
    Idle,
    UploadingEvidence,
    Saving,
    Submitted,
    Failed,
}

/// First side effect of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportStep {
    Upload {
        path: String,
        content_type: String,
        data: Vec<u8>,
    },
    Insert(NewReport),
}

#[derive(Debug, Default)]
pub struct ReportState {
    phase: ReportPhase,
    pending: Option<PendingReport>,
    pub video_hint: Option<VideoPlatform>,
    pub last_delivery: Option<RelaySummary>,
}

impl ReportState {
    #[must_use]
    pub const fn phase(&self) -> ReportPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(
            self.phase,
            ReportPhase::UploadingEvidence | ReportPhase::Saving
        )
    }

    pub fn set_video_hint(&mut self, link: &str) {
        let link = link.trim();
        self.video_hint = match detect_platform(link) {
            _ if link.is_empty() => None,
            VideoPlatform::Other => None,
            platform => Some(platform),
        };
    }

    /// Validates the draft and returns the first step, or `None` when a
    /// submission is already in flight.
    pub fn begin(
        &mut self,
        draft: ReportDraft,
        location: Option<ValidatedCoordinate>,
        now_ms: u64,
    ) -> AppResult<Option<ReportStep>> {
        if self.is_in_flight() {
            tracing::debug!("report already in flight, ignoring submit");
            return Ok(None);
        }

        let at = location.ok_or_else(|| {
            AppError::new(ErrorKind::Location, "Detecting location...")
                .with_internal("report submitted before the first fix")
        })?;

        let description = draft.description.trim();
        if description.is_empty() {
            return Err(AppError::new(
                ErrorKind::Validation,
                "Please describe the incident",
            ));
        }

        let video_link = match draft.video_link.as_deref().map(str::trim) {
            Some(link) if !link.is_empty() => {
                ValidatedUrl::new(link, HostPolicy::PublicOnly)?;
                Some(link.to_string())
            }
            _ => None,
        };

        let reporter_info = draft
            .reporter_info
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REPORTER)
            .to_string();

        let pending = PendingReport {
            at,
            description: description.to_string(),
            video_link,
            reporter_info,
            image_url: None,
        };

        let step = match draft.evidence {
            Some(file) => {
                self.phase = ReportPhase::UploadingEvidence;
                ReportStep::Upload {
                    path: file.storage_name(now_ms),
                    content_type: file.content_type,
                    data: file.data,
                }
            }
            None => {
                self.phase = ReportPhase::Saving;
                ReportStep::Insert(pending.row())
            }
        };

        self.pending = Some(pending);
        self.last_delivery = None;
        Ok(Some(step))
    }

    pub fn evidence_uploaded(&mut self, public_url: String) -> Option<NewReport> {
        if self.phase != ReportPhase::UploadingEvidence {
            return None;
        }
        let pending = self.pending.as_mut()?;
        pending.image_url = Some(public_url);
        self.phase = ReportPhase::Saving;
        Some(pending.row())
    }

    /// The report is saved; returns the relay payload for the notification.
    pub fn inserted(&mut self, contacts: &[String]) -> Option<RelayRequest> {
        if self.phase != ReportPhase::Saving {
            return None;
        }
        let pending = self.pending.take()?;
        self.phase = ReportPhase::Submitted;
        self.video_hint = None;
        Some(pending.relay_request(contacts))
    }

    pub fn fail(&mut self) {
        self.pending = None;
        self.phase = ReportPhase::Failed;
    }

    pub fn relay_finished(&mut self, summary: RelaySummary) {
        self.last_delivery = Some(summary);
    }

    pub fn reset(&mut self) {
        if !self.is_in_flight() {
            self.phase = ReportPhase::Idle;
            self.last_delivery = None;
        }
    }
}

#[must_use]
pub fn map_query() -> SelectQuery {
    SelectQuery::from(Table::Reports)
        .order_by("created_at", false)
        .limit(MAP_INCIDENT_LIMIT)
}

#[must_use]
pub fn history_query() -> SelectQuery {
    SelectQuery::from(Table::Reports)
        .order_by("created_at", false)
        .limit(HISTORY_LIMIT)
}

#[must_use]
pub fn map_channel() -> ChannelSpec {
    ChannelSpec::inserts(INCIDENT_MAP_CHANNEL, Table::Reports)
}

#[must_use]
pub fn history_channel() -> ChannelSpec {
    ChannelSpec::inserts(HISTORY_CHANNEL, Table::Reports)
}

/// Newest first; stream inserts are prepended.
#[derive(Debug, Default)]
pub struct HistoryState {
    pub entries: Vec<IncidentReport>,
    pub loading: bool,
    pub live: bool,
    pub error: Option<String>,
}

impl HistoryState {
    pub fn start(&mut self) {
        self.loading = true;
        self.error = None;
    }

    pub fn apply_snapshot(&mut self, rows: Vec<IncidentReport>) {
        self.entries = rows;
        self.loading = false;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    /// Returns false for an id already listed.
    pub fn prepend(&mut self, row: IncidentReport) -> bool {
        if self.entries.iter().any(|e| e.id == row.id) {
            return false;
        }
        self.entries.insert(0, row);
        true
    }

    pub fn stop(&mut self) {
        self.live = false;
        self.loading = false;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IncidentPopup {
    pub id: String,
    pub label: String,
    pub description: String,
    pub reporter: String,
    pub status: IncidentStatus,
    pub time_ago: Option<String>,
    pub media_url: Option<String>,
    pub media_is_video: bool,
    pub embed: Option<VideoEmbed>,
}

impl IncidentPopup {
    #[must_use]
    pub fn from_report(report: &IncidentReport, now_ms: u64) -> Self {
        let media_url = report.image_url.clone().filter(|u| !u.trim().is_empty());
        Self {
            id: report.id.as_str().to_string(),
            label: report.label().to_string(),
            description: report.description().to_string(),
            reporter: report.reporter().to_string(),
            status: report.status,
            time_ago: report.created_at_ms().map(|ms| format_time_ago(ms, now_ms)),
            media_is_video: media_url.as_deref().is_some_and(is_video_url),
            media_url,
            embed: report.embed(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    pub id: String,
    pub label: String,
    pub preview: String,
    pub reporter: String,
    pub status: IncidentStatus,
    pub time_ago: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub media_url: Option<String>,
    pub media_is_video: bool,
    pub embed: Option<VideoEmbed>,
}

impl HistoryItem {
    #[must_use]
    pub fn from_report(report: &IncidentReport, now_ms: u64) -> Self {
        let popup = IncidentPopup::from_report(report, now_ms);
        Self {
            id: popup.id,
            label: popup.label,
            preview: truncate_preview(report.description(), DESCRIPTION_PREVIEW_LENGTH),
            reporter: popup.reporter,
            status: popup.status,
            time_ago: popup.time_ago,
            lat: report.lat,
            lng: report.lng,
            media_url: popup.media_url,
            media_is_video: popup.media_is_video,
            embed: popup.embed,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryView {
    pub loading: bool,
    pub items: Vec<HistoryItem>,
    pub error: Option<String>,
}

impl HistoryView {
    #[must_use]
    pub fn build(state: &HistoryState, now_ms: u64) -> Self {
        Self {
            loading: state.loading,
            items: state
                .entries
                .iter()
                .map(|r| HistoryItem::from_report(r, now_ms))
                .collect(),
            error: state.error.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReportFormView {
    pub phase: ReportPhase,
    pub submitting: bool,
    pub location_known: bool,
    pub video_platform: Option<VideoPlatform>,
    pub last_delivery: Option<RelaySummary>,
}

impl ReportFormView {
    #[must_use]
    pub fn build(state: &ReportState, location_known: bool) -> Self {
        Self {
            phase: state.phase(),
            submitting: state.is_in_flight(),
            location_known,
            video_platform: state.video_hint,
            last_delivery: state.last_delivery,
        }
    }
}
