//! Community CCTV registry and the shared camera layer of the map.
//!
//! Ownership is the locally generated device id. It scopes queries and
//! mutations but is not an authenticated principal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{
    ChangeKind, ChannelSpec, Filter, HostPolicy, RowChange, SelectQuery, Table, ValidatedUrl,
};
use crate::markers::{Locatable, MarkerChange, MarkerSet};
use crate::model::CameraId;
use crate::{AppError, AppResult, CoordinateError, ErrorKind, ValidatedCoordinate};

pub const CAMERA_CHANNEL: &str = "cctv_updates";

/// A row of the `public_cctv` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub id: CameraId,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
    pub stream_url: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Locatable for CameraEntry {
    fn marker_id(&self) -> String {
        self.id.as_str().to_string()
    }

    fn position(&self) -> Result<ValidatedCoordinate, CoordinateError> {
        ValidatedCoordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCamera {
    pub owner_id: String,
    pub name: String,
    pub stream_url: String,
    pub lat: f64,
    pub lng: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CameraDraft {
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

impl CameraDraft {
    /// Every field is required; coordinates left blank fall back to the
    /// location picked on the map. New cameras start inactive.
    pub fn validate(
        &self,
        owner: &str,
        picked: Option<ValidatedCoordinate>,
    ) -> AppResult<NewCamera> {
        let name = self.name.trim();
        let stream_url = self.stream_url.trim();
        let coords = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => picked.map(|p| (p.lat(), p.lng())),
        };

        let (Some((lat, lng)), false, false) = (coords, name.is_empty(), stream_url.is_empty())
        else {
            return Err(AppError::new(ErrorKind::Validation, "Please fill all fields"));
        };

        let at = ValidatedCoordinate::new(lat, lng)?;
        let url = ValidatedUrl::new(stream_url, HostPolicy::PublicOnly)?;

        Ok(NewCamera {
            owner_id: owner.to_string(),
            name: name.to_string(),
            stream_url: url.as_str().to_string(),
            lat: at.lat(),
            lng: at.lng(),
            is_active: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingToggle {
    camera: CameraId,
    previous: bool,
}

/// The owner's own cameras, newest first.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: Vec<CameraEntry>,
    pending: HashMap<String, PendingToggle>,
    pub loading: bool,
    pub saving: bool,
    pub error: Option<String>,
}

impl CameraRegistry {
    #[must_use]
    pub fn cameras(&self) -> &[CameraEntry] {
        &self.cameras
    }

    pub fn start_loading(&mut self) {
        self.loading = true;
        self.error = None;
    }

    pub fn apply_snapshot(&mut self, rows: Vec<CameraEntry>) {
        self.cameras = rows;
        self.loading = false;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.saving = false;
        self.error = Some(message.into());
    }

    /// Returns false when the camera is not listed.
    pub fn remove(&mut self, id: &CameraId) -> bool {
        let before = self.cameras.len();
        self.cameras.retain(|c| &c.id != id);
        before != self.cameras.len()
    }

    #[must_use]
    pub fn is_toggling(&self, id: &CameraId) -> bool {
        self.pending.values().any(|p| &p.camera == id)
    }

    /// Flips `is_active` locally and returns the mutation id and new state.
    /// A camera with a toggle already in flight is left alone.
    pub fn begin_toggle(&mut self, id: &CameraId) -> Option<(String, bool)> {
        if self.is_toggling(id) {
            return None;
        }
        let camera = self.cameras.iter_mut().find(|c| &c.id == id)?;
        let previous = camera.is_active;
        camera.is_active = !previous;

        let mutation_id = uuid::Uuid::new_v4().to_string();
        self.pending.insert(
            mutation_id.clone(),
            PendingToggle {
                camera: id.clone(),
                previous,
            },
        );
        Some((mutation_id, !previous))
    }

    /// Commits or rolls back an optimistic toggle. Returns the camera id when
    /// a rollback happened.
    pub fn finish_toggle(&mut self, mutation_id: &str, succeeded: bool) -> Option<CameraId> {
        let pending = self.pending.remove(mutation_id)?;
        if succeeded {
            return None;
        }
        if let Some(camera) = self.cameras.iter_mut().find(|c| c.id == pending.camera) {
            camera.is_active = pending.previous;
        }
        Some(pending.camera)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraMapChange {
    Shown(String),
    Moved(String),
    Hidden(String),
    Ignored,
}

/// Deletes and deactivations hide a marker; an active row shows or moves it.
pub fn sync_map_marker(markers: &mut MarkerSet<CameraEntry>, change: &RowChange) -> CameraMapChange {
    let row = change.new_row::<CameraEntry>();
    let hide = match change.kind {
        ChangeKind::Delete => true,
        ChangeKind::Update => row.as_ref().map_or(true, |r| !r.is_active),
        ChangeKind::Insert => false,
    };

    if hide {
        return match change.row_id() {
            Some(id) if markers.remove(&id) => CameraMapChange::Hidden(id),
            _ => CameraMapChange::Ignored,
        };
    }

    match row {
        Some(camera) if camera.is_active => {
            let id = camera.id.as_str().to_string();
            match markers.upsert(camera) {
                Ok(MarkerChange::Created) => CameraMapChange::Shown(id),
                Ok(MarkerChange::Moved) => CameraMapChange::Moved(id),
                Err(e) => {
                    tracing::warn!(camera = %id, error = %e, "ignoring camera with bad position");
                    CameraMapChange::Ignored
                }
            }
        }
        _ => CameraMapChange::Ignored,
    }
}

#[must_use]
pub fn active_query() -> SelectQuery {
    SelectQuery::from(Table::PublicCctv).filter(Filter::eq("is_active", true))
}

#[must_use]
pub fn owned_query(owner: &str) -> SelectQuery {
    SelectQuery::from(Table::PublicCctv)
        .filter(Filter::eq("owner_id", owner))
        .order_by("created_at", false)
}

/// Mutations always carry the owner filter alongside the id.
#[must_use]
pub fn owned_row_filters(id: &CameraId, owner: &str) -> Vec<Filter> {
    vec![Filter::eq("id", id.as_str()), Filter::eq("owner_id", owner)]
}

#[must_use]
pub fn channel_spec() -> ChannelSpec {
    ChannelSpec::all_changes(CAMERA_CHANNEL, Table::PublicCctv)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CameraItem {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    pub lat: f64,
    pub lng: f64,
    pub is_active: bool,
    pub toggling: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CameraRegistryView {
    pub loading: bool,
    pub saving: bool,
    pub cameras: Vec<CameraItem>,
    pub picking_location: bool,
    pub picked_lat: Option<f64>,
    pub picked_lng: Option<f64>,
    pub error: Option<String>,
}

impl CameraRegistryView {
    #[must_use]
    pub fn build(
        registry: &CameraRegistry,
        picking_location: bool,
        picked: Option<ValidatedCoordinate>,
    ) -> Self {
        Self {
            loading: registry.loading,
            saving: registry.saving,
            cameras: registry
                .cameras()
                .iter()
                .map(|c| CameraItem {
                    id: c.id.as_str().to_string(),
                    name: c.name.clone(),
                    stream_url: c.stream_url.clone(),
                    lat: c.lat,
                    lng: c.lng,
                    is_active: c.is_active,
                    toggling: registry.is_toggling(&c.id),
                })
                .collect(),
            picking_location,
            picked_lat: picked.map(ValidatedCoordinate::lat),
            picked_lng: picked.map(ValidatedCoordinate::lng),
            error: registry.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn camera(id: &str, active: bool) -> CameraEntry {
        CameraEntry {
            id: CameraId::new(id),
            owner_id: Some("user_abc".into()),
            name: format!("cam {id}"),
            stream_url: "https://cams.example.com/live".into(),
            lat: 23.81,
            lng: 90.41,
            is_active: active,
            created_at: None,
        }
    }

    fn change(kind: ChangeKind, new: Option<serde_json::Value>, old: Option<serde_json::Value>) -> RowChange {
        RowChange { kind, new, old }
    }

    mod draft_tests {
        use super::*;

        fn draft() -> CameraDraft {
            CameraDraft {
                name: "Gate".into(),
                stream_url: "https://cams.example.com/gate".into(),
                lat: Some(23.81),
                lng: Some(90.41),
            }
        }

        #[test]
        fn test_valid_draft_starts_inactive() {
            let row = draft().validate("user_abc", None).unwrap();
            assert_eq!(row.owner_id, "user_abc");
            assert!(!row.is_active);
        }

        #[test]
        fn test_missing_fields_rejected() {
            let mut d = draft();
            d.name = "  ".into();
            let err = d.validate("user_abc", None).unwrap_err();
            assert_eq!(err.message, "Please fill all fields");

            let mut d = draft();
            d.lng = None;
            assert!(d.validate("user_abc", None).is_err());
        }

        #[test]
        fn test_picked_location_fills_coordinates() {
            let mut d = draft();
            d.lat = None;
            d.lng = None;
            let picked = ValidatedCoordinate::new(22.33, 91.83).unwrap();
            let row = d.validate("user_abc", Some(picked)).unwrap();
            assert!((row.lat - 22.33).abs() < f64::EPSILON);
        }

        #[test]
        fn test_private_stream_rejected() {
            let mut d = draft();
            d.stream_url = "http://192.168.0.10/stream".into();
            assert!(d.validate("user_abc", None).is_err());

            let mut d = draft();
            d.lat = Some(95.0);
            assert_eq!(
                d.validate("user_abc", None).unwrap_err().kind,
                ErrorKind::Validation
            );
        }
    }

    mod registry_tests {
        use super::*;

        #[test]
        fn test_toggle_commit() {
            let mut registry = CameraRegistry::default();
            registry.apply_snapshot(vec![camera("a", false)]);

            let (mutation, new_state) = registry.begin_toggle(&CameraId::new("a")).unwrap();
            assert!(new_state);
            assert!(registry.cameras()[0].is_active);
            assert!(registry.begin_toggle(&CameraId::new("a")).is_none());

            assert_eq!(registry.finish_toggle(&mutation, true), None);
            assert!(registry.cameras()[0].is_active);
            assert!(!registry.is_toggling(&CameraId::new("a")));
        }

        #[test]
        fn test_toggle_rollback() {
            let mut registry = CameraRegistry::default();
            registry.apply_snapshot(vec![camera("a", true)]);

            let (mutation, _) = registry.begin_toggle(&CameraId::new("a")).unwrap();
            assert!(!registry.cameras()[0].is_active);

            assert_eq!(
                registry.finish_toggle(&mutation, false),
                Some(CameraId::new("a"))
            );
            assert!(registry.cameras()[0].is_active);
            assert_eq!(registry.finish_toggle(&mutation, false), None);
        }

        #[test]
        fn test_remove() {
            let mut registry = CameraRegistry::default();
            registry.apply_snapshot(vec![camera("a", true), camera("b", false)]);
            assert!(registry.remove(&CameraId::new("a")));
            assert!(!registry.remove(&CameraId::new("a")));
            assert_eq!(registry.cameras().len(), 1);
        }

        #[test]
        fn test_unknown_camera_cannot_toggle() {
            let mut registry = CameraRegistry::default();
            assert!(registry.begin_toggle(&CameraId::new("ghost")).is_none());
        }
    }

    mod map_sync_tests {
        use super::*;

        #[test]
        fn test_activation_shows_then_deactivation_hides() {
            let mut markers = MarkerSet::new();
            let active = serde_json::to_value(camera("a", true)).unwrap();
            let inactive = serde_json::to_value(camera("a", false)).unwrap();

            assert_eq!(
                sync_map_marker(&mut markers, &change(ChangeKind::Update, Some(active), None)),
                CameraMapChange::Shown("a".into())
            );
            assert_eq!(
                sync_map_marker(&mut markers, &change(ChangeKind::Update, Some(inactive), None)),
                CameraMapChange::Hidden("a".into())
            );
            assert!(markers.is_empty());
        }

        #[test]
        fn test_inactive_insert_is_ignored() {
            let mut markers = MarkerSet::new();
            let inactive = serde_json::to_value(camera("a", false)).unwrap();
            assert_eq!(
                sync_map_marker(&mut markers, &change(ChangeKind::Insert, Some(inactive), None)),
                CameraMapChange::Ignored
            );
        }

        #[test]
        fn test_delete_uses_old_image() {
            let mut markers = MarkerSet::new();
            markers.upsert(camera("a", true)).unwrap();
            assert_eq!(
                sync_map_marker(
                    &mut markers,
                    &change(ChangeKind::Delete, None, Some(json!({"id": "a"})))
                ),
                CameraMapChange::Hidden("a".into())
            );
        }

        #[test]
        fn test_queries_scope_by_owner() {
            let query = owned_query("user_abc");
            assert_eq!(query.filters, vec![Filter::eq("owner_id", "user_abc")]);
            assert!(active_query().has_filter_on("is_active"));

            let filters = owned_row_filters(&CameraId::new("a"), "user_abc");
            assert_eq!(filters.len(), 2);
        }
    }
}
