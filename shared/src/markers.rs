//! Map markers keyed by entity id, plus the layer configuration handed to
//! the map engine.

use std::collections::BTreeMap;

use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde::{Deserialize, Serialize};

use crate::{CoordinateError, ValidatedCoordinate};

pub const MAP_STYLE_URL: &str = "https://tiles.openfreemap.org/styles/bright";
pub const SATELLITE_TILES_URL: &str =
    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}";
pub const SATELLITE_TILE_SIZE: u32 = 256;
pub const BUILDINGS_LAYER_ID: &str = "3d-buildings";
pub const SATELLITE_LAYER_ID: &str = "satellite-layer";

/// Dhaka.
pub const DEFAULT_CENTER_LAT: f64 = 23.8103;
pub const DEFAULT_CENTER_LNG: f64 = 90.4125;
pub const DEFAULT_ZOOM: f64 = 15.0;
pub const DEFAULT_PITCH: f64 = 45.0;
pub const TILTED_PITCH: f64 = 60.0;
pub const FIRST_FIX_ZOOM: f64 = 16.0;
pub const LOCATE_ZOOM: f64 = 18.0;

pub trait Locatable {
    fn marker_id(&self) -> String;
    fn position(&self) -> Result<ValidatedCoordinate, CoordinateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerChange {
    Created,
    Moved,
}

/// One marker per entity id. Applying the same snapshot or stream event twice
/// leaves the set unchanged.
#[derive(Debug, Clone)]
pub struct MarkerSet<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for MarkerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MarkerSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries the predicate rejects and returns their ids.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&T) -> bool,
    {
        let dropped: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, item)| !keep(item))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            self.entries.remove(id);
        }
        dropped
    }
}

impl<T: Locatable> MarkerSet<T> {
    pub fn upsert(&mut self, item: T) -> Result<MarkerChange, CoordinateError> {
        item.position()?;
        let change = if self.entries.contains_key(&item.marker_id()) {
            MarkerChange::Moved
        } else {
            MarkerChange::Created
        };
        self.entries.insert(item.marker_id(), item);
        Ok(change)
    }

    /// Materializes a snapshot. Entities with unusable coordinates are
    /// skipped; the number of markers created is returned.
    pub fn upsert_all(&mut self, items: impl IntoIterator<Item = T>) -> usize {
        let mut created = 0;
        for item in items {
            let id = item.marker_id();
            match self.upsert(item) {
                Ok(MarkerChange::Created) => created += 1,
                Ok(MarkerChange::Moved) => {}
                Err(e) => tracing::warn!(marker = %id, error = %e, "skipping marker"),
            }
        }
        created
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RasterLayer {
    pub id: String,
    pub tiles: Vec<String>,
    pub tile_size: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MapLayers {
    pub style_url: String,
    pub buildings_layer: Option<String>,
    pub satellite: Option<RasterLayer>,
}

impl MapLayers {
    #[must_use]
    pub fn compose(satellite: bool, three_d: bool) -> Self {
        Self {
            style_url: MAP_STYLE_URL.to_string(),
            buildings_layer: three_d.then(|| BUILDINGS_LAYER_ID.to_string()),
            satellite: satellite.then(|| RasterLayer {
                id: SATELLITE_LAYER_ID.to_string(),
                tiles: vec![SATELLITE_TILES_URL.to_string()],
                tile_size: SATELLITE_TILE_SIZE,
            }),
        }
    }
}

#[must_use]
pub const fn pitch_for(three_d: bool) -> f64 {
    if three_d {
        TILTED_PITCH
    } else {
        0.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PinKind {
    Own { sharing: bool },
    Peer,
    Incident,
    Camera { stream_url: String },
}

impl PinKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Own { .. } => "own",
            Self::Peer => "peer",
            Self::Incident => "incident",
            Self::Camera { .. } => "camera",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MapPin {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub label: String,
    pub kind: PinKind,
}

impl MapPin {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        at: ValidatedCoordinate,
        label: impl Into<String>,
        kind: PinKind,
    ) -> Self {
        Self {
            id: id.into(),
            lat: at.lat(),
            lng: at.lng(),
            label: label.into(),
            kind,
        }
    }

    #[must_use]
    pub fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("kind".into(), self.kind.name().into());
        properties.insert("label".into(), self.label.clone().into());
        match &self.kind {
            PinKind::Own { sharing } => {
                properties.insert("sharing".into(), (*sharing).into());
            }
            PinKind::Camera { stream_url } => {
                properties.insert("stream_url".into(), stream_url.clone().into());
            }
            PinKind::Peer | PinKind::Incident => {}
        }

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Point(vec![self.lng, self.lat]))),
            id: Some(Id::String(format!("{}:{}", self.kind.name(), self.id))),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

#[must_use]
pub fn feature_collection(pins: &[MapPin]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: pins.iter().map(MapPin::to_feature).collect(),
        foreign_members: None,
    }
}
