//! Embedded admin backend: users, incidents, media and CCTV locations in SQLite.

pub mod auth;
pub mod media;
pub mod routes;
mod store;

pub use store::{
    AdminStore, AdminUser, CameraStatus, CctvLocation, GeoPoint, Incident, IncidentKind,
    IncidentState, MediaRecord, NewCctvLocation, NewIncident, NewMedia,
};
