use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RelayError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    name          TEXT,
    password_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS media (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    filename   TEXT NOT NULL,
    alt        TEXT,
    mime_type  TEXT NOT NULL,
    filesize   INTEGER NOT NULL,
    width      INTEGER NOT NULL,
    height     INTEGER NOT NULL,
    thumbnail  TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS incidents (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    type        TEXT NOT NULL DEFAULT 'report',
    status      TEXT NOT NULL DEFAULT 'pending',
    lat         REAL,
    lng         REAL,
    media_id    INTEGER REFERENCES media(id) ON DELETE SET NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cctv_locations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    url        TEXT NOT NULL,
    lat        REAL NOT NULL,
    lng        REAL NOT NULL,
    status     TEXT NOT NULL DEFAULT 'online',
    created_at TEXT NOT NULL
);
"#;

/// Sessions older than this are refused.
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Emergency,
    #[default]
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    #[default]
    Pending,
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    #[default]
    Online,
    Offline,
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            fn from_column(value: &str) -> Self {
                match value {
                    $($text => Self::$variant,)+
                    _ => Self::default(),
                }
            }
        }
    };
}

text_enum!(IncidentKind { Emergency => "emergency", Report => "report" });
text_enum!(IncidentState { Pending => "pending", InProgress => "in_progress", Resolved => "resolved" });
text_enum!(CameraStatus { Online => "online", Offline => "offline" });

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    fn validate(self) -> Result<Self, RelayError> {
        shared::ValidatedCoordinate::new(self.lat, self.lng)
            .map(|_| self)
            .map_err(|e| RelayError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: i64,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    pub status: IncidentState,
    pub location: Option<GeoPoint>,
    pub media: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIncident {
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: IncidentKind,
    #[serde(default)]
    pub status: IncidentState,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub media: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CctvLocation {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub location: GeoPoint,
    pub status: CameraStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCctvLocation {
    pub name: String,
    pub url: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub status: CameraStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRecord {
    pub id: i64,
    pub filename: String,
    pub alt: Option<String>,
    pub mime_type: String,
    pub filesize: i64,
    pub width: u32,
    pub height: u32,
    pub thumbnail: String,
    pub created_at: String,
}

/// Stored fields of an upload before it has an id.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub filename: String,
    pub alt: Option<String>,
    pub mime_type: String,
    pub filesize: i64,
    pub width: u32,
    pub height: u32,
    pub thumbnail: String,
}

/// Collections behind the admin routes.
pub struct AdminStore {
    conn: Mutex<Connection>,
}

impl AdminStore {
    pub fn open(path: &Path) -> Result<Self, RelayError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Admin store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RelayError> {
        self.conn
            .lock()
            .map_err(|_| RelayError::Internal("admin store lock poisoned".into()))
    }

    // -- users & sessions --

    pub fn user_count(&self) -> Result<i64, RelayError> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    /// Create the first admin. Does nothing once any user exists.
    pub fn seed_admin(&self, email: &str, password: &str, name: &str) -> Result<bool, RelayError> {
        if self.user_count()? > 0 {
            return Ok(false);
        }
        let hash = super::auth::hash_password(password)?;
        self.conn()?.execute(
            "INSERT INTO users (email, name, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![email.trim(), name, hash, now_iso()],
        )?;
        info!(email = %email.trim(), "Seeded initial admin user");
        Ok(true)
    }

    pub fn user_with_hash(&self, email: &str) -> Result<Option<(AdminUser, String)>, RelayError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT id, email, name, password_hash FROM users WHERE email = ?1",
                params![email.trim()],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(3)?)),
            )
            .optional()?)
    }

    pub fn create_session(&self, user_id: i64) -> Result<String, RelayError> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.conn()?.execute(
            "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, Utc::now().timestamp()],
        )?;
        Ok(token)
    }

    pub fn session_user(&self, token: &str) -> Result<Option<AdminUser>, RelayError> {
        let oldest = Utc::now().timestamp() - SESSION_TTL_SECS;
        Ok(self
            .conn()?
            .query_row(
                "SELECT u.id, u.email, u.name FROM sessions s \
                 JOIN users u ON u.id = s.user_id \
                 WHERE s.token = ?1 AND s.created_at >= ?2",
                params![token, oldest],
                user_from_row,
            )
            .optional()?)
    }

    // -- incidents --

    pub fn list_incidents(&self, limit: u32) -> Result<Vec<Incident>, RelayError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, description, type, status, lat, lng, media_id, created_at \
             FROM incidents ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], incident_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn create_incident(&self, new: NewIncident) -> Result<Incident, RelayError> {
        let description = new.description.trim();
        if description.is_empty() {
            return Err(RelayError::BadRequest("description is required".into()));
        }
        let location = new.location.map(GeoPoint::validate).transpose()?;

        let conn = self.conn()?;
        if let Some(media_id) = new.media {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM media WHERE id = ?1)",
                params![media_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(RelayError::NotFound(format!("media {media_id}")));
            }
        }

        conn.execute(
            "INSERT INTO incidents (description, type, status, lat, lng, media_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                description,
                new.kind.as_str(),
                new.status.as_str(),
                location.map(|p| p.lat),
                location.map(|p| p.lng),
                new.media,
                now_iso(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT id, description, type, status, lat, lng, media_id, created_at \
             FROM incidents WHERE id = ?1",
            params![id],
            incident_from_row,
        )?)
    }

    // -- cctv --

    pub fn list_cctv(&self) -> Result<Vec<CctvLocation>, RelayError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, lat, lng, status, created_at FROM cctv_locations ORDER BY name",
        )?;
        let rows = stmt.query_map([], cctv_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn create_cctv(&self, new: NewCctvLocation) -> Result<CctvLocation, RelayError> {
        let name = new.name.trim();
        let url = new.url.trim();
        if name.is_empty() || url.is_empty() {
            return Err(RelayError::BadRequest("name and url are required".into()));
        }
        let location = new.location.validate()?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cctv_locations (name, url, lat, lng, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, url, location.lat, location.lng, new.status.as_str(), now_iso()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT id, name, url, lat, lng, status, created_at FROM cctv_locations WHERE id = ?1",
            params![id],
            cctv_from_row,
        )?)
    }

    // -- media --

    pub fn insert_media(&self, new: NewMedia) -> Result<MediaRecord, RelayError> {
        let conn = self.conn()?;
        let created_at = now_iso();
        conn.execute(
            "INSERT INTO media (filename, alt, mime_type, filesize, width, height, thumbnail, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.filename,
                new.alt,
                new.mime_type,
                new.filesize,
                new.width,
                new.height,
                new.thumbnail,
                created_at,
            ],
        )?;
        Ok(MediaRecord {
            id: conn.last_insert_rowid(),
            filename: new.filename,
            alt: new.alt,
            mime_type: new.mime_type,
            filesize: new.filesize,
            width: new.width,
            height: new.height,
            thumbnail: new.thumbnail,
            created_at,
        })
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<AdminUser> {
    Ok(AdminUser {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
    })
}

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let lat: Option<f64> = row.get(4)?;
    let lng: Option<f64> = row.get(5)?;
    Ok(Incident {
        id: row.get(0)?,
        description: row.get(1)?,
        kind: IncidentKind::from_column(&row.get::<_, String>(2)?),
        status: IncidentState::from_column(&row.get::<_, String>(3)?),
        location: lat.zip(lng).map(|(lat, lng)| GeoPoint { lat, lng }),
        media: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn cctv_from_row(row: &Row<'_>) -> rusqlite::Result<CctvLocation> {
    Ok(CctvLocation {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        location: GeoPoint {
            lat: row.get(3)?,
            lng: row.get(4)?,
        },
        status: CameraStatus::from_column(&row.get::<_, String>(5)?),
        created_at: row.get(6)?,
    })
}
