mod backend;
mod geolocation;
mod http;
mod interval;
mod kv;
mod realtime;

pub use self::backend::{
    Backend, BackendError, BackendOperation, BackendResponse, BackendResult, Bucket, Filter,
    Order, SelectQuery, Table, MAX_UPLOAD_BYTES,
};
pub use self::geolocation::{
    GeoFix, Geolocation, GeolocationError, GeolocationOperation, GeolocationResult,
};
pub use self::http::{HostPolicy, UrlError, ValidatedUrl};
pub use self::interval::{Interval, IntervalOperation, IntervalTick};
pub use self::kv::{decode_json, decode_text, encode_json, encode_text, KvError, KvKey};
pub use self::realtime::{
    ChangeKind, ChannelSpec, Realtime, RealtimeMessage, RealtimeOperation, RowChange,
};

pub use crux_core::render::Render;
pub use crux_http::Http;
pub use crux_kv::KeyValue;

use crate::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub key_value: KeyValue<Event>,
    pub geolocation: Geolocation<Event>,
    pub backend: Backend<Event>,
    pub realtime: Realtime<Event>,
    pub interval: Interval<Event>,
}
