use crux_core::testing::AppTester;
use serde_json::json;
use shared::camera::CAMERA_CHANNEL;
use shared::capabilities::{
    BackendOperation, ChangeKind, GeoFix, GeolocationError, GeolocationOperation,
    IntervalOperation, IntervalTick, RealtimeMessage, RealtimeOperation, RowChange, Table,
};
use shared::incident::INCIDENT_MAP_CHANNEL;
use shared::markers::{pitch_for, PinKind, FIRST_FIX_ZOOM};
use shared::model::{BootPhase, DeviceId};
use shared::presence::{HEARTBEAT_INTERVAL, HEARTBEAT_PERIOD_MS, PRESENCE_CHANNEL};
use shared::{App, Effect, ErrorKind, Event, MapView, Model, ViewState};

fn ready_model() -> Model {
    let mut model = Model::default();
    model.boot = BootPhase::Ready;
    model.device_id = Some(DeviceId::new("user_self00001"));
    model
}

fn fix(lat: f64, lng: f64) -> Event {
    Event::LocationUpdated(Ok(GeoFix {
        lat,
        lng,
        accuracy_m: Some(12.0),
    }))
}

fn backend_ops(effects: &[Effect]) -> Vec<BackendOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Backend(request) => Some(request.operation.clone()),
            _ => None,
        })
        .collect()
}

fn realtime_ops(effects: &[Effect]) -> Vec<RealtimeOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Realtime(request) => Some(request.operation.clone()),
            _ => None,
        })
        .collect()
}

fn geolocation_ops(effects: &[Effect]) -> Vec<GeolocationOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Geolocation(request) => Some(request.operation.clone()),
            _ => None,
        })
        .collect()
}

fn interval_ops(effects: &[Effect]) -> Vec<IntervalOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Interval(request) => Some(request.operation.clone()),
            _ => None,
        })
        .collect()
}

fn unsubscribed(ops: &[RealtimeOperation]) -> Vec<String> {
    ops.iter()
        .filter_map(|op| match op {
            RealtimeOperation::Unsubscribe { channel } => Some(channel.clone()),
            RealtimeOperation::Subscribe(_) => None,
        })
        .collect()
}

fn map_view(app: &AppTester<App, Effect>, model: &Model) -> MapView {
    match app.view(model).state {
        ViewState::Ready { map, .. } => *map,
        ViewState::Loading { .. } => panic!("model not ready"),
    }
}

fn insert(row: serde_json::Value) -> RealtimeMessage {
    RealtimeMessage::Change(RowChange {
        kind: ChangeKind::Insert,
        new: Some(row),
        old: None,
    })
}

#[test]
fn test_opening_the_map_starts_feeds() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    let update = app.update(Event::MapOpened, &mut model);

    assert!(matches!(
        &geolocation_ops(&update.effects)[..],
        [GeolocationOperation::Watch { .. }]
    ));
    let tables: Vec<Table> = backend_ops(&update.effects)
        .iter()
        .filter_map(BackendOperation::table)
        .collect();
    assert_eq!(tables, vec![Table::Reports, Table::PublicCctv]);
    assert_eq!(realtime_ops(&update.effects).len(), 2);
    assert!(interval_ops(&update.effects).is_empty(), "no fix yet");

    let again = app.update(Event::MapOpened, &mut model);
    assert!(again.effects.is_empty());
}

#[test]
fn test_sharing_starts_presence_after_first_fix() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    app.update(Event::MapOpened, &mut model);
    let update = app.update(Event::ToggleSharing, &mut model);
    assert!(interval_ops(&update.effects).is_empty());
    assert!(model.active_toast.is_some(), "waiting for a fix");

    let update = app.update(fix(23.8103, 90.4125), &mut model);
    assert_eq!(model.fly_to.unwrap().zoom, FIRST_FIX_ZOOM);
    assert!(model.presence.is_running());
    assert_eq!(
        interval_ops(&update.effects),
        vec![IntervalOperation::Start {
            name: HEARTBEAT_INTERVAL.into(),
            period_ms: HEARTBEAT_PERIOD_MS,
        }]
    );
    let subscribed = realtime_ops(&update.effects);
    assert!(matches!(
        &subscribed[..],
        [RealtimeOperation::Subscribe(spec)] if spec.channel == PRESENCE_CHANNEL
    ));
    assert_eq!(
        backend_ops(&update.effects)[0].table(),
        Some(Table::Users)
    );

    // First subscription confirmation sends a heartbeat; later ones do not.
    let update = app.update(Event::PresenceMessage(RealtimeMessage::Subscribed), &mut model);
    let ops = backend_ops(&update.effects);
    let BackendOperation::Upsert { table, row } = &ops[0] else {
        panic!("expected upsert, got {ops:?}");
    };
    assert_eq!(*table, Table::Users);
    assert_eq!(row["id"], "user_self00001");
    assert!(model.presence.is_live());

    let update = app.update(Event::PresenceMessage(RealtimeMessage::Subscribed), &mut model);
    assert!(backend_ops(&update.effects).is_empty());

    let update = app.update(Event::HeartbeatTick(IntervalTick { at_ms: 0 }), &mut model);
    assert_eq!(backend_ops(&update.effects).len(), 1);

    // A second fix does not move the camera again.
    let token = model.fly_to.unwrap().token;
    app.update(fix(23.8110, 90.4130), &mut model);
    assert_eq!(model.fly_to.unwrap().token, token);
}

#[test]
fn test_peer_changes_show_and_hide_pins() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    model.share_location = true;

    app.update(Event::MapOpened, &mut model);
    app.update(fix(23.8103, 90.4125), &mut model);
    app.update(Event::PresenceMessage(RealtimeMessage::Subscribed), &mut model);

    let now = chrono::Utc::now().to_rfc3339();
    let peer = json!({ "id": "user_peer00001", "lat": 23.811, "lng": 90.413, "last_seen": now });
    app.update(
        Event::PresenceMessage(RealtimeMessage::Change(RowChange {
            kind: ChangeKind::Insert,
            new: Some(peer.clone()),
            old: None,
        })),
        &mut model,
    );
    // Own row is never drawn as a peer.
    let own = json!({ "id": "user_self00001", "lat": 23.8103, "lng": 90.4125, "last_seen": now });
    app.update(Event::PresenceMessage(insert(own)), &mut model);

    let pins = map_view(&app, &model).pins;
    assert_eq!(pins.iter().filter(|p| p.kind == PinKind::Peer).count(), 1);
    assert!(pins
        .iter()
        .any(|p| p.kind == PinKind::Own { sharing: true }));

    app.update(
        Event::PresenceMessage(RealtimeMessage::Change(RowChange {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(json!({ "id": "user_peer00001" })),
        })),
        &mut model,
    );
    let pins = map_view(&app, &model).pins;
    assert!(pins.iter().all(|p| p.kind != PinKind::Peer));
}

#[test]
fn test_closing_the_map_releases_everything() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    model.share_location = true;

    app.update(Event::MapOpened, &mut model);
    app.update(fix(23.8103, 90.4125), &mut model);
    assert!(model.presence.is_running());

    let update = app.update(Event::MapClosed, &mut model);

    assert_eq!(
        geolocation_ops(&update.effects),
        vec![GeolocationOperation::ClearWatch]
    );
    assert_eq!(
        interval_ops(&update.effects),
        vec![IntervalOperation::Cancel {
            name: HEARTBEAT_INTERVAL.into()
        }]
    );
    let mut channels = unsubscribed(&realtime_ops(&update.effects));
    channels.sort();
    let mut expected = vec![
        INCIDENT_MAP_CHANNEL.to_string(),
        CAMERA_CHANNEL.to_string(),
        PRESENCE_CHANNEL.to_string(),
    ];
    expected.sort();
    assert_eq!(channels, expected);
    assert!(!model.presence.is_running());

    // Late deliveries from released feeds change nothing.
    for late in [
        fix(23.9, 90.5),
        Event::PresenceMessage(RealtimeMessage::Subscribed),
        Event::HeartbeatTick(IntervalTick { at_ms: 0 }),
        Event::IncidentFeedMessage(insert(json!({ "id": 1, "lat": 23.8, "lng": 90.4 }))),
    ] {
        let update = app.update(late, &mut model);
        assert!(update.effects.is_empty());
    }
    assert!(model.incidents.is_empty());
}

#[test]
fn test_turning_sharing_off_stops_presence() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    model.share_location = true;

    app.update(Event::MapOpened, &mut model);
    app.update(fix(23.8103, 90.4125), &mut model);
    let update = app.update(Event::ToggleSharing, &mut model);

    assert_eq!(unsubscribed(&realtime_ops(&update.effects)), vec![PRESENCE_CHANNEL.to_string()]);
    assert!(model.watching_location, "the map keeps following the user");
}

#[test]
fn test_incident_stream_adds_one_marker_per_report() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    app.update(Event::MapOpened, &mut model);

    let report = json!({
        "id": 42,
        "lat": 23.79,
        "lng": 90.40,
        "description": "Fire at the garment factory",
        "type": "Fire",
        "status": "open"
    });
    app.update(Event::IncidentFeedMessage(insert(report.clone())), &mut model);
    app.update(Event::IncidentFeedMessage(insert(report)), &mut model);
    assert_eq!(model.incidents.len(), 1);

    app.update(Event::IncidentSelected { id: "42".into() }, &mut model);
    let map = map_view(&app, &model);
    let popup = map.selected_incident.expect("popup shown");
    assert_eq!(popup.label, "Fire");
    assert_eq!(
        map.pins.iter().filter(|p| p.kind == PinKind::Incident).count(),
        1
    );
    assert_eq!(map.features.features.len(), map.pins.len());

    app.update(Event::IncidentSelected { id: "missing".into() }, &mut model);
    assert_eq!(
        model.selected_incident.as_ref().map(|id| id.as_str()),
        Some("42")
    );
}

#[test]
fn test_deactivated_camera_leaves_the_map() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    app.update(Event::MapOpened, &mut model);

    let camera = json!({
        "id": "cam-1",
        "name": "Gate 3",
        "stream_url": "https://streams.example.org/gate3.m3u8",
        "lat": 23.80,
        "lng": 90.41,
        "is_active": true
    });
    app.update(Event::CameraFeedMessage(insert(camera.clone())), &mut model);
    assert_eq!(model.map_cameras.len(), 1);

    let mut inactive = camera;
    inactive["is_active"] = json!(false);
    app.update(
        Event::CameraFeedMessage(RealtimeMessage::Change(RowChange {
            kind: ChangeKind::Update,
            new: Some(inactive),
            old: None,
        })),
        &mut model,
    );
    assert!(model.map_cameras.is_empty());
}

#[test]
fn test_denied_permission_surfaces_error() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    app.update(Event::MapOpened, &mut model);

    app.update(
        Event::LocationUpdated(Err(GeolocationError::PermissionDenied)),
        &mut model,
    );
    assert_eq!(
        model.active_error.as_ref().unwrap().kind,
        ErrorKind::LocationPermissionDenied
    );
}

#[test]
fn test_map_controls() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    app.update(Event::MapOpened, &mut model);

    app.update(Event::Toggle3d, &mut model);
    assert!(!model.map_3d);
    assert!((map_view(&app, &model).pitch - pitch_for(false)).abs() < f64::EPSILON);

    app.update(Event::ToggleSatellite, &mut model);
    assert!(map_view(&app, &model).layers.satellite.is_some());

    app.update(Event::LocateMe, &mut model);
    assert!(model.fly_to.is_none());
    assert!(model.active_toast.is_some());

    app.update(Event::MapClicked { lat: 23.0, lng: 90.0 }, &mut model);
    assert!(model.picked_location.is_none(), "clicks only count while picking");

    app.update(Event::StartLocationPick, &mut model);
    app.update(Event::MapClicked { lat: 23.0, lng: 90.0 }, &mut model);
    assert!(!model.picking_location);
    assert_eq!(model.picked_location.unwrap().lat(), 23.0);
}
