use crux_core::testing::AppTester;
use serde_json::Value;
use shared::capabilities::{BackendError, BackendOperation, BackendResponse, Bucket, Table};
use shared::incident::{DeliveryStatus, RecipientResult, RelayResponse, ReportDraft, ReportPhase};
use shared::model::{BootPhase, DeviceId};
use shared::{
    App, AppError, Attachment, Effect, ErrorKind, Event, Model, ValidatedCoordinate,
    DEFAULT_RELAY_URL,
};

fn ready_model() -> Model {
    let mut model = Model::default();
    model.boot = BootPhase::Ready;
    model.device_id = Some(DeviceId::new("user_abc123xyz"));
    model.own_location = Some(ValidatedCoordinate::new(23.8103, 90.4125).unwrap());
    model.prefs.emergency_contacts = vec!["123456789".into(), "@duty_officer".into()];
    model
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

fn relay_body(effects: &[Effect]) -> Option<(String, Value)> {
    effects.iter().find_map(|e| match e {
        Effect::Http(request) => Some((
            request.operation.url.clone(),
            serde_json::from_slice(&request.operation.body).unwrap(),
        )),
        _ => None,
    })
}

fn draft(description: &str) -> ReportDraft {
    ReportDraft {
        description: description.into(),
        ..ReportDraft::default()
    }
}

#[test]
fn test_submit_before_first_fix_is_rejected() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    model.own_location = None;

    let update = app.update(Event::SubmitReport(draft("Fire at the market")), &mut model);

    assert!(backend_ops(&update.effects).is_empty());
    let error = model.active_error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Location);
    assert_eq!(error.message, "Detecting location...");
    assert_eq!(model.report.phase(), ReportPhase::Idle);
}

#[test]
fn test_submit_requires_description() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    let update = app.update(Event::SubmitReport(draft("   ")), &mut model);

    assert!(backend_ops(&update.effects).is_empty());
    assert_eq!(model.active_error.as_ref().unwrap().kind, ErrorKind::Validation);
}

#[test]
fn test_report_is_saved_then_relayed() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    let update = app.update(
        Event::SubmitReport(ReportDraft {
            description: "Road blocked near the bridge".into(),
            video_link: Some("https://youtu.be/dQw4w9WgXcQ".into()),
            ..ReportDraft::default()
        }),
        &mut model,
    );

    let ops = backend_ops(&update.effects);
    assert_eq!(ops.len(), 1);
    let BackendOperation::Insert { table, row } = &ops[0] else {
        panic!("expected insert, got {ops:?}");
    };
    assert_eq!(*table, Table::Reports);
    let description = row["description"].as_str().unwrap();
    assert!(description.starts_with("Road blocked near the bridge"));
    assert!(description.ends_with("Video: https://youtu.be/dQw4w9WgXcQ"));
    assert_eq!(row["reporter_info"], "Anonymous");
    assert_eq!(row["status"], "open");
    assert_eq!(model.report.phase(), ReportPhase::Saving);

    let update = app.update(Event::ReportInserted(Ok(BackendResponse::Ack)), &mut model);

    let (url, body) = relay_body(&update.effects).expect("relay request sent");
    assert_eq!(url, DEFAULT_RELAY_URL);
    assert_eq!(
        body["emergencyContacts"],
        serde_json::json!(["123456789", "@duty_officer"])
    );
    assert_eq!(body["lat"], 23.8103);
    assert_eq!(model.report.phase(), ReportPhase::Submitted);
    assert!(model.active_toast.is_some());

    let update = app.update(
        Event::RelayResponded(Ok(RelayResponse::delivered(vec![
            RecipientResult {
                chat_id: "123456789".into(),
                status: DeliveryStatus::Sent,
                error: None,
            },
            RecipientResult {
                chat_id: "@duty_officer".into(),
                status: DeliveryStatus::Failed,
                error: Some(serde_json::json!({"description": "chat not found"})),
            },
        ]))),
        &mut model,
    );
    assert!(!update.effects.is_empty());
    let delivery = model.report.last_delivery.unwrap();
    assert_eq!(delivery.recipients, 2);
    assert_eq!(delivery.delivered, 1);
    assert!(model.active_error.is_none());
}

#[test]
fn test_relay_failure_never_fails_the_report() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    app.update(Event::SubmitReport(draft("Flooding")), &mut model);
    app.update(Event::ReportInserted(Ok(BackendResponse::Ack)), &mut model);
    app.update(
        Event::RelayResponded(Err(AppError::from_http_status(
            500,
            Some(br#"{"success":false,"error":"Server misconfiguration: Telegram credentials missing"}"#),
        ))),
        &mut model,
    );

    assert_eq!(model.report.phase(), ReportPhase::Submitted);
    assert!(model.active_error.is_none());
    assert!(model.report.last_delivery.is_none());
}

#[test]
fn test_evidence_is_uploaded_before_insert() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    let update = app.update(
        Event::SubmitReport(ReportDraft {
            description: "Accident".into(),
            evidence: Some(Attachment {
                file_name: "crash.jpg".into(),
                content_type: "image/jpeg".into(),
                data: vec![0xFF, 0xD8, 0xFF],
            }),
            ..ReportDraft::default()
        }),
        &mut model,
    );

    let ops = backend_ops(&update.effects);
    let BackendOperation::Upload {
        bucket,
        path,
        content_type,
        ..
    } = &ops[0]
    else {
        panic!("expected upload, got {ops:?}");
    };
    assert_eq!(*bucket, Bucket::Evidence);
    assert!(path.ends_with(".jpg"));
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(model.report.phase(), ReportPhase::UploadingEvidence);

    let public_url = "https://cdn.example.org/evidence/crash.jpg".to_string();
    let update = app.update(
        Event::EvidenceUploaded(Ok(BackendResponse::Uploaded {
            public_url: public_url.clone(),
        })),
        &mut model,
    );
    let ops = backend_ops(&update.effects);
    let BackendOperation::Insert { row, .. } = &ops[0] else {
        panic!("expected insert, got {ops:?}");
    };
    assert_eq!(row["image_url"], public_url.as_str());

    // A repeated upload receipt does not insert twice.
    let update = app.update(
        Event::EvidenceUploaded(Ok(BackendResponse::Uploaded { public_url })),
        &mut model,
    );
    assert!(backend_ops(&update.effects).is_empty());
}

#[test]
fn test_upload_failure_allows_retry() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();
    let with_evidence = || ReportDraft {
        description: "Smoke".into(),
        evidence: Some(Attachment {
            file_name: "smoke.mp4".into(),
            content_type: "video/mp4".into(),
            data: vec![0; 16],
        }),
        ..ReportDraft::default()
    };

    app.update(Event::SubmitReport(with_evidence()), &mut model);
    app.update(
        Event::EvidenceUploaded(Err(BackendError::Network("offline".into()))),
        &mut model,
    );
    assert_eq!(model.report.phase(), ReportPhase::Failed);
    assert_eq!(model.active_error.as_ref().unwrap().kind, ErrorKind::Network);

    let update = app.update(Event::SubmitReport(with_evidence()), &mut model);
    assert_eq!(backend_ops(&update.effects).len(), 1);
}

#[test]
fn test_double_submit_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ready_model();

    app.update(Event::SubmitReport(draft("Gas leak")), &mut model);
    let update = app.update(Event::SubmitReport(draft("Gas leak")), &mut model);
    assert!(update.effects.is_empty());
}
