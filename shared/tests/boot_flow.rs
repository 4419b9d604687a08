use crux_core::testing::AppTester;
use shared::model::{BootPhase, DeviceId};
use shared::prefs::{Language, PrefKey, PrefValue, CLEANUP_CUTOFF, MAX_CONTACTS};
use shared::{App, Effect, Event, Model, ViewState};

fn kv_requests(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::KeyValue(_)))
        .count()
}

fn stored(value: &PrefValue) -> Vec<u8> {
    value.encode().unwrap().1
}

#[test]
fn test_first_launch_purges_legacy_data() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(Event::AppStarted, &mut model);
    assert_eq!(model.boot, BootPhase::CheckingCleanup);
    assert_eq!(kv_requests(&update.effects), 1);

    let update = app.update(Event::CleanupMarkerLoaded(Ok(None)), &mut model);
    assert_eq!(model.boot, BootPhase::Purging);
    assert_eq!(kv_requests(&update.effects), 1);

    // Non-zero cursor: another page follows.
    let update = app.update(
        Event::StoredKeysListed(Ok((vec!["ncp_lang".into(), "theme_cache".into()], 7))),
        &mut model,
    );
    assert_eq!(kv_requests(&update.effects), 1);

    let update = app.update(
        Event::StoredKeysListed(Ok((
            vec!["recent_incidents".into(), "ncp_user_id".into()],
            0,
        ))),
        &mut model,
    );
    assert_eq!(model.cleanup.pending_deletes, 3);
    assert_eq!(kv_requests(&update.effects), 3);

    for key in ["ncp_lang", "recent_incidents"] {
        let update = app.update(
            Event::StoredKeyDeleted {
                key: key.into(),
                result: Ok(()),
            },
            &mut model,
        );
        assert_eq!(kv_requests(&update.effects), 0);
    }

    // A failed delete still completes the purge.
    let update = app.update(
        Event::StoredKeyDeleted {
            key: "ncp_user_id".into(),
            result: Err("locked".into()),
        },
        &mut model,
    );
    assert_eq!(kv_requests(&update.effects), 1, "marker write");

    let update = app.update(Event::CleanupMarkerWritten(Ok(())), &mut model);
    assert_eq!(model.boot, BootPhase::LoadingPreferences);
    assert_eq!(kv_requests(&update.effects), PrefKey::ALL.len());

    let mut last = None;
    for key in PrefKey::ALL {
        last = Some(app.update(
            Event::PreferenceLoaded {
                key,
                result: Ok(None),
            },
            &mut model,
        ));
    }

    assert!(model.is_ready());
    assert_eq!(model.prefs.language, Language::En);
    let id = model.device_id.clone().expect("device id generated");
    assert!(id.as_str().starts_with("user_"));
    assert_eq!(kv_requests(&last.unwrap().effects), 1, "device id persisted");
}

#[test]
fn test_second_launch_skips_cleanup() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::AppStarted, &mut model);
    let update = app.update(
        Event::CleanupMarkerLoaded(Ok(Some(CLEANUP_CUTOFF.as_bytes().to_vec()))),
        &mut model,
    );
    assert_eq!(model.boot, BootPhase::LoadingPreferences);
    assert_eq!(kv_requests(&update.effects), PrefKey::ALL.len());

    let stored_values = [
        (
            PrefKey::Language,
            Some(stored(&PrefValue::Language(Language::Bn))),
        ),
        (
            PrefKey::DeviceId,
            Some(stored(&PrefValue::DeviceId(DeviceId::new("user_k2j4h5g6f")))),
        ),
        (
            PrefKey::Contacts,
            Some(stored(&PrefValue::Contacts(vec!["12345".into()]))),
        ),
        (PrefKey::Theme, None),
        (PrefKey::Notifications, None),
        (PrefKey::Satellite, Some(b"not json".to_vec())),
        (PrefKey::Username, None),
    ];

    let mut last = None;
    for (key, bytes) in stored_values {
        last = Some(app.update(
            Event::PreferenceLoaded {
                key,
                result: Ok(bytes),
            },
            &mut model,
        ));
    }

    assert!(model.is_ready());
    assert_eq!(model.prefs.language, Language::Bn);
    assert_eq!(model.prefs.emergency_contacts, vec!["12345".to_string()]);
    assert!(!model.prefs.satellite, "unreadable value keeps the default");
    assert_eq!(
        model.device_id.as_ref().map(DeviceId::as_str),
        Some("user_k2j4h5g6f")
    );
    assert_eq!(kv_requests(&last.unwrap().effects), 0);
}

#[test]
fn test_app_started_twice_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::AppStarted, &mut model);
    let update = app.update(Event::AppStarted, &mut model);
    assert!(update.effects.is_empty());
    assert_eq!(model.boot, BootPhase::CheckingCleanup);
}

#[test]
fn test_unreadable_marker_loads_preferences_without_purging() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::AppStarted, &mut model);
    app.update(
        Event::CleanupMarkerLoaded(Err("storage unavailable".into())),
        &mut model,
    );
    assert_eq!(model.boot, BootPhase::LoadingPreferences);
    assert!(model.cleanup.collected.is_empty());
}

#[test]
fn test_view_shows_loading_until_ready() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::AppStarted, &mut model);
    app.update(Event::CleanupMarkerLoaded(Ok(None)), &mut model);
    match app.view(&model).state {
        ViewState::Loading { message } => {
            assert_eq!(message.as_deref(), Some("Clearing old data..."));
        }
        ViewState::Ready { .. } => panic!("not ready yet"),
    }
}

#[test]
fn test_settings_changes_are_persisted() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.boot = BootPhase::Ready;

    let update = app.update(Event::ToggleLanguage, &mut model);
    assert_eq!(model.prefs.language, Language::Bn);
    assert_eq!(kv_requests(&update.effects), 1);

    let update = app.update(Event::AddEmergencyContact("@duty_officer".into()), &mut model);
    assert_eq!(kv_requests(&update.effects), 1);
    assert!(model.active_toast.is_none());

    app.update(Event::AddEmergencyContact("not a contact".into()), &mut model);
    assert_eq!(model.prefs.emergency_contacts.len(), 2);
    assert!(model.active_toast.is_some(), "invalid contacts are flagged");

    let update = app.update(
        Event::PreferenceWritten {
            key: PrefKey::Contacts,
            result: Err("quota exceeded".into()),
        },
        &mut model,
    );
    assert!(model.active_error.is_some());
    assert!(!update.effects.is_empty());
}

#[test]
fn test_full_contact_list_warns_instead_of_dropping() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.boot = BootPhase::Ready;
    model.prefs.emergency_contacts = (0..MAX_CONTACTS).map(|i| i.to_string()).collect();

    let update = app.update(Event::AddEmergencyContact("@one_more".into()), &mut model);

    assert_eq!(kv_requests(&update.effects), 0);
    assert_eq!(model.prefs.emergency_contacts.len(), MAX_CONTACTS);
    let toast = model.active_toast.as_ref().unwrap();
    assert!(toast.message.contains("at most 20"));
}
