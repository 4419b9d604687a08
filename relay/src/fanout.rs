//! Recipient selection and concurrent delivery of one incident alert.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use shared::incident::{DeliveryStatus, RecipientResult, RelayRequest};
use shared::prefs::is_valid_contact;
use tracing::{info, warn};

use crate::alert::Delivery;
use crate::telegram::{DeliveryError, Notifier};

/// Primary channel first, then every valid contact, without duplicates.
pub fn recipients(primary_chat_id: &str, contacts: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(primary_chat_id.trim())
        .chain(
            contacts
                .iter()
                .map(|c| c.trim())
                .filter(|c| is_valid_contact(c)),
        )
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(String::from)
        .collect()
}

pub struct Relay {
    notifier: Arc<dyn Notifier>,
    primary_chat_id: String,
}

impl Relay {
    pub fn new(notifier: Arc<dyn Notifier>, primary_chat_id: impl Into<String>) -> Self {
        Self {
            notifier,
            primary_chat_id: primary_chat_id.into(),
        }
    }

    pub fn primary_chat_id(&self) -> &str {
        &self.primary_chat_id
    }

    /// Deliver to every recipient concurrently. Results follow recipient order
    /// and one recipient's failure never touches another's attempt.
    pub async fn dispatch(&self, request: &RelayRequest) -> Vec<RecipientResult> {
        let delivery = Delivery::for_request(request);
        let targets = recipients(&self.primary_chat_id, &request.emergency_contacts);

        info!(
            recipients = targets.len(),
            method = delivery.method(),
            "Dispatching incident alert"
        );

        let attempts = targets.into_iter().map(|chat_id| {
            let delivery = &delivery;
            async move {
                let outcome = self.notifier.deliver(&chat_id, delivery).await;
                to_result(chat_id, outcome)
            }
        });

        join_all(attempts).await
    }
}

fn to_result(chat_id: String, outcome: Result<(), DeliveryError>) -> RecipientResult {
    match outcome {
        Ok(()) => RecipientResult {
            chat_id,
            status: DeliveryStatus::Sent,
            error: None,
        },
        Err(DeliveryError::Rejected { status, body }) => {
            warn!(recipient = %chat_id, status, error = %body, "Telegram rejected alert");
            RecipientResult {
                chat_id,
                status: DeliveryStatus::Failed,
                error: Some(body),
            }
        }
        Err(DeliveryError::Network(message)) => {
            warn!(recipient = %chat_id, error = %message, "Network error delivering alert");
            RecipientResult {
                chat_id,
                status: DeliveryStatus::Error,
                error: Some(Value::String(message)),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every attempt and fails the configured chat ids.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) rejected: Vec<String>,
        pub(crate) unreachable: Vec<String>,
        pub(crate) sent: Mutex<Vec<(String, Delivery)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn attempts(&self) -> Vec<(String, Delivery)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, chat_id: &str, delivery: &Delivery) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), delivery.clone()));
            if self.rejected.iter().any(|id| id == chat_id) {
                return Err(DeliveryError::Rejected {
                    status: 400,
                    body: json!({ "ok": false, "description": "Bad Request: chat not found" }),
                });
            }
            if self.unreachable.iter().any(|id| id == chat_id) {
                return Err(DeliveryError::Network("connection reset".into()));
            }
            Ok(())
        }
    }

    fn request(contacts: &[&str]) -> RelayRequest {
        RelayRequest {
            lat: 23.81,
            lng: 90.41,
            description: "Fire near market".into(),
            image_url: None,
            video_link: None,
            reporter_info: None,
            emergency_contacts: contacts.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    mod recipient_tests {
        use super::*;

        #[test]
        fn test_primary_first_and_invalid_dropped() {
            let contacts = vec![
                "@fire_dept".to_string(),
                "fire_dept".to_string(),
                "12345".to_string(),
                String::new(),
                "12ab".to_string(),
            ];
            assert_eq!(
                recipients("-100200", &contacts),
                vec!["-100200", "@fire_dept", "12345"]
            );
        }

        #[test]
        fn test_duplicates_collapse() {
            let contacts = vec![
                "-100200".to_string(),
                "@ops".to_string(),
                " @ops ".to_string(),
            ];
            assert_eq!(recipients("-100200", &contacts), vec!["-100200", "@ops"]);
        }

        proptest! {
            #[test]
            fn test_inclusion_matches_validity(contacts in prop::collection::vec("(@[a-z_]{1,8}|-?[0-9]{1,9}|[a-z]{1,8}|[0-9]{1,3}[a-z]{1,3})", 0..12)) {
                let selected = recipients("-1", &contacts);
                for contact in &contacts {
                    let included = selected.iter().any(|s| s == contact);
                    prop_assert_eq!(included, is_valid_contact(contact) || contact == "-1");
                }
                let unique: HashSet<_> = selected.iter().collect();
                prop_assert_eq!(unique.len(), selected.len());
                prop_assert_eq!(selected[0].as_str(), "-1");
            }
        }
    }

    mod dispatch_tests {
        use super::*;

        #[tokio::test]
        async fn test_text_alert_reaches_primary_and_contact() {
            let notifier = Arc::new(RecordingNotifier::default());
            let relay = Relay::new(notifier.clone(), "-100200");

            let results = relay.dispatch(&request(&["@fire_dept"])).await;

            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|r| r.status == DeliveryStatus::Sent));

            let attempts = notifier.attempts();
            let mut targets: Vec<_> = attempts.iter().map(|(id, _)| id.as_str()).collect();
            targets.sort_unstable();
            assert_eq!(targets, vec!["-100200", "@fire_dept"]);
            for (_, delivery) in &attempts {
                assert_eq!(delivery.method(), "sendMessage");
                assert!(delivery
                    .text()
                    .contains("https://www.google.com/maps/search/?api=1&query=23.81,90.41"));
            }
        }

        #[tokio::test]
        async fn test_failures_are_isolated() {
            let notifier = Arc::new(RecordingNotifier {
                rejected: vec!["@ghost".into()],
                unreachable: vec!["777".into()],
                ..Default::default()
            });
            let relay = Relay::new(notifier.clone(), "-100200");

            let results = relay.dispatch(&request(&["@ghost", "777", "@ok"])).await;

            let statuses: Vec<_> = results
                .iter()
                .map(|r| (r.chat_id.as_str(), r.status))
                .collect();
            assert_eq!(
                statuses,
                vec![
                    ("-100200", DeliveryStatus::Sent),
                    ("@ghost", DeliveryStatus::Failed),
                    ("777", DeliveryStatus::Error),
                    ("@ok", DeliveryStatus::Sent),
                ]
            );
            assert_eq!(
                results[1].error.as_ref().unwrap()["description"],
                "Bad Request: chat not found"
            );
            assert_eq!(results[2].error, Some(Value::String("connection reset".into())));
            assert_eq!(notifier.attempts().len(), 4);
        }

        proptest! {
            #[test]
            fn test_result_count_and_isolation(
                contacts in prop::collection::vec("@[a-z]{1,4}", 0..8),
                failing in prop::collection::vec("@[a-z]{1,4}", 0..4),
            ) {
                let notifier = Arc::new(RecordingNotifier {
                    rejected: failing.clone(),
                    ..Default::default()
                });
                let relay = Relay::new(notifier, "-1");
                let req = RelayRequest {
                    emergency_contacts: contacts.clone(),
                    ..request(&[])
                };

                let results = block_on(relay.dispatch(&req));

                prop_assert_eq!(results.len(), recipients("-1", &contacts).len());
                for result in &results {
                    let expected = if failing.contains(&result.chat_id) {
                        DeliveryStatus::Failed
                    } else {
                        DeliveryStatus::Sent
                    };
                    prop_assert_eq!(result.status, expected);
                }
            }
        }
    }
}
