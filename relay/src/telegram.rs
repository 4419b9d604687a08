//! Telegram Bot API client.
//!
//! [`Notifier`] is the seam the fan-out talks to, so delivery can be swapped
//! for a recording double in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::alert::{Delivery, PARSE_MODE};
use crate::error::RelayError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    /// The Bot API answered with a non-success status; `body` is its JSON reply.
    #[error("Telegram rejected the request ({status})")]
    Rejected { status: u16, body: Value },

    #[error("{0}")]
    Network(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, chat_id: &str, delivery: &Delivery) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a JSON payload to a Bot API method and return the decoded reply.
    pub async fn call(&self, method: &str, payload: &Value) -> Result<Value, DeliveryError> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(method, "Bot API call succeeded");
        Ok(body)
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        let reply = self
            .call(
                "getUpdates",
                &json!({ "offset": offset, "timeout": timeout_secs }),
            )
            .await?;
        decode_result(reply)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.call(
            "sendMessage",
            &json!({ "chat_id": chat_id, "text": text, "parse_mode": PARSE_MODE }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn deliver(&self, chat_id: &str, delivery: &Delivery) -> Result<(), DeliveryError> {
        self.call(delivery.method(), &delivery.payload(chat_id))
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

fn decode_result<T: DeserializeOwned>(reply: Value) -> Result<T, DeliveryError> {
    let envelope: Envelope<T> = serde_json::from_value(reply.clone())
        .map_err(|e| DeliveryError::Network(format!("Malformed Bot API reply: {e}")))?;
    match envelope {
        Envelope {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        Envelope { description, .. } => Err(DeliveryError::Rejected {
            status: 200,
            body: description.map_or(reply, Value::String),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sender {
    pub first_name: String,
}
