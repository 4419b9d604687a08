use crux_core::capability::{CapabilityContext, Operation};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::backend::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub channel: String,
    pub table: Table,
    pub kinds: Vec<ChangeKind>,
}

impl ChannelSpec {
    pub fn all_changes(channel: impl Into<String>, table: Table) -> Self {
        Self {
            channel: channel.into(),
            table,
            kinds: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete],
        }
    }

    pub fn inserts(channel: impl Into<String>, table: Table) -> Self {
        Self {
            channel: channel.into(),
            table,
            kinds: vec![ChangeKind::Insert],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RealtimeOperation {
    Subscribe(ChannelSpec),
    Unsubscribe { channel: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl RowChange {
    pub fn new_row<T: DeserializeOwned>(&self) -> Option<T> {
        decode(self.new.as_ref())
    }

    pub fn old_row<T: DeserializeOwned>(&self) -> Option<T> {
        decode(self.old.as_ref())
    }

    /// Id of the affected row, preferring the new image.
    #[must_use]
    pub fn row_id(&self) -> Option<String> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| match row.get("id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
    }
}

fn decode<T: DeserializeOwned>(row: Option<&Value>) -> Option<T> {
    let row = row?;
    match serde_json::from_value(row.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable realtime row");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeMessage {
    Subscribed,
    Change(RowChange),
    Failed { reason: String },
    Closed,
}

impl Operation for RealtimeOperation {
    type Output = RealtimeMessage;
}

/// Row-level change feeds. Each subscription stays open until `unsubscribe`
/// is requested for the same channel name.
#[derive(crux_core::macros::Capability)]
pub struct Realtime<Ev> {
    context: CapabilityContext<RealtimeOperation, Ev>,
}

impl<Ev> Realtime<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<RealtimeOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn subscribe<F>(&self, spec: ChannelSpec, make_event: F)
    where
        F: Fn(RealtimeMessage) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut stream = ctx.stream_from_shell(RealtimeOperation::Subscribe(spec));
            while let Some(message) = stream.next().await {
                let closed = matches!(message, RealtimeMessage::Closed);
                ctx.update_app(make_event(message));
                if closed {
                    break;
                }
            }
        });
    }

    pub fn unsubscribe(&self, channel: impl Into<String>) {
        let ctx = self.context.clone();
        let channel = channel.into();
        self.context.spawn(async move {
            ctx.notify_shell(RealtimeOperation::Unsubscribe { channel })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_prefers_new_image() {
        let change = RowChange {
            kind: ChangeKind::Update,
            new: Some(json!({"id": "new-id"})),
            old: Some(json!({"id": "old-id"})),
        };
        assert_eq!(change.row_id().as_deref(), Some("new-id"));
    }

    #[test]
    fn test_row_id_falls_back_to_old_image() {
        let change = RowChange {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(json!({"id": 42})),
        };
        assert_eq!(change.row_id().as_deref(), Some("42"));
    }

    #[test]
    fn test_channel_spec_kinds() {
        let spec = ChannelSpec::all_changes("cctv_updates", Table::PublicCctv);
        assert_eq!(spec.kinds.len(), 3);

        let spec = ChannelSpec::inserts("reports_feed", Table::Reports);
        assert_eq!(spec.kinds, vec![ChangeKind::Insert]);
    }

    #[test]
    fn test_change_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ChangeKind::Delete).unwrap(),
            json!("DELETE")
        );
    }
}
