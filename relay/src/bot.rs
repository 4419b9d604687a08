//! Helper bot that tells users their Telegram chat id, so they can register
//! themselves as an emergency contact.

use std::time::Duration;

use tracing::{info, warn};

use crate::telegram::{TelegramClient, Update};

pub const POLL_TIMEOUT_SECS: u64 = 30;
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub fn reply_text(first_name: &str, chat_id: i64) -> String {
    format!(
        "Hello {first_name}! 👋\n\nYour Telegram Chat ID is:\n`{chat_id}`\n\nCopy this and add it to the NCP App Settings."
    )
}

/// Chat id and reply for every update that carries a text message.
pub fn replies(updates: &[Update]) -> Vec<(i64, String)> {
    updates
        .iter()
        .filter_map(|update| update.message.as_ref())
        .filter(|message| message.text.is_some())
        .map(|message| {
            let name = message
                .from
                .as_ref()
                .map_or("there", |sender| sender.first_name.as_str());
            (message.chat.id, reply_text(name, message.chat.id))
        })
        .collect()
}

/// Offset acknowledging every update in the batch.
pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .map_or(current, |next| next.max(current))
}

/// Long-poll forever, replying to each message with its chat id.
pub async fn run(client: TelegramClient) {
    let mut offset = 0;
    loop {
        match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => {
                offset = next_offset(offset, &updates);
                for (chat_id, text) in replies(&updates) {
                    info!(chat_id, "Replying with chat id");
                    if let Err(e) = client.send_message(chat_id, &text).await {
                        warn!(chat_id, error = %e, "Reply failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Poll failed, backing off");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{Chat, Message, Sender};

    fn update(id: i64, chat: i64, text: Option<&str>) -> Update {
        Update {
            update_id: id,
            message: Some(Message {
                chat: Chat { id: chat },
                from: Some(Sender {
                    first_name: "Nadia".into(),
                }),
                text: text.map(String::from),
            }),
        }
    }

    #[test]
    fn test_reply_contains_chat_id() {
        let text = reply_text("Nadia", -100123);
        assert!(text.starts_with("Hello Nadia!"));
        assert!(text.contains("`-100123`"));
    }

    #[test]
    fn test_only_text_messages_get_replies() {
        let updates = vec![
            update(10, 1, Some("/start")),
            update(11, 2, None),
            Update {
                update_id: 12,
                message: None,
            },
        ];
        let out = replies(&updates);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 1);
    }

    #[test]
    fn test_next_offset() {
        assert_eq!(next_offset(0, &[]), 0);
        assert_eq!(next_offset(5, &[update(7, 1, None), update(9, 1, None)]), 10);
        assert_eq!(next_offset(20, &[update(7, 1, None)]), 20);
    }
}
