//! Console chat host: inbound messages are `user: text` lines on stdin,
//! deliveries are printed to stdout.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use chatwatch_common::error::AppError;
use chatwatch_common::types::{ChatUser, InboundMessage};
use chatwatch_engine::Worker;
use chatwatch_notifier::{ChatHost, Destination, Notifier};

/// Room name used for messages typed on the console.
pub const CONSOLE_ROOM: &str = "console";

pub struct ConsoleChatHost;

#[async_trait]
impl ChatHost for ConsoleChatHost {
    async fn send_to_room(&self, room: &str, text: &str) -> Result<(), AppError> {
        println!("[{room}] {text}");
        Ok(())
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), AppError> {
        let to = message.sender().unwrap_or("?");
        println!("[{}] @{to} {text}", message.room);
        Ok(())
    }
}

/// Parse one console line. A line without `user:` yields an unattributed
/// message, which the workers reject.
pub fn parse_line(line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let id = uuid::Uuid::new_v4().to_string();
    let (from, text) = match line.split_once(':') {
        Some((user, text)) if !user.trim().is_empty() && !user.contains(char::is_whitespace) => {
            (Some(ChatUser { name: user.trim().to_string() }), text.trim())
        }
        _ => (None, line),
    };
    Some(InboundMessage {
        id,
        room: CONSOLE_ROOM.to_string(),
        text: text.to_string(),
        from,
    })
}

/// Hand one message to every worker concurrently.
///
/// Errors are logged here; a failed on-demand fetch also gets a generic
/// reply so the requester is not left waiting.
pub async fn dispatch(workers: &[Arc<dyn Worker>], notifier: &Notifier, message: InboundMessage) {
    for worker in workers {
        let worker = Arc::clone(worker);
        let notifier = notifier.clone();
        let message = message.clone();
        tokio::spawn(async move {
            match worker.process(&message).await {
                Ok(true) => tracing::debug!(worker = worker.id(), message_id = %message.id, "Message handled"),
                Ok(false) => {}
                Err(AppError::InvalidMessage(reason)) => {
                    tracing::warn!(worker = worker.id(), reason = %reason, "Rejected message");
                }
                Err(e) => {
                    tracing::error!(worker = worker.id(), error = %e, "On-demand request failed");
                    let text = format!("Sorry, {} could not finish your request.", worker.id());
                    notifier.deliver(&Destination::Reply(message), &text).await;
                }
            }
        });
    }
}

/// Read console lines until stdin closes.
pub async fn read_commands(workers: Vec<Arc<dyn Worker>>, notifier: Notifier) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(message) = parse_line(&line) {
            dispatch(&workers, &notifier, message).await;
        }
    }
    tracing::info!("Console input closed; background checks keep running");
    Ok(())
}
