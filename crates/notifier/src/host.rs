//! The chat host seam.
//!
//! Workers never talk to a chat service directly; they hand fully rendered
//! text to a [`ChatHost`], either as a broadcast to a room or as a reply bound
//! to the message that triggered them.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use chatwatch_common::error::AppError;
use chatwatch_common::types::InboundMessage;

/// Where a rendered message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Background cycle: broadcast to the configured room.
    Room(String),
    /// On-demand path: reply to the originating message.
    Reply(InboundMessage),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Room(room) => write!(f, "room:{room}"),
            Destination::Reply(message) => write!(f, "reply:{}", message.id),
        }
    }
}

#[async_trait]
pub trait ChatHost: Send + Sync {
    async fn send_to_room(&self, room: &str, text: &str) -> Result<(), AppError>;

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), AppError>;
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    room: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

/// Delivers messages by POSTing JSON to a chat bridge webhook.
#[derive(Debug, Clone)]
pub struct WebhookChatHost {
    client: reqwest::Client,
    url: String,
}

impl WebhookChatHost {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, body: &WebhookBody<'_>) -> Result<(), AppError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Delivery(format!(
                "webhook {} returned {}",
                self.url, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatHost for WebhookChatHost {
    async fn send_to_room(&self, room: &str, text: &str) -> Result<(), AppError> {
        self.post(&WebhookBody {
            room,
            text,
            reply_to: None,
        })
        .await
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), AppError> {
        self.post(&WebhookBody {
            room: &message.room,
            text,
            reply_to: Some(&message.id),
        })
        .await
    }
}
