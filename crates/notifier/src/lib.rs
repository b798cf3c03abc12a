//! Notification rendering and delivery.
//!
//! [`Notifier`] is the single place where a payload becomes chat text. Render
//! and delivery failures are logged here and reported as `false`; they never
//! propagate, so one bad message cannot stall the rest of a batch.

pub mod host;
pub mod template;

use std::sync::Arc;

use serde::Serialize;

pub use host::{ChatHost, Destination, WebhookChatHost};
pub use template::{MessageTemplate, TemplateError};

#[derive(Clone)]
pub struct Notifier {
    host: Arc<dyn ChatHost>,
}

impl Notifier {
    pub fn new(host: Arc<dyn ChatHost>) -> Self {
        Self { host }
    }

    /// Deliver already-rendered text. Returns whether the host accepted it.
    pub async fn deliver(&self, destination: &Destination, text: &str) -> bool {
        let result = match destination {
            Destination::Room(room) => self.host.send_to_room(room, text).await,
            Destination::Reply(message) => self.host.reply(message, text).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(destination = %destination, error = %e, "Message delivery failed");
                false
            }
        }
    }

    /// Render `template` against `payload` and deliver the result.
    ///
    /// A render failure suppresses this one message.
    pub async fn render_and_deliver<T: Serialize>(
        &self,
        template: &MessageTemplate,
        payload: &T,
        destination: &Destination,
    ) -> bool {
        match template.render(payload) {
            Ok(text) => self.deliver(destination, &text).await,
            Err(e) => {
                tracing::error!(
                    template = template.name(),
                    destination = %destination,
                    error = %e,
                    "Template render failed, message suppressed"
                );
                false
            }
        }
    }
}
