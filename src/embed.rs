//! Messages exchanged with a host page when the chat runs embedded.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbedMessage {
    Ready,
    Resize { height: f64 },
}

/// `?embed=true` switches a page into embed mode; anything else does not.
pub fn is_embed_mode(embed_param: Option<&str>) -> bool {
    embed_param == Some("true")
}

/// Called after every render pass.
pub trait EmbedNotifier: Send {
    fn ready(&mut self);
    fn rendered(&mut self, content_height: f64);
}

/// Forwards messages to whatever owns the receiving end (a websocket writer,
/// stderr printer, test).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<EmbedMessage>,
    last_height: Option<f64>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<EmbedMessage>) -> Self {
        Self {
            tx,
            last_height: None,
        }
    }

    fn send(&self, message: EmbedMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("embed host channel closed");
        }
    }
}

impl EmbedNotifier for ChannelNotifier {
    fn ready(&mut self) {
        self.send(EmbedMessage::Ready);
    }

    fn rendered(&mut self, content_height: f64) {
        if self.last_height == Some(content_height) {
            return;
        }
        self.last_height = Some(content_height);
        self.send(EmbedMessage::Resize {
            height: content_height,
        });
    }
}
