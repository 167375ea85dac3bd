//! Per-viewer message preparation.
//!
//! Before a queued message goes on the wire it is encoded, checked against
//! the size limit, and, when large enough, looked up in the message cache.
//! A viewer that already holds a fresh copy gets a `ref` message carrying
//! only the hash; the full message stays available over the HTTP side
//! channel.
//!
//! Freshness is measured in successful runs: every `run_finished` with a
//! success status advances the viewer's run count and expires the cache
//! references it no longer needs.

use std::sync::Arc;

use crate::{
    cache::MessageCache,
    config::Config,
    core::SessionKey,
    debug, log,
    message::{Container, Element, OutputMessage, Payload, RunStatus},
};

/// Delivery bookkeeping for one viewer.
#[derive(Debug)]
pub struct SessionInfo {
    key: Arc<SessionKey>,
    /// Successful runs delivered so far: the viewer's cache generation.
    pub run_count: u64,
}

impl SessionInfo {
    pub fn new(key: Arc<SessionKey>) -> Self {
        Self { key, run_count: 0 }
    }
}

/// Encodes messages for viewers, substituting cache references.
#[derive(Debug, Clone)]
pub struct Delivery {
    cache: Arc<MessageCache>,
    min_cached_message_size: usize,
    max_message_size: usize,
}

impl Delivery {
    pub fn new(cache: Arc<MessageCache>, config: &Config) -> Self {
        Self {
            cache,
            min_cached_message_size: config.cache.min_cached_message_size,
            max_message_size: config.server.max_message_size,
        }
    }

    /// The text frame to send for `msg`, or `None` if it cannot be encoded.
    pub fn prepare(&self, info: &mut SessionInfo, msg: &OutputMessage) -> Option<String> {
        let mut text = encode(msg)?;

        if text.len() > self.max_message_size {
            let replacement = self.oversized(msg, text.len());
            return encode(&replacement);
        }

        if msg.is_cacheable(text.len(), self.min_cached_message_size) {
            let id = info.key.id();
            if self.cache.has_reference(msg, id, info.run_count) {
                debug!("deliver"; "{}: sending ref {}", id.short(), msg.hash());
                text = encode(&msg.create_reference())?;
            }
            self.cache.add_message(msg, &info.key, info.run_count);
        }

        if matches!(
            msg.payload,
            Payload::RunFinished {
                status: RunStatus::Success
            }
        ) {
            info.run_count += 1;
            self.cache.expire_session(info.key.id(), info.run_count);
        }

        Some(text)
    }

    /// Error element drawn in place of a message over the size limit.
    fn oversized(&self, msg: &OutputMessage, size: usize) -> OutputMessage {
        let (container, delta_id) = msg
            .metadata
            .map_or((Container::Main, 0), |m| (m.container, m.delta_id));
        let element = Element::exception(
            "MessageSizeError",
            format!(
                "data of size {:.1} MB exceeds the message size limit of {:.1} MB",
                size as f64 / 1e6,
                self.max_message_size as f64 / 1e6
            ),
        );
        OutputMessage::delta(element, container, delta_id)
    }
}

fn encode(msg: &OutputMessage) -> Option<String> {
    serde_json::to_string(msg)
        .map_err(|e| log!("deliver"; "failed to encode message: {}", e))
        .ok()
}
