//! Content-addressed cache of output messages.
//!
//! One entry per distinct payload hash. Each entry remembers, per session,
//! the run generation at which that session last received the message.
//! A session "holds a fresh copy" while its current generation is at most
//! `max_age` generations past that mark, in which case the delivery layer
//! may send a reference instead of the payload.
//!
//! Session references are weak: a dropped session stops counting without
//! an explicit unregister, and its references are pruned on the next
//! [`MessageCache::expire_session`] sweep.
//!
//! Shared across every session in the process; all operations take `&self`.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};

use crate::{
    core::{SessionId, SessionKey},
    log,
    message::{ContentHash, OutputMessage},
};

/// A session's claim on a cached message.
#[derive(Debug)]
struct SessionRef {
    key: Weak<SessionKey>,
    generation: u64,
}

impl SessionRef {
    #[inline]
    fn is_alive(&self) -> bool {
        self.key.strong_count() > 0
    }
}

#[derive(Debug)]
struct Entry {
    message: Arc<OutputMessage>,
    refs: FxHashMap<SessionId, SessionRef>,
}

/// Process-wide output message cache.
#[derive(Debug)]
pub struct MessageCache {
    entries: DashMap<ContentHash, Entry>,
    max_age: u64,
}

impl MessageCache {
    pub fn new(max_age: u64) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
        }
    }

    #[inline]
    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    /// Record that `session` received `msg` at `generation`.
    ///
    /// Generations never move backwards: an older generation than the one
    /// already stored is logged and ignored.
    pub fn add_message(&self, msg: &OutputMessage, session: &Arc<SessionKey>, generation: u64) {
        let hash = msg.hash();
        let mut entry = self.entries.entry(hash).or_insert_with(|| Entry {
            message: Arc::new(msg.clone()),
            refs: FxHashMap::default(),
        });

        let id = session.id();
        match entry.refs.get_mut(&id) {
            Some(existing) => {
                if generation < existing.generation {
                    log!(
                        "cache";
                        "generation regression for session {} on {}: {} < {}, keeping {}",
                        id.short(), hash, generation, existing.generation, existing.generation
                    );
                } else {
                    existing.generation = generation;
                }
                existing.key = Arc::downgrade(session);
            }
            None => {
                entry.refs.insert(
                    id,
                    SessionRef {
                        key: Arc::downgrade(session),
                        generation,
                    },
                );
            }
        }
    }

    /// Cached message for `hash`, if any.
    pub fn get_message(&self, hash: &ContentHash) -> Option<Arc<OutputMessage>> {
        self.entries.get(hash).map(|entry| Arc::clone(&entry.message))
    }

    /// Whether `session` holds a copy of `msg` that is fresh at `generation`.
    pub fn has_reference(&self, msg: &OutputMessage, session: SessionId, generation: u64) -> bool {
        let Some(entry) = self.entries.get(&msg.hash()) else {
            return false;
        };
        entry.refs.get(&session).is_some_and(|r| {
            r.is_alive() && generation.saturating_sub(r.generation) <= self.max_age
        })
    }

    /// Drop `session`'s stale references as of `generation`.
    ///
    /// Entries left without any live reference are evicted. References held
    /// by sessions that no longer exist are pruned in the same sweep.
    pub fn expire_session(&self, session: SessionId, generation: u64) {
        let max_age = self.max_age;
        self.entries.retain(|_, entry| {
            entry.refs.retain(|id, r| {
                let stale = *id == session && generation.saturating_sub(r.generation) > max_age;
                r.is_alive() && !stale
            });
            !entry.refs.is_empty()
        });
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of sessions referencing `hash`.
    pub fn reference_count(&self, hash: &ContentHash) -> usize {
        self.entries.get(hash).map_or(0, |entry| entry.refs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Container, Element};

    const MAX_AGE: u64 = 2;

    fn big_message() -> OutputMessage {
        OutputMessage::delta(
            Element::Text {
                body: "x".repeat(1024 * 1024),
            },
            Container::Main,
            0,
        )
    }

    fn small_message(body: &str) -> OutputMessage {
        OutputMessage::delta(Element::Text { body: body.into() }, Container::Main, 0)
    }

    #[test]
    fn test_add_and_get() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let msg = small_message("a");

        assert!(cache.get_message(&msg.hash()).is_none());
        cache.add_message(&msg, &s1, 0);
        let cached = cache.get_message(&msg.hash()).unwrap();
        assert_eq!(*cached, msg);
    }

    #[test]
    fn test_two_sessions_share_one_entry() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let s2 = SessionKey::new(SessionId::new());
        let msg = big_message();

        cache.add_message(&msg, &s1, 5);
        cache.add_message(&msg, &s2, 5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.reference_count(&msg.hash()), 2);

        cache.expire_session(s1.id(), 5 + MAX_AGE + 1);
        assert_eq!(cache.reference_count(&msg.hash()), 1);
        assert!(!cache.has_reference(&msg, s1.id(), 5 + MAX_AGE + 1));
        assert!(cache.has_reference(&msg, s2.id(), 5));
        assert!(cache.get_message(&msg.hash()).is_some());

        cache.expire_session(s2.id(), 5 + MAX_AGE + 1);
        assert!(cache.get_message(&msg.hash()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_has_reference_respects_max_age() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let msg = small_message("a");
        cache.add_message(&msg, &s1, 3);

        assert!(cache.has_reference(&msg, s1.id(), 3));
        assert!(cache.has_reference(&msg, s1.id(), 3 + MAX_AGE));
        assert!(!cache.has_reference(&msg, s1.id(), 3 + MAX_AGE + 1));

        let other = SessionKey::new(SessionId::new());
        assert!(!cache.has_reference(&msg, other.id(), 3));
    }

    #[test]
    fn test_expire_keeps_fresh_references() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let msg = small_message("a");
        cache.add_message(&msg, &s1, 1);

        cache.expire_session(s1.id(), 1 + MAX_AGE);
        assert!(cache.has_reference(&msg, s1.id(), 1 + MAX_AGE));
    }

    #[test]
    fn test_add_is_idempotent() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let msg = small_message("a");

        cache.add_message(&msg, &s1, 4);
        cache.add_message(&msg, &s1, 4);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.reference_count(&msg.hash()), 1);
        assert!(cache.has_reference(&msg, s1.id(), 4 + MAX_AGE));
        assert!(!cache.has_reference(&msg, s1.id(), 4 + MAX_AGE + 1));
    }

    #[test]
    fn test_generation_never_regresses() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let msg = small_message("a");

        cache.add_message(&msg, &s1, 10);
        cache.add_message(&msg, &s1, 3);
        // Still fresh relative to 10, not 3
        assert!(cache.has_reference(&msg, s1.id(), 10 + MAX_AGE));
    }

    #[test]
    fn test_dropped_session_is_not_a_reference() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        let s2 = SessionKey::new(SessionId::new());
        let msg = small_message("a");
        cache.add_message(&msg, &s1, 0);

        let gone = s1.id();
        drop(s1);
        assert!(!cache.has_reference(&msg, gone, 0));

        // Any sweep prunes dead references and evicts the orphan entry
        cache.expire_session(s2.id(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MessageCache::new(MAX_AGE);
        let s1 = SessionKey::new(SessionId::new());
        cache.add_message(&small_message("a"), &s1, 0);
        cache.add_message(&small_message("b"), &s1, 0);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
