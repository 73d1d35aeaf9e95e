//! Thread-safe registry of conversation state.

use super::data::PendingOffer;
use crate::dedup::{ContentItem, DedupKeySet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Identifier of a conversation (chat) with an operator.
pub type ConversationId = i64;

/// Why a publish request could not claim an offer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferError {
    /// Nothing is pending in this conversation.
    #[error("no pending offer in conversation {0}")]
    NoOffer(ConversationId),

    /// The pending offer has a different token; the request is outdated.
    #[error("offer token '{given}' is stale, current offer is '{current}'")]
    Stale { given: String, current: String },
}

#[derive(Debug, Default)]
struct ConversationState {
    offer: Option<PendingOffer>,
    busy: bool,
}

type StateMap = HashMap<ConversationId, ConversationState>;

/// Shared per-conversation state.
///
/// Cloning is cheap and every clone refers to the same state.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<StateMap>>,
}

fn lock(inner: &Mutex<StateMap>) -> MutexGuard<'_, StateMap> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Session registry mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the conversation busy for the lifetime of the returned guard.
    ///
    /// Returns `None` if the conversation is already busy.
    #[must_use]
    pub fn begin(&self, conversation: ConversationId) -> Option<BusyGuard> {
        let mut states = lock(&self.inner);
        let state = states.entry(conversation).or_default();
        if state.busy {
            log::debug!("Conversation {conversation} is busy");
            return None;
        }
        state.busy = true;
        Some(BusyGuard {
            inner: Arc::clone(&self.inner),
            conversation,
        })
    }

    #[must_use]
    pub fn is_busy(&self, conversation: ConversationId) -> bool {
        lock(&self.inner)
            .get(&conversation)
            .is_some_and(|s| s.busy)
    }

    /// Make `item` the pending offer of the conversation, replacing any
    /// previous one. Returns the offer's token.
    pub fn put_offer(
        &self,
        conversation: ConversationId,
        item: ContentItem,
        keys: DedupKeySet,
    ) -> String {
        let offer = PendingOffer::new(item, keys);
        let token = offer.token.clone();
        let mut states = lock(&self.inner);
        let state = states.entry(conversation).or_default();
        if let Some(previous) = state.offer.replace(offer) {
            log::debug!(
                "Offer {} in conversation {conversation} replaced by {token}",
                previous.token
            );
        }
        token
    }

    /// The pending offer, without claiming it.
    #[must_use]
    pub fn peek_offer(&self, conversation: ConversationId) -> Option<PendingOffer> {
        lock(&self.inner)
            .get(&conversation)
            .and_then(|s| s.offer.clone())
    }

    /// Claim the pending offer if `token` matches it.
    ///
    /// A claimed offer is removed, so the same offer cannot be published
    /// twice. A stale token leaves the pending offer in place.
    pub fn take_offer(
        &self,
        conversation: ConversationId,
        token: &str,
    ) -> Result<PendingOffer, OfferError> {
        let mut states = lock(&self.inner);
        let state = states
            .get_mut(&conversation)
            .ok_or(OfferError::NoOffer(conversation))?;
        let current = state
            .offer
            .as_ref()
            .map(|offer| offer.token.as_str())
            .ok_or(OfferError::NoOffer(conversation))?;
        if current != token {
            return Err(OfferError::Stale {
                given: token.to_string(),
                current: current.to_string(),
            });
        }
        state.offer.take().ok_or(OfferError::NoOffer(conversation))
    }

    /// Forget the conversation's pending offer. The busy flag is untouched.
    pub fn clear(&self, conversation: ConversationId) {
        if let Some(state) = lock(&self.inner).get_mut(&conversation) {
            state.offer = None;
        }
    }
}

/// Holds a conversation's busy flag; releases it when dropped.
#[derive(Debug)]
pub struct BusyGuard {
    inner: Arc<Mutex<StateMap>>,
    conversation: ConversationId,
}

impl BusyGuard {
    #[must_use]
    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Some(state) = lock(&self.inner).get_mut(&self.conversation) {
            state.busy = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::make_keys;
    use crate::session::offer_token;
    use std::thread;

    fn item(id: &str) -> (ContentItem, DedupKeySet) {
        let item = ContentItem {
            id: Some(id.to_string()),
            title: Some(format!("Title {id}")),
            ..ContentItem::default()
        };
        let keys = make_keys(&item);
        (item, keys)
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let registry = SessionRegistry::new();
        let guard = registry.begin(1).unwrap();
        assert_eq!(guard.conversation(), 1);
        assert!(registry.is_busy(1));
        assert!(registry.begin(1).is_none());
        assert!(registry.begin(2).is_some());

        drop(guard);
        assert!(!registry.is_busy(1));
        assert!(registry.begin(1).is_some());
    }

    #[test]
    fn test_take_offer_with_matching_token() {
        let registry = SessionRegistry::new();
        let (it, keys) = item("a");
        let token = registry.put_offer(7, it.clone(), keys);
        assert_eq!(token, offer_token("a"));

        let offer = registry.take_offer(7, &token).unwrap();
        assert_eq!(offer.item, it);
        assert_eq!(registry.take_offer(7, &token), Err(OfferError::NoOffer(7)));
    }

    #[test]
    fn test_stale_token_keeps_current_offer() {
        let registry = SessionRegistry::new();
        let (a, ka) = item("a");
        let (b, kb) = item("b");
        let old = registry.put_offer(7, a, ka);
        let current = registry.put_offer(7, b, kb);

        assert_eq!(
            registry.take_offer(7, &old),
            Err(OfferError::Stale {
                given: old.clone(),
                current: current.clone(),
            })
        );
        assert!(registry.take_offer(7, &current).is_ok());
    }

    #[test]
    fn test_unknown_conversation_has_no_offer() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.take_offer(3, "x"), Err(OfferError::NoOffer(3)));
        assert!(registry.peek_offer(3).is_none());
    }

    #[test]
    fn test_clear_removes_offer_only() {
        let registry = SessionRegistry::new();
        let (it, keys) = item("a");
        registry.put_offer(9, it, keys);
        let _guard = registry.begin(9).unwrap();

        registry.clear(9);
        assert!(registry.peek_offer(9).is_none());
        assert!(registry.is_busy(9));
    }

    #[test]
    fn test_clones_share_state_across_threads() {
        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let (it, keys) = item(&i.to_string());
                    registry.put_offer(i, it, keys)
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4 {
            assert!(registry.peek_offer(i).is_some());
        }
    }
}
