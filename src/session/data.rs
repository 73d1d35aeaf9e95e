//! Data held per conversation.

use crate::dedup::{sha256_hex, ContentItem, DedupKeySet};
use chrono::{DateTime, Utc};

/// Length of an offer token in hex characters.
pub const OFFER_TOKEN_LEN: usize = 16;

/// Short token identifying an offer: the first 16 hex chars of `sha256(id)`.
///
/// A publish request carries the token of the offer it was made for, so a
/// request against an offer that has since been replaced can be detected.
#[must_use]
pub fn offer_token(id: &str) -> String {
    let mut token = sha256_hex(id);
    token.truncate(OFFER_TOKEN_LEN);
    token
}

/// An item offered to the operator and not yet published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub item: ContentItem,
    pub keys: DedupKeySet,
    pub token: String,
    /// When the offer was made.
    pub offered_at: DateTime<Utc>,
}

impl PendingOffer {
    /// Create an offer, deriving its token from the item's id key.
    pub fn new(item: ContentItem, keys: DedupKeySet) -> Self {
        Self {
            token: offer_token(&keys.id),
            item,
            keys,
            offered_at: Utc::now(),
        }
    }
}
