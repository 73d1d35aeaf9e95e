//! Content dedup: keys, verdicts and store updates.
//!
//! An item counts as seen when *any* of its keys is already in the store, so
//! an item that changes its id but keeps its link (or keeps its text under a
//! new link) is still recognised. Marking an item writes the same record
//! under all of its keys in one store mutation.
//!
//! # Example
//!
//! ```
//! use uniqpost::dedup::{make_keys, mark_offered, seen, ContentItem};
//! use uniqpost::store::SqliteKeyStore;
//!
//! let store = SqliteKeyStore::in_memory().unwrap();
//! let item = ContentItem {
//!     link: Some("https://example.com/post?utm_source=feed".into()),
//!     title: Some("Hello".into()),
//!     ..ContentItem::default()
//! };
//! let keys = make_keys(&item);
//! assert!(!seen(&keys, &store).unwrap());
//! mark_offered(&item, &keys, &store).unwrap();
//! assert!(seen(&keys, &store).unwrap());
//! ```

pub mod fingerprint;

use crate::store::{KeyStore, RecordStatus, StoreError, StoreRecord};
use chrono::{DateTime, Utc};

pub use fingerprint::{
    canonicalize_url, make_keys, normalize_text, sha256_hex, strip_markup, ContentItem,
    DedupKeySet,
};

/// Whether any key of the item is already stored.
pub fn seen<S: KeyStore + ?Sized>(keys: &DedupKeySet, store: &S) -> Result<bool, StoreError> {
    for key in keys.store_keys() {
        if store.has(&key)? {
            log::debug!("'{}' already seen via {}", keys.id, key);
            return Ok(true);
        }
    }
    Ok(false)
}

/// Record that `item` was offered for posting.
pub fn mark_offered<S: KeyStore + ?Sized>(
    item: &ContentItem,
    keys: &DedupKeySet,
    store: &S,
) -> Result<StoreRecord, StoreError> {
    mark(item, keys, RecordStatus::Offered, Utc::now(), store)
}

/// Record that `item` was posted.
pub fn mark_posted<S: KeyStore + ?Sized>(
    item: &ContentItem,
    keys: &DedupKeySet,
    store: &S,
) -> Result<StoreRecord, StoreError> {
    mark(item, keys, RecordStatus::Posted, Utc::now(), store)
}

/// Write a record with `status` stamped at `at` under every key of the item.
///
/// The last write for a key wins.
pub fn mark<S: KeyStore + ?Sized>(
    item: &ContentItem,
    keys: &DedupKeySet,
    status: RecordStatus,
    at: DateTime<Utc>,
    store: &S,
) -> Result<StoreRecord, StoreError> {
    let mut record = StoreRecord::new(keys.id.clone(), status, at);
    record.link = item.link.clone();
    record.source = item.source.clone();
    record.iso_date = item.iso_date.clone();

    store.set_many(&keys.store_keys(), &record)?;
    log::info!("Marked '{}' as {}", keys.id, status);
    Ok(record)
}

/// An item chosen by [`pick_fresh`], with its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshPick {
    pub item: ContentItem,
    pub keys: DedupKeySet,
}

/// Parse a feed date: RFC 3339 first, then RFC 2822.
#[must_use]
pub fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Pick the newest item that has not been seen and mark it offered.
///
/// Items are ordered newest first by `isoDate`; items with a missing or
/// unparsable date come last, in input order. Returns `None` when every item
/// has been seen.
pub fn pick_fresh<S: KeyStore + ?Sized>(
    items: &[ContentItem],
    store: &S,
) -> Result<Option<FreshPick>, StoreError> {
    let mut ordered: Vec<(Option<DateTime<Utc>>, &ContentItem)> = items
        .iter()
        .map(|item| (item.iso_date.as_deref().and_then(parse_feed_date), item))
        .collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, item) in ordered {
        let keys = make_keys(item);
        if seen(&keys, store)? {
            continue;
        }
        mark_offered(item, &keys, store)?;
        return Ok(Some(FreshPick {
            item: item.clone(),
            keys,
        }));
    }
    log::info!("No unseen items among {}", items.len());
    Ok(None)
}
