use std::sync::{Arc, Barrier};
use std::thread;
use uniqpost::dedup::{make_keys, ContentItem};
use uniqpost::session::{offer_token, OfferError, SessionRegistry};

fn item(title: &str) -> ContentItem {
    ContentItem {
        link: Some(format!("https://example.com/{title}")),
        title: Some(title.into()),
        ..ContentItem::default()
    }
}

#[test]
fn test_offer_publish_cycle() {
    let registry = SessionRegistry::new();
    let first = item("first");
    let keys = make_keys(&first);

    let token = registry.put_offer(1, first.clone(), keys.clone());
    assert_eq!(token, offer_token(&keys.id));
    assert_eq!(registry.peek_offer(1).unwrap().item, first);

    let claimed = registry.take_offer(1, &token).unwrap();
    assert_eq!(claimed.keys, keys);
    // A second publish of the same offer is rejected.
    assert_eq!(registry.take_offer(1, &token), Err(OfferError::NoOffer(1)));
}

#[test]
fn test_newer_offer_invalidates_older_token() {
    let registry = SessionRegistry::new();
    let old = registry.put_offer(5, item("old"), make_keys(&item("old")));
    let new = registry.put_offer(5, item("new"), make_keys(&item("new")));
    assert_ne!(old, new);

    match registry.take_offer(5, &old) {
        Err(OfferError::Stale { given, current }) => {
            assert_eq!(given, old);
            assert_eq!(current, new);
        }
        other => panic!("Expected a stale token error, got {other:?}"),
    }
    assert!(registry.take_offer(5, &new).is_ok());
}

#[test]
fn test_conversations_are_independent() {
    let registry = SessionRegistry::new();
    let token = registry.put_offer(1, item("a"), make_keys(&item("a")));
    let _busy = registry.begin(2).unwrap();

    assert!(registry.peek_offer(2).is_none());
    assert!(!registry.is_busy(1));
    assert!(registry.take_offer(2, &token).is_err());
    assert!(registry.take_offer(1, &token).is_ok());
}

#[test]
fn test_only_one_concurrent_request_wins_busy_flag() {
    let registry = SessionRegistry::new();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let guard = registry.begin(42);
                let won = guard.is_some();
                // Hold the flag until every thread has tried.
                barrier.wait();
                drop(guard);
                won
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&won| won)
        .count();
    assert_eq!(winners, 1);
    assert!(!registry.is_busy(42));
}
