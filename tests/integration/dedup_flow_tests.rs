use tempfile::tempdir;
use uniqpost::dedup::{make_keys, mark_offered, mark_posted, pick_fresh, seen, ContentItem};
use uniqpost::store::{open_store, JsonKeyStore, KeyStore, RecordStatus, StoreBackend};

fn item(n: u32, date: Option<&str>) -> ContentItem {
    ContentItem {
        source: Some("https://blog.example/feed.xml".into()),
        link: Some(format!("https://blog.example/posts/{n}?utm_campaign=rss")),
        title: Some(format!("Post number {n}")),
        iso_date: date.map(str::to_string),
        content_snippet: Some(format!("Body of post {n}")),
        ..ContentItem::default()
    }
}

#[test]
fn test_offer_then_post_lifecycle() {
    let dir = tempdir().unwrap();
    let store = JsonKeyStore::new(dir.path().join("posted.json"));
    let post = item(1, Some("2024-01-01T00:00:00Z"));
    let keys = make_keys(&post);

    assert!(!seen(&keys, &store).unwrap());
    let offered = mark_offered(&post, &keys, &store).unwrap();
    assert_eq!(offered.status, RecordStatus::Offered);
    assert!(seen(&keys, &store).unwrap());

    let posted = mark_posted(&post, &keys, &store).unwrap();
    assert_eq!(posted.status, RecordStatus::Posted);
    assert!(posted.posted_at.is_some());
    for key in keys.store_keys() {
        let record = store.get(&key).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Posted);
        assert_eq!(record.link, post.link);
        assert_eq!(record.source, post.source);
    }
}

#[test]
fn test_repost_under_new_id_is_caught() {
    let dir = tempdir().unwrap();
    let store = open_store(StoreBackend::Sqlite, &dir.path().join("posted.db")).unwrap();

    let original = item(2, None);
    mark_posted(&original, &make_keys(&original), store.as_ref()).unwrap();

    // Same article, new guid and tracking link.
    let mut repost = original.clone();
    repost.id = Some("urn:uuid:1234".into());
    repost.link = Some("https://blog.example/posts/2?fbclid=zzz".into());
    assert!(seen(&make_keys(&repost), store.as_ref()).unwrap());

    // Same text under an unrelated link.
    let mut mirror = original.clone();
    mirror.link = Some("https://mirror.example/copy".into());
    assert!(seen(&make_keys(&mirror), store.as_ref()).unwrap());
}

#[test]
fn test_pick_fresh_walks_newest_first() {
    let dir = tempdir().unwrap();
    let store = JsonKeyStore::new(dir.path().join("posted.json"));
    let items = vec![
        item(1, Some("2024-01-01T00:00:00Z")),
        item(2, None),
        item(3, Some("Wed, 03 Jan 2024 12:00:00 +0000")),
        item(4, Some("2024-01-02T00:00:00Z")),
    ];

    let order: Vec<String> = std::iter::from_fn(|| pick_fresh(&items, &store).unwrap())
        .map(|pick| pick.item.title.unwrap_or_default())
        .collect();
    assert_eq!(
        order,
        vec!["Post number 3", "Post number 4", "Post number 1", "Post number 2"]
    );
    assert_eq!(store.snapshot().unwrap().len(), 4 * 3);
}

#[test]
fn test_pick_fresh_on_empty_feed() {
    let dir = tempdir().unwrap();
    let store = JsonKeyStore::new(dir.path().join("posted.json"));
    assert!(pick_fresh(&[], &store).unwrap().is_none());
}
