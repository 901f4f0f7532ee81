//! `remember` is idempotent on content, and every accepted state
//! transition leaves exactly one history event behind.

mod common;

use signet::memory::model::RememberOptions;

#[tokio::test]
async fn identical_content_dedupes_to_the_same_id() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let opts = RememberOptions { kind: Some("preference".into()), ..Default::default() };
    let first = store.remember("I prefer Vim", opts.clone(), common::ctx()).await.unwrap();
    assert!(!first.deduped);
    assert_eq!(first.version, 1);

    let second = store.remember("I prefer Vim", opts, common::ctx()).await.unwrap();
    assert!(second.deduped);
    assert_eq!(second.id, first.id);

    let history = store.history(&first.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_kind, signet::memory::history::EventKind::Created);
}

#[tokio::test]
async fn dedup_merges_tags_and_keeps_max_importance() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let first = store
        .remember(
            "Deploys happen on Fridays",
            RememberOptions { importance: Some(0.2), tags: Some(vec!["ops".into()]), ..Default::default() },
            common::ctx(),
        )
        .await
        .unwrap();

    store
        .remember(
            "Deploys happen on Fridays",
            RememberOptions { importance: Some(0.9), tags: Some(vec!["release".into()]), ..Default::default() },
            common::ctx(),
        )
        .await
        .unwrap();

    let merged = store.get(&first.id).await.unwrap();
    assert_eq!(merged.importance, 0.9);
    assert!(merged.tags.contains(&"ops".to_string()));
    assert!(merged.tags.contains(&"release".to_string()));
}

#[tokio::test]
async fn idempotency_key_short_circuits_before_hash_lookup() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let opts = RememberOptions { idempotency_key: Some("req-42".into()), ..Default::default() };
    let first = store.remember("first call content", opts.clone(), common::ctx()).await.unwrap();
    let second = store.remember("a completely different body", opts, common::ctx()).await.unwrap();

    assert_eq!(second.id, first.id);
    assert!(second.deduped);
}
