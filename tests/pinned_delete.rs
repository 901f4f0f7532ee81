//! Pinned memories resist `forget` until `force=true`; a forgotten memory
//! can be recovered with its original content intact.

mod common;

use signet::error::StoreError;
use signet::memory::model::RememberOptions;

#[tokio::test]
async fn pinned_memory_requires_force_to_delete() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let created = store
        .remember("X", RememberOptions { pinned: Some(true), ..Default::default() }, common::ctx())
        .await
        .unwrap();

    let refused = store.forget(&created.id, Some("r".into()), false, None, common::ctx()).await;
    assert!(matches!(refused, Err(StoreError::PinnedRequiresForce { .. })));

    let deleted_version = store.forget(&created.id, Some("r".into()), true, None, common::ctx()).await.unwrap();
    assert_eq!(deleted_version, 2);

    let tombstoned = store.get(&created.id).await.unwrap();
    assert!(tombstoned.is_deleted);
}

#[tokio::test]
async fn forget_then_recover_restores_original_content_and_bumps_version_twice() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let created = store.remember("the original content", RememberOptions::default(), common::ctx()).await.unwrap();
    assert_eq!(created.version, 1);

    let forgotten_version = store.forget(&created.id, Some("cleanup".into()), false, None, common::ctx()).await.unwrap();
    assert_eq!(forgotten_version, 2);

    let recovered_version = store.recover(&created.id, Some("undo".into()), None, common::ctx()).await.unwrap();
    assert_eq!(recovered_version, 3);

    let restored = store.get(&created.id).await.unwrap();
    assert!(!restored.is_deleted);
    assert_eq!(restored.content, "the original content");
}
