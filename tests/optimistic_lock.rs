//! Concurrent modifications racing on the same `if_version` — exactly one
//! wins.

mod common;

use signet::memory::model::{ModifyPatch, RememberOptions};

#[tokio::test]
async fn one_of_two_concurrent_modifies_wins() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = std::sync::Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor, queue, cfg);

    let created = store.remember("original content", RememberOptions::default(), common::ctx()).await.unwrap();
    assert_eq!(created.version, 1);

    let store_a = store.clone();
    let store_b = store.clone();
    let id_a = created.id.clone();
    let id_b = created.id.clone();

    let (result_a, result_b) = tokio::join!(
        store_a.modify(
            &id_a,
            ModifyPatch { content: Some("A".into()), ..Default::default() },
            Some("race a".into()),
            Some(1),
            common::ctx(),
        ),
        store_b.modify(
            &id_b,
            ModifyPatch { content: Some("B".into()), ..Default::default() },
            Some("race b".into()),
            Some(1),
            common::ctx(),
        ),
    );

    let outcomes = [result_a, result_b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes.iter().filter(|r| r.is_err()).count();
    assert_eq!(winners, 1, "exactly one concurrent modify should succeed");
    assert_eq!(conflicts, 1);

    for outcome in &outcomes {
        if let Ok(new_version) = outcome {
            assert_eq!(*new_version, 2);
        }
    }
    for outcome in &outcomes {
        if let Err(signet::error::StoreError::VersionConflict { expected, actual, .. }) = outcome {
            assert_eq!(*expected, 1);
            assert_eq!(*actual, 2);
        }
    }

    let current = store.get(&created.id).await.unwrap();
    assert_eq!(current.version, 2);
    assert!(current.content == "A" || current.content == "B");
}
