//! Recall ranks keyword matches ahead of non-matches with a stable
//! score/id ordering, never surfaces deleted memories, and falls back to a
//! recency listing for an empty query.

mod common;

use std::sync::Arc;
use std::time::Duration;

use signet::collaborators::NullEmbedder;
use signet::memory::model::RememberOptions;
use signet::recall::{RecallEngine, RecallFilter};

#[tokio::test]
async fn keyword_matches_rank_first_and_deleted_memories_never_appear() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor.clone(), queue, cfg.clone());
    let recall = RecallEngine::new(accessor.clone(), Arc::new(NullEmbedder));

    let dark_a = store.remember("I really like dark mode in my editor", RememberOptions::default(), common::ctx()).await.unwrap();
    let dark_b = store.remember("Please ship a dark mode toggle soon", RememberOptions::default(), common::ctx()).await.unwrap();
    let dark_c = store.remember("dark mode is the only mode I use", RememberOptions::default(), common::ctx()).await.unwrap();
    let other_a = store.remember("The quarterly report is due Friday", RememberOptions::default(), common::ctx()).await.unwrap();
    let other_b = store.remember("Lunch with the design team at noon", RememberOptions::default(), common::ctx()).await.unwrap();

    let deleted_dark = store.remember("dark mode but this one got forgotten", RememberOptions::default(), common::ctx()).await.unwrap();
    store.forget(&deleted_dark.id, Some("cleanup".into()), false, None, common::ctx()).await.unwrap();

    let config = cfg.current().await;
    let hits = recall
        .recall("dark mode", RecallFilter { limit: Some(10), ..Default::default() }, &config)
        .await
        .unwrap();

    assert!(hits.iter().all(|h| h.id != deleted_dark.id), "deleted memories must never appear in recall results");
    assert_eq!(hits.len(), 5, "all five live memories are candidates, matching or not");

    let dark_ids = [dark_a.id, dark_b.id, dark_c.id];
    let other_ids = [other_a.id, other_b.id];

    let top_three: Vec<&str> = hits[..3].iter().map(|h| h.id.as_str()).collect();
    for id in &dark_ids {
        assert!(top_three.contains(&id.as_str()), "dark-mode match {id} should be in the top 3");
    }
    for hit in &hits[..3] {
        assert!(hit.score > 0.0, "a keyword match must score above zero");
    }
    for hit in &hits[3..] {
        assert!(other_ids.contains(&hit.id), "non-matching memory should rank after the matches");
        assert_eq!(hit.score, 0.0, "a memory with no keyword or vector signal scores exactly zero");
    }

    // Score desc, id asc tiebreak (spec's stable ordering law), checked
    // directly against the order the engine actually returned.
    for pair in hits.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.score > b.score || (a.score == b.score && a.id < b.id), "ordering invariant violated between {a:?} and {b:?}");
    }
}

#[tokio::test]
async fn empty_query_falls_back_to_recency_order() {
    let (accessor, dir) = common::accessor().await;
    let cfg = common::config(&dir, "shadow_mode = true\n");
    let queue = Arc::new(signet::jobs::Queue::new(accessor.clone()));
    let store = common::store(accessor.clone(), queue, cfg.clone());
    let recall = RecallEngine::new(accessor.clone(), Arc::new(NullEmbedder));

    store.remember("alpha", RememberOptions::default(), common::ctx()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.remember("beta", RememberOptions::default(), common::ctx()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.remember("gamma", RememberOptions::default(), common::ctx()).await.unwrap();

    let config = cfg.current().await;
    let hits = recall.recall("", RecallFilter::default(), &config).await.unwrap();

    let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
    insta::assert_snapshot!(format!("{contents:?}"), @"[\"gamma\", \"beta\", \"alpha\"]");
    assert!(hits.iter().all(|h| h.score == 0.0));
}
