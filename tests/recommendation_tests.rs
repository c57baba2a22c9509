
use resona::{
    Category, EngineConfig, RecommendOptions, RecommendationBlender, ResultCache, Strategy,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use test_helpers::{history_row, track, MockGateway, MockProvider};

fn blender_with(
    provider: Arc<MockProvider>,
    gateway: Arc<MockGateway>,
) -> (RecommendationBlender, Arc<ResultCache>) {
    test_helpers::init_logging();
    let cache = Arc::new(ResultCache::default());
    let blender = RecommendationBlender::new(
        provider,
        gateway,
        cache.clone(),
        &EngineConfig::default(),
    );
    (blender, cache)
}

/// Trending (t1, t2), one new release, a rock-only history driving the
/// content-based strategy and a fallback mood result.
fn scripted_provider() -> Arc<MockProvider> {
    let provider = Arc::new(MockProvider::new());
    provider.set_category(
        Category::Trending,
        vec![track("t1", None, 180), track("t2", None, 180)],
    );
    provider.set_category(Category::New, vec![track("n1", None, 180)]);
    provider.set_search("rock", vec![track("g1", Some("rock"), 180)]);
    provider.set_fallback_search(vec![track("m1", None, 180)]);
    provider
}

fn rock_history_gateway() -> Arc<MockGateway> {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_history(
        "u1",
        vec![
            history_row("h1", Some("rock"), Some("Artist A"), 300),
            history_row("h2", Some("rock"), Some("Artist A"), 300),
        ],
    );
    gateway
}

#[tokio::test]
async fn blends_all_strategies_ranked_by_confidence() {
    let (blender, _) = blender_with(scripted_provider(), rock_history_gateway());

    let recs = blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();

    let ids: Vec<&str> = recs.iter().map(|r| r.track.identity()).collect();
    // Pure-rock history gives g1 a 100% affinity, beating every base score.
    assert_eq!(ids, vec!["g1", "t1", "t2", "n1", "m1"]);

    assert_eq!(recs[0].strategy, Strategy::ContentBased);
    assert_eq!(recs[0].confidence, 100.0);
    assert_eq!(recs[1].strategy, Strategy::Collaborative);
    assert_eq!(recs[1].confidence, 90.0);
    assert_eq!(recs[3].strategy, Strategy::NewRelease);
    assert_eq!(recs[4].strategy, Strategy::MoodBased);
}

#[tokio::test]
async fn duplicate_tracks_keep_the_first_strategys_score() {
    let provider = scripted_provider();
    // t1 also shows up as a new release with a lower base score.
    provider.set_category(Category::New, vec![track("t1", None, 180)]);
    let (blender, _) = blender_with(provider, rock_history_gateway());

    let recs = blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();

    let t1: Vec<_> = recs.iter().filter(|r| r.track.identity() == "t1").collect();
    assert_eq!(t1.len(), 1);
    assert_eq!(t1[0].strategy, Strategy::Collaborative);
    assert_eq!(t1[0].confidence, 90.0);
}

#[tokio::test]
async fn exclusion_and_limit_apply_after_ranking() {
    let (blender, _) = blender_with(scripted_provider(), rock_history_gateway());

    let recs = blender
        .generate(
            "u1",
            RecommendOptions {
                limit: 2,
                exclude_ids: vec!["g1".to_string()],
            },
        )
        .await
        .unwrap();

    let ids: Vec<&str> = recs.iter().map(|r| r.track.identity()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn a_failed_strategy_only_shrinks_the_pool() {
    let provider = scripted_provider();
    provider.fail_category(Category::Trending);
    let (blender, _) = blender_with(provider, rock_history_gateway());

    let recs = blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();

    let ids: Vec<&str> = recs.iter().map(|r| r.track.identity()).collect();
    assert_eq!(ids, vec!["g1", "n1", "m1"]);
}

#[tokio::test]
async fn no_history_skips_the_content_strategy_only() {
    let (blender, _) = blender_with(scripted_provider(), Arc::new(MockGateway::new()));

    let recs = blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();

    assert!(recs.iter().all(|r| r.strategy != Strategy::ContentBased));
    assert!(!recs.is_empty());
}

#[tokio::test]
async fn history_store_failure_is_tolerated() {
    let gateway = Arc::new(MockGateway::new());
    gateway.fail_history();
    let (blender, _) = blender_with(scripted_provider(), gateway);

    let recs = blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();
    assert!(!recs.is_empty());
}

#[tokio::test]
async fn the_candidate_pool_is_cached_per_user() {
    let provider = scripted_provider();
    let gateway = rock_history_gateway();
    let (blender, _) = blender_with(provider.clone(), gateway.clone());

    blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();
    let categories = provider.category_calls.load(Ordering::SeqCst);
    let searches = provider.search_calls.load(Ordering::SeqCst);
    let histories = gateway.history_calls.load(Ordering::SeqCst);

    // A second pull with a different exclude list reuses the pool.
    blender
        .generate(
            "u1",
            RecommendOptions {
                limit: 1,
                exclude_ids: vec!["t1".to_string()],
            },
        )
        .await
        .unwrap();

    assert_eq!(provider.category_calls.load(Ordering::SeqCst), categories);
    assert_eq!(provider.search_calls.load(Ordering::SeqCst), searches);
    assert_eq!(gateway.history_calls.load(Ordering::SeqCst), histories);
}

#[tokio::test]
async fn invalidating_a_user_forces_a_rebuild() {
    let provider = scripted_provider();
    let (blender, cache) = blender_with(provider.clone(), rock_history_gateway());

    blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();
    let searches = provider.search_calls.load(Ordering::SeqCst);

    cache.invalidate_for_user("u1");
    blender
        .generate("u1", RecommendOptions::default())
        .await
        .unwrap();

    assert!(
        provider.search_calls.load(Ordering::SeqCst) > searches,
        "rebuild should hit the provider again"
    );
}

#[tokio::test]
async fn discovery_feed_fills_capped_buckets() {
    let provider = scripted_provider();
    provider.set_category(
        Category::Trending,
        (0..8).map(|i| track(&format!("t{}", i), None, 180)).collect(),
    );
    provider.set_search("Artist A radio", vec![track("s1", None, 180)]);
    let (blender, _) = blender_with(provider, rock_history_gateway());

    let feed = blender.discovery_feed("u1", 25).await.unwrap();

    assert_eq!(feed.trending.len(), 5);
    assert_eq!(feed.new_releases.len(), 1);
    assert!(feed.recommended.len() <= 5 && !feed.recommended.is_empty());
    assert_eq!(feed.genres.len(), 1);
    assert_eq!(feed.genres[0].identity(), "g1");
    assert_eq!(feed.similar_artists.len(), 1);
    assert_eq!(feed.similar_artists[0].identity(), "s1");
}

#[tokio::test]
async fn a_failed_bucket_comes_back_empty_not_fatal() {
    let provider = scripted_provider();
    provider.fail_category(Category::Trending);
    provider.set_search("Artist A radio", vec![track("s1", None, 180)]);
    let (blender, _) = blender_with(provider, rock_history_gateway());

    let feed = blender.discovery_feed("u1", 25).await.unwrap();

    assert!(feed.trending.is_empty());
    assert_eq!(feed.new_releases.len(), 1);
    assert_eq!(feed.similar_artists.len(), 1);
}

#[tokio::test]
async fn anonymous_user_without_history_still_gets_global_strategies() {
    let (blender, _) = blender_with(scripted_provider(), Arc::new(MockGateway::new()));

    let feed = blender.discovery_feed("anon", 10).await.unwrap();
    assert!(!feed.trending.is_empty());
    assert!(feed.genres.is_empty());
    assert!(feed.similar_artists.is_empty());
}
