//! Recommendation blender implementation.
//!
//! Five scoring strategies run as a concurrent fan-out against the metadata
//! provider; each is independently fallible and a failure only shrinks the
//! candidate pool. Merge order is fixed (collaborative, content-based,
//! trending, new-release, mood-based): on duplicate tracks the first
//! occurrence and its confidence survive.

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::models::{Category, HistoryQuery, ListeningRecord, SearchFilters, Track};
use crate::providers::{MetadataProvider, PersistenceGateway};
use crate::recommendations::errors::RecommendError;
use crate::recommendations::types::{DiscoveryFeed, RecommendOptions, Recommendation, Strategy};
use chrono::{Local, Timelike, Utc};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Base confidence for the collaborative (trending-proxy) strategy.
const COLLABORATIVE_BASE: f64 = 90.0;
/// Base confidence for the trending strategy.
const TRENDING_BASE: f64 = 70.0;
/// Base confidence for the new-release strategy.
const NEW_RELEASE_BASE: f64 = 60.0;
/// Base confidence for the mood strategy.
const MOOD_BASE: f64 = 50.0;

/// How many genres the content-based strategy follows.
const TOP_GENRES: usize = 3;

type StrategyResult = Result<Vec<Recommendation>, RecommendError>;

pub struct RecommendationBlender {
    provider: Arc<dyn MetadataProvider>,
    gateway: Arc<dyn PersistenceGateway>,
    cache: Arc<ResultCache>,
    history_query: HistoryQuery,
    fetch_size: usize,
}

impl RecommendationBlender {
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        gateway: Arc<dyn PersistenceGateway>,
        cache: Arc<ResultCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            provider,
            gateway,
            cache,
            history_query: HistoryQuery {
                limit: config.history_limit,
                days: config.history_days,
            },
            fetch_size: config.recommendation_limit.max(1),
        }
    }

    /// Generate a deduplicated, confidence-ranked recommendation list.
    ///
    /// The merged candidate pool is cached per user; exclusion and
    /// truncation are applied per call so autoplay pulls with different
    /// exclude lists share one pool.
    pub async fn generate(
        &self,
        user_id: &str,
        opts: RecommendOptions,
    ) -> Result<Vec<Recommendation>, RecommendError> {
        let pool = self.candidate_pool(user_id).await?;
        let excluded: HashSet<&str> = opts.exclude_ids.iter().map(String::as_str).collect();

        let results: Vec<Recommendation> = pool
            .into_iter()
            .filter(|r| !excluded.contains(r.track.identity()))
            .take(opts.limit)
            .collect();

        log::info!(
            "Blended {} recommendations for user {} ({} excluded ids)",
            results.len(),
            user_id,
            excluded.len()
        );
        Ok(results)
    }

    /// Bucketed discovery feed: each of the five buckets is capped to
    /// `limit / 5` (floored at one, so a `limit` under 5 still yields one
    /// track per bucket) and filled independently; a failed bucket comes
    /// back empty rather than failing the feed.
    pub async fn discovery_feed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<DiscoveryFeed, RecommendError> {
        let cap = (limit / 5).max(1);
        let history = self.fetch_history(user_id).await.unwrap_or_default();

        let trending = self.cached_category(Category::Trending, cap);
        let new_releases = self.cached_category(Category::New, cap);
        let recommended = self.generate(
            user_id,
            RecommendOptions {
                limit: cap,
                exclude_ids: Vec::new(),
            },
        );

        let top_genre = top_genres(&history, 1).into_iter().next();
        let top_artist = top_artist(&history);

        let genre_bucket = async {
            match top_genre {
                Some((genre, _)) => {
                    let key = format!("search:{}:{}", user_id, genre);
                    self.cached_search(&key, &genre, Some(genre.clone()), cap)
                        .await
                }
                None => Ok(Vec::new()),
            }
        };
        let artist_bucket = async {
            match top_artist {
                Some(artist) => {
                    let query = format!("{} radio", artist);
                    let key = format!("search:{}:similar:{}", user_id, artist);
                    self.cached_search(&key, &query, None, cap).await
                }
                None => Ok(Vec::new()),
            }
        };

        let (trending, new_releases, recommended, genres, similar_artists) =
            tokio::join!(trending, new_releases, recommended, genre_bucket, artist_bucket);

        Ok(DiscoveryFeed {
            trending: trending.unwrap_or_else(|e| skip_bucket("trending", e)),
            new_releases: new_releases.unwrap_or_else(|e| skip_bucket("new releases", e)),
            recommended: recommended
                .map(|recs| recs.into_iter().map(|r| r.track).collect())
                .unwrap_or_else(|e| skip_bucket("recommended", e)),
            genres: genres.unwrap_or_else(|e| skip_bucket("genres", e)),
            similar_artists: similar_artists
                .unwrap_or_else(|e| skip_bucket("similar artists", e)),
        })
    }

    /// Build (or reuse) the merged candidate pool for a user: all five
    /// strategies fanned out, concatenated in fixed order, deduplicated
    /// first-occurrence-wins and stably sorted by confidence descending.
    async fn candidate_pool(&self, user_id: &str) -> Result<Vec<Recommendation>, RecommendError> {
        let cache_key = format!("recommendations:{}", user_id);
        if let Some(pool) = self.cache.get::<Vec<Recommendation>>(&cache_key) {
            log::debug!("Recommendation pool cache hit for user {}", user_id);
            return Ok(pool);
        }

        let history = match self.fetch_history(user_id).await {
            Ok(h) => h,
            Err(e) => {
                log::warn!("History read failed for user {}: {}", user_id, e);
                Vec::new()
            }
        };

        // Fan out concurrently; the vec order is the contractual merge order.
        let strategies: Vec<(Strategy, BoxFuture<'_, StrategyResult>)> = vec![
            (Strategy::Collaborative, self.collaborative_strategy().boxed()),
            (
                Strategy::ContentBased,
                self.content_based_strategy(user_id, &history).boxed(),
            ),
            (Strategy::Trending, self.trending_strategy().boxed()),
            (Strategy::NewRelease, self.new_release_strategy().boxed()),
            (Strategy::MoodBased, self.mood_strategy().boxed()),
        ];
        let (tags, futures): (Vec<_>, Vec<_>) = strategies.into_iter().unzip();
        let outcomes = join_all(futures).await;

        let mut merged: Vec<Recommendation> = Vec::new();
        for (strategy, outcome) in tags.into_iter().zip(outcomes) {
            match outcome {
                Ok(mut recs) => merged.append(&mut recs),
                Err(e) => log::warn!("Strategy {:?} skipped: {}", strategy, e),
            }
        }

        let pool = merge_candidates(merged);
        self.cache.set(&cache_key, &pool);
        Ok(pool)
    }

    async fn fetch_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<ListeningRecord>, RecommendError> {
        let key = format!("history:{}:{}", user_id, self.history_query.limit);
        if let Some(history) = self.cache.get::<Vec<ListeningRecord>>(&key) {
            return Ok(history);
        }
        let history = self
            .gateway
            .get_listening_history(user_id, self.history_query)
            .await
            .map_err(|e| RecommendError::History(e.to_string()))?;
        self.cache.set(&key, &history);
        Ok(history)
    }

    /// Strategy 1: collaborative-filtering stand-in fed by trending content.
    async fn collaborative_strategy(&self) -> Result<Vec<Recommendation>, RecommendError> {
        let tracks = self.cached_category(Category::Trending, self.fetch_size).await?;
        Ok(score_by_rank(tracks, Strategy::Collaborative, COLLABORATIVE_BASE))
    }

    /// Strategy 2: genre affinity over the supplied listening history.
    async fn content_based_strategy(
        &self,
        user_id: &str,
        history: &[ListeningRecord],
    ) -> Result<Vec<Recommendation>, RecommendError> {
        if history.is_empty() {
            return Err(RecommendError::NoListeningHistory);
        }

        let genres = top_genres(history, TOP_GENRES);
        if genres.is_empty() {
            return Err(RecommendError::NoListeningHistory);
        }

        let mut recs = Vec::new();
        for (genre, affinity_pct) in genres {
            let key = format!("search:{}:{}", user_id, genre);
            match self
                .cached_search(&key, &genre, Some(genre.clone()), self.fetch_size)
                .await
            {
                Ok(tracks) => {
                    recs.extend(tracks.into_iter().enumerate().map(|(rank, track)| {
                        Recommendation {
                            track,
                            strategy: Strategy::ContentBased,
                            confidence: affinity_pct - rank as f64,
                            generated_at: Utc::now(),
                        }
                    }));
                }
                Err(e) => log::warn!("Genre search '{}' skipped: {}", genre, e),
            }
        }
        Ok(recs)
    }

    /// Strategy 3: trending, same category as the collaborative proxy but a
    /// distinct score curve.
    async fn trending_strategy(&self) -> Result<Vec<Recommendation>, RecommendError> {
        let tracks = self.cached_category(Category::Trending, self.fetch_size).await?;
        Ok(score_by_rank(tracks, Strategy::Trending, TRENDING_BASE))
    }

    /// Strategy 4: new releases, lower base confidence than trending.
    async fn new_release_strategy(&self) -> Result<Vec<Recommendation>, RecommendError> {
        let tracks = self.cached_category(Category::New, self.fetch_size).await?;
        Ok(score_by_rank(tracks, Strategy::NewRelease, NEW_RELEASE_BASE))
    }

    /// Strategy 5: one time-of-day mood query.
    async fn mood_strategy(&self) -> Result<Vec<Recommendation>, RecommendError> {
        let mood = mood_for_hour(Local::now().hour());
        let query = format!("{} music", mood);
        let key = format!("search:mood:{}", mood);
        let tracks = self.cached_search(&key, &query, None, self.fetch_size).await?;
        Ok(score_by_rank(tracks, Strategy::MoodBased, MOOD_BASE))
    }

    async fn cached_category(
        &self,
        category: Category,
        max_results: usize,
    ) -> Result<Vec<Track>, RecommendError> {
        let key = format!("category:{}:{}", category.as_str(), max_results);
        if let Some(tracks) = self.cache.get::<Vec<Track>>(&key) {
            return Ok(tracks);
        }
        let tracks = self.provider.get_by_category(category, max_results).await?;
        self.cache.set(&key, &tracks);
        Ok(tracks)
    }

    async fn cached_search(
        &self,
        key: &str,
        query: &str,
        genre: Option<String>,
        max_results: usize,
    ) -> Result<Vec<Track>, RecommendError> {
        if let Some(tracks) = self.cache.get::<Vec<Track>>(key) {
            return Ok(tracks);
        }
        let filters = SearchFilters { genre };
        let tracks = self.provider.search(query, &filters, max_results).await?;
        self.cache.set(key, &tracks);
        Ok(tracks)
    }
}

fn skip_bucket(name: &str, e: RecommendError) -> Vec<Track> {
    log::warn!("Discovery bucket '{}' skipped: {}", name, e);
    Vec::new()
}

/// Deduplicate by track identity keeping the first occurrence, then stable
/// sort by confidence descending. Merge order in the input therefore decides
/// which duplicate (and which confidence) survives.
pub fn merge_candidates(candidates: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut pool: Vec<Recommendation> = candidates
        .into_iter()
        .filter(|r| seen.insert(r.track.identity().to_string()))
        .collect();

    pool.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    pool
}

fn score_by_rank(tracks: Vec<Track>, strategy: Strategy, base: f64) -> Vec<Recommendation> {
    tracks
        .into_iter()
        .enumerate()
        .map(|(rank, track)| Recommendation {
            track,
            strategy,
            confidence: base - rank as f64,
            generated_at: Utc::now(),
        })
        .collect()
}

/// Genre affinity as a percentage of total listened seconds, strongest
/// first, capped to `count` genres.
pub fn top_genres(history: &[ListeningRecord], count: usize) -> Vec<(String, f64)> {
    let total: u64 = history.iter().map(|r| r.duration_listened_secs).sum();
    if total == 0 {
        return Vec::new();
    }

    let mut by_genre: HashMap<String, u64> = HashMap::new();
    for record in history {
        if let Some(genre) = &record.genre {
            *by_genre.entry(genre.clone()).or_default() += record.duration_listened_secs;
        }
    }

    let mut ranked: Vec<(String, f64)> = by_genre
        .into_iter()
        .map(|(genre, secs)| (genre, secs as f64 / total as f64 * 100.0))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.truncate(count);
    ranked
}

fn top_artist(history: &[ListeningRecord]) -> Option<String> {
    let mut by_artist: HashMap<&str, u64> = HashMap::new();
    for record in history {
        if let Some(artist) = &record.artist {
            *by_artist.entry(artist.as_str()).or_default() += record.duration_listened_secs;
        }
    }
    by_artist
        .into_iter()
        .max_by_key(|(_, secs)| *secs)
        .map(|(artist, _)| artist.to_string())
}

/// Fixed time-of-day mood mapping: evening relaxes, work hours focus,
/// everything else gets energy.
pub fn mood_for_hour(hour: u32) -> &'static str {
    match hour {
        18..=23 => "relaxing",
        9..=17 => "focused",
        _ => "energetic",
    }
}
