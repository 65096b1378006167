//! Explore ranking
//!
//! Periodic build of the friend-of-friend candidate cache: recent posts
//! scored by time-decayed engagement, reordered for author diversity, and
//! stored under `explore:ranked` with a 15-minute TTL. Search ranking
//! reuses the same decay score with a term-frequency boost.

use crate::coordinators::kv_err;
use crate::keys;
use crate::models::PostSnapshot;
use chrono::{Duration as ChronoDuration, Utc};
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Engagement weights: like, reply, repost.
const LIKE_WEIGHT: f64 = 1.0;
const REPLY_WEIGHT: f64 = 2.0;
const REPOST_WEIGHT: f64 = 1.5;

/// Candidate window and output bound.
const CANDIDATE_WINDOW_DAYS: i64 = 7;
const EXPLORE_CACHE_CAP: usize = 500;

/// Cache TTL matches the rebuild cadence.
pub const EXPLORE_CACHE_TTL_SECS: u64 = 15 * 60;

/// Author-diversity window: reject a candidate whose author already holds
/// this many of the trailing window slots.
const DIVERSITY_WINDOW: usize = 4;
const DIVERSITY_MAX_PER_AUTHOR: usize = 2;

/// Posts scanned per rebuild. Snapshot keys are snowflake-ordered, so the
/// bound trims the oldest first.
const SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub post_id: String,
    pub author_id: String,
    pub score: f64,
    pub created_at_ms: i64,
}

#[derive(Clone)]
pub struct RankingService {
    kv: Arc<dyn KvStore>,
}

impl RankingService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Time-decayed engagement score.
    pub fn hn_score(likes: u64, replies: u64, reposts: u64, age_hours: f64) -> f64 {
        let engagement = likes as f64 * LIKE_WEIGHT
            + replies as f64 * REPLY_WEIGHT
            + reposts as f64 * REPOST_WEIGHT;
        engagement / (age_hours.max(0.0) + 2.0).powf(1.8)
    }

    /// Search ranking mixes the decay score with literal term frequency.
    pub fn search_rank(hn_score: f64, term_frequency: usize) -> f64 {
        hn_score * 10.0 + term_frequency as f64 * 5.0
    }

    /// Count literal case-insensitive occurrences of each query word.
    pub fn term_frequency(content: &str, query: &str) -> usize {
        let folded = content.to_lowercase();
        query
            .to_lowercase()
            .split_whitespace()
            .filter(|word| !word.is_empty())
            .map(|word| folded.matches(word).count())
            .sum()
    }

    pub fn score_snapshot(snapshot: &PostSnapshot) -> f64 {
        let age_hours =
            (Utc::now() - snapshot.created_at).num_milliseconds() as f64 / 3_600_000.0;
        Self::hn_score(
            snapshot.counters.like_count,
            snapshot.counters.reply_count,
            snapshot.counters.repost_count,
            age_hours,
        )
    }

    /// Rebuild the explore cache from the snapshot tier.
    pub async fn build_explore_cache(&self) -> AppResult<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(CANDIDATE_WINDOW_DAYS);

        let snapshots = self
            .kv
            .list_prefix(keys::POST_SNAPSHOT_PREFIX, SCAN_LIMIT)
            .await
            .map_err(kv_err)?;

        let mut candidates: Vec<RankedCandidate> = snapshots
            .into_iter()
            .filter_map(|(_, blob)| serde_json::from_str::<PostSnapshot>(&blob).ok())
            .filter(|snapshot| snapshot.is_visible())
            .filter(|snapshot| snapshot.created_at >= cutoff)
            .filter(|snapshot| snapshot.repost_of_id.is_none())
            .map(|snapshot| RankedCandidate {
                score: Self::score_snapshot(&snapshot),
                created_at_ms: snapshot.created_at.timestamp_millis(),
                post_id: snapshot.id,
                author_id: snapshot.author_id,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let ranked = apply_author_diversity(candidates, EXPLORE_CACHE_CAP);

        let blob = serde_json::to_string(&ranked)
            .map_err(|e| AppError::internal(format!("serialize explore cache: {}", e)))?;
        self.kv
            .set_ex(keys::EXPLORE_RANKED, &blob, EXPLORE_CACHE_TTL_SECS)
            .await
            .map_err(kv_err)?;

        info!(candidates = ranked.len(), "explore cache rebuilt");
        Ok(ranked.len())
    }

    /// Read the cached candidate list; empty when the cache is cold.
    pub async fn explore_candidates(&self) -> AppResult<Vec<RankedCandidate>> {
        match self.kv.get(keys::EXPLORE_RANKED).await.map_err(kv_err)? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AppError::internal(format!("corrupt explore cache: {}", e))),
            None => {
                debug!("explore cache miss");
                Ok(Vec::new())
            }
        }
    }
}

/// Greedy reorder: walk the score-sorted pool, rejecting candidates whose
/// author already occupies ≥2 of the last 4 output slots. When every
/// remaining candidate is rejected, fall back to the best remaining so the
/// output never starves.
fn apply_author_diversity(
    mut pool: Vec<RankedCandidate>,
    cap: usize,
) -> Vec<RankedCandidate> {
    let mut output: Vec<RankedCandidate> = Vec::with_capacity(cap.min(pool.len()));

    while output.len() < cap && !pool.is_empty() {
        let window_start = output.len().saturating_sub(DIVERSITY_WINDOW);
        let window = &output[window_start..];

        let pick = pool.iter().position(|candidate| {
            window
                .iter()
                .filter(|placed| placed.author_id == candidate.author_id)
                .count()
                < DIVERSITY_MAX_PER_AUTHOR
        });

        // Everything violates diversity: take the best remaining.
        let index = pick.unwrap_or(0);
        output.push(pool.remove(index));
    }
    output
}
