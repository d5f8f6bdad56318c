use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::*;
use crate::core::cipher::FieldCipher;
use crate::core::db::RecordStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{author_view, find_caller};
use crate::models::models::{GeoPoint, Post};

#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub post: &'a Post,
    pub location: Option<GeoPoint>,
}

#[derive(Clone, Copy, Debug)]
pub struct ScoredPost<'a> {
    pub post: &'a Post,
    pub score: f64,
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // rounding can push h just past 1 for near-antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

// future timestamps count as brand new, unparseable ones as infinitely old
pub fn recency_score(timestamp: &str, now: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(ts) => {
            let age_ms = (now - ts.with_timezone(&Utc)).num_milliseconds().max(0);
            let age_hours = age_ms as f64 / 3_600_000.0;
            1.0 / (1.0 + age_hours)
        }
        Err(_) => 0.0,
    }
}

pub fn proximity_score(viewer: Option<GeoPoint>, post: Option<GeoPoint>) -> f64 {
    match (viewer, post) {
        (Some(v), Some(p)) if v.is_valid() && p.is_valid() => (-haversine_km(v, p) / 1000.0).exp(),
        _ => 0.0,
    }
}

pub fn score_post(
    candidate: Candidate<'_>,
    viewer: &str,
    following: &[String],
    viewer_location: Option<GeoPoint>,
    now: DateTime<Utc>,
) -> f64 {
    let post = candidate.post;
    let recency = recency_score(&post.timestamp, now);
    let likes = post.likes.len() as f64 / 100.0;
    let followed = if following.iter().any(|f| *f == post.user_id) { 1.0 } else { 0.0 };
    let own = if post.user_id == viewer { 1.0 } else { 0.0 };
    let proximity = proximity_score(viewer_location, candidate.location);

    recency * TIME_WEIGHT
        + likes * LIKE_WEIGHT
        + followed * FOLLOW_WEIGHT
        + own * SELF_WEIGHT
        + proximity * PROXIMITY_WEIGHT
}

pub fn rank_feed<'a>(
    viewer: &str,
    candidates: impl IntoIterator<Item = Candidate<'a>>,
    following: &[String],
    viewer_location: Option<GeoPoint>,
    now: DateTime<Utc>,
) -> Vec<ScoredPost<'a>> {
    let mut scored: Vec<ScoredPost<'a>> = candidates
        .into_iter()
        .map(|c| ScoredPost {
            post: c.post,
            score: score_post(c, viewer, following, viewer_location, now),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub badge: String,
    pub content: String,
    pub like_count: usize,
    pub is_liked: bool,
    pub reply_count: usize,
    pub timestamp: String,
    pub score: f64,
}

pub fn build_feed<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    viewer_username: &str,
) -> Result<Vec<FeedEntry>, ApiError> {
    build_feed_at(store, cipher, viewer_username, Utc::now())
}

pub fn build_feed_at<S: RecordStore>(
    store: &S,
    cipher: &FieldCipher,
    viewer_username: &str,
    now: DateTime<Utc>,
) -> Result<Vec<FeedEntry>, ApiError> {
    let doc = store.load_all_records()?;
    let viewer = &doc.users[find_caller(&doc, cipher, viewer_username)?];

    let viewer_location = cipher
        .decrypt_location(viewer.location.as_deref())
        .unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable viewer location");
            None
        });

    let candidates = doc
        .posts
        .iter()
        .filter(|post| doc.user(&post.user_id).is_some())
        .map(|post| {
            let location = cipher
                .decrypt_location(post.location.as_deref())
                .unwrap_or_else(|e| {
                    warn!(post = %post.id, error = %e, "ignoring unreadable post location");
                    None
                });
            Candidate { post, location }
        });

    let ranked = rank_feed(&viewer.username, candidates, &viewer.following, viewer_location, now);

    let mut entries = Vec::with_capacity(ranked.len());
    for ScoredPost { post, score } in ranked {
        let author = doc.user(&post.user_id);
        let entry = author_view(cipher, author).and_then(|author| {
            Ok(FeedEntry {
                id: post.id.clone(),
                username: author.username,
                display_name: author.display_name,
                badge: author.badge,
                content: cipher.decrypt(&post.content)?,
                like_count: post.likes.len(),
                is_liked: post.likes.contains(&viewer.username),
                reply_count: post.replies.len(),
                timestamp: post.timestamp.clone(),
                score,
            })
        });
        match entry {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(post = %post.id, error = %e, "skipping unreadable post"),
        }
    }
    Ok(entries)
}
