//! Read-through event query endpoint fronted by the query cache.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use indexer_cache::{CacheLookup, TTL_NEGATIVE, TTL_RECENT_EVENTS, TTL_WIDE_EVENTS};
use indexer_common::error::AppError;
use indexer_common::types::Event;
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/events/{address}", get(query_events))
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    from: Option<i64>,
    to: Option<i64>,
    event_name: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Key is derived from the canonicalized query, matching the cache's
/// contract: opaque to query semantics, stable for identical inputs.
fn cache_key(address: &str, query: &EventQuery) -> String {
    let canonical = format!(
        "{}|{:?}|{:?}|{:?}|{}",
        address, query.from, query.to, query.event_name, query.limit
    );
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("query:events:contract:{address}:{:x}", hasher.finish())
}

async fn query_events(
    State(mut state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let key = cache_key(&address, &query);

    match state.cache.get(&key).await? {
        CacheLookup::Hit(value) => {
            let events: Vec<Event> = serde_json::from_value(value)
                .map_err(|e| AppError::Internal(format!("corrupt cached event payload: {e}")))?;
            return Ok(Json(events));
        }
        CacheLookup::NegativeHit => return Ok(Json(Vec::new())),
        CacheLookup::Miss => {}
    }

    let limit = query.limit.clamp(1, 1000);
    let events: Vec<Event> = sqlx::query_as(
        r#"
        SELECT * FROM events
        WHERE contract_address = $1
          AND ($2::bigint IS NULL OR block_number >= $2)
          AND ($3::bigint IS NULL OR block_number <= $3)
          AND ($4::text IS NULL OR event_name = $4)
        ORDER BY block_number DESC, log_index DESC
        LIMIT $5
        "#,
    )
    .bind(&address)
    .bind(query.from)
    .bind(query.to)
    .bind(&query.event_name)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    if events.is_empty() {
        state.cache.mark_empty(&key, TTL_NEGATIVE).await?;
    } else {
        let payload = serde_json::to_value(&events)
            .map_err(|e| AppError::Internal(format!("event serialization failed: {e}")))?;
        let range = query.to.zip(query.from).map(|(t, f)| t - f).unwrap_or(0);
        let ttl = if range > 1000 { TTL_WIDE_EVENTS } else { TTL_RECENT_EVENTS };
        state.cache.set(&key, &payload, ttl).await?;
    }

    Ok(Json(events))
}
