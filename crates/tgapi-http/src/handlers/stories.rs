use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use tgapi_core::utils::clamp_limit;

use super::{id_param, int_param, json_body, loose_int, name_param, peer_param, query, LooseInt};
use crate::{error::ApiResult, router::AppState};

const PEER_STORIES_MAX: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StoriesQuery {
    pub name: Option<String>,
    pub expand: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoriesOfQuery {
    pub name: Option<String>,
    pub peer: Option<String>,
    pub limit: Option<String>,
    pub min_id: Option<String>,
    pub max_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStoriesBody {
    pub name: Option<String>,
    pub peer: Option<String>,
    #[serde(alias = "max_id")]
    pub max_id: Option<LooseInt>,
}

fn truthy(v: Option<&str>) -> bool {
    matches!(
        v.map(|s| s.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

pub async fn all(
    State(state): State<AppState>,
    q: Result<Query<StoriesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let expand = truthy(q.expand.as_deref());
    let listing = state
        .service
        .stories(name_param(q.name.as_deref()), expand)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "total": listing.total,
        "expanded": listing.expanded,
        "items": listing.items,
    })))
}

pub async fn of_peer(
    State(state): State<AppState>,
    q: Result<Query<StoriesOfQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let peer = peer_param(q.peer.as_deref())?;
    // 0 means "no limit"; anything else is clamped to the page maximum.
    let limit = match int_param("limit", q.limit.as_deref())? {
        Some(n) if n > 0 => clamp_limit(Some(n), PEER_STORIES_MAX, PEER_STORIES_MAX),
        _ => 0,
    };
    let min_id = id_param("minId", int_param("minId", q.min_id.as_deref())?)?;
    let max_id = id_param("maxId", int_param("maxId", q.max_id.as_deref())?)?;

    let stories = state
        .service
        .stories_of(name_param(q.name.as_deref()), &peer, min_id, max_id, limit)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "peer": peer.to_string(),
        "count": stories.len(),
        "stories": stories,
    })))
}

pub async fn read(
    State(state): State<AppState>,
    body: Result<Json<ReadStoriesBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = json_body(body)?;
    let peer = peer_param(body.peer.as_deref())?;
    let max_id = id_param("maxId", loose_int("maxId", body.max_id.as_ref())?)?;

    let ids = state
        .service
        .read_stories(name_param(body.name.as_deref()), &peer, max_id)
        .await?;
    Ok(Json(json!({ "ok": true, "ids": ids })))
}

#[cfg(test)]
mod tests {
    use super::truthy;

    #[test]
    fn expand_flag_parsing() {
        assert!(truthy(Some("1")));
        assert!(truthy(Some("true")));
        assert!(!truthy(Some("0")));
        assert!(!truthy(None));
    }
}
