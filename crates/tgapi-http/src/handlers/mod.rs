pub mod account;
pub mod login;
pub mod stories;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    Json,
};
use serde::Deserialize;

use tgapi_core::domain::PeerRef;

use crate::error::{ApiError, ApiResult};

/// Unwrap a JSON body, turning axum's rejection into our envelope.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e.body_text())))
}

pub(crate) fn query<T>(q: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    q.map(|Query(v)| v)
        .map_err(|e| ApiError::bad_request(format!("invalid query: {}", e.body_text())))
}

/// Integer field that clients send either as a number or as a string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LooseInt {
    Int(i64),
    Text(String),
}

impl LooseInt {
    fn parse(&self, field: &str) -> ApiResult<Option<i64>> {
        match self {
            LooseInt::Int(n) => Ok(Some(*n)),
            LooseInt::Text(s) => int_param(field, Some(s)),
        }
    }
}

pub(crate) fn loose_int(field: &str, v: Option<&LooseInt>) -> ApiResult<Option<i64>> {
    match v {
        Some(v) => v.parse(field),
        None => Ok(None),
    }
}

/// Parse an optional integer query parameter; empty counts as absent.
pub(crate) fn int_param(field: &str, v: Option<&str>) -> ApiResult<Option<i64>> {
    match v.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{field} must be an integer"))),
    }
}

/// i32 id field (message ids, story ids). Absent is 0.
pub(crate) fn id_param(field: &str, v: Option<i64>) -> ApiResult<i32> {
    i32::try_from(v.unwrap_or(0))
        .map_err(|_| ApiError::bad_request(format!("{field} out of range")))
}

pub(crate) fn peer_param(v: Option<&str>) -> ApiResult<PeerRef> {
    Ok(PeerRef::parse(v.unwrap_or_default())?)
}

pub(crate) fn name_param(v: Option<&str>) -> &str {
    v.unwrap_or_default()
}
