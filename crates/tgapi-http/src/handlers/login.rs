use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use tgapi_core::{qr, utils::now_millis};

use super::{json_body, loose_int, name_param, query, LooseInt};
use crate::{
    error::{ApiError, ApiResult},
    router::AppState,
};

const WIZARD_HTML: &str = include_str!("../wizard.html");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLoginBody {
    pub name: Option<String>,
    #[serde(alias = "api_id")]
    pub api_id: Option<LooseInt>,
    #[serde(alias = "api_hash")]
    pub api_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "service": "tgapi", "ts": now_millis() }))
}

pub async fn start(
    State(state): State<AppState>,
    body: Result<Json<StartLoginBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = json_body(body)?;
    let api_id = loose_int("apiId", body.api_id.as_ref())?;

    let (name, snapshot) = state
        .service
        .start_login(
            name_param(body.name.as_deref()),
            api_id,
            body.api_hash.as_deref(),
        )
        .await?;

    tracing::info!(account = %name, status = %snapshot.status, "login started");
    Ok(Json(json!({
        "ok": true,
        "name": name.as_str(),
        "status": snapshot.status,
        "qr": snapshot.login_url,
        "user": snapshot.user,
    })))
}

pub async fn status(
    State(state): State<AppState>,
    q: Result<Query<NameQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let (name, snapshot) = state
        .service
        .login_status(name_param(q.name.as_deref()))
        .await?;

    Ok(Json(json!({
        "ok": true,
        "name": name.as_str(),
        "status": snapshot.status,
        "qr": snapshot.login_url,
        "error": snapshot.error,
        "user": snapshot.user,
    })))
}

pub async fn png(
    State(state): State<AppState>,
    q: Result<Query<NameQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let q = query(q)?;
    let url = state
        .service
        .pending_login_url(name_param(q.name.as_deref()))
        .await?
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::NOT_FOUND, "QR not ready"))?;

    let bytes = qr::render_png(&url)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        bytes,
    )
        .into_response())
}

pub async fn wizard() -> Html<&'static str> {
    Html(WIZARD_HTML)
}
