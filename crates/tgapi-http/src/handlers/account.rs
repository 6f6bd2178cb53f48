use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use tgapi_core::{domain::ForwardRequest, utils::clamp_limit};

use super::{id_param, int_param, json_body, loose_int, name_param, peer_param, query, LooseInt};
use crate::{error::ApiResult, router::AppState};

const DIALOG_LIMIT_DEFAULT: usize = 50;
const DIALOG_LIMIT_MAX: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub name: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub name: Option<String>,
    pub peer: Option<String>,
    pub channel: Option<String>,
    pub limit: Option<String>,
    pub offset_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub name: Option<String>,
    pub peer: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    pub name: Option<String>,
    pub peer: Option<String>,
    pub message: Option<String>,
    #[serde(alias = "reply_to_id")]
    pub reply_to_id: Option<LooseInt>,
}

#[derive(Debug, Deserialize)]
pub struct SendMediaBody {
    pub name: Option<String>,
    pub peer: Option<String>,
    pub url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForwardBody {
    pub name: Option<String>,
    #[serde(alias = "fromPeer")]
    pub from_peer: Option<String>,
    #[serde(alias = "toPeer")]
    pub to_peer: Option<String>,
    #[serde(alias = "messageId")]
    pub message_id: Option<LooseInt>,
    #[serde(default, alias = "asCopy")]
    pub as_copy: bool,
}

pub async fn me(
    State(state): State<AppState>,
    q: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let me = state.service.me(name_param(q.name.as_deref())).await?;
    Ok(Json(json!({ "ok": true, "me": me })))
}

fn dialog_limit(raw: Option<&str>) -> ApiResult<usize> {
    Ok(clamp_limit(
        int_param("limit", raw)?,
        DIALOG_LIMIT_DEFAULT,
        DIALOG_LIMIT_MAX,
    ))
}

pub async fn dialogs(
    State(state): State<AppState>,
    q: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let limit = dialog_limit(q.limit.as_deref())?;
    let dialogs = state
        .service
        .dialogs(name_param(q.name.as_deref()), limit)
        .await?;
    Ok(Json(json!({ "ok": true, "count": dialogs.len(), "dialogs": dialogs })))
}

pub async fn channels(
    State(state): State<AppState>,
    q: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let limit = dialog_limit(q.limit.as_deref())?;
    let channels = state
        .service
        .channels(name_param(q.name.as_deref()), limit)
        .await?;
    Ok(Json(json!({ "ok": true, "count": channels.len(), "channels": channels })))
}

/// `/messages` and `/get-messages`. `channel` is accepted as an alias of `peer`.
pub async fn messages(
    State(state): State<AppState>,
    q: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let q = query(q)?;
    let peer = peer_param(q.peer.as_deref().or(q.channel.as_deref()))?;
    let limit = dialog_limit(q.limit.as_deref())?;
    let offset_id = id_param("offsetId", int_param("offsetId", q.offset_id.as_deref())?)?;

    let page = state
        .service
        .messages(name_param(q.name.as_deref()), &peer, limit, offset_id.max(0))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "peer": peer.to_string(),
        "count": page.messages.len(),
        "messages": page.messages,
        "nextOffsetId": page.next_offset_id,
    })))
}

pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = json_body(body)?;
    let peer = peer_param(body.peer.as_deref())?;
    let reply_to = match loose_int("replyToId", body.reply_to_id.as_ref())? {
        Some(id) if id > 0 => Some(id_param("replyToId", Some(id))?),
        _ => None,
    };

    let sent = state
        .service
        .send_text(
            name_param(body.name.as_deref()),
            &peer,
            body.message.as_deref().unwrap_or_default(),
            reply_to,
        )
        .await?;
    Ok(Json(json!({ "ok": true, "id": sent.id, "peer": sent.peer })))
}

pub async fn send_media(
    State(state): State<AppState>,
    body: Result<Json<SendMediaBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = json_body(body)?;
    let peer = peer_param(body.peer.as_deref())?;

    let sent = state
        .service
        .send_media_url(
            name_param(body.name.as_deref()),
            &peer,
            body.url.as_deref().unwrap_or_default(),
            body.caption.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "ok": true, "id": sent.id, "peer": sent.peer })))
}

pub async fn forward(
    State(state): State<AppState>,
    body: Result<Json<ForwardBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let body = json_body(body)?;
    let req = ForwardRequest {
        from: peer_param(body.from_peer.as_deref())?,
        to: peer_param(body.to_peer.as_deref())?,
        message_id: id_param("message_id", loose_int("message_id", body.message_id.as_ref())?)?,
        as_copy: body.as_copy,
    };

    let ids = state
        .service
        .forward(name_param(body.name.as_deref()), &req)
        .await?;
    Ok(Json(json!({ "ok": true, "ids": ids })))
}

pub async fn download(
    State(state): State<AppState>,
    q: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let q = query(q)?;
    let peer = peer_param(q.peer.as_deref())?;
    let message_id = id_param("messageId", int_param("messageId", q.message_id.as_deref())?)?;

    let bytes = state
        .service
        .download(name_param(q.name.as_deref()), &peer, message_id)
        .await?;

    let disposition = format!("attachment; filename=\"media_{message_id}.bin\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
