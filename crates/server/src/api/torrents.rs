//! Torrent API handlers, scoped to one configured client.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use btbridge_core::{
    AddTorrentOptions, TaskId, TaskSelector, TorrentClient, TorrentFilterRules, TorrentSort,
    TorrentSortKey, TorrentSource, TorrentTask,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::clients::resolve_client;
use super::error::{api_error, client_error, ApiError};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TorrentQueryParams {
    /// Comma separated task ids.
    #[serde(default)]
    pub ids: Option<String>,
    /// Set by a bare `recently_active` key or `recently_active=true`.
    #[serde(default, deserialize_with = "query_flag")]
    pub recently_active: bool,
    #[serde(default)]
    pub complete: Option<bool>,
    #[serde(default)]
    pub sort: Option<TorrentSortKey>,
    #[serde(default)]
    pub desc: bool,
}

/// Query flag: present without a value, or an explicit boolean.
fn query_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match String::deserialize(deserializer)?.as_str() {
        "" | "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"empty, true, false, 1 or 0",
        )),
    }
}

impl TorrentQueryParams {
    fn into_filter(self) -> Result<TorrentFilterRules, ApiError> {
        let ids = match (self.ids, self.recently_active) {
            (Some(_), true) => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "ids and recently_active are mutually exclusive",
                ))
            }
            (Some(ids), false) => Some(TaskSelector::Ids(
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .filter_map(|id| id.parse::<TaskId>().ok())
                    .collect(),
            )),
            (None, true) => Some(TaskSelector::RecentlyActive),
            (None, false) => None,
        };

        Ok(TorrentFilterRules {
            ids,
            complete: self.complete,
            sort: self.sort.map(|key| TorrentSort {
                key,
                descending: self.desc,
            }),
        })
    }
}

/// Body of an add request: exactly one of `url` or `metainfo` (base64).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentBody {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metainfo: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub options: AddTorrentOptions,
}

impl AddTorrentBody {
    fn into_source(self) -> Result<(TorrentSource, AddTorrentOptions), ApiError> {
        let source = match (self.url, self.metainfo) {
            (Some(url), None) => TorrentSource::Url(url),
            (None, Some(encoded)) => {
                let data = BASE64.decode(encoded.trim()).map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Invalid metainfo: {}", e))
                })?;
                TorrentSource::Metainfo {
                    data,
                    filename: self.filename,
                }
            }
            _ => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "Exactly one of url or metainfo is required",
                ))
            }
        };
        Ok((source, self.options))
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveTorrentParams {
    #[serde(default)]
    pub delete_data: bool,
}

#[derive(Debug, Serialize)]
pub struct TorrentListResponse {
    pub torrents: Vec<TorrentTask>,
    pub count: usize,
}

/// Outcome of a mutating call.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/clients/{uuid}/torrents
///
/// List torrents, optionally filtered and sorted.
pub async fn list_torrents(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    Query(params): Query<TorrentQueryParams>,
) -> Result<Json<TorrentListResponse>, ApiError> {
    let filter = params.into_filter()?;
    let client = resolve_client(&state, &uuid).await?;

    let torrents = client.get_torrents_by(&filter).await.map_err(client_error)?;
    let count = torrents.len();
    Ok(Json(TorrentListResponse { torrents, count }))
}

/// GET /api/v1/clients/{uuid}/torrents/{id}
pub async fn get_torrent(
    State(state): State<Arc<AppState>>,
    Path((uuid, id)): Path<(Uuid, String)>,
) -> Result<Json<TorrentTask>, ApiError> {
    let client = resolve_client(&state, &uuid).await?;
    let id = parse_id(&id);

    client.get_torrent(&id).await.map(Json).map_err(client_error)
}

/// POST /api/v1/clients/{uuid}/torrents
pub async fn add_torrent(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<AddTorrentBody>,
) -> Result<Json<ActionResponse>, ApiError> {
    let (source, options) = body.into_source()?;
    let client = resolve_client(&state, &uuid).await?;

    Ok(Json(ActionResponse {
        success: client.add_torrent(source, &options).await,
    }))
}

/// POST /api/v1/clients/{uuid}/torrents/{id}/pause
pub async fn pause_torrent(
    State(state): State<Arc<AppState>>,
    Path((uuid, id)): Path<(Uuid, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let client = resolve_client(&state, &uuid).await?;
    Ok(Json(ActionResponse {
        success: client.pause_torrent(&parse_id(&id)).await,
    }))
}

/// POST /api/v1/clients/{uuid}/torrents/{id}/resume
pub async fn resume_torrent(
    State(state): State<Arc<AppState>>,
    Path((uuid, id)): Path<(Uuid, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let client = resolve_client(&state, &uuid).await?;
    Ok(Json(ActionResponse {
        success: client.resume_torrent(&parse_id(&id)).await,
    }))
}

/// DELETE /api/v1/clients/{uuid}/torrents/{id}
pub async fn remove_torrent(
    State(state): State<Arc<AppState>>,
    Path((uuid, id)): Path<(Uuid, String)>,
    Query(params): Query<RemoveTorrentParams>,
) -> Result<Json<ActionResponse>, ApiError> {
    let client = resolve_client(&state, &uuid).await?;
    Ok(Json(ActionResponse {
        success: client.remove_torrent(&parse_id(&id), params.delete_data).await,
    }))
}

fn parse_id(id: &str) -> TaskId {
    match id.parse::<TaskId>() {
        Ok(id) => id,
        Err(never) => match never {},
    }
}
