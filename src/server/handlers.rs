/// API Request Handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::core::{Section, SectionView, StoreHandle};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NoData,
    UnknownSection,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NoData => (StatusCode::SERVICE_UNAVAILABLE, "no data available"),
            ApiError::UnknownSection => (StatusCode::NOT_FOUND, "unknown metric section"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Latest snapshot, byte-for-byte as stored
pub async fn get_snapshot(State(store): State<StoreHandle>) -> Result<Response, ApiError> {
    let entry = store.get().await.ok_or(ApiError::NoData)?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        entry.payload().to_vec(),
    )
        .into_response())
}

pub async fn get_section(
    State(store): State<StoreHandle>,
    Path(section): Path<String>,
) -> Result<Json<SectionView>, ApiError> {
    let section: Section = section.parse().map_err(|_| ApiError::UnknownSection)?;
    let view = store.get_section(section).await.ok_or(ApiError::NoData)?;
    Ok(Json(view))
}
