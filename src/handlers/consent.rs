//! 同意请求 HTTP 处理器
//! 发起短信同意请求，以及供暂存层轮询回复状态

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, Result},
    middleware::AppState,
    models::mandate::DurationKeyword,
    services::StartConsentRequest,
};

#[derive(Debug, Deserialize, Validate)]
pub struct StartConsentBody {
    pub aidant_id: Uuid,
    #[validate(length(min = 1, message = "at least one procedure is required"))]
    pub demarches: Vec<String>,
    pub duree_keyword: DurationKeyword,
    #[validate(length(min = 1, message = "user_phone is required"))]
    pub user_phone: String,
}

/// 发起短信同意请求
pub async fn start_consent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartConsentBody>,
) -> Result<impl IntoResponse> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let started = state
        .consent_service
        .start_consent_request(StartConsentRequest {
            aidant_id: body.aidant_id,
            demarches: body.demarches,
            duree_keyword: body.duree_keyword,
            user_phone: body.user_phone,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(started)))
}

#[derive(Debug, Deserialize)]
pub struct ConsentStatusQuery {
    pub phone: String,
}

/// 查询同意请求状态（pending / consent_received / denial_received）
pub async fn consent_status(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    Query(query): Query<ConsentStatusQuery>,
) -> Result<impl IntoResponse> {
    let status = state
        .consent_service
        .consent_status(&query.phone, &tag)
        .await?;

    Ok(Json(json!({ "status": status })))
}
