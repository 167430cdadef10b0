//! 委托书 HTTP 处理器

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
    models::mandate::{CreateMandateRequest, TransferMandatesRequest},
};

/// 创建委托书（及其全部授权）
pub async fn create_mandate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateMandateRequest>,
) -> Result<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mandate = state.mandate_service.create_mandate(request).await?;
    Ok((StatusCode::CREATED, Json(mandate)))
}

/// 查询委托书及推导状态
pub async fn get_mandate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let mandate = state.mandate_service.get_mandate(id).await?;
    Ok(Json(mandate))
}

/// 撤销/使用类操作的请求体：记录操作的帮办
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub aidant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RenewMandateRequest {
    pub aidant_id: Uuid,
    pub duree_keyword: crate::models::mandate::DurationKeyword,
}

/// 续签委托书：沿用原委托书的公民、机构和事项列表
pub async fn renew_mandate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RenewMandateRequest>,
) -> Result<impl IntoResponse> {
    let mandate = state
        .mandate_service
        .renew_mandate(id, request.aidant_id, request.duree_keyword)
        .await?;
    Ok((StatusCode::CREATED, Json(mandate)))
}

/// 撤销整个委托书
pub async fn revoke_mandate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> Result<impl IntoResponse> {
    state
        .mandate_service
        .revoke_mandate(id, request.aidant_id)
        .await?;
    let mandate = state.mandate_service.get_mandate(id).await?;
    Ok(Json(mandate))
}

/// 撤销单条授权
pub async fn revoke_authorization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> Result<impl IntoResponse> {
    state
        .mandate_service
        .revoke_authorization(id, request.aidant_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 记录一次授权使用
pub async fn use_authorization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> Result<impl IntoResponse> {
    state
        .mandate_service
        .use_authorization(id, request.aidant_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 跨机构转移（逐条隔离，部分失败不回滚其余）
pub async fn transfer_mandates(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransferMandatesRequest>,
) -> Result<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let result = state
        .mandate_service
        .transfer_to_organisation(request.organisation_id, &request.mandate_ids)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct SoonExpiredQuery {
    #[serde(default = "default_window_days")]
    pub days: i64,
}

fn default_window_days() -> i64 {
    30
}

/// 即将到期的长期委托书，供外部通知任务消费
pub async fn list_soon_expired(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SoonExpiredQuery>,
) -> Result<impl IntoResponse> {
    if query.days < 1 || query.days > 365 {
        return Err(AppError::validation("days must be between 1 and 365"));
    }

    let mandates = state.mandate_service.find_soon_expired(query.days).await?;

    Ok(Json(json!({
        "mandates": mandates,
        "count": mandates.len(),
    })))
}
