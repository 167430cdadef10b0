//! 审计日志的 HTTP 处理器

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AppError, middleware::AppState, models::journal::JournalAction,
    repository::JournalFilters,
};

#[derive(Debug, Deserialize)]
pub struct JournalQuery {
    pub action: Option<JournalAction>,
    pub aidant_id: Option<uuid::Uuid>,
    pub usager_id: Option<uuid::Uuid>,
    pub mandat_id: Option<uuid::Uuid>,
    pub user_phone: Option<String>,
    pub consent_request_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 查询审计日志
pub async fn list_journal_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JournalQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filters = JournalFilters {
        action: query.action,
        aidant_id: query.aidant_id,
        usager_id: query.usager_id,
        mandat_id: query.mandat_id,
        user_phone: query.user_phone,
        consent_request_id: query.consent_request_id,
        start_time: query.start_time,
        end_time: query.end_time,
    };

    let limit = query.limit.clamp(1, 500);
    let entries = state
        .journal_service
        .query_entries(&filters, limit, query.offset)
        .await?;
    let total = state.journal_service.count_entries(&filters).await?;

    Ok(Json(json!({
        "entries": entries,
        "count": entries.len(),
        "total": total
    })))
}
