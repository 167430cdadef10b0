//! 短信回调 Webhook 处理器
//!
//! 网关把公民的回复以 POST 推送过来。除负载缺字段外一律返回空 200：
//! 标签查不到和重复投递对外不可区分，避免探测哪些标签存在

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    middleware::AppState,
    services::CallbackOutcome,
    sms,
};

/// 接收网关回调
pub async fn sms_callback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse> {
    // 能力被禁用时不存在有效的出站请求，直接确认并丢弃
    if !state.sms_gateway.is_enabled() {
        warn!("SMS callback received while the gateway is disabled, ignoring");
        return Ok(StatusCode::OK);
    }

    // 缺少必填字段 ⇒ 供应商错误码 0，"<field> not present"
    let infos = sms::parse_callback(&payload)?;

    debug!(
        consent_request_id = %infos.consent_request_id,
        "Received SMS callback"
    );

    let outcome = match state.consent_service.handle_callback(&infos).await {
        Ok(outcome) => outcome,
        // 无法规范化的号码无法关联到任何请求，确认后丢弃
        Err(AppError::Validation(msg)) => {
            warn!(reason = %msg, "SMS callback with unusable phone number, ignoring");
            return Ok(StatusCode::OK);
        }
        Err(e) => return Err(e),
    };

    match outcome {
        CallbackOutcome::Consent | CallbackOutcome::Denial => {
            info!(outcome = outcome.as_str(), "SMS callback processed");
        }
        CallbackOutcome::Duplicate => {
            debug!("SMS callback was a duplicate delivery");
        }
        CallbackOutcome::Unknown => {
            // 不可信回调：已在服务层记了警告，这里不暴露任何信息
        }
    }

    Ok(StatusCode::OK)
}
