//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{handlers, middleware::AppState};

/// 请求体大小上限（回调和 API 负载都很小）
const MAX_BODY_BYTES: usize = 64 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 网关回调路由（公开，但应在反向代理层做 IP 白名单限制）
    let webhook_routes = Router::new().route("/sms/callback", post(handlers::sms_webhook::sms_callback));

    // 业务 API 路由（鉴权由外层部署负责，本服务只暴露给内部调用方）
    let api_routes = Router::new()
        .route(
            "/api/v1/mandates",
            post(handlers::mandate::create_mandate),
        )
        .route(
            "/api/v1/mandates/{id}",
            get(handlers::mandate::get_mandate),
        )
        .route(
            "/api/v1/mandates/{id}/revoke",
            post(handlers::mandate::revoke_mandate),
        )
        .route(
            "/api/v1/mandates/{id}/renew",
            post(handlers::mandate::renew_mandate),
        )
        .route(
            "/api/v1/mandates/transfer",
            post(handlers::mandate::transfer_mandates),
        )
        .route(
            "/api/v1/mandates/soon-expired",
            get(handlers::mandate::list_soon_expired),
        )
        .route(
            "/api/v1/authorizations/{id}/revoke",
            post(handlers::mandate::revoke_authorization),
        )
        .route(
            "/api/v1/authorizations/{id}/use",
            post(handlers::mandate::use_authorization),
        )
        .route("/api/v1/consents", post(handlers::consent::start_consent))
        .route(
            "/api/v1/consents/{tag}/status",
            get(handlers::consent::consent_status),
        )
        .route(
            "/api/v1/journal",
            get(handlers::journal::list_journal_entries),
        );

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn(
            crate::middleware::request_tracking_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
