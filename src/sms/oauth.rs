//! 短信网关 OAuth2 客户端
//!
//! 网关使用口令式 OAuth2：先用账号口令换取 access_token，
//! 之后每次调用携带 Bearer 头。令牌缓存由客户端实例持有，
//! 不做进程级单例，便于测试和多实例部署

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AppError;

/// 网关认证信息
#[derive(Debug, Clone)]
pub struct AuthInfos {
    pub username: String,
    pub password: Secret<String>,
    /// 令牌端点完整 URL（本身不需要认证）
    pub token_url: String,
}

/// 令牌端点响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    ttl: i64,
}

/// 缓存的访问令牌
#[derive(Debug, Clone)]
pub struct TokenInfos {
    pub access_token: Secret<String>,
    pub ttl_secs: i64,
    pub emitted: DateTime<Utc>,
}

impl TokenInfos {
    /// emitted + ttl 已过即视为过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.emitted + Duration::seconds(self.ttl_secs) <= now
    }
}

/// 带透明令牌管理的网关 HTTP 客户端
///
/// 除令牌端点外的每次调用：无缓存令牌或已过期则同步取新令牌；
/// 返回 401 则取一次新令牌并重试一次，第二次 401 作为终态错误上抛
pub struct GatewayClient {
    http: reqwest::Client,
    auth: AuthInfos,
    token: Mutex<Option<TokenInfos>>,
}

impl GatewayClient {
    pub fn new(auth: AuthInfos, request_timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(request_timeout_secs))
            .build()
            .unwrap();

        Self {
            http,
            auth,
            token: Mutex::new(None),
        }
    }

    /// 携带 Bearer 令牌发送 JSON POST
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AppError> {
        let token = self.current_token().await?;
        let response = self.send_authorized(url, body, &token).await?;

        if response.status().as_u16() != 401 {
            return Ok(response);
        }

        // 本地令牌"有效"却被拒（网关侧可能已吊销），取一次新令牌重试一次
        warn!(url = %url, "Gateway returned 401 with a locally valid token, refreshing once");
        let token = self.refresh_token().await?;
        let response = self.send_authorized(url, body, &token).await?;

        if response.status().as_u16() == 401 {
            return Err(AppError::SmsTransport {
                status: 401,
                reason: "still unauthorized after token refresh".to_string(),
            });
        }

        Ok(response)
    }

    /// 返回缓存令牌，缺失或过期时先取新令牌
    ///
    /// 检查和写回各自短暂持锁，取令牌本身不持锁：并发调用可能
    /// 重复取令牌，取令牌幂等且廉价，可以接受
    async fn current_token(&self) -> Result<TokenInfos, AppError> {
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref() {
                if !token.is_expired(Utc::now()) {
                    return Ok(token.clone());
                }
            }
        }

        self.refresh_token().await
    }

    /// 强制取新令牌并写入缓存
    async fn refresh_token(&self) -> Result<TokenInfos, AppError> {
        let token = self.fetch_token().await?;
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    /// 调用令牌端点（不携带认证头，否则会形成循环）
    async fn fetch_token(&self) -> Result<TokenInfos, AppError> {
        debug!(url = %self.auth.token_url, "Fetching gateway access token");

        let response = self
            .http
            .post(&self.auth.token_url)
            .json(&serde_json::json!({
                "username": self.auth.username,
                "password": self.auth.password.expose_secret(),
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::SmsTransport {
                status: status.as_u16(),
                reason: format!("token endpoint returned {}", status),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| AppError::SmsTransport {
            status: status.as_u16(),
            reason: format!("invalid token endpoint response: {}", e),
        })?;

        Ok(TokenInfos {
            access_token: Secret::new(body.access_token),
            ttl_secs: body.ttl,
            emitted: Utc::now(),
        })
    }

    async fn send_authorized(
        &self,
        url: &str,
        body: &serde_json::Value,
        token: &TokenInfos,
    ) -> Result<reqwest::Response, AppError> {
        self.http
            .post(url)
            .header(
                "Authorization",
                format!("Bearer {}", token.access_token.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)
    }
}

/// reqwest 层失败（连接、超时）映射为传输错误
fn transport_error(e: reqwest::Error) -> AppError {
    AppError::SmsTransport {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        reason: e.to_string(),
    }
}
