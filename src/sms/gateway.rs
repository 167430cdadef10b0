//! 短信网关封装
//! 区分传输失败与业务失败；配置缺失或显式禁用时降级为仅记录日志的空实现

use secrecy::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::SmsConfig;
use crate::error::AppError;
use crate::models::phone::e164_digits;
use crate::sms::oauth::{AuthInfos, GatewayClient};

/// 回调负载映射后的内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackInfos {
    /// 回复方手机号（"+" 开头的国际格式）
    pub user_phone: String,
    /// 回复原文（已去除首尾空白）
    pub message: String,
    /// 发送时附带的关联标签
    pub consent_request_id: String,
}

/// 解析入站回调的 JSON 负载
///
/// 缺少必填字段映射为供应商错误码 0
pub fn parse_callback(data: &serde_json::Value) -> Result<CallbackInfos, AppError> {
    let field = |name: &str| -> Result<&str, AppError> {
        data.get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SmsBusiness {
                code: 0,
                message: format!("{} not present in JSON response", name),
            })
    };

    let originator = field("originatorAddress")?;
    let message = field("message")?;
    let correlation_id = field("smsMTCorrelationId")?;

    Ok(CallbackInfos {
        user_phone: format!("+{}", originator.trim_start_matches('+')),
        message: message.trim().to_string(),
        consent_request_id: correlation_id.to_string(),
    })
}

/// 短信网关
///
/// 封闭枚举：Live 为真实网关，Disabled 为降级空实现。
/// 业务代码通过 `is_enabled()` 判断能力状态，而不是
/// 根据"没抛错"推断短信真的发出去了
pub enum SmsGateway {
    Live {
        client: GatewayClient,
        send_url: String,
    },
    Disabled {
        reason: String,
    },
}

impl SmsGateway {
    /// 根据配置构造网关
    ///
    /// 显式禁用或凭据缺失 ⇒ 降级，不报错
    pub fn from_config(config: &SmsConfig) -> Self {
        if config.disabled {
            let reason =
                "SMS gateway is explicitly disabled by setting sms.disabled".to_string();
            info!(reason = %reason, "SMS gateway degraded to no-op");
            return SmsGateway::Disabled { reason };
        }

        let missing = config.missing_settings();
        if !missing.is_empty() {
            let reason = format!(
                "SMS gateway is disabled because settings {} are not set",
                missing.join(", ")
            );
            info!(reason = %reason, "SMS gateway degraded to no-op");
            return SmsGateway::Disabled { reason };
        }

        let auth = AuthInfos {
            username: config.username.clone(),
            password: config
                .password
                .clone()
                .unwrap_or_else(|| Secret::new(String::new())),
            token_url: join_url(&config.base_url, &config.oauth2_endpoint),
        };

        SmsGateway::Live {
            client: GatewayClient::new(auth, config.request_timeout_secs),
            send_url: join_url(&config.base_url, &config.send_endpoint),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SmsGateway::Live { .. })
    }

    /// 发送一条短信
    ///
    /// 负载格式：userIds 为去掉 "+" 的纯数字号码，correlationId 为关联标签。
    /// 非 2xx ⇒ 传输错误；2xx 但带 errorReason ⇒ 业务错误
    pub async fn send_sms(
        &self,
        phone_e164: &str,
        consent_request_id: &str,
        message: &str,
    ) -> Result<(), AppError> {
        let (client, send_url) = match self {
            SmsGateway::Disabled { reason } => {
                error!(
                    phone = %phone_e164,
                    consent_request_id = %consent_request_id,
                    reason = %reason,
                    "send_sms(): SMS gateway is not available"
                );
                return Ok(());
            }
            SmsGateway::Live { client, send_url } => (client, send_url),
        };

        let payload = serde_json::json!({
            "userIds": [e164_digits(phone_e164)],
            "correlationId": consent_request_id,
            "message": message.trim(),
            "encoding": "Unicode",
        });

        let response = client.post_json(send_url, &payload).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::SmsTransport {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        // 2xx 且无 errorReason 才算成功
        let body: serde_json::Value =
            response.json().await.map_err(|e| AppError::SmsTransport {
                status: status.as_u16(),
                reason: format!("invalid gateway response body: {}", e),
            })?;

        if let Some(reason) = error_reason(&body) {
            return Err(AppError::SmsBusiness {
                code: reason,
                message: body
                    .get("errorMessage")
                    .and_then(|v| v.as_str())
                    .unwrap_or("No message given by SMS provider")
                    .to_string(),
            });
        }

        debug!(
            phone = %phone_e164,
            consent_request_id = %consent_request_id,
            "SMS accepted by gateway"
        );
        Ok(())
    }
}

/// errorReason 字段存在即为业务失败；数字或数字字符串都接受
fn error_reason(body: &serde_json::Value) -> Option<i64> {
    let value = body.get("errorReason")?;
    if value.is_null() {
        return None;
    }
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .or(Some(-1))
}

/// 拼接 URL，避免双斜杠
fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}
