//! 远程短信同意协议
//!
//! 状态机：INIT → REQUEST_SENT → {CONSENT_RECEIVED | DENIAL_RECEIVED}。
//! 协议状态完全由日志条目承载，关联标签既是关联键也是回调的
//! 持有者凭据（只有发送方和网关知道）。超时不在本协议内跟踪，
//! 由外部限时暂存记录自行过期

use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::journal::SmsEventParams;
use crate::models::mandate::DurationKeyword;
use crate::models::phone::normalize_e164;
use crate::services::journal_service::JournalService;
use crate::sms::{CallbackInfos, SmsGateway};

/// 关联标签生成的重试上限
const MAX_TAG_GENERATION_ATTEMPTS: usize = 8;

/// 同意请求短信正文
fn consent_request_message(consent_keyword: &str) -> String {
    format!(
        "A professional helper asks for your consent to carry out administrative \
         procedures on your behalf. Reply {} to give your consent. \
         Any other reply will be recorded as a refusal.",
        consent_keyword.to_uppercase()
    )
}

/// 同意回执短信正文
const CONSENT_RECEIPT_MESSAGE: &str =
    "Your consent has been recorded. Your helper can now finalize the mandate with you.";

/// 拒绝回执短信正文
const DENIAL_RECEIPT_MESSAGE: &str =
    "Your refusal has been recorded. No mandate will be created.";

/// 回复是否构成同意：去除首尾空白后与配置的关键字忽略大小写比较，
/// 其余一切回复都记为拒绝
pub fn is_consent_message(message: &str, consent_keyword: &str) -> bool {
    message.trim().to_lowercase() == consent_keyword.trim().to_lowercase()
}

/// 回调处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// 记录了同意
    Consent,
    /// 记录了拒绝
    Denial,
    /// 同一 (手机号, 标签) 已有终态记录，本次为重复投递，未做任何变更
    Duplicate,
    /// 找不到对应的同意请求，视为不可信回调，未做任何变更
    Unknown,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Consent => "consent",
            CallbackOutcome::Denial => "denial",
            CallbackOutcome::Duplicate => "duplicate",
            CallbackOutcome::Unknown => "unknown",
        }
    }
}

/// 同意请求的暂存查询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// 已发出请求，还没有回复
    Pending,
    ConsentReceived,
    DenialReceived,
    /// 没有这个 (手机号, 标签) 的请求
    Unknown,
}

/// 发起同意请求的参数
#[derive(Debug)]
pub struct StartConsentRequest {
    pub aidant_id: Uuid,
    pub demarches: Vec<String>,
    pub duree_keyword: DurationKeyword,
    pub user_phone: String,
}

/// 发起结果
#[derive(Debug, serde::Serialize)]
pub struct StartedConsent {
    pub consent_request_id: String,
    /// 规范化后的手机号
    pub user_phone: String,
    /// 网关是否真的在发送（降级模式下为 false）
    pub sms_enabled: bool,
}

pub struct ConsentService {
    journal: Arc<JournalService>,
    gateway: Arc<SmsGateway>,
    consent_keyword: String,
}

impl ConsentService {
    pub fn new(db: PgPool, gateway: Arc<SmsGateway>, consent_keyword: String) -> Self {
        Self {
            journal: Arc::new(JournalService::new(db)),
            gateway,
            consent_keyword,
        }
    }

    /// INIT → REQUEST_SENT
    ///
    /// 生成不可猜测的关联标签（与同号码的未消费标签冲突时重新生成，
    /// 有限次重试），发送固定模板的同意请求短信，写入 REQUEST_SENT
    /// 日志条目。网关发送失败立即上抛，不重试、不写日志条目，
    /// 由调用方决定后续动作
    #[instrument(skip(self, request))]
    pub async fn start_consent_request(
        &self,
        request: StartConsentRequest,
    ) -> Result<StartedConsent> {
        let user_phone = normalize_e164(&request.user_phone)?;

        let mut consent_request_id = Uuid::new_v4().to_string();
        let mut attempts = 1;
        while !self
            .journal
            .find_consent_requests(&user_phone, &consent_request_id)
            .await?
            .is_empty()
        {
            if attempts >= MAX_TAG_GENERATION_ATTEMPTS {
                return Err(AppError::internal_error(
                    "could not generate a fresh consent request id",
                ));
            }
            consent_request_id = Uuid::new_v4().to_string();
            attempts += 1;
        }

        let message = consent_request_message(&self.consent_keyword);

        // 发送失败直接终止流程，调用方负责用户侧提示
        self.gateway
            .send_sms(&user_phone, &consent_request_id, &message)
            .await?;

        let duree_days = request.duree_keyword.days(chrono::Utc::now()) as i32;
        let demarche_list = request.demarches.join(",");

        self.journal
            .log_consent_request_sent(&SmsEventParams {
                aidant_id: request.aidant_id,
                demarche: &demarche_list,
                duree_days,
                user_phone: &user_phone,
                consent_request_id: &consent_request_id,
                message: &message,
            })
            .await?;

        info!(
            consent_request_id = %consent_request_id,
            sms_enabled = self.gateway.is_enabled(),
            "Consent request sent"
        );

        Ok(StartedConsent {
            consent_request_id,
            user_phone,
            sms_enabled: self.gateway.is_enabled(),
        })
    }

    /// REQUEST_SENT → {CONSENT_RECEIVED | DENIAL_RECEIVED}
    ///
    /// 由入站回调触发。标签查不到 ⇒ 不可信，拒绝且零写入；
    /// 已有终态记录 ⇒ 重复投递，零写入但对网关确认成功；
    /// 回执短信尽力而为，失败只记日志，不回滚已落库的同意决定
    #[instrument(skip(self, infos), fields(consent_request_id = %infos.consent_request_id))]
    pub async fn handle_callback(&self, infos: &CallbackInfos) -> Result<CallbackOutcome> {
        let user_phone = normalize_e164(&infos.user_phone)?;
        let tag = infos.consent_request_id.as_str();

        // 先找同意请求：标签是回调唯一的认证凭据
        let requests = self.journal.find_consent_requests(&user_phone, tag).await?;
        let Some(request) = requests.last() else {
            warn!(phone = %user_phone, "SMS callback with no matching consent request, ignoring");
            return Ok(CallbackOutcome::Unknown);
        };

        // 幂等：同一 (手机号, 标签) 已有终态记录则本次为无操作
        if !self
            .journal
            .find_consent_or_denial(&user_phone, tag)
            .await?
            .is_empty()
        {
            info!(phone = %user_phone, "Duplicate SMS callback, already processed");
            return Ok(CallbackOutcome::Duplicate);
        }

        let consented = is_consent_message(&infos.message, &self.consent_keyword);

        let aidant_id = request
            .aidant_id()
            .ok_or_else(|| AppError::integrity("consent request entry has no aidant"))?;
        let params = SmsEventParams {
            aidant_id,
            demarche: request.demarche().unwrap_or_default(),
            duree_days: request.duree_days().unwrap_or(0),
            user_phone: &user_phone,
            consent_request_id: tag,
            message: &infos.message,
        };

        let appended = if consented {
            self.journal.log_consent_received(&params).await
        } else {
            self.journal.log_denial_received(&params).await
        };

        match appended {
            Ok(_) => {}
            // 两次投递同时越过上面的检查时，唯一索引拦下后写的一条
            Err(e) if e.is_unique_violation() => {
                info!(phone = %user_phone, "Concurrent duplicate SMS callback, already processed");
                return Ok(CallbackOutcome::Duplicate);
            }
            Err(e) => return Err(e),
        }

        let outcome = if consented {
            CallbackOutcome::Consent
        } else {
            CallbackOutcome::Denial
        };
        info!(outcome = outcome.as_str(), "SMS consent decision recorded");

        // 回执短信在决定落库之后发送，失败不影响已记录的决定
        self.send_receipt(&params, consented).await;

        Ok(outcome)
    }

    /// 暂存层轮询用：查询一个同意请求的当前状态
    pub async fn consent_status(&self, user_phone: &str, tag: &str) -> Result<ConsentStatus> {
        let user_phone = normalize_e164(user_phone)?;

        if self
            .journal
            .find_consent_requests(&user_phone, tag)
            .await?
            .is_empty()
        {
            return Ok(ConsentStatus::Unknown);
        }

        let terminal = self.journal.find_consent_or_denial(&user_phone, tag).await?;
        match terminal.last().map(|entry| entry.action()) {
            None => Ok(ConsentStatus::Pending),
            Some(crate::models::journal::JournalAction::RemoteSmsConsentReceived) => {
                Ok(ConsentStatus::ConsentReceived)
            }
            Some(_) => Ok(ConsentStatus::DenialReceived),
        }
    }

    /// 尽力而为的回执：发送成功时补一条 REMOTE_SMS_RECAP_SENT，
    /// 任何失败都只记日志
    async fn send_receipt(&self, params: &SmsEventParams<'_>, consented: bool) {
        let receipt = if consented {
            CONSENT_RECEIPT_MESSAGE
        } else {
            DENIAL_RECEIPT_MESSAGE
        };

        match self
            .gateway
            .send_sms(params.user_phone, params.consent_request_id, receipt)
            .await
        {
            Ok(()) => {
                let recap = SmsEventParams {
                    message: receipt,
                    ..params.clone()
                };
                if let Err(e) = self.journal.log_recap_sent(&recap).await {
                    error!(error = %e, "Failed to journal the receipt SMS");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to send the receipt SMS, consent decision stands");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_request_message_contains_keyword() {
        let message = consent_request_message("oui");
        assert!(message.contains("OUI"));
    }

    #[test]
    fn test_callback_outcome_labels() {
        assert_eq!(CallbackOutcome::Consent.as_str(), "consent");
        assert_eq!(CallbackOutcome::Duplicate.as_str(), "duplicate");
        assert_eq!(CallbackOutcome::Unknown.as_str(), "unknown");
    }
}
