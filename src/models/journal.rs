//! Audit journal domain models
//!
//! 日志条目一旦写入即不可变更：类型本身不暴露任何修改方法，
//! 仓储层也只提供插入和查询

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::mandate::ConsentMethod;

/// Journal action kinds (closed enum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "journal_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    /// 委托书证明生成（权威创建记录）
    CreateAttestation,
    /// 授权创建
    CreateAutorisation,
    /// 帮办使用授权办理事项
    UseAutorisation,
    /// 单条授权撤销
    CancelAutorisation,
    /// 整个委托书撤销
    CancelMandat,
    /// 委托书发起/续期
    InitMandat,
    /// 委托书跨机构转移
    TransferMandat,
    /// 同意请求短信已发出
    RemoteSmsConsentSent,
    /// 收到同意回复
    RemoteSmsConsentReceived,
    /// 收到拒绝回复
    RemoteSmsDenialReceived,
    /// 回执短信已发出
    RemoteSmsRecapSent,
}

impl JournalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalAction::CreateAttestation => "create_attestation",
            JournalAction::CreateAutorisation => "create_autorisation",
            JournalAction::UseAutorisation => "use_autorisation",
            JournalAction::CancelAutorisation => "cancel_autorisation",
            JournalAction::CancelMandat => "cancel_mandat",
            JournalAction::InitMandat => "init_mandat",
            JournalAction::TransferMandat => "transfer_mandat",
            JournalAction::RemoteSmsConsentSent => "remote_sms_consent_sent",
            JournalAction::RemoteSmsConsentReceived => "remote_sms_consent_received",
            JournalAction::RemoteSmsDenialReceived => "remote_sms_denial_received",
            JournalAction::RemoteSmsRecapSent => "remote_sms_recap_sent",
        }
    }

    /// SMS 同意协议相关的动作
    pub fn is_sms_event(&self) -> bool {
        matches!(
            self,
            JournalAction::RemoteSmsConsentSent
                | JournalAction::RemoteSmsConsentReceived
                | JournalAction::RemoteSmsDenialReceived
                | JournalAction::RemoteSmsRecapSent
        )
    }

    /// 同意协议的终态动作（一个关联键至多一条）
    pub fn is_terminal_sms_event(&self) -> bool {
        matches!(
            self,
            JournalAction::RemoteSmsConsentReceived | JournalAction::RemoteSmsDenialReceived
        )
    }
}

/// Persisted journal entry
///
/// Fields are private on purpose: once read back from the store the entry
/// cannot be modified, only inspected.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JournalEntry {
    id: i64,
    action: JournalAction,
    aidant_id: Option<Uuid>,
    usager_id: Option<Uuid>,
    mandat_id: Option<Uuid>,
    autorisation_id: Option<Uuid>,
    organisation_id: Option<Uuid>,
    demarche: Option<String>,
    duree_days: Option<i32>,
    attestation_hash: Option<String>,
    additional_information: Option<String>,
    is_remote_mandat: bool,
    user_phone: Option<String>,
    consent_request_id: Option<String>,
    remote_consent_method: Option<ConsentMethod>,
    creation_date: DateTime<Utc>,
}

impl JournalEntry {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn action(&self) -> JournalAction {
        self.action
    }

    pub fn aidant_id(&self) -> Option<Uuid> {
        self.aidant_id
    }

    pub fn usager_id(&self) -> Option<Uuid> {
        self.usager_id
    }

    pub fn mandat_id(&self) -> Option<Uuid> {
        self.mandat_id
    }

    pub fn autorisation_id(&self) -> Option<Uuid> {
        self.autorisation_id
    }

    pub fn organisation_id(&self) -> Option<Uuid> {
        self.organisation_id
    }

    pub fn demarche(&self) -> Option<&str> {
        self.demarche.as_deref()
    }

    pub fn duree_days(&self) -> Option<i32> {
        self.duree_days
    }

    pub fn attestation_hash(&self) -> Option<&str> {
        self.attestation_hash.as_deref()
    }

    pub fn additional_information(&self) -> Option<&str> {
        self.additional_information.as_deref()
    }

    pub fn is_remote_mandat(&self) -> bool {
        self.is_remote_mandat
    }

    pub fn user_phone(&self) -> Option<&str> {
        self.user_phone.as_deref()
    }

    pub fn consent_request_id(&self) -> Option<&str> {
        self.consent_request_id.as_deref()
    }

    pub fn remote_consent_method(&self) -> Option<ConsentMethod> {
        self.remote_consent_method
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }
}

/// Insert payload for a journal entry
///
/// 通过下方的具名构造函数创建；每种动作的必填字段组合在
/// `validate()` 中同步校验，违反即拒绝写入
#[derive(Debug, Clone, Default)]
pub struct NewJournalEntry {
    pub(crate) action: Option<JournalAction>,
    pub(crate) aidant_id: Option<Uuid>,
    pub(crate) usager_id: Option<Uuid>,
    pub(crate) mandat_id: Option<Uuid>,
    pub(crate) autorisation_id: Option<Uuid>,
    pub(crate) organisation_id: Option<Uuid>,
    pub(crate) demarche: Option<String>,
    pub(crate) duree_days: Option<i32>,
    pub(crate) attestation_hash: Option<String>,
    pub(crate) additional_information: Option<String>,
    pub(crate) is_remote_mandat: bool,
    pub(crate) user_phone: Option<String>,
    pub(crate) consent_request_id: Option<String>,
    pub(crate) remote_consent_method: Option<ConsentMethod>,
}

/// SMS 协议事件的公共参数
#[derive(Debug, Clone)]
pub struct SmsEventParams<'a> {
    pub aidant_id: Uuid,
    /// 逗号连接的事项列表
    pub demarche: &'a str,
    pub duree_days: i32,
    /// E.164 规范化后的手机号
    pub user_phone: &'a str,
    pub consent_request_id: &'a str,
    /// 发出或收到的短信原文
    pub message: &'a str,
}

impl NewJournalEntry {
    pub fn action(&self) -> Option<JournalAction> {
        self.action
    }

    fn sms_event(action: JournalAction, params: &SmsEventParams<'_>) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(action),
            aidant_id: Some(params.aidant_id),
            demarche: Some(params.demarche.to_string()),
            duree_days: Some(params.duree_days),
            is_remote_mandat: true,
            user_phone: Some(params.user_phone.to_string()),
            consent_request_id: Some(params.consent_request_id.to_string()),
            remote_consent_method: Some(ConsentMethod::Sms),
            additional_information: Some(format!("message={}", params.message)),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn sms_consent_request_sent(params: &SmsEventParams<'_>) -> Result<Self> {
        Self::sms_event(JournalAction::RemoteSmsConsentSent, params)
    }

    pub fn sms_consent_received(params: &SmsEventParams<'_>) -> Result<Self> {
        Self::sms_event(JournalAction::RemoteSmsConsentReceived, params)
    }

    pub fn sms_denial_received(params: &SmsEventParams<'_>) -> Result<Self> {
        Self::sms_event(JournalAction::RemoteSmsDenialReceived, params)
    }

    pub fn sms_recap_sent(params: &SmsEventParams<'_>) -> Result<Self> {
        Self::sms_event(JournalAction::RemoteSmsRecapSent, params)
    }

    /// 委托书权威创建记录：证明生成
    #[allow(clippy::too_many_arguments)]
    pub fn attestation_created(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        mandat_id: Uuid,
        demarche: &str,
        duree_days: i32,
        attestation_hash: &str,
        is_remote: bool,
        method: Option<ConsentMethod>,
        user_phone: Option<&str>,
        consent_request_id: Option<&str>,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::CreateAttestation),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            mandat_id: Some(mandat_id),
            demarche: Some(demarche.to_string()),
            duree_days: Some(duree_days),
            attestation_hash: Some(attestation_hash.to_string()),
            is_remote_mandat: is_remote,
            remote_consent_method: method,
            user_phone: user_phone.map(str::to_string),
            consent_request_id: consent_request_id.map(str::to_string),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn autorisation_created(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        autorisation_id: Uuid,
        demarche: &str,
        duree_days: i32,
        is_remote: bool,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::CreateAutorisation),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            autorisation_id: Some(autorisation_id),
            demarche: Some(demarche.to_string()),
            duree_days: Some(duree_days),
            is_remote_mandat: is_remote,
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn autorisation_used(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        autorisation_id: Uuid,
        demarche: &str,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::UseAutorisation),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            autorisation_id: Some(autorisation_id),
            demarche: Some(demarche.to_string()),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn autorisation_cancelled(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        autorisation_id: Uuid,
        demarche: &str,
        duree_days: i32,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::CancelAutorisation),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            autorisation_id: Some(autorisation_id),
            demarche: Some(demarche.to_string()),
            duree_days: Some(duree_days),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn mandat_cancelled(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        mandat_id: Uuid,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::CancelMandat),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            mandat_id: Some(mandat_id),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init_mandat(
        aidant_id: Uuid,
        organisation_id: Uuid,
        usager_id: Uuid,
        demarche: &str,
        duree_days: i32,
        is_remote: bool,
        method: Option<ConsentMethod>,
        user_phone: Option<&str>,
        consent_request_id: Option<&str>,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::InitMandat),
            aidant_id: Some(aidant_id),
            organisation_id: Some(organisation_id),
            usager_id: Some(usager_id),
            demarche: Some(demarche.to_string()),
            duree_days: Some(duree_days),
            is_remote_mandat: is_remote,
            remote_consent_method: method,
            user_phone: user_phone.map(str::to_string),
            consent_request_id: consent_request_id.map(str::to_string),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    /// 转移记录保留原机构与原证明哈希，便于事后追溯
    pub fn mandat_transferred(
        mandat_id: Uuid,
        organisation_id: Uuid,
        previous_organisation_id: Uuid,
        previous_hash: Option<&str>,
    ) -> Result<Self> {
        let entry = NewJournalEntry {
            action: Some(JournalAction::TransferMandat),
            mandat_id: Some(mandat_id),
            organisation_id: Some(organisation_id),
            additional_information: Some(format!(
                "previous_organisation = {}, previous_hash = {}",
                previous_organisation_id,
                previous_hash.unwrap_or("None"),
            )),
            ..Default::default()
        };
        entry.validate()?;
        Ok(entry)
    }

    /// 按动作校验必填字段组合
    ///
    /// 违反视为完整性错误，写入被整体拒绝，绝不静默丢弃
    pub fn validate(&self) -> Result<()> {
        let action = self
            .action
            .ok_or_else(|| AppError::integrity("journal entry has no action"))?;

        if action.is_sms_event() {
            if self.aidant_id.is_none() {
                return Err(integrity(action, "aidant_id"));
            }
            if !self.is_remote_mandat {
                return Err(integrity(action, "is_remote_mandat"));
            }
            if is_blank(&self.user_phone) {
                return Err(integrity(action, "user_phone"));
            }
            if is_blank(&self.consent_request_id) {
                return Err(integrity(action, "consent_request_id"));
            }
            if self.remote_consent_method != Some(ConsentMethod::Sms) {
                return Err(integrity(action, "remote_consent_method"));
            }
            if is_blank(&self.additional_information) {
                return Err(integrity(action, "additional_information"));
            }
            return Ok(());
        }

        match action {
            JournalAction::CreateAttestation | JournalAction::InitMandat => {
                if self.is_remote_mandat && self.remote_consent_method.is_none() {
                    return Err(AppError::integrity(
                        "remote_consent_method must be set when mandate is remote",
                    ));
                }
                if let Some(method) = self.remote_consent_method {
                    if method.is_blocked() && is_blank(&self.consent_request_id) {
                        return Err(AppError::integrity(
                            "consent_request_id must be set when mandate uses a blocked consent method",
                        ));
                    }
                    if method == ConsentMethod::Sms && is_blank(&self.user_phone) {
                        return Err(AppError::integrity(
                            "user_phone must be set when mandate uses SMS consent method",
                        ));
                    }
                }
                if action == JournalAction::CreateAttestation {
                    if is_blank(&self.attestation_hash) {
                        return Err(integrity(action, "attestation_hash"));
                    }
                    if self.mandat_id.is_none() {
                        return Err(integrity(action, "mandat_id"));
                    }
                }
                Ok(())
            }
            JournalAction::CreateAutorisation
            | JournalAction::CancelAutorisation
            | JournalAction::UseAutorisation => {
                if self.autorisation_id.is_none() {
                    return Err(integrity(action, "autorisation_id"));
                }
                if is_blank(&self.demarche) {
                    return Err(integrity(action, "demarche"));
                }
                Ok(())
            }
            JournalAction::CancelMandat => {
                if self.mandat_id.is_none() {
                    return Err(integrity(action, "mandat_id"));
                }
                Ok(())
            }
            JournalAction::TransferMandat => {
                if self.mandat_id.is_none() {
                    return Err(integrity(action, "mandat_id"));
                }
                if self.organisation_id.is_none() {
                    return Err(integrity(action, "organisation_id"));
                }
                if is_blank(&self.additional_information) {
                    return Err(integrity(action, "additional_information"));
                }
                Ok(())
            }
            // SMS 动作在上方分支处理
            _ => Ok(()),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn integrity(action: JournalAction, field: &str) -> AppError {
    AppError::integrity(&format!(
        "{} must be set for journal action {}",
        field,
        action.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms_params<'a>() -> SmsEventParams<'a> {
        SmsEventParams {
            aidant_id: Uuid::new_v4(),
            demarche: "papiers,logement",
            duree_days: 365,
            user_phone: "+33612345678",
            consent_request_id: "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            message: "Reply YES to consent",
        }
    }

    #[test]
    fn test_sms_event_constructors_validate() {
        let params = sms_params();
        let entry = NewJournalEntry::sms_consent_request_sent(&params).unwrap();
        assert_eq!(entry.action(), Some(JournalAction::RemoteSmsConsentSent));
        assert!(entry.is_remote_mandat);
        assert_eq!(entry.remote_consent_method, Some(ConsentMethod::Sms));
        assert_eq!(
            entry.additional_information.as_deref(),
            Some("message=Reply YES to consent")
        );
    }

    #[test]
    fn test_sms_event_requires_phone() {
        let mut params = sms_params();
        params.user_phone = " ";
        let err = NewJournalEntry::sms_consent_received(&params).unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
        assert!(err.to_string().contains("user_phone"));
    }

    #[test]
    fn test_sms_event_requires_tag() {
        let mut params = sms_params();
        params.consent_request_id = "";
        let err = NewJournalEntry::sms_denial_received(&params).unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
        assert!(err.to_string().contains("consent_request_id"));
    }

    #[test]
    fn test_attestation_requires_hash() {
        let err = NewJournalEntry::attestation_created(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "papiers",
            365,
            "  ",
            false,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
    }

    #[test]
    fn test_attestation_remote_requires_method() {
        let entry = NewJournalEntry {
            action: Some(JournalAction::CreateAttestation),
            aidant_id: Some(Uuid::new_v4()),
            mandat_id: Some(Uuid::new_v4()),
            attestation_hash: Some("abc".to_string()),
            is_remote_mandat: true,
            ..Default::default()
        };
        let err = entry.validate().unwrap_err();
        assert!(err.to_string().contains("remote_consent_method"));
    }

    #[test]
    fn test_transfer_requires_context() {
        let entry = NewJournalEntry {
            action: Some(JournalAction::TransferMandat),
            mandat_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(entry.validate().is_err());

        let valid = NewJournalEntry::mandat_transferred(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("deadbeef"),
        )
        .unwrap();
        assert!(valid
            .additional_information
            .as_deref()
            .unwrap()
            .contains("previous_hash = deadbeef"));
    }

    #[test]
    fn test_terminal_sms_actions() {
        assert!(JournalAction::RemoteSmsConsentReceived.is_terminal_sms_event());
        assert!(JournalAction::RemoteSmsDenialReceived.is_terminal_sms_event());
        assert!(!JournalAction::RemoteSmsConsentSent.is_terminal_sms_event());
        assert!(!JournalAction::RemoteSmsRecapSent.is_terminal_sms_event());
        assert!(!JournalAction::CreateAttestation.is_sms_event());
    }
}
