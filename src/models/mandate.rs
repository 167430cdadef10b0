//! 委托书与授权领域模型
//! 委托书（Mandat）是公民授予帮办人员的限时授权，每个行政事项对应一条授权记录

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};

/// 同一撤销事件的时间窗口（秒）
///
/// 批量撤销子授权时各条记录的时间戳存在偏差，
/// 间隔不超过该窗口的撤销视为同一次逻辑操作
pub const SEPARATE_REVOCATION_WINDOW_SECS: i64 = 15;

/// 2020 紧急状态委托的固定截止日
fn state_of_emergency_2020_last_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 7, 10, 23, 59, 59).unwrap()
}

/// 委托时长关键字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "duration_keyword", rename_all = "snake_case")]
pub enum DurationKeyword {
    /// 1 天
    #[serde(rename = "SHORT")]
    Short,
    /// 1 个月（31 天）
    #[serde(rename = "MONTH")]
    Month,
    /// 6 个月（182 天）
    #[serde(rename = "SEMESTER")]
    Semester,
    /// 1 年（365 天）
    #[serde(rename = "LONG")]
    Long,
    /// 2020 紧急状态遗留关键字，截止日固定
    #[serde(rename = "EUS_03_20")]
    #[sqlx(rename = "eus_03_20")]
    Eus0320,
}

impl DurationKeyword {
    /// 自给定时间起的委托天数
    pub fn days(&self, from: DateTime<Utc>) -> i64 {
        match self {
            DurationKeyword::Short => 1,
            DurationKeyword::Month => 31,
            DurationKeyword::Semester => 182,
            DurationKeyword::Long => 365,
            // 固定截止日，已过期则为 0
            DurationKeyword::Eus0320 => {
                let remaining = (state_of_emergency_2020_last_day() - from).num_days() + 1;
                remaining.max(0)
            }
        }
    }

    /// 自给定时间起的过期时间
    pub fn expiration(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DurationKeyword::Eus0320 => state_of_emergency_2020_last_day(),
            _ => from + chrono::Duration::days(self.days(from)),
        }
    }

    /// 是否属于长期委托（到期提醒只针对这些）
    pub fn is_long_lived(&self) -> bool {
        matches!(self, DurationKeyword::Long | DurationKeyword::Semester)
    }
}

/// 远程同意方式
///
/// 封闭枚举，按 match 分发，不做基于名字的动态查找
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "consent_method", rename_all = "snake_case")]
pub enum ConsentMethod {
    /// 当面/既有流程，委托书立即生成
    #[serde(rename = "LEGACY")]
    Legacy,
    /// 短信确认，收到同意回复后才生成委托书
    #[serde(rename = "SMS")]
    Sms,
}

impl ConsentMethod {
    /// 是否为阻塞式方式：需要先拿到同意回执（关联标签必填）
    pub fn is_blocked(&self) -> bool {
        matches!(self, ConsentMethod::Sms)
    }
}

/// 委托书
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Mandate {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub usager_id: Uuid,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub duree_keyword: DurationKeyword,
    pub is_remote: bool,
    pub remote_consent_method: Option<ConsentMethod>,
    /// 短信关联标签；非阻塞方式下为空串
    pub consent_request_id: String,
    /// 签署时向公民展示的证明模板路径
    pub template_path: Option<String>,
}

impl Mandate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration_date
    }

    /// 过期时间是否落在 [now, now + window_days) 内
    ///
    /// 到期提醒窗口的判定口径，SQL 版本见
    /// `MandateRepository::find_soon_expired`
    pub fn expires_within(&self, now: DateTime<Utc>, window_days: i64) -> bool {
        self.expiration_date >= now
            && self.expiration_date < now + chrono::Duration::days(window_days)
    }

    /// 校验远程同意相关的不变量
    ///
    /// remote ⇒ 同意方式必填；阻塞方式 ⇒ 关联标签必填；SMS ⇒ 公民手机号必填
    pub fn validate_consent_invariants(
        is_remote: bool,
        method: Option<ConsentMethod>,
        consent_request_id: &str,
        usager_phone: Option<&str>,
    ) -> Result<()> {
        if is_remote && method.is_none() {
            return Err(AppError::integrity(
                "remote_consent_method must be set when mandate is remote",
            ));
        }

        if let Some(method) = method {
            if method.is_blocked() && consent_request_id.trim().is_empty() {
                return Err(AppError::integrity(
                    "consent_request_id must be set when mandate uses a blocked consent method",
                ));
            }

            if method == ConsentMethod::Sms
                && usager_phone.map_or(true, |p| p.trim().is_empty())
            {
                return Err(AppError::integrity(
                    "user phone must be set when mandate uses SMS consent method",
                ));
            }
        }

        Ok(())
    }
}

/// 授权：委托书内一个行政事项的授权，可单独撤销
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Authorization {
    pub id: Uuid,
    pub mandat_id: Uuid,
    pub demarche: String,
    pub revocation_date: Option<DateTime<Utc>>,
}

impl Authorization {
    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }

    /// active ⇔ 委托书未过期 ∧ 未撤销
    pub fn is_active(&self, mandate_expiration: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        mandate_expiration > now && self.revocation_date.is_none()
    }

    /// 该授权是否独立于整个委托书被撤销
    ///
    /// 撤销时间与委托书推导撤销时间相差超过 15 秒视为独立撤销；
    /// 委托书没有推导撤销时间（仍有未撤销的子授权）时恒为 true
    pub fn was_separately_revoked(&self, mandate_revocation: Option<DateTime<Utc>>) -> bool {
        let Some(own) = self.revocation_date else {
            return false;
        };

        match mandate_revocation {
            None => true,
            Some(mandate_revocation) => {
                (own - mandate_revocation).num_seconds().abs() > SEPARATE_REVOCATION_WINDOW_SECS
            }
        }
    }
}

/// 委托书的推导撤销时间
///
/// 仅当所有子授权均已撤销时有定义，取最晚的子授权撤销时间；
/// 撤销时间不落库，始终由子授权推导
pub fn mandate_revocation_date(authorizations: &[Authorization]) -> Option<DateTime<Utc>> {
    if authorizations.is_empty() || authorizations.iter().any(|a| !a.is_revoked()) {
        return None;
    }

    authorizations.iter().filter_map(|a| a.revocation_date).max()
}

/// 委托书是否有效：未过期且至少有一条有效授权
pub fn mandate_is_active(
    mandate: &Mandate,
    authorizations: &[Authorization],
    now: DateTime<Utc>,
) -> bool {
    !mandate.is_expired(now)
        && authorizations
            .iter()
            .any(|a| a.is_active(mandate.expiration_date, now))
}

// ==================== 请求/响应 DTO ====================

/// 创建委托书请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMandateRequest {
    pub organisation_id: Uuid,
    pub aidant_id: Uuid,
    pub usager_id: Uuid,
    /// SMS 同意方式下必填
    pub usager_phone: Option<String>,
    #[validate(length(min = 1, message = "at least one procedure is required"))]
    pub demarches: Vec<String>,
    pub duree_keyword: DurationKeyword,
    #[serde(default)]
    pub is_remote: bool,
    pub remote_consent_method: Option<ConsentMethod>,
    #[serde(default)]
    pub consent_request_id: String,
}

/// 授权响应（附带推导状态）
#[derive(Debug, Serialize)]
pub struct AuthorizationResponse {
    pub id: Uuid,
    pub demarche: String,
    pub revocation_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub was_separately_revoked: bool,
}

/// 委托书响应（附带推导状态）
#[derive(Debug, Serialize)]
pub struct MandateResponse {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub usager_id: Uuid,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub duree_keyword: DurationKeyword,
    pub is_remote: bool,
    pub remote_consent_method: Option<ConsentMethod>,
    pub is_active: bool,
    /// 推导撤销时间：所有子授权均撤销时的最晚撤销时间
    pub revocation_date: Option<DateTime<Utc>>,
    pub autorisations: Vec<AuthorizationResponse>,
}

impl MandateResponse {
    /// 由委托书和子授权组装响应，推导状态在此统一计算
    pub fn assemble(mandate: Mandate, authorizations: Vec<Authorization>) -> Self {
        let now = Utc::now();
        let revocation = mandate_revocation_date(&authorizations);
        let is_active = mandate_is_active(&mandate, &authorizations, now);

        let autorisations = authorizations
            .into_iter()
            .map(|a| AuthorizationResponse {
                is_active: a.is_active(mandate.expiration_date, now),
                was_separately_revoked: a.was_separately_revoked(revocation),
                id: a.id,
                demarche: a.demarche,
                revocation_date: a.revocation_date,
            })
            .collect();

        MandateResponse {
            id: mandate.id,
            organisation_id: mandate.organisation_id,
            usager_id: mandate.usager_id,
            creation_date: mandate.creation_date,
            expiration_date: mandate.expiration_date,
            duree_keyword: mandate.duree_keyword,
            is_remote: mandate.is_remote,
            remote_consent_method: mandate.remote_consent_method,
            is_active,
            revocation_date: revocation,
            autorisations,
        }
    }
}

/// 跨机构转移请求
#[derive(Debug, Deserialize, Validate)]
pub struct TransferMandatesRequest {
    pub organisation_id: Uuid,
    #[validate(length(min = 1, message = "at least one mandate id is required"))]
    pub mandate_ids: Vec<Uuid>,
}

/// 跨机构转移结果：逐条隔离，部分失败不回滚其余
#[derive(Debug, Serialize)]
pub struct TransferMandatesResponse {
    pub had_failures: bool,
    pub failed_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mandate(expiration: DateTime<Utc>) -> Mandate {
        Mandate {
            id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            usager_id: Uuid::new_v4(),
            creation_date: expiration - Duration::days(365),
            expiration_date: expiration,
            duree_keyword: DurationKeyword::Long,
            is_remote: false,
            remote_consent_method: None,
            consent_request_id: String::new(),
            template_path: None,
        }
    }

    fn authorization(mandat_id: Uuid, revoked: Option<DateTime<Utc>>) -> Authorization {
        Authorization {
            id: Uuid::new_v4(),
            mandat_id,
            demarche: "papiers".to_string(),
            revocation_date: revoked,
        }
    }

    #[test]
    fn test_authorization_active_requires_unexpired_and_unrevoked() {
        let now = Utc::now();
        let expiration = now + Duration::days(10);

        let active = authorization(Uuid::new_v4(), None);
        assert!(active.is_active(expiration, now));

        // 已撤销
        let revoked = authorization(Uuid::new_v4(), Some(now - Duration::hours(1)));
        assert!(!revoked.is_active(expiration, now));

        // 委托书已过期
        assert!(!active.is_active(now - Duration::days(1), now));
    }

    #[test]
    fn test_mandate_active_is_or_over_children() {
        let now = Utc::now();
        let m = mandate(now + Duration::days(30));

        // 部分撤销、部分有效 ⇒ 委托书仍有效
        let auths = vec![
            authorization(m.id, Some(now - Duration::hours(2))),
            authorization(m.id, None),
        ];
        assert!(mandate_is_active(&m, &auths, now));

        // 全部撤销 ⇒ 无效
        let auths = vec![
            authorization(m.id, Some(now - Duration::hours(2))),
            authorization(m.id, Some(now - Duration::hours(1))),
        ];
        assert!(!mandate_is_active(&m, &auths, now));

        // 没有任何授权 ⇒ 无效
        assert!(!mandate_is_active(&m, &[], now));

        // 过期 ⇒ 无效，即使有未撤销授权
        let expired = mandate(now - Duration::days(1));
        let auths = vec![authorization(expired.id, None)];
        assert!(!mandate_is_active(&expired, &auths, now));
    }

    #[test]
    fn test_mandate_revocation_date_defined_only_when_all_revoked() {
        let now = Utc::now();
        let first = now - Duration::minutes(10);
        let last = now - Duration::minutes(5);

        let all_revoked = vec![
            authorization(Uuid::new_v4(), Some(first)),
            authorization(Uuid::new_v4(), Some(last)),
        ];
        assert_eq!(mandate_revocation_date(&all_revoked), Some(last));

        let partially_revoked = vec![
            authorization(Uuid::new_v4(), Some(first)),
            authorization(Uuid::new_v4(), None),
        ];
        assert_eq!(mandate_revocation_date(&partially_revoked), None);

        assert_eq!(mandate_revocation_date(&[]), None);
    }

    #[test]
    fn test_was_separately_revoked_window() {
        let now = Utc::now();

        // 相隔 10 秒：同一次逻辑撤销
        let a1 = authorization(Uuid::new_v4(), Some(now));
        let a2 = authorization(Uuid::new_v4(), Some(now + Duration::seconds(10)));
        let auths = vec![a1.clone(), a2.clone()];
        let revocation = mandate_revocation_date(&auths);
        assert_eq!(revocation, Some(now + Duration::seconds(10)));
        assert!(!a1.was_separately_revoked(revocation));
        assert!(!a2.was_separately_revoked(revocation));

        // 相隔 60 秒：第一条属于独立撤销
        let b1 = authorization(Uuid::new_v4(), Some(now));
        let b2 = authorization(Uuid::new_v4(), Some(now + Duration::seconds(60)));
        let auths = vec![b1.clone(), b2.clone()];
        let revocation = mandate_revocation_date(&auths);
        assert!(b1.was_separately_revoked(revocation));
        assert!(!b2.was_separately_revoked(revocation));
    }

    #[test]
    fn test_was_separately_revoked_without_mandate_revocation() {
        let now = Utc::now();

        // 委托书没有推导撤销时间时，已撤销的授权视为独立撤销
        let revoked = authorization(Uuid::new_v4(), Some(now));
        assert!(revoked.was_separately_revoked(None));

        // 未撤销的授权恒为 false
        let active = authorization(Uuid::new_v4(), None);
        assert!(!active.was_separately_revoked(None));
        assert!(!active.was_separately_revoked(Some(now)));
    }

    #[test]
    fn test_duration_keyword_days() {
        let now = Utc::now();
        assert_eq!(DurationKeyword::Short.days(now), 1);
        assert_eq!(DurationKeyword::Month.days(now), 31);
        assert_eq!(DurationKeyword::Semester.days(now), 182);
        assert_eq!(DurationKeyword::Long.days(now), 365);

        // 遗留关键字：截止日已过，天数钳制为 0
        assert_eq!(DurationKeyword::Eus0320.days(now), 0);

        let before = Utc.with_ymd_and_hms(2020, 7, 1, 0, 0, 0).unwrap();
        assert!(DurationKeyword::Eus0320.days(before) > 0);
    }

    #[test]
    fn test_duration_keyword_expiration() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            DurationKeyword::Long.expiration(from),
            Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap()
        );
        assert_eq!(
            DurationKeyword::Eus0320.expiration(from),
            state_of_emergency_2020_last_day()
        );
    }

    #[test]
    fn test_long_lived_keywords() {
        assert!(DurationKeyword::Long.is_long_lived());
        assert!(DurationKeyword::Semester.is_long_lived());
        assert!(!DurationKeyword::Short.is_long_lived());
        assert!(!DurationKeyword::Month.is_long_lived());
        assert!(!DurationKeyword::Eus0320.is_long_lived());
    }

    #[test]
    fn test_consent_invariants() {
        // 远程委托必须指定同意方式
        assert!(Mandate::validate_consent_invariants(true, None, "", None).is_err());

        // SMS 方式必须有关联标签和手机号
        assert!(Mandate::validate_consent_invariants(
            true,
            Some(ConsentMethod::Sms),
            "",
            Some("+33612345678")
        )
        .is_err());
        assert!(Mandate::validate_consent_invariants(
            true,
            Some(ConsentMethod::Sms),
            "some-tag",
            None
        )
        .is_err());
        assert!(Mandate::validate_consent_invariants(
            true,
            Some(ConsentMethod::Sms),
            "some-tag",
            Some("+33612345678")
        )
        .is_ok());

        // Legacy 远程方式不要求标签
        assert!(
            Mandate::validate_consent_invariants(true, Some(ConsentMethod::Legacy), "", None)
                .is_ok()
        );

        // 本地委托没有额外要求
        assert!(Mandate::validate_consent_invariants(false, None, "", None).is_ok());
    }

    #[test]
    fn test_duration_keyword_serde_names() {
        assert_eq!(
            serde_json::to_string(&DurationKeyword::Eus0320).unwrap(),
            "\"EUS_03_20\""
        );
        assert_eq!(serde_json::to_string(&DurationKeyword::Long).unwrap(), "\"LONG\"");
        let parsed: DurationKeyword = serde_json::from_str("\"SEMESTER\"").unwrap();
        assert_eq!(parsed, DurationKeyword::Semester);
    }
}
