//! 模型验证单元测试
//!
//! 测试数据模型的验证功能和推导状态

use chrono::{Duration, TimeZone, Utc};
use mandate_system::models::journal::*;
use mandate_system::models::mandate::*;
use uuid::Uuid;
use validator::Validate;

// ==================== DurationKeyword 测试 ====================

#[test]
fn test_duration_keyword_serde_round_trip() {
    let keywords = vec![
        (DurationKeyword::Short, "\"SHORT\""),
        (DurationKeyword::Month, "\"MONTH\""),
        (DurationKeyword::Semester, "\"SEMESTER\""),
        (DurationKeyword::Long, "\"LONG\""),
        (DurationKeyword::Eus0320, "\"EUS_03_20\""),
    ];

    for (keyword, expected) in keywords {
        let json = serde_json::to_string(&keyword).unwrap();
        assert_eq!(json, expected);

        let deserialized: DurationKeyword = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, keyword);
    }
}

#[test]
fn test_consent_method_serde() {
    assert_eq!(serde_json::to_string(&ConsentMethod::Sms).unwrap(), "\"SMS\"");
    assert_eq!(
        serde_json::to_string(&ConsentMethod::Legacy).unwrap(),
        "\"LEGACY\""
    );

    let parsed: ConsentMethod = serde_json::from_str("\"SMS\"").unwrap();
    assert_eq!(parsed, ConsentMethod::Sms);
    assert!(parsed.is_blocked());
    assert!(!ConsentMethod::Legacy.is_blocked());
}

// ==================== 请求 DTO 测试 ====================

#[test]
fn test_create_mandate_request_deserialization() {
    let json = r#"{
        "organisation_id":"11111111-1111-1111-1111-111111111111",
        "aidant_id":"22222222-2222-2222-2222-222222222222",
        "usager_id":"33333333-3333-3333-3333-333333333333",
        "usager_phone":"0612345678",
        "demarches":["papiers","logement"],
        "duree_keyword":"LONG",
        "is_remote":true,
        "remote_consent_method":"SMS",
        "consent_request_id":"tag-1"
    }"#;
    let req: CreateMandateRequest = serde_json::from_str(json).unwrap();

    assert_eq!(req.demarches.len(), 2);
    assert_eq!(req.duree_keyword, DurationKeyword::Long);
    assert!(req.is_remote);
    assert_eq!(req.remote_consent_method, Some(ConsentMethod::Sms));
    assert_eq!(req.consent_request_id, "tag-1");
    assert!(req.validate().is_ok());
}

#[test]
fn test_create_mandate_request_minimal() {
    // 本地委托：远程相关字段都可省略
    let json = r#"{
        "organisation_id":"11111111-1111-1111-1111-111111111111",
        "aidant_id":"22222222-2222-2222-2222-222222222222",
        "usager_id":"33333333-3333-3333-3333-333333333333",
        "demarches":["papiers"],
        "duree_keyword":"SHORT"
    }"#;
    let req: CreateMandateRequest = serde_json::from_str(json).unwrap();

    assert!(!req.is_remote);
    assert!(req.remote_consent_method.is_none());
    assert_eq!(req.consent_request_id, "");
    assert!(req.validate().is_ok());
}

#[test]
fn test_create_mandate_request_rejects_empty_demarches() {
    let json = r#"{
        "organisation_id":"11111111-1111-1111-1111-111111111111",
        "aidant_id":"22222222-2222-2222-2222-222222222222",
        "usager_id":"33333333-3333-3333-3333-333333333333",
        "demarches":[],
        "duree_keyword":"SHORT"
    }"#;
    let req: CreateMandateRequest = serde_json::from_str(json).unwrap();
    assert!(req.validate().is_err());
}

#[test]
fn test_transfer_request_rejects_empty_ids() {
    let json = r#"{
        "organisation_id":"11111111-1111-1111-1111-111111111111",
        "mandate_ids":[]
    }"#;
    let req: TransferMandatesRequest = serde_json::from_str(json).unwrap();
    assert!(req.validate().is_err());
}

// ==================== 推导状态测试 ====================

fn mandate_with(expiration: chrono::DateTime<Utc>) -> Mandate {
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

fn authorization_with(mandat_id: Uuid, revoked: Option<chrono::DateTime<Utc>>) -> Authorization {
    Authorization {
        id: Uuid::new_v4(),
        mandat_id,
        demarche: "papiers".to_string(),
        revocation_date: revoked,
    }
}

#[test]
fn test_mandate_response_derived_fields() {
    let now = Utc::now();
    let mandate = mandate_with(now + Duration::days(30));
    let mandat_id = mandate.id;

    let active = authorization_with(mandat_id, None);
    let revoked = authorization_with(mandat_id, Some(now - Duration::hours(1)));

    let response = MandateResponse::assemble(mandate, vec![active.clone(), revoked.clone()]);

    // 部分撤销：委托书仍有效，推导撤销时间未定义
    assert!(response.is_active);
    assert!(response.revocation_date.is_none());

    let by_id = |id: Uuid| response.autorisations.iter().find(|a| a.id == id).unwrap();
    assert!(by_id(active.id).is_active);
    assert!(!by_id(revoked.id).is_active);
    // 没有推导撤销时间 ⇒ 已撤销的子授权算独立撤销
    assert!(by_id(revoked.id).was_separately_revoked);
}

#[test]
fn test_mandate_response_all_revoked() {
    let now = Utc::now();
    let mandate = mandate_with(now + Duration::days(30));
    let mandat_id = mandate.id;

    let first = authorization_with(mandat_id, Some(now - Duration::seconds(70)));
    let second = authorization_with(mandat_id, Some(now - Duration::seconds(60)));

    let response = MandateResponse::assemble(mandate, vec![first, second]);

    assert!(!response.is_active);
    // 推导撤销时间 = 最晚的子授权撤销时间
    assert_eq!(response.revocation_date, Some(now - Duration::seconds(60)));
    // 相隔 10 秒，同一次逻辑撤销
    assert!(response.autorisations.iter().all(|a| !a.was_separately_revoked));
}

#[test]
fn test_soon_expired_window_scenario() {
    // LONG 委托书，2024-01-01 创建，2025-01-01 过期
    let creation = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let mut mandate = mandate_with(Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap());
    mandate.creation_date = creation;

    assert!(mandate.duree_keyword.is_long_lived());

    // 2024-12-15 评估：距过期 17 天，落在 30 天窗口内
    let mid_december = Utc.with_ymd_and_hms(2024, 12, 15, 10, 0, 0).unwrap();
    assert!(mandate.expires_within(mid_december, 30));

    // 2024-11-01 评估：距过期 61 天，不在窗口内
    let november = Utc.with_ymd_and_hms(2024, 11, 1, 10, 0, 0).unwrap();
    assert!(!mandate.expires_within(november, 30));

    // 已过期的委托书不再进入窗口
    let after = Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap();
    assert!(!mandate.expires_within(after, 30));
}

// ==================== 日志条目测试 ====================

#[test]
fn test_journal_action_serde_names() {
    assert_eq!(
        serde_json::to_string(&JournalAction::RemoteSmsConsentReceived).unwrap(),
        "\"remote_sms_consent_received\""
    );
    assert_eq!(
        serde_json::to_string(&JournalAction::TransferMandat).unwrap(),
        "\"transfer_mandat\""
    );

    let parsed: JournalAction = serde_json::from_str("\"cancel_autorisation\"").unwrap();
    assert_eq!(parsed, JournalAction::CancelAutorisation);
}

#[test]
fn test_journal_action_as_str_matches_serde() {
    let actions = vec![
        JournalAction::CreateAttestation,
        JournalAction::CreateAutorisation,
        JournalAction::UseAutorisation,
        JournalAction::CancelAutorisation,
        JournalAction::CancelMandat,
        JournalAction::InitMandat,
        JournalAction::TransferMandat,
        JournalAction::RemoteSmsConsentSent,
        JournalAction::RemoteSmsConsentReceived,
        JournalAction::RemoteSmsDenialReceived,
        JournalAction::RemoteSmsRecapSent,
    ];

    for action in actions {
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, format!("\"{}\"", action.as_str()));
    }
}

#[test]
fn test_sms_journal_entry_required_fields_matrix() {
    let base = || SmsEventParams {
        aidant_id: Uuid::new_v4(),
        demarche: "papiers",
        duree_days: 365,
        user_phone: "+33612345678",
        consent_request_id: "tag-1",
        message: "yes",
    };

    assert!(NewJournalEntry::sms_consent_request_sent(&base()).is_ok());
    assert!(NewJournalEntry::sms_consent_received(&base()).is_ok());
    assert!(NewJournalEntry::sms_denial_received(&base()).is_ok());
    assert!(NewJournalEntry::sms_recap_sent(&base()).is_ok());

    let mut missing_phone = base();
    missing_phone.user_phone = "";
    assert!(NewJournalEntry::sms_consent_received(&missing_phone).is_err());

    let mut missing_tag = base();
    missing_tag.consent_request_id = "  ";
    assert!(NewJournalEntry::sms_consent_request_sent(&missing_tag).is_err());
}
