//! 委托书服务
//! 委托书/授权的创建、推导状态、撤销、使用与跨机构转移

use chrono::Utc;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AttestationConfig;
use crate::error::{AppError, Result};
use crate::models::journal::NewJournalEntry;
use crate::models::mandate::{
    Authorization, CreateMandateRequest, Mandate, MandateResponse, TransferMandatesResponse,
};
use crate::models::phone::normalize_e164;
use crate::repository::{JournalRepository, MandateRepository};

/// 证明哈希的输入：把委托书的法律要件绑定到一次同意采集事件上
#[derive(Debug)]
pub struct AttestationData<'a> {
    pub aidant_id: Uuid,
    pub usager_id: Uuid,
    pub demarches: &'a [String],
    /// ISO 日期（不含时间）
    pub expiration_date: String,
    /// ISO 日期（不含时间）
    pub creation_date: String,
    pub organisation_id: Uuid,
    pub template_path: &'a str,
}

/// 计算证明哈希
///
/// 字段按键名排序后以分号连接，末尾拼接盐值，取 SHA-256 十六进制。
/// 事项列表先排序，哈希对事项顺序不敏感
pub fn generate_attestation_hash(data: &AttestationData<'_>, salt: &str) -> String {
    let mut demarches: Vec<&str> = data.demarches.iter().map(String::as_str).collect();
    demarches.sort_unstable();

    let mut fields = BTreeMap::new();
    fields.insert("aidant_id", data.aidant_id.to_string());
    fields.insert("creation_date", data.creation_date.clone());
    fields.insert("demarches_list", demarches.join(","));
    fields.insert("expiration_date", data.expiration_date.clone());
    fields.insert("organisation_id", data.organisation_id.to_string());
    fields.insert("template_path", data.template_path.to_string());
    fields.insert("usager_id", data.usager_id.to_string());

    let joined: Vec<String> = fields.into_values().collect();
    let payload = format!("{}{}", joined.join(";"), salt);

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct MandateService {
    db: PgPool,
    attestation: AttestationConfig,
}

impl MandateService {
    pub fn new(db: PgPool, attestation: AttestationConfig) -> Self {
        Self { db, attestation }
    }

    fn mandates(&self) -> MandateRepository {
        MandateRepository::new(self.db.clone())
    }

    fn journal(&self) -> JournalRepository {
        JournalRepository::new(self.db.clone())
    }

    /// 创建委托书及其全部授权
    ///
    /// 委托书、授权与对应日志条目在同一事务内落库。
    /// SMS 同意方式下要求 (手机号, 关联标签) 已有同意回执
    #[instrument(skip(self, request))]
    pub async fn create_mandate(&self, request: CreateMandateRequest) -> Result<MandateResponse> {
        let user_phone = match request.usager_phone.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(normalize_e164(raw)?),
            _ => None,
        };

        Mandate::validate_consent_invariants(
            request.is_remote,
            request.remote_consent_method,
            &request.consent_request_id,
            user_phone.as_deref(),
        )?;

        // 阻塞式同意方式：必须先拿到公民的同意回执
        if let (Some(method), Some(phone)) = (request.remote_consent_method, user_phone.as_deref())
        {
            if method.is_blocked() {
                let consents = self
                    .journal()
                    .find_consent_received(phone, &request.consent_request_id)
                    .await?;
                if consents.is_empty() {
                    return Err(AppError::BadRequest(
                        "the citizen has not yet consented to this mandate".to_string(),
                    ));
                }
            }
        }

        let now = Utc::now();
        let expiration_date = request.duree_keyword.expiration(now);
        let duree_days = request.duree_keyword.days(now) as i32;

        let mandate = Mandate {
            id: Uuid::new_v4(),
            organisation_id: request.organisation_id,
            usager_id: request.usager_id,
            creation_date: now,
            expiration_date,
            duree_keyword: request.duree_keyword,
            is_remote: request.is_remote,
            remote_consent_method: request.remote_consent_method,
            consent_request_id: request.consent_request_id.clone(),
            template_path: Some(self.attestation.template_path.clone()),
        };

        let attestation_hash = generate_attestation_hash(
            &AttestationData {
                aidant_id: request.aidant_id,
                usager_id: request.usager_id,
                demarches: &request.demarches,
                expiration_date: expiration_date.date_naive().to_string(),
                creation_date: now.date_naive().to_string(),
                organisation_id: request.organisation_id,
                template_path: &self.attestation.template_path,
            },
            self.attestation.hash_salt.expose_secret(),
        );

        let demarche_list = request.demarches.join(",");

        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::database("Failed to begin transaction")
        })?;

        MandateRepository::insert_mandate_with(&mut *tx, &mandate).await?;

        let attestation_entry = NewJournalEntry::attestation_created(
            request.aidant_id,
            mandate.organisation_id,
            mandate.usager_id,
            mandate.id,
            &demarche_list,
            duree_days,
            &attestation_hash,
            mandate.is_remote,
            mandate.remote_consent_method,
            user_phone.as_deref(),
            blank_to_none(&mandate.consent_request_id),
        )?;
        JournalRepository::insert_with(&mut *tx, &attestation_entry).await?;

        let mut authorizations = Vec::with_capacity(request.demarches.len());
        for demarche in &request.demarches {
            let authorization = Authorization {
                id: Uuid::new_v4(),
                mandat_id: mandate.id,
                demarche: demarche.clone(),
                revocation_date: None,
            };
            MandateRepository::insert_authorization_with(&mut *tx, &authorization).await?;

            let entry = NewJournalEntry::autorisation_created(
                request.aidant_id,
                mandate.organisation_id,
                mandate.usager_id,
                authorization.id,
                demarche,
                duree_days,
                mandate.is_remote,
            )?;
            JournalRepository::insert_with(&mut *tx, &entry).await?;

            authorizations.push(authorization);
        }

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit mandate creation");
            AppError::database("Failed to commit mandate creation")
        })?;

        info!(
            mandat_id = %mandate.id,
            organisation_id = %mandate.organisation_id,
            demarches = %demarche_list,
            "Mandate created"
        );

        Ok(MandateResponse::assemble(mandate, authorizations))
    }

    /// 续签委托书
    ///
    /// 以既有委托书的公民、机构和事项列表创建一个新的委托书，
    /// 续期流程的发起先落一条 init_mandat 日志。续期走当面确认，
    /// 远程续期需要重新走同意协议
    #[instrument(skip(self))]
    pub async fn renew_mandate(
        &self,
        id: Uuid,
        aidant_id: Uuid,
        duree_keyword: crate::models::mandate::DurationKeyword,
    ) -> Result<MandateResponse> {
        let repo = self.mandates();
        let old = repo
            .find_mandate(id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;
        let old_authorizations = repo.find_authorizations(id).await?;
        if old_authorizations.is_empty() {
            return Err(AppError::BadRequest(
                "mandate has no authorization to renew".to_string(),
            ));
        }

        let demarches: Vec<String> = old_authorizations
            .into_iter()
            .map(|a| a.demarche)
            .collect();
        let duree_days = duree_keyword.days(Utc::now()) as i32;

        let entry = NewJournalEntry::init_mandat(
            aidant_id,
            old.organisation_id,
            old.usager_id,
            &demarches.join(","),
            duree_days,
            false,
            None,
            None,
            None,
        )?;
        self.journal().insert(&entry).await?;

        self.create_mandate(CreateMandateRequest {
            organisation_id: old.organisation_id,
            aidant_id,
            usager_id: old.usager_id,
            usager_phone: None,
            demarches,
            duree_keyword,
            is_remote: false,
            remote_consent_method: None,
            consent_request_id: String::new(),
        })
        .await
    }

    /// 读取委托书及其推导状态
    #[instrument(skip(self))]
    pub async fn get_mandate(&self, id: Uuid) -> Result<MandateResponse> {
        let repo = self.mandates();
        let mandate = repo
            .find_mandate(id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;
        let authorizations = repo.find_authorizations(id).await?;

        Ok(MandateResponse::assemble(mandate, authorizations))
    }

    /// 撤销单条授权
    ///
    /// 撤销时间写入与 cancel_autorisation 日志条目同事务提交
    #[instrument(skip(self))]
    pub async fn revoke_authorization(&self, id: Uuid, aidant_id: Uuid) -> Result<()> {
        let repo = self.mandates();
        let authorization = repo
            .find_authorization(id)
            .await?
            .ok_or_else(|| AppError::not_found("authorization"))?;
        let mandate = repo
            .find_mandate(authorization.mandat_id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;

        let now = Utc::now();
        // 撤销天数沿用人类可读口径：起止日期差 + 1
        let duree_days =
            ((mandate.expiration_date - mandate.creation_date).num_days() + 1) as i32;

        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::database("Failed to begin transaction")
        })?;

        let revoked =
            MandateRepository::revoke_authorization_with(&mut *tx, id, now).await?;
        if !revoked {
            return Err(AppError::BadRequest(
                "authorization is already revoked".to_string(),
            ));
        }

        let entry = NewJournalEntry::autorisation_cancelled(
            aidant_id,
            mandate.organisation_id,
            mandate.usager_id,
            id,
            &authorization.demarche,
            duree_days,
        )?;
        JournalRepository::insert_with(&mut *tx, &entry).await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit authorization revocation");
            AppError::database("Failed to commit authorization revocation")
        })?;

        info!(autorisation_id = %id, mandat_id = %mandate.id, "Authorization revoked");
        Ok(())
    }

    /// 撤销整个委托书（其下全部未撤销授权）
    #[instrument(skip(self))]
    pub async fn revoke_mandate(&self, id: Uuid, aidant_id: Uuid) -> Result<()> {
        let mandate = self
            .mandates()
            .find_mandate(id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;

        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::database("Failed to begin transaction")
        })?;

        let revoked =
            MandateRepository::revoke_all_authorizations_with(&mut *tx, id, now).await?;
        if revoked.is_empty() {
            return Err(AppError::BadRequest(
                "mandate has no active authorization left".to_string(),
            ));
        }

        let entry = NewJournalEntry::mandat_cancelled(
            aidant_id,
            mandate.organisation_id,
            mandate.usager_id,
            mandate.id,
        )?;
        JournalRepository::insert_with(&mut *tx, &entry).await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit mandate revocation");
            AppError::database("Failed to commit mandate revocation")
        })?;

        info!(mandat_id = %id, revoked = revoked.len(), "Mandate revoked");
        Ok(())
    }

    /// 记录帮办使用授权办理事项
    #[instrument(skip(self))]
    pub async fn use_authorization(&self, id: Uuid, aidant_id: Uuid) -> Result<()> {
        let repo = self.mandates();
        let authorization = repo
            .find_authorization(id)
            .await?
            .ok_or_else(|| AppError::not_found("authorization"))?;
        let mandate = repo
            .find_mandate(authorization.mandat_id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;

        if !authorization.is_active(mandate.expiration_date, Utc::now()) {
            return Err(AppError::BadRequest(
                "authorization is expired or revoked".to_string(),
            ));
        }

        let entry = NewJournalEntry::autorisation_used(
            aidant_id,
            mandate.organisation_id,
            mandate.usager_id,
            id,
            &authorization.demarche,
        )?;
        self.journal().insert(&entry).await?;

        Ok(())
    }

    /// 即将到期的长期委托书，供外部通知任务消费
    pub async fn find_soon_expired(&self, window_days: i64) -> Result<Vec<Mandate>> {
        self.mandates().find_soon_expired(window_days).await
    }

    /// 跨机构转移委托书
    ///
    /// 逐条独立事务：某条失败只影响自身，之前已转移的保持转移后状态
    #[instrument(skip(self, mandate_ids))]
    pub async fn transfer_to_organisation(
        &self,
        organisation_id: Uuid,
        mandate_ids: &[Uuid],
    ) -> Result<TransferMandatesResponse> {
        let mut failed_ids = Vec::new();

        for &mandate_id in mandate_ids {
            if let Err(e) = self.transfer_one(organisation_id, mandate_id).await {
                error!(
                    mandat_id = %mandate_id,
                    error = %e,
                    "An error happened while trying to transfer a mandate to another organisation"
                );
                failed_ids.push(mandate_id);
            }
        }

        Ok(TransferMandatesResponse {
            had_failures: !failed_ids.is_empty(),
            failed_ids,
        })
    }

    async fn transfer_one(&self, organisation_id: Uuid, mandate_id: Uuid) -> Result<()> {
        let mandate = self
            .mandates()
            .find_mandate(mandate_id)
            .await?
            .ok_or_else(|| AppError::not_found("mandate"))?;

        // 权威创建记录唯一时才重算哈希；多条或缺失时无法确定应改写哪条
        let attestation_entries = self.journal().find_attestation_entries(mandate_id).await?;
        let attestation_entry = if attestation_entries.len() == 1 {
            attestation_entries.into_iter().next()
        } else {
            if !attestation_entries.is_empty() {
                warn!(
                    mandat_id = %mandate_id,
                    count = attestation_entries.len(),
                    "Multiple attestation entries found, skipping hash recomputation"
                );
            }
            None
        };

        let previous_organisation_id = mandate.organisation_id;
        let previous_hash = attestation_entry
            .as_ref()
            .and_then(|e| e.attestation_hash())
            .map(str::to_string);

        let mut tx = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            AppError::database("Failed to begin transaction")
        })?;

        MandateRepository::update_organisation_with(&mut *tx, mandate_id, organisation_id)
            .await?;

        let entry = NewJournalEntry::mandat_transferred(
            mandate_id,
            organisation_id,
            previous_organisation_id,
            previous_hash.as_deref(),
        )?;
        JournalRepository::insert_with(&mut *tx, &entry).await?;

        if let Some(attestation_entry) = attestation_entry {
            let aidant_id = attestation_entry
                .aidant_id()
                .ok_or_else(|| AppError::integrity("attestation entry has no aidant"))?;
            let demarches: Vec<String> = attestation_entry
                .demarche()
                .unwrap_or_default()
                .split(',')
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();

            let new_hash = generate_attestation_hash(
                &AttestationData {
                    aidant_id,
                    usager_id: mandate.usager_id,
                    demarches: &demarches,
                    expiration_date: mandate.expiration_date.date_naive().to_string(),
                    creation_date: mandate.creation_date.date_naive().to_string(),
                    organisation_id,
                    template_path: mandate.template_path.as_deref().unwrap_or_default(),
                },
                self.attestation.hash_salt.expose_secret(),
            );

            JournalRepository::update_attestation_hash_with(
                &mut *tx,
                attestation_entry.id(),
                &new_hash,
            )
            .await?;
        }

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit mandate transfer");
            AppError::database("Failed to commit mandate transfer")
        })?;

        info!(
            mandat_id = %mandate_id,
            from = %previous_organisation_id,
            to = %organisation_id,
            "Mandate transferred"
        );
        Ok(())
    }
}

fn blank_to_none(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
