//! Journal repository (审计日志数据访问)
//!
//! 只提供插入和查询。唯一的例外是委托书转移时重算权威创建记录的
//! 证明哈希，对应一条限定在 create_attestation 动作上的专用语句

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::journal::{JournalAction, JournalEntry, NewJournalEntry};

/// 日志查询过滤条件
#[derive(Debug, Default)]
pub struct JournalFilters {
    pub action: Option<JournalAction>,
    pub aidant_id: Option<Uuid>,
    pub usager_id: Option<Uuid>,
    pub mandat_id: Option<Uuid>,
    pub user_phone: Option<String>,
    pub consent_request_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

pub struct JournalRepository {
    db: PgPool,
}

impl JournalRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 写入一条日志（先校验必填字段组合）
    pub async fn insert(&self, entry: &NewJournalEntry) -> Result<JournalEntry, AppError> {
        Self::insert_with(&self.db, entry).await
    }

    /// 在给定执行器（连接池或事务）上写入一条日志
    ///
    /// 事务内追加时传 `&mut *tx`，与业务写入同提交同回滚
    pub async fn insert_with<'e, E>(
        executor: E,
        entry: &NewJournalEntry,
    ) -> Result<JournalEntry, AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        entry.validate()?;

        let action = entry
            .action()
            .ok_or_else(|| AppError::integrity("journal entry has no action"))?;

        let inserted = sqlx::query_as::<_, JournalEntry>(
            r#"
            INSERT INTO journal_entries (
                action, aidant_id, usager_id, mandat_id, autorisation_id, organisation_id,
                demarche, duree_days, attestation_hash, additional_information,
                is_remote_mandat, user_phone, consent_request_id, remote_consent_method
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(action)
        .bind(entry.aidant_id)
        .bind(entry.usager_id)
        .bind(entry.mandat_id)
        .bind(entry.autorisation_id)
        .bind(entry.organisation_id)
        .bind(&entry.demarche)
        .bind(entry.duree_days)
        .bind(&entry.attestation_hash)
        .bind(&entry.additional_information)
        .bind(entry.is_remote_mandat)
        .bind(&entry.user_phone)
        .bind(&entry.consent_request_id)
        .bind(entry.remote_consent_method)
        .fetch_one(executor)
        .await?;

        Ok(inserted)
    }

    /// 按 (手机号, 关联标签) 查找已发出的同意请求，按写入顺序返回
    pub async fn find_consent_requests(
        &self,
        user_phone: &str,
        consent_request_id: &str,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE action = 'remote_sms_consent_sent'
                AND user_phone = $1
                AND consent_request_id = $2
            ORDER BY id
            "#,
        )
        .bind(user_phone)
        .bind(consent_request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// 按 (手机号, 关联标签) 查找终态回复（同意或拒绝）
    ///
    /// 幂等检查用：同一关联键至多一条终态记录
    pub async fn find_consent_or_denial(
        &self,
        user_phone: &str,
        consent_request_id: &str,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE action IN ('remote_sms_consent_received', 'remote_sms_denial_received')
                AND user_phone = $1
                AND consent_request_id = $2
            ORDER BY id
            "#,
        )
        .bind(user_phone)
        .bind(consent_request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// 按 (手机号, 关联标签) 查找已收到的同意回复
    pub async fn find_consent_received(
        &self,
        user_phone: &str,
        consent_request_id: &str,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE action = 'remote_sms_consent_received'
                AND user_phone = $1
                AND consent_request_id = $2
            ORDER BY id
            "#,
        )
        .bind(user_phone)
        .bind(consent_request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// 查找委托书的权威创建记录（证明生成条目）
    pub async fn find_attestation_entries(
        &self,
        mandat_id: Uuid,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE action = 'create_attestation' AND mandat_id = $1
            ORDER BY id
            "#,
        )
        .bind(mandat_id)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// 委托书转移后重算证明哈希
    ///
    /// 唯一允许的日志改写，语句限定在 create_attestation 动作上
    pub async fn update_attestation_hash_with<'e, E>(
        executor: E,
        entry_id: i64,
        attestation_hash: &str,
    ) -> Result<bool, AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE journal_entries SET attestation_hash = $1
            WHERE id = $2 AND action = 'create_attestation'
            "#,
        )
        .bind(attestation_hash)
        .bind(entry_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 按过滤条件查询日志
    pub async fn query(
        &self,
        filters: &JournalFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, AppError> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"
            SELECT * FROM journal_entries
            WHERE ($1::journal_action IS NULL OR action = $1)
                AND ($2::uuid IS NULL OR aidant_id = $2)
                AND ($3::uuid IS NULL OR usager_id = $3)
                AND ($4::uuid IS NULL OR mandat_id = $4)
                AND ($5::text IS NULL OR user_phone = $5)
                AND ($6::text IS NULL OR consent_request_id = $6)
                AND ($7::timestamptz IS NULL OR creation_date >= $7)
                AND ($8::timestamptz IS NULL OR creation_date <= $8)
            ORDER BY id DESC
            LIMIT $9 OFFSET $10
            "#,
        )
        .bind(filters.action)
        .bind(filters.aidant_id)
        .bind(filters.usager_id)
        .bind(filters.mandat_id)
        .bind(&filters.user_phone)
        .bind(&filters.consent_request_id)
        .bind(filters.start_time)
        .bind(filters.end_time)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    /// 按过滤条件统计日志条数
    pub async fn count(&self, filters: &JournalFilters) -> Result<i64, AppError> {
        let count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) FROM journal_entries
            WHERE ($1::journal_action IS NULL OR action = $1)
                AND ($2::uuid IS NULL OR aidant_id = $2)
                AND ($3::uuid IS NULL OR usager_id = $3)
                AND ($4::uuid IS NULL OR mandat_id = $4)
                AND ($5::text IS NULL OR user_phone = $5)
                AND ($6::text IS NULL OR consent_request_id = $6)
                AND ($7::timestamptz IS NULL OR creation_date >= $7)
                AND ($8::timestamptz IS NULL OR creation_date <= $8)
            "#,
        )
        .bind(filters.action)
        .bind(filters.aidant_id)
        .bind(filters.usager_id)
        .bind(filters.mandat_id)
        .bind(&filters.user_phone)
        .bind(&filters.consent_request_id)
        .bind(filters.start_time)
        .bind(filters.end_time)
        .fetch_one(&self.db)
        .await?
        .get(0);

        Ok(count)
    }
}
