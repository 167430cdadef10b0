//! Mandate repository (委托书数据访问)

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::mandate::{Authorization, Mandate};

pub struct MandateRepository {
    db: PgPool,
}

impl MandateRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 在事务内插入委托书
    pub async fn insert_mandate_with<'e, E>(
        executor: E,
        mandate: &Mandate,
    ) -> Result<(), AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO mandates (
                id, organisation_id, usager_id, creation_date, expiration_date,
                duree_keyword, is_remote, remote_consent_method, consent_request_id,
                template_path
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(mandate.id)
        .bind(mandate.organisation_id)
        .bind(mandate.usager_id)
        .bind(mandate.creation_date)
        .bind(mandate.expiration_date)
        .bind(mandate.duree_keyword)
        .bind(mandate.is_remote)
        .bind(mandate.remote_consent_method)
        .bind(&mandate.consent_request_id)
        .bind(&mandate.template_path)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// 在事务内插入授权
    pub async fn insert_authorization_with<'e, E>(
        executor: E,
        authorization: &Authorization,
    ) -> Result<(), AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO autorisations (id, mandat_id, demarche, revocation_date)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(authorization.id)
        .bind(authorization.mandat_id)
        .bind(&authorization.demarche)
        .bind(authorization.revocation_date)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn find_mandate(&self, id: Uuid) -> Result<Option<Mandate>, AppError> {
        let mandate = sqlx::query_as::<_, Mandate>("SELECT * FROM mandates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(mandate)
    }

    pub async fn find_authorizations(
        &self,
        mandat_id: Uuid,
    ) -> Result<Vec<Authorization>, AppError> {
        let authorizations = sqlx::query_as::<_, Authorization>(
            "SELECT * FROM autorisations WHERE mandat_id = $1 ORDER BY demarche",
        )
        .bind(mandat_id)
        .fetch_all(&self.db)
        .await?;

        Ok(authorizations)
    }

    pub async fn find_authorization(
        &self,
        id: Uuid,
    ) -> Result<Option<Authorization>, AppError> {
        let authorization =
            sqlx::query_as::<_, Authorization>("SELECT * FROM autorisations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        Ok(authorization)
    }

    /// 在事务内撤销单条授权
    ///
    /// 只撤销尚未撤销的记录，返回是否真的发生了撤销
    pub async fn revoke_authorization_with<'e, E>(
        executor: E,
        id: Uuid,
        revocation_date: DateTime<Utc>,
    ) -> Result<bool, AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE autorisations SET revocation_date = $1 WHERE id = $2 AND revocation_date IS NULL",
        )
        .bind(revocation_date)
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 在事务内撤销委托书的全部未撤销授权，返回被撤销的授权
    pub async fn revoke_all_authorizations_with<'e, E>(
        executor: E,
        mandat_id: Uuid,
        revocation_date: DateTime<Utc>,
    ) -> Result<Vec<Authorization>, AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let revoked = sqlx::query_as::<_, Authorization>(
            r#"
            UPDATE autorisations SET revocation_date = $1
            WHERE mandat_id = $2 AND revocation_date IS NULL
            RETURNING *
            "#,
        )
        .bind(revocation_date)
        .bind(mandat_id)
        .fetch_all(executor)
        .await?;

        Ok(revoked)
    }

    /// 在事务内变更委托书所属机构
    pub async fn update_organisation_with<'e, E>(
        executor: E,
        mandat_id: Uuid,
        organisation_id: Uuid,
    ) -> Result<bool, AppError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE mandates SET organisation_id = $1 WHERE id = $2")
            .bind(organisation_id)
            .bind(mandat_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 查找即将到期的长期委托书
    ///
    /// 窗口为 [now, now + window_days)，按（机构，过期时间）排序，
    /// 供外部通知任务消费
    pub async fn find_soon_expired(&self, window_days: i64) -> Result<Vec<Mandate>, AppError> {
        let mandates = sqlx::query_as::<_, Mandate>(
            r#"
            SELECT * FROM mandates
            WHERE duree_keyword IN ('long', 'semester')
                AND expiration_date >= NOW()
                AND expiration_date < NOW() + INTERVAL '1 day' * $1
            ORDER BY organisation_id, expiration_date
            "#,
        )
        .bind(window_days)
        .fetch_all(&self.db)
        .await?;

        Ok(mandates)
    }
}
