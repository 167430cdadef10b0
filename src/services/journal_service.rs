//! 审计日志服务
//! 所有领域事件都经由本服务写入仅插入的日志账本

use sqlx::PgPool;
use tracing::instrument;

use crate::error::Result;
use crate::models::journal::{JournalEntry, NewJournalEntry, SmsEventParams};
use crate::repository::{JournalFilters, JournalRepository};

pub struct JournalService {
    db: PgPool,
}

impl JournalService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn repo(&self) -> JournalRepository {
        JournalRepository::new(self.db.clone())
    }

    /// 写入一条日志
    ///
    /// 必填字段组合校验失败会同步拒绝整条写入
    pub async fn append(&self, entry: &NewJournalEntry) -> Result<JournalEntry> {
        self.repo().insert(entry).await
    }

    #[instrument(skip(self, params))]
    pub async fn log_consent_request_sent(
        &self,
        params: &SmsEventParams<'_>,
    ) -> Result<JournalEntry> {
        self.append(&NewJournalEntry::sms_consent_request_sent(params)?)
            .await
    }

    #[instrument(skip(self, params))]
    pub async fn log_consent_received(
        &self,
        params: &SmsEventParams<'_>,
    ) -> Result<JournalEntry> {
        self.append(&NewJournalEntry::sms_consent_received(params)?)
            .await
    }

    #[instrument(skip(self, params))]
    pub async fn log_denial_received(&self, params: &SmsEventParams<'_>) -> Result<JournalEntry> {
        self.append(&NewJournalEntry::sms_denial_received(params)?)
            .await
    }

    #[instrument(skip(self, params))]
    pub async fn log_recap_sent(&self, params: &SmsEventParams<'_>) -> Result<JournalEntry> {
        self.append(&NewJournalEntry::sms_recap_sent(params)?).await
    }

    /// 按 (手机号, 关联标签) 查找已发出的同意请求
    pub async fn find_consent_requests(
        &self,
        user_phone: &str,
        consent_request_id: &str,
    ) -> Result<Vec<JournalEntry>> {
        self.repo()
            .find_consent_requests(user_phone, consent_request_id)
            .await
    }

    /// 按 (手机号, 关联标签) 查找终态回复
    pub async fn find_consent_or_denial(
        &self,
        user_phone: &str,
        consent_request_id: &str,
    ) -> Result<Vec<JournalEntry>> {
        self.repo()
            .find_consent_or_denial(user_phone, consent_request_id)
            .await
    }

    /// 查询日志
    pub async fn query_entries(
        &self,
        filters: &JournalFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>> {
        self.repo().query(filters, limit, offset).await
    }

    /// 统计日志条数
    pub async fn count_entries(&self, filters: &JournalFilters) -> Result<i64> {
        self.repo().count(filters).await
    }
}
