//! 数据访问层

pub mod journal_repo;
pub mod mandate_repo;

pub use journal_repo::{JournalFilters, JournalRepository};
pub use mandate_repo::MandateRepository;
