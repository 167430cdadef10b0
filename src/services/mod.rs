//! 业务服务层

pub mod consent_service;
pub mod journal_service;
pub mod mandate_service;

pub use consent_service::{
    is_consent_message, CallbackOutcome, ConsentService, ConsentStatus, StartConsentRequest,
    StartedConsent,
};
pub use journal_service::JournalService;
pub use mandate_service::MandateService;
