//! Business logic for the pickup engine.
//!
//! - [`allocation`] - Locker search, order creation and drop-off allocation
//! - [`lifecycle`] - Transition table, merchant cancel and expiry sweep
//! - [`ingestion`] - Provider webhook handling
//! - [`notifications`] - Outbox delivery over SMS and email
//! - [`rates`] - Checkout rate quotes

pub mod allocation;
pub mod email;
pub mod ingestion;
pub mod lifecycle;
pub mod notifications;
pub mod rates;
pub mod sms;

pub use allocation::{Allocation, AllocationError, AllocationService, LockerCandidate};
pub use email::EmailService;
pub use ingestion::{IngestError, Ingested, IngestionService};
pub use lifecycle::{EventOutcome, LifecycleError, LifecycleService, NotificationPolicy, SweepReport};
pub use notifications::{
    DispatchOutcome, EmailSender, NotificationDispatcher, NotificationError, RedeliveryReport,
    SmsSender,
};
pub use rates::{RateQuoteResponder, RateResponse};
pub use sms::SmsService;
