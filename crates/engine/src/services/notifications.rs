//! Customer notifications for pickup transitions.
//!
//! Outbox rows are written in the same unit of work as the transition that
//! owes them. [`NotificationDispatcher::deliver`] claims a row, sends it on
//! every channel the customer can be reached on, and records the result.
//! A claimed row is never sent twice; failed rows wait for
//! [`NotificationDispatcher::redeliver`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use locker_pickup_core::{Email, NotificationId, NotificationKind, PhoneNumber};

use crate::db::{PickupStore, RepositoryError};
use crate::models::{DeliveryResult, PickupNotification, PickupOrder};

/// Errors from a notification channel.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("SMS delivery failed: {0}")]
    Sms(String),
}

/// Sends text messages.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &PhoneNumber, body: &str) -> Result<(), NotificationError>;
}

/// Sends notification emails.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        to: &Email,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError>;
}

/// Rendered content of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub subject: String,
    pub greeting: String,
    pub body: String,
    /// Link the customer follows to open the locker.
    pub action_link: Option<String>,
}

impl NotificationMessage {
    /// Compose the message for `kind` about `order`.
    #[must_use]
    pub fn compose(kind: NotificationKind, order: &PickupOrder, hold_period: chrono::Duration) -> Self {
        let reference = &order.external_order_id;
        let location = order.location_name.as_deref().unwrap_or("your pickup locker");
        let greeting = if order.customer.name.trim().is_empty() {
            "Hello,".to_string()
        } else {
            format!("Hi {},", order.customer.name.trim())
        };

        match kind {
            NotificationKind::PickupReady => {
                let deadline = order
                    .ready_at
                    .map(|ready| format!(" Please collect it by {}.", format_deadline(ready + hold_period)))
                    .unwrap_or_default();
                Self {
                    subject: format!("Order {reference} is ready for pickup"),
                    greeting,
                    body: format!("Your order {reference} is waiting at {location}.{deadline}"),
                    action_link: order.pickup_link.clone(),
                }
            }
            NotificationKind::PickedUp => Self {
                subject: format!("Order {reference} picked up"),
                greeting,
                body: format!("Your order {reference} was collected from {location}. Thanks!"),
                action_link: None,
            },
            NotificationKind::Cancelled => Self {
                subject: format!("Locker pickup for order {reference} cancelled"),
                greeting,
                body: format!(
                    "The locker pickup for order {reference} was cancelled. The store will be in touch about next steps."
                ),
                action_link: None,
            },
            NotificationKind::Expired => Self {
                subject: format!("Pickup window for order {reference} has ended"),
                greeting,
                body: format!(
                    "Order {reference} was not collected from {location} in time and is being returned to the store."
                ),
                action_link: None,
            },
        }
    }

    /// Single-part text for SMS.
    #[must_use]
    pub fn sms_text(&self) -> String {
        match &self.action_link {
            Some(link) => format!("{} Open the locker: {link}", self.body),
            None => self.body.clone(),
        }
    }
}

fn format_deadline(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %H:%M UTC").to_string()
}

/// What one [`NotificationDispatcher::deliver`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered on at least one channel.
    Sent,
    /// Nothing was delivered; the row is left for redelivery.
    Failed(String),
    /// Already sent, or another dispatcher holds the claim.
    Skipped,
}

/// Result of a redelivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Delivers outbox notifications over SMS and email.
///
/// Either channel may be absent. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn PickupStore>,
    sms: Option<Arc<dyn SmsSender>>,
    email: Option<Arc<dyn EmailSender>>,
    hold_period: chrono::Duration,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn PickupStore>,
        sms: Option<Arc<dyn SmsSender>>,
        email: Option<Arc<dyn EmailSender>>,
        hold_period: chrono::Duration,
    ) -> Self {
        if sms.is_none() && email.is_none() {
            tracing::warn!("No notification channel configured; notifications will fail");
        }
        Self {
            store,
            sms,
            email,
            hold_period,
        }
    }

    /// Deliver one outbox notification. Never fails; the outcome is recorded
    /// on the row and returned for logging.
    #[instrument(skip(self))]
    pub async fn deliver(&self, id: NotificationId) -> DispatchOutcome {
        let notification = match self.store.claim_notification(id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                tracing::debug!("Notification already sent or claimed");
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim notification");
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let result = self.send(&notification).await;

        if let Err(e) = self.store.finish_notification(id, &result).await {
            tracing::error!(error = %e, "Failed to record notification result");
        }

        match result {
            DeliveryResult::Sent => {
                tracing::info!(kind = %notification.kind, order_id = %notification.order_id, "Notification sent");
                DispatchOutcome::Sent
            }
            DeliveryResult::Failed(reason) => {
                tracing::warn!(
                    kind = %notification.kind,
                    order_id = %notification.order_id,
                    reason = %reason,
                    "Notification not delivered"
                );
                DispatchOutcome::Failed(reason)
            }
        }
    }

    /// Retry notifications that were never delivered.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the outbox cannot be read.
    pub async fn redeliver(&self, limit: i64) -> Result<RedeliveryReport, RepositoryError> {
        let pending = self.store.undelivered_notifications(limit).await?;
        let mut report = RedeliveryReport::default();

        for notification in pending {
            match self.deliver(notification.id).await {
                DispatchOutcome::Sent => {
                    report.attempted += 1;
                    report.sent += 1;
                }
                DispatchOutcome::Failed(_) => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                DispatchOutcome::Skipped => {}
            }
        }

        tracing::info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "Notification redelivery finished"
        );
        Ok(report)
    }

    async fn send(&self, notification: &PickupNotification) -> DeliveryResult {
        let order = match self.store.order(notification.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return DeliveryResult::Failed("order not found".to_string()),
            Err(e) => return DeliveryResult::Failed(e.to_string()),
        };

        let message = NotificationMessage::compose(notification.kind, &order, self.hold_period);
        let mut delivered = false;
        let mut errors = Vec::new();

        if let (Some(sms), Some(phone)) = (&self.sms, &order.customer.phone) {
            match sms.send_sms(phone, &message.sms_text()).await {
                Ok(()) => delivered = true,
                Err(e) => errors.push(e.to_string()),
            }
        }

        if let (Some(email), Some(address)) = (&self.email, &order.customer.email) {
            match email.send_email(address, &message).await {
                Ok(()) => delivered = true,
                Err(e) => errors.push(e.to_string()),
            }
        }

        if delivered {
            DeliveryResult::Sent
        } else if errors.is_empty() {
            DeliveryResult::Failed("no reachable channel".to_string())
        } else {
            DeliveryResult::Failed(errors.join("; "))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use locker_pickup_core::{CustomerContact, EventSource, EventType, SizeClass};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewLockerEvent, NewOrder};
    use crate::services::lifecycle::NotificationPolicy;

    /// Records every message; fails while `fail` is set.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub sent: Mutex<Vec<String>>,
        pub fail: AtomicBool,
    }

    #[async_trait]
    impl SmsSender for RecordingChannel {
        async fn send_sms(&self, to: &PhoneNumber, body: &str) -> Result<(), NotificationError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotificationError::Sms("gateway down".to_string()));
            }
            self.sent.lock().expect("lock").push(format!("{to}: {body}"));
            Ok(())
        }
    }

    #[async_trait]
    impl EmailSender for RecordingChannel {
        async fn send_email(
            &self,
            to: &Email,
            message: &NotificationMessage,
        ) -> Result<(), NotificationError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotificationError::Email("smtp down".to_string()));
            }
            self.sent.lock().expect("lock").push(format!("{to}: {}", message.subject));
            Ok(())
        }
    }

    async fn ready_order(store: &MemoryStore, customer: CustomerContact) -> NotificationId {
        let install = store.insert_store("acme.myshopify.com", "cid", "secret").await;
        let order = store
            .create_order(NewOrder {
                store_id: install.id,
                external_order_id: "A-100".to_string(),
                customer,
                required_size: SizeClass::Small,
            })
            .await
            .expect("order")
            .order;

        let mut event = NewLockerEvent::internal(order.id, EventType::PickupReady, EventSource::Provider);
        event.access_link = Some("https://lockers.test/p/1".to_string());
        store
            .record_event(event, NotificationPolicy::default())
            .await
            .expect("record")
            .notification
            .expect("pickup_ready notification")
    }

    fn customer(email: bool, phone: bool) -> CustomerContact {
        CustomerContact {
            name: "Pat".to_string(),
            email: email.then(|| Email::parse("pat@example.com").expect("email")),
            phone: phone.then(|| PhoneNumber::parse("+15551234567").expect("phone")),
        }
    }

    fn dispatcher(
        store: &Arc<MemoryStore>,
        channel: &Arc<RecordingChannel>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::clone(store) as Arc<dyn PickupStore>,
            Some(Arc::clone(channel) as Arc<dyn SmsSender>),
            Some(Arc::clone(channel) as Arc<dyn EmailSender>),
            chrono::Duration::days(5),
        )
    }

    #[tokio::test]
    async fn test_sends_on_every_reachable_channel_once() {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let id = ready_order(&store, customer(true, true)).await;
        let dispatcher = dispatcher(&store, &channel);

        assert_eq!(dispatcher.deliver(id).await, DispatchOutcome::Sent);
        assert_eq!(dispatcher.deliver(id).await, DispatchOutcome::Skipped);

        let sent = channel.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("+15551234567: "));
        assert!(sent[0].contains("https://lockers.test/p/1"));
        assert_eq!(sent[1], "pat@example.com: Order A-100 is ready for pickup");
    }

    #[tokio::test]
    async fn test_unreachable_customer_is_failed_not_dropped() {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let id = ready_order(&store, customer(false, false)).await;

        let outcome = dispatcher(&store, &channel).deliver(id).await;

        assert_eq!(outcome, DispatchOutcome::Failed("no reachable channel".to_string()));
        let row = store.notification(id).await.expect("load").expect("row");
        assert_eq!(row.state, locker_pickup_core::DeliveryState::Failed);
        assert_eq!(row.last_error.as_deref(), Some("no reachable channel"));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_redelivered() {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        channel.fail.store(true, Ordering::SeqCst);
        let id = ready_order(&store, customer(true, false)).await;
        let dispatcher = dispatcher(&store, &channel);

        assert!(matches!(dispatcher.deliver(id).await, DispatchOutcome::Failed(_)));

        channel.fail.store(false, Ordering::SeqCst);
        let report = dispatcher.redeliver(10).await.expect("redeliver");

        assert_eq!(
            report,
            RedeliveryReport {
                attempted: 1,
                sent: 1,
                failed: 0
            }
        );
        assert_eq!(channel.sent.lock().expect("lock").len(), 1);
        assert_eq!(dispatcher.redeliver(10).await.expect("again").attempted, 0);
    }

    #[tokio::test]
    async fn test_one_channel_succeeding_is_enough() {
        let store = Arc::new(MemoryStore::new());
        let working = Arc::new(RecordingChannel::default());
        let broken = Arc::new(RecordingChannel::default());
        broken.fail.store(true, Ordering::SeqCst);
        let id = ready_order(&store, customer(true, true)).await;

        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&store) as Arc<dyn PickupStore>,
            Some(broken as Arc<dyn SmsSender>),
            Some(Arc::clone(&working) as Arc<dyn EmailSender>),
            chrono::Duration::days(5),
        );

        assert_eq!(dispatcher.deliver(id).await, DispatchOutcome::Sent);
    }

    #[test]
    fn test_ready_message_mentions_deadline_and_link() {
        let now = Utc::now();
        let order = PickupOrder {
            id: locker_pickup_core::OrderId::new(1),
            store_id: locker_pickup_core::StoreId::new(1),
            external_order_id: "A-100".to_string(),
            customer: CustomerContact::default(),
            required_size: SizeClass::Small,
            location_id: Some("loc-1".to_string()),
            location_name: Some("Main St Tower".to_string()),
            compartment_id: Some("B4".to_string()),
            allocated_at: Some(now),
            dropoff_request_id: Some("dr-1".to_string()),
            dropoff_link: None,
            pickup_request_id: None,
            pickup_link: Some("https://l.test/p".to_string()),
            status: locker_pickup_core::PickupStatus::ReadyForPickup,
            ready_at: Some(now),
            allocation_attempts: 1,
            last_allocation_error: None,
            created_at: now,
            updated_at: now,
        };

        let message = NotificationMessage::compose(
            NotificationKind::PickupReady,
            &order,
            chrono::Duration::days(5),
        );
        assert_eq!(message.greeting, "Hello,");
        assert!(message.body.contains("Main St Tower"));
        assert!(message.body.contains("Please collect it by"));
        assert!(message.sms_text().ends_with("Open the locker: https://l.test/p"));

        let expired = NotificationMessage::compose(NotificationKind::Expired, &order, chrono::Duration::days(5));
        assert_eq!(expired.action_link, None);
    }
}
