//! Notification sinks for domain events.
//!
//! The checkout core never decides how a shopper is told about something; it
//! hands every [`DomainEvent`] to a sink. Severity drives the log level, so a
//! cancelled payment is a warning and a failed one an error.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::events::{DomainEvent, Severity};

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &DomainEvent);

    fn notify_all(&self, events: Vec<DomainEvent>) {
        for event in &events {
            self.notify(event);
        }
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn notify(&self, event: &DomainEvent) { (**self).notify(event) }
}

/// Logs each event at the level its severity calls for.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: &DomainEvent) {
        let name = event.name();
        match event.severity() {
            Severity::Info => info!(event = %name, ?event, "storefront event"),
            Severity::Success => info!(event = %name, ?event, success = true, "storefront event"),
            Severity::Warning => warn!(event = %name, ?event, "storefront event"),
            Severity::Error => error!(event = %name, ?event, "storefront event"),
        }
    }
}

/// Publishes events as JSON on `storefront.<event name>` and logs them too.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    fallback: TracingNotifier,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client) -> Self { Self { client, fallback: TracingNotifier } }

    pub fn subject(event: &DomainEvent) -> String { format!("storefront.{}", event.name()) }
}

impl NotificationSink for NatsNotifier {
    fn notify(&self, event: &DomainEvent) {
        self.fallback.notify(event);
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode event for nats");
                return;
            }
        };
        let subject = Self::subject(event);
        let client = self.client.clone();
        // Fire and forget; needs a Tokio runtime.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                        warn!(%subject, error = %e, "nats publish failed");
                    }
                });
            }
            Err(_) => debug!(%subject, "no runtime, nats publish skipped"),
        }
    }
}

/// Forwards events into a channel. Hosts that render their own toasts read the receiver.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: &DomainEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(event = %event.name(), "notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{CartEvent, CheckoutEvent};

    #[test]
    fn test_subject_uses_event_name() {
        let event = DomainEvent::Checkout(CheckoutEvent::PaymentCancelled { order_id: "o1".into() });
        assert_eq!(NatsNotifier::subject(&event), "storefront.checkout.payment_cancelled");
    }

    #[test]
    fn test_channel_notifier_forwards_in_order() {
        let (sink, mut rx) = ChannelNotifier::new();
        sink.notify_all(vec![DomainEvent::Cart(CartEvent::Cleared), DomainEvent::Cart(CartEvent::Restored { items: 1 })]);
        assert_eq!(rx.try_recv().unwrap(), DomainEvent::Cart(CartEvent::Cleared));
        assert_eq!(rx.try_recv().unwrap(), DomainEvent::Cart(CartEvent::Restored { items: 1 }));
        assert!(rx.try_recv().is_err());
    }
}
