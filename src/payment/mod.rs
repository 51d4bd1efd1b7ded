//! Payment gateway adapter.
//!
//! Server-side steps go through the storefront API; opening the gateway's
//! own checkout UI is delegated to a [`CheckoutLauncher`], since that lives
//! in whatever host embeds this crate.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::api::{ApiError, PaymentFailureReport, PaymentSuccess, PaymentVerification, ReconciliationResult, StorefrontApi, VerificationResult};
use crate::domain::aggregates::order::{Order, PaymentIntent};
use crate::domain::value_objects::Money;

pub mod bridge;

pub use bridge::{BridgeError, BridgeListener, GatewayOutcome, NativeBridge};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("could not open the payment window: {0}")]
    Launch(String),
}

/// Everything the gateway UI needs to take a payment for one order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCheckout {
    pub order_id: String,
    pub order_number: String,
    pub gateway_order_id: String,
    pub amount: Money,
    pub currency: String,
    pub key_id: Option<String>,
}

pub trait CheckoutLauncher: Send + Sync {
    fn open(&self, checkout: &GatewayCheckout) -> Result<(), PaymentError>;
    fn close(&self);
}

/// Publishes the checkout to open on a watch channel; the host reads it
/// (directly or via `GET /bridge/checkout`) and reports back through the bridge.
#[derive(Debug)]
pub struct BridgeLauncher {
    tx: watch::Sender<Option<GatewayCheckout>>,
}

impl BridgeLauncher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<GatewayCheckout>> { self.tx.subscribe() }

    pub fn current(&self) -> Option<GatewayCheckout> { self.tx.borrow().clone() }
}

impl Default for BridgeLauncher {
    fn default() -> Self { Self::new() }
}

impl CheckoutLauncher for BridgeLauncher {
    fn open(&self, checkout: &GatewayCheckout) -> Result<(), PaymentError> {
        self.tx.send_replace(Some(checkout.clone()));
        Ok(())
    }

    fn close(&self) { self.tx.send_replace(None); }
}

pub struct PaymentAdapter {
    api: Arc<dyn StorefrontApi>,
    launcher: Arc<dyn CheckoutLauncher>,
    key_id: Option<String>,
}

impl PaymentAdapter {
    pub fn new(api: Arc<dyn StorefrontApi>, launcher: Arc<dyn CheckoutLauncher>) -> Self {
        Self { api, launcher, key_id: None }
    }

    /// Fallback publishable key when the backend does not send one.
    pub fn with_key_id(mut self, key_id: Option<String>) -> Self {
        self.key_id = key_id;
        self
    }

    /// Creates the gateway-side order for `order`.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn create(&self, order: &Order) -> Result<(PaymentIntent, GatewayCheckout), PaymentError> {
        let gateway = self.api.create_payment_order(&order.id).await?;
        info!(gateway_order_id = %gateway.gateway_order_id, amount = %gateway.amount, "gateway order created");
        let intent = PaymentIntent::new(gateway.gateway_order_id.clone(), order.id.clone());
        let checkout = GatewayCheckout {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            gateway_order_id: gateway.gateway_order_id,
            amount: gateway.amount,
            currency: gateway.currency,
            key_id: gateway.key_id.or_else(|| self.key_id.clone()),
        };
        Ok((intent, checkout))
    }

    pub fn launch(&self, checkout: &GatewayCheckout) -> Result<(), PaymentError> { self.launcher.open(checkout) }

    pub fn close(&self) { self.launcher.close() }

    #[instrument(skip(self, intent, success), fields(order_id = %intent.order_id))]
    pub async fn verify(&self, intent: &PaymentIntent, success: &PaymentSuccess) -> Result<VerificationResult, PaymentError> {
        let verification = PaymentVerification { order_id: intent.order_id.clone(), payment: success.clone() };
        Ok(self.api.verify_payment(&verification).await?)
    }

    #[instrument(skip(self, intent), fields(order_id = %intent.order_id))]
    pub async fn report_failure(&self, intent: &PaymentIntent, cancelled: bool, code: Option<i64>, description: &str) -> Result<(), PaymentError> {
        let report = PaymentFailureReport {
            order_id: intent.order_id.clone(),
            gateway_order_id: intent.gateway_order_id.clone(),
            cancelled,
            code: code.map(|c| c.to_string()),
            description: description.to_string(),
        };
        Ok(self.api.report_payment_failure(&report).await?)
    }

    #[instrument(skip(self, intent), fields(order_id = %intent.order_id))]
    pub async fn reconcile(&self, intent: &PaymentIntent) -> Result<ReconciliationResult, PaymentError> {
        Ok(self.api.reconcile_payment(&intent.order_id, &intent.gateway_order_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout() -> GatewayCheckout {
        GatewayCheckout {
            order_id: "order-1".into(), order_number: "ORD-0001".into(), gateway_order_id: "gw_order-1".into(),
            amount: Money::new(rust_decimal_macros::dec!(560)), currency: "INR".into(), key_id: None,
        }
    }

    #[test]
    fn test_bridge_launcher_publishes_and_clears() {
        let launcher = BridgeLauncher::new();
        let rx = launcher.subscribe();
        launcher.open(&checkout()).unwrap();
        assert_eq!(rx.borrow().as_ref().map(|c| c.gateway_order_id.as_str()), Some("gw_order-1"));
        launcher.close();
        assert!(launcher.current().is_none());
    }

    #[test]
    fn test_checkout_serializes_camel_case() {
        let json = serde_json::to_value(checkout()).unwrap();
        assert_eq!(json["gatewayOrderId"], "gw_order-1");
        assert_eq!(json["amount"], 560.0);
    }
}
