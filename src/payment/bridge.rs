//! Native-app bridge.
//!
//! A host application (webview shell, mobile app) reports gateway results
//! whenever the shopper finishes, which may be long after the call that
//! opened the checkout has returned. Results go into one channel; the
//! checkout pipeline owns the receiving end and matches each result to its
//! pending payment.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::GatewayCheckout;
use crate::api::PaymentSuccess;

/// Gateway failure code the host uses when the shopper closed the payment sheet.
pub const CANCELLED_CODE: i64 = 2;

const BRIDGE_CAPACITY: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub enum GatewayOutcome {
    Succeeded(PaymentSuccess),
    /// The web checkout was closed without paying.
    Dismissed,
    Failed { code: Option<i64>, description: String },
}

impl GatewayOutcome {
    pub fn is_cancellation(&self) -> bool {
        match self {
            GatewayOutcome::Dismissed => true,
            GatewayOutcome::Failed { code, .. } => *code == Some(CANCELLED_CODE),
            GatewayOutcome::Succeeded(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("malformed bridge payload: {0}")]
    Malformed(String),

    #[error("payment listener is not running")]
    Closed,
}

#[derive(Deserialize)]
struct FailurePayload {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Hosts send either an object or a JSON string that itself holds the object.
fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, BridgeError> {
    let malformed = |e: serde_json::Error| BridgeError::Malformed(e.to_string());
    match serde_json::from_str::<Value>(raw.trim()).map_err(malformed)? {
        Value::String(inner) => serde_json::from_str(&inner).map_err(malformed),
        value => serde_json::from_value(value).map_err(malformed),
    }
}

fn failure_code(code: Option<Value>) -> Option<i64> {
    match code? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Sending half, cloned into every place a host can call back from.
#[derive(Clone, Debug)]
pub struct NativeBridge {
    tx: mpsc::Sender<GatewayOutcome>,
}

pub struct BridgeListener {
    rx: mpsc::Receiver<GatewayOutcome>,
}

impl BridgeListener {
    pub async fn recv(&mut self) -> Option<GatewayOutcome> { self.rx.recv().await }
}

impl NativeBridge {
    pub fn channel() -> (NativeBridge, BridgeListener) {
        let (tx, rx) = mpsc::channel(BRIDGE_CAPACITY);
        (NativeBridge { tx }, BridgeListener { rx })
    }

    pub async fn on_payment_success(&self, raw: &str) -> Result<(), BridgeError> {
        let success: PaymentSuccess = decode(raw)?;
        debug!(gateway_order_id = %success.razorpay_order_id, "bridge payment success");
        self.deliver(GatewayOutcome::Succeeded(success)).await
    }

    pub async fn on_payment_failure(&self, raw: &str) -> Result<(), BridgeError> {
        let payload: FailurePayload = decode(raw)?;
        let code = failure_code(payload.code);
        let description = payload.description.unwrap_or_else(|| "Payment failed".to_string());
        debug!(?code, %description, "bridge payment failure");
        self.deliver(GatewayOutcome::Failed { code, description }).await
    }

    pub async fn dismissed(&self) -> Result<(), BridgeError> { self.deliver(GatewayOutcome::Dismissed).await }

    pub async fn deliver(&self, outcome: GatewayOutcome) -> Result<(), BridgeError> {
        self.tx.send(outcome).await.map_err(|_| BridgeError::Closed)
    }
}

#[derive(Clone)]
struct BridgeState {
    bridge: NativeBridge,
    checkout: watch::Receiver<Option<GatewayCheckout>>,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match self {
            BridgeError::Malformed(_) => StatusCode::BAD_REQUEST,
            BridgeError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// HTTP face of the bridge for hosts that cannot share memory with this process.
pub fn routes(bridge: NativeBridge, checkout: watch::Receiver<Option<GatewayCheckout>>) -> Router {
    Router::new()
        .route("/bridge/checkout", get(current_checkout))
        .route("/bridge/payment-success", post(payment_success))
        .route("/bridge/payment-failure", post(payment_failure))
        .route("/bridge/payment-dismissed", post(payment_dismissed))
        .with_state(BridgeState { bridge, checkout })
}

async fn current_checkout(State(s): State<BridgeState>) -> Response {
    match s.checkout.borrow().clone() {
        Some(checkout) => Json(checkout).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn payment_success(State(s): State<BridgeState>, body: String) -> Result<StatusCode, BridgeError> {
    s.bridge.on_payment_success(&body).await.map_err(log_rejected)?;
    Ok(StatusCode::ACCEPTED)
}

async fn payment_failure(State(s): State<BridgeState>, body: String) -> Result<StatusCode, BridgeError> {
    s.bridge.on_payment_failure(&body).await.map_err(log_rejected)?;
    Ok(StatusCode::ACCEPTED)
}

async fn payment_dismissed(State(s): State<BridgeState>) -> Result<StatusCode, BridgeError> {
    s.bridge.dismissed().await.map_err(log_rejected)?;
    Ok(StatusCode::ACCEPTED)
}

fn log_rejected(e: BridgeError) -> BridgeError {
    warn!(error = %e, "bridge callback rejected");
    e
}
