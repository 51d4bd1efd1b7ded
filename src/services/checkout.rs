//! Order submission and payment pipeline.
//!
//! ```text
//! validating -> summarizing -> submitting -> done                      (cod)
//!                                         -> paying -> verifying -> done
//!                                                               -> reconciling
//! ```
//!
//! Validation and totals are recomputed right before every submission. Once
//! the backend has accepted an order it is the source of truth; nothing here
//! deletes or rolls it back. Online payments park the order and its
//! [`PaymentIntent`] in a shared slot so a gateway result arriving later,
//! from any task, still resolves against the right order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::{PaymentSuccess, StorefrontApi};
use crate::domain::aggregates::order::{Address, Order, OrderDraft, PaymentIntent, PaymentMethod, PaymentStatus};
use crate::domain::events::{CheckoutEvent, DomainEvent};
use crate::error::CheckoutError;
use crate::notify::NotificationSink;
use crate::payment::{BridgeListener, CheckoutLauncher, GatewayCheckout, GatewayOutcome, PaymentAdapter};
use crate::services::cart::CartStore;
use crate::services::validation::OrderValidator;

pub const DEFAULT_MAX_SUBMISSION_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStage {
    #[default]
    Idle,
    Validating,
    Summarizing,
    Submitting,
    Paying,
    Verifying,
    Reconciling,
    /// The shopper closed the gateway; the order stays with the backend.
    PaymentCancelled,
    PaymentFailed,
    Done,
}

/// Where the current checkout stands, and the last error the shopper should see.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckoutStatus {
    pub stage: CheckoutStage,
    pub error: Option<CheckoutError>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderOutcome {
    /// Cash on delivery; nothing left to do.
    Placed(Order),
    /// The gateway checkout is open and the result will arrive through the bridge.
    AwaitingPayment { order: Order, checkout: GatewayCheckout },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PaymentOutcome {
    Paid(Order),
    /// Verification was inconclusive; send the shopper to the order status view.
    NeedsReview { order: Order, status: PaymentStatus },
}

#[derive(Clone, Debug)]
struct PendingPayment {
    order: Order,
    intent: PaymentIntent,
    buy_now: bool,
}

pub struct CheckoutPipeline {
    api: Arc<dyn StorefrontApi>,
    cart: Arc<Mutex<CartStore>>,
    validator: OrderValidator,
    payments: PaymentAdapter,
    notifier: Arc<dyn NotificationSink>,
    pending: Mutex<Option<PendingPayment>>,
    status: watch::Sender<CheckoutStatus>,
    max_retries: u32,
    failed_attempts: AtomicU32,
}

impl CheckoutPipeline {
    pub fn new(
        api: Arc<dyn StorefrontApi>,
        cart: Arc<Mutex<CartStore>>,
        launcher: Arc<dyn CheckoutLauncher>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let (status, _rx) = watch::channel(CheckoutStatus::default());
        Self {
            validator: OrderValidator::new(api.clone()),
            payments: PaymentAdapter::new(api.clone(), launcher),
            api,
            cart,
            notifier,
            pending: Mutex::new(None),
            status,
            max_retries: DEFAULT_MAX_SUBMISSION_RETRIES,
            failed_attempts: AtomicU32::new(0),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_gateway_key(mut self, key_id: Option<String>) -> Self {
        self.payments = self.payments.with_key_id(key_id);
        self
    }

    pub fn cart(&self) -> Arc<Mutex<CartStore>> { self.cart.clone() }

    pub fn status(&self) -> CheckoutStatus { self.status.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<CheckoutStatus> { self.status.subscribe() }

    pub async fn pending_payment(&self) -> Option<PaymentIntent> {
        self.pending.lock().await.as_ref().map(|p| p.intent.clone())
    }

    pub fn reset_retries(&self) {
        self.failed_attempts.store(0, Ordering::SeqCst);
        self.status.send_modify(|s| s.error = None);
    }

    /// Runs a cart command under the lock and forwards whatever events it raised.
    pub async fn with_cart<R>(&self, f: impl FnOnce(&mut CartStore) -> R) -> R {
        let mut cart = self.cart.lock().await;
        let result = f(&mut cart);
        self.notifier.notify_all(cart.take_events());
        result
    }

    #[instrument(skip(self, address))]
    pub async fn place_order(&self, address: Option<Address>, payment_method: PaymentMethod) -> crate::Result<OrderOutcome> {
        if self.failed_attempts.load(Ordering::SeqCst) >= self.max_retries {
            return Err(self.fail(CheckoutError::RetryLimitReached));
        }

        self.set_stage(CheckoutStage::Validating);
        let (items, buy_now) = self
            .with_cart(|cart| cart.reconcile().map(|()| (cart.cart().items().to_vec(), cart.is_buy_now())))
            .await
            .map_err(|e| self.fail(e.into()))?;

        let validation = self.validator.validate(&items, address.as_ref(), payment_method).await;
        if !validation.is_valid() {
            return Err(self.fail(CheckoutError::from_validation(&validation)));
        }
        let Some(address) = address else {
            return Err(self.fail(CheckoutError::from_validation(&validation)));
        };

        self.set_stage(CheckoutStage::Summarizing);
        let draft = OrderDraft::new(&items, address, payment_method, buy_now);
        debug!(total = %draft.summary.totals.total_amount, savings = %draft.summary.savings, "order summarized");

        self.set_stage(CheckoutStage::Submitting);
        let idempotency_key = Uuid::new_v4().to_string();
        let order = self
            .api
            .create_order(&draft, &idempotency_key)
            .await
            .map_err(|e| self.fail(CheckoutError::from_submission(e)))?;
        self.failed_attempts.store(0, Ordering::SeqCst);
        info!(order_id = %order.id, order_number = %order.order_number, buy_now, "order placed");
        self.emit(CheckoutEvent::OrderPlaced {
            order_id: order.id.clone(), order_number: order.order_number.clone(), total: order.total_amount,
        });

        if !payment_method.is_online() {
            self.finish(buy_now).await;
            return Ok(OrderOutcome::Placed(order));
        }

        self.set_stage(CheckoutStage::Paying);
        let (intent, checkout) = match self.payments.create(&order).await {
            Ok(created) => created,
            Err(e) => return Err(self.payment_start_failed(&order, e.into())),
        };

        {
            let mut pending = self.pending.lock().await;
            if let Some(previous) = pending.as_ref() {
                warn!(order_id = %previous.order.id, "replacing unfinished payment");
            }
            *pending = Some(PendingPayment { order: order.clone(), intent: intent.clone(), buy_now });
        }

        if let Err(e) = self.payments.launch(&checkout) {
            self.pending.lock().await.take();
            return Err(self.payment_start_failed(&order, e.into()));
        }
        self.emit(CheckoutEvent::PaymentStarted { order_id: order.id.clone(), gateway_order_id: intent.gateway_order_id.clone() });
        Ok(OrderOutcome::AwaitingPayment { order, checkout })
    }

    /// Resolves a gateway result against the pending payment.
    pub async fn handle_gateway_outcome(&self, outcome: GatewayOutcome) -> crate::Result<PaymentOutcome> {
        let pending = {
            let mut slot = self.pending.lock().await;
            let Some(current) = slot.as_ref() else {
                warn!(?outcome, "gateway result with no pending payment");
                return Err(CheckoutError::NoPendingPayment);
            };
            if let GatewayOutcome::Succeeded(success) = &outcome {
                if success.razorpay_order_id != current.intent.gateway_order_id {
                    warn!(expected = %current.intent.gateway_order_id, received = %success.razorpay_order_id, "gateway result for another order");
                    return Err(CheckoutError::UnknownPayment(success.razorpay_order_id.clone()));
                }
            }
            slot.take()
        };
        let Some(pending) = pending else { return Err(CheckoutError::NoPendingPayment) };
        self.payments.close();

        let cancellation = outcome.is_cancellation();
        match outcome {
            GatewayOutcome::Succeeded(success) => self.verify(pending, success).await,
            GatewayOutcome::Failed { code, description } if !cancellation => Err(self.failed(pending, code, description).await),
            _ => Err(self.cancelled(pending).await),
        }
    }

    /// Feeds bridge results into the pipeline until every sender is gone.
    pub async fn run_bridge(&self, mut listener: BridgeListener) {
        while let Some(outcome) = listener.recv().await {
            match self.handle_gateway_outcome(outcome).await {
                Ok(PaymentOutcome::Paid(order)) => debug!(order_id = %order.id, "bridge payment settled"),
                Ok(PaymentOutcome::NeedsReview { order, status }) => debug!(order_id = %order.id, ?status, "bridge payment needs review"),
                Err(e) => debug!(error = %e, "bridge payment not settled"),
            }
        }
        info!("payment bridge closed");
    }

    async fn verify(&self, mut pending: PendingPayment, success: PaymentSuccess) -> Result<PaymentOutcome, CheckoutError> {
        self.set_stage(CheckoutStage::Verifying);
        pending.intent.begin_verification().map_err(|e| CheckoutError::GatewayFailed(e.to_string()))?;

        match self.payments.verify(&pending.intent, &success).await {
            Ok(result) if result.verified => {
                pending.intent.mark_verified().map_err(|e| CheckoutError::GatewayFailed(e.to_string()))?;
                info!(order_id = %pending.order.id, payment_id = %success.razorpay_payment_id, "payment verified");
                self.emit(CheckoutEvent::PaymentVerified { order_id: pending.order.id.clone(), payment_id: success.razorpay_payment_id });
                self.finish(pending.buy_now).await;
                Ok(PaymentOutcome::Paid(result.order.unwrap_or(pending.order)))
            }
            Ok(_) => {
                error!(order_id = %pending.order.id, "payment verification rejected");
                self.reconcile(pending).await
            }
            Err(e) => {
                error!(order_id = %pending.order.id, error = %e, "payment verification failed");
                self.reconcile(pending).await
            }
        }
    }

    async fn reconcile(&self, pending: PendingPayment) -> Result<PaymentOutcome, CheckoutError> {
        self.set_stage(CheckoutStage::Reconciling);
        self.emit(CheckoutEvent::ReconciliationRequested { order_id: pending.order.id.clone() });

        match self.payments.reconcile(&pending.intent).await {
            Ok(result) if result.status == PaymentStatus::Verified => {
                info!(order_id = %pending.order.id, "payment confirmed by reconciliation");
                self.emit(CheckoutEvent::PaymentVerified { order_id: pending.order.id.clone(), payment_id: pending.intent.gateway_order_id.clone() });
                self.finish(pending.buy_now).await;
                Ok(PaymentOutcome::Paid(result.order.unwrap_or(pending.order)))
            }
            Ok(result) => {
                warn!(order_id = %pending.order.id, status = ?result.status, "payment unresolved after reconciliation");
                Ok(PaymentOutcome::NeedsReview { order: result.order.unwrap_or(pending.order), status: result.status })
            }
            Err(e) => {
                warn!(order_id = %pending.order.id, error = %e, "reconciliation failed");
                Ok(PaymentOutcome::NeedsReview { order: pending.order, status: pending.intent.status() })
            }
        }
    }

    async fn cancelled(&self, mut pending: PendingPayment) -> CheckoutError {
        if let Err(e) = pending.intent.mark_cancelled() {
            debug!(error = %e, "intent already settled");
        }
        warn!(order_id = %pending.order.id, "payment cancelled by shopper");
        self.report(&pending, true, None, "Payment cancelled by user").await;
        self.emit(CheckoutEvent::PaymentCancelled { order_id: pending.order.id.clone() });
        self.fail_in(CheckoutStage::PaymentCancelled, CheckoutError::GatewayCancelled)
    }

    async fn failed(&self, mut pending: PendingPayment, code: Option<i64>, description: String) -> CheckoutError {
        if let Err(e) = pending.intent.mark_failed() {
            debug!(error = %e, "intent already settled");
        }
        error!(order_id = %pending.order.id, ?code, %description, "payment failed");
        self.report(&pending, false, code, &description).await;
        self.emit(CheckoutEvent::PaymentFailed { order_id: pending.order.id.clone(), reason: description.clone() });
        self.fail_in(CheckoutStage::PaymentFailed, CheckoutError::GatewayFailed(description))
    }

    async fn report(&self, pending: &PendingPayment, cancelled: bool, code: Option<i64>, description: &str) {
        if let Err(e) = self.payments.report_failure(&pending.intent, cancelled, code, description).await {
            warn!(order_id = %pending.order.id, error = %e, "failed to report payment failure");
        }
    }

    fn payment_start_failed(&self, order: &Order, error: CheckoutError) -> CheckoutError {
        error!(order_id = %order.id, error = %error, "could not start payment");
        self.emit(CheckoutEvent::PaymentFailed { order_id: order.id.clone(), reason: error.to_string() });
        self.fail_in(CheckoutStage::PaymentFailed, CheckoutError::GatewayFailed(error.to_string()))
    }

    /// Marks the checkout done and spends the cart. A cleanup failure is
    /// published on the status; the caller still gets the placed order.
    async fn finish(&self, buy_now: bool) {
        match self.clean_up(buy_now).await {
            Ok(()) => self.set_stage(CheckoutStage::Done),
            Err(e) => {
                self.fail_in(CheckoutStage::Done, e);
            }
        }
    }

    /// A buy-now purchase gives the shopper their real cart back; otherwise the cart is spent.
    async fn clean_up(&self, buy_now: bool) -> Result<(), CheckoutError> {
        self.with_cart(|cart| if buy_now { cart.restore_cart().map(|_| ()) } else { cart.clear_cart().map(|_| ()) })
            .await
            .map_err(|e| {
                error!(buy_now, error = %e, "cart cleanup after checkout failed");
                CheckoutError::from(e)
            })
    }

    fn set_stage(&self, stage: CheckoutStage) {
        info!(?stage, "checkout stage");
        self.status.send_modify(|s| {
            s.stage = stage;
            s.error = None;
        });
    }

    fn fail(&self, error: CheckoutError) -> CheckoutError {
        let stage = self.status.borrow().stage;
        self.fail_in(stage, error)
    }

    /// Publishes `stage` and `error` in one update so watchers never see one without the other.
    fn fail_in(&self, stage: CheckoutStage, error: CheckoutError) -> CheckoutError {
        if error.is_retryable() {
            let attempts = self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(?stage, attempts, max = self.max_retries, error = %error, "checkout attempt failed");
        } else {
            warn!(?stage, error = %error, "checkout stopped");
        }
        if matches!(stage, CheckoutStage::Idle | CheckoutStage::Validating | CheckoutStage::Summarizing | CheckoutStage::Submitting) {
            self.emit(CheckoutEvent::SubmissionFailed { reason: error.to_string() });
        }
        self.status.send_modify(|s| {
            s.stage = stage;
            s.error = Some(error.clone());
        });
        error
    }

    fn emit(&self, event: CheckoutEvent) { self.notifier.notify(&DomainEvent::Checkout(event)); }
}
