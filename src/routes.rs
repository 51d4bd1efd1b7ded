//! Local HTTP surface over the cart and checkout services.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{ApiError, StorefrontApi};
use crate::domain::aggregates::cart::{Cart, CartError};
use crate::domain::aggregates::order::{Address, PaymentMethod};
use crate::domain::aggregates::product::Product;
use crate::domain::pricing::OrderSummary;
use crate::error::{CheckoutError, Recovery};
use crate::services::cart::{CartStore, CartStoreError};
use crate::services::checkout::{CheckoutPipeline, CheckoutStage, OrderOutcome};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CheckoutPipeline>,
    pub api: Arc<dyn StorefrontApi>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-checkout"})) }))
        .route("/api/v1/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/reload", post(reload_cart))
        .route("/api/v1/cart/items", post(add_to_cart))
        .route("/api/v1/cart/items/:product_id", put(update_quantity).delete(remove_from_cart))
        .route("/api/v1/cart/flow", post(cart_flow))
        .route("/api/v1/buy-now", post(buy_now))
        .route("/api/v1/buy-now/restore", post(restore_cart))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/checkout/status", get(checkout_status))
        .route("/api/v1/checkout/reset", post(reset_checkout))
        .with_state(state)
}

type ApiResult<T> = Result<T, (StatusCode, Json<serde_json::Value>)>;

fn cart_error(e: CartStoreError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        CartStoreError::Cart(CartError::ItemNotFound) => StatusCode::NOT_FOUND,
        CartStoreError::Cart(CartError::InvalidQuantity(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn lookup_error(e: ApiError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let recovery = self.recovery();
        let status = match recovery {
            Recovery::ReviewItems => StatusCode::CONFLICT,
            Recovery::EditAddress => StatusCode::UNPROCESSABLE_ENTITY,
            Recovery::Login => StatusCode::UNAUTHORIZED,
            Recovery::Retry => StatusCode::BAD_GATEWAY,
            Recovery::OrderStatus => StatusCode::PAYMENT_REQUIRED,
            Recovery::ReloadCart => StatusCode::INTERNAL_SERVER_ERROR,
            Recovery::None if self == CheckoutError::RetryLimitReached => StatusCode::TOO_MANY_REQUESTS,
            Recovery::None => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string(), "recovery": recovery }))).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartView {
    cart: Cart,
    buy_now: bool,
    summary: OrderSummary,
}

impl CartView {
    fn of(store: &CartStore) -> Self {
        let cart = store.cart().clone();
        let summary = OrderSummary::from_items(cart.items());
        Self { cart, buy_now: store.is_buy_now(), summary }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemRequest {
    product_id: String,
    #[serde(default)]
    variant_id: Option<String>,
    #[serde(default = "one")]
    quantity: i64,
}

fn one() -> i64 { 1 }

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuantityRequest {
    #[serde(default)]
    variant_id: Option<String>,
    quantity: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantQuery {
    variant_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest {
    #[serde(default)]
    shipping_address: Option<Address>,
    payment_method: PaymentMethod,
}

/// Resolves the product and checks the requested variant exists.
async fn resolve(s: &AppState, r: &ItemRequest) -> ApiResult<Product> {
    let product = s.api.get_product(&r.product_id).await.map_err(lookup_error)?;
    if let Some(variant_id) = r.variant_id.as_deref() {
        if product.variant(variant_id).is_none() {
            return Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown variant {variant_id}") }))));
        }
    }
    Ok(product)
}

async fn get_cart(State(s): State<AppState>) -> ApiResult<Json<CartView>> {
    s.pipeline.with_cart(|c| c.reconcile().map(|()| CartView::of(c))).await.map(Json).map_err(cart_error)
}

async fn reload_cart(State(s): State<AppState>) -> ApiResult<Json<CartView>> {
    s.pipeline.with_cart(|c| -> Result<_, CartStoreError> { c.load_cart()?; Ok(CartView::of(c)) }).await.map(Json).map_err(cart_error)
}

async fn clear_cart(State(s): State<AppState>) -> ApiResult<Json<CartView>> {
    s.pipeline.with_cart(|c| -> Result<_, CartStoreError> { c.clear_cart()?; Ok(CartView::of(c)) }).await.map(Json).map_err(cart_error)
}

async fn add_to_cart(State(s): State<AppState>, Json(r): Json<ItemRequest>) -> ApiResult<(StatusCode, Json<CartView>)> {
    let product = resolve(&s, &r).await?;
    let variant = r.variant_id.as_deref().and_then(|id| product.variant(id));
    let view = s.pipeline
        .with_cart(|c| -> Result<_, CartStoreError> { c.add_to_cart(&product, variant, r.quantity)?; Ok(CartView::of(c)) })
        .await
        .map_err(cart_error)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_quantity(State(s): State<AppState>, Path(product_id): Path<String>, Json(r): Json<QuantityRequest>) -> ApiResult<Json<CartView>> {
    s.pipeline
        .with_cart(|c| -> Result<_, CartStoreError> { c.update_quantity(&product_id, r.variant_id.as_deref(), r.quantity)?; Ok(CartView::of(c)) })
        .await
        .map(Json)
        .map_err(cart_error)
}

async fn remove_from_cart(State(s): State<AppState>, Path(product_id): Path<String>, Query(q): Query<VariantQuery>) -> ApiResult<Json<CartView>> {
    s.pipeline
        .with_cart(|c| -> Result<_, CartStoreError> { c.remove_from_cart(&product_id, q.variant_id.as_deref())?; Ok(CartView::of(c)) })
        .await
        .map(Json)
        .map_err(cart_error)
}

async fn buy_now(State(s): State<AppState>, Json(r): Json<ItemRequest>) -> ApiResult<Json<CartView>> {
    let product = resolve(&s, &r).await?;
    let variant = r.variant_id.as_deref().and_then(|id| product.variant(id));
    s.pipeline
        .with_cart(|c| -> Result<_, CartStoreError> { c.initiate_buy_now_flow(&product, variant, r.quantity)?; Ok(CartView::of(c)) })
        .await
        .map(Json)
        .map_err(cart_error)
}

async fn restore_cart(State(s): State<AppState>) -> ApiResult<Json<CartView>> {
    s.pipeline.with_cart(|c| -> Result<_, CartStoreError> { c.restore_cart()?; Ok(CartView::of(c)) }).await.map(Json).map_err(cart_error)
}

async fn cart_flow(State(s): State<AppState>) -> ApiResult<Json<CartView>> {
    s.pipeline.with_cart(|c| -> Result<_, CartStoreError> { c.initiate_cart_flow()?; Ok(CartView::of(c)) }).await.map(Json).map_err(cart_error)
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> Result<Response, CheckoutError> {
    let response = match s.pipeline.place_order(r.shipping_address, r.payment_method).await? {
        OrderOutcome::Placed(order) => (StatusCode::CREATED, Json(json!({ "order": order }))).into_response(),
        OrderOutcome::AwaitingPayment { order, checkout } => {
            (StatusCode::ACCEPTED, Json(json!({ "order": order, "checkout": checkout }))).into_response()
        }
    };
    Ok(response)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    stage: CheckoutStage,
    error: Option<String>,
    recovery: Option<Recovery>,
    pending_gateway_order_id: Option<String>,
}

async fn checkout_status(State(s): State<AppState>) -> Json<StatusView> {
    let status = s.pipeline.status();
    let pending = s.pipeline.pending_payment().await;
    Json(StatusView {
        stage: status.stage,
        recovery: status.error.as_ref().map(CheckoutError::recovery),
        error: status.error.map(|e| e.to_string()),
        pending_gateway_order_id: pending.map(|p| p.gateway_order_id),
    })
}

async fn reset_checkout(State(s): State<AppState>) -> StatusCode {
    s.pipeline.reset_retries();
    StatusCode::NO_CONTENT
}
