//! reqwest-backed [`StorefrontApi`].
//!
//! Every call carries the current bearer token. A 401 triggers exactly one
//! refresh through the injected [`TokenRefresher`] and one retry; a second
//! 401 surfaces as [`ApiError::Unauthorized`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{
    ApiError, Availability, GatewayOrder, PaymentFailureReport, PaymentVerification, ReconciliationResult,
    StorefrontApi, VerificationResult,
};
use crate::domain::aggregates::order::{Order, OrderDraft};
use crate::domain::aggregates::product::Product;

/// Supplies a fresh access token when the current one is rejected.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<String, ApiError>;
}

/// Never refreshes; a rejected token is final.
pub struct StaticToken;

#[async_trait]
impl TokenRefresher for StaticToken {
    async fn refresh(&self) -> Result<String, ApiError> { Err(ApiError::Unauthorized) }
}

/// Exchanges a refresh token at `POST /auth/refresh`.
pub struct HttpTokenRefresher {
    client: Client,
    url: String,
    refresh_token: String,
}

impl HttpTokenRefresher {
    pub fn new(client: Client, base_url: &str, refresh_token: impl Into<String>) -> Self {
        Self { client, url: format!("{}/auth/refresh", base_url.trim_end_matches('/')), refresh_token: refresh_token.into() }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedToken { access_token: String }

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self) -> Result<String, ApiError> {
        let response = self.client
            .post(&self.url)
            .json(&json!({ "refreshToken": self.refresh_token }))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Unauthorized);
        }
        let token: Payload<RefreshedToken> = response.json().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(token.into_inner().access_token)
    }
}

/// The backend answers either with the value itself or wrapped as `{ "data": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Payload<T> {
    fn into_inner(self) -> T {
        match self { Payload::Wrapped { data } | Payload::Bare(data) => data }
    }
}

pub struct HttpStorefrontApi {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    refresher: Arc<dyn TokenRefresher>,
}

impl HttpStorefrontApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration, refresher: Arc<dyn TokenRefresher>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to construct http client: {e}")))?;
        Ok(Self::with_client(client, base_url, refresher))
    }

    /// Build from an existing client (useful for testing).
    pub fn with_client(client: Client, base_url: impl Into<String>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, token: RwLock::new(None), refresher }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.into());
        }
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ApiError::Network(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<B, T>(&self, method: Method, segments: &[&str], query: &[(&str, String)], body: Option<&B>, headers: &[(&str, &str)]) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Send,
    {
        let response = self.execute(method, segments, query, body, headers).await?;
        let payload: Payload<T> = response.json().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(payload.into_inner())
    }

    async fn execute<B>(&self, method: Method, segments: &[&str], query: &[(&str, String)], body: Option<&B>, headers: &[(&str, &str)]) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(segments)?;
        let mut refreshed = false;
        loop {
            let mut request = self.client.request(method.clone(), url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(token) = self.current_token() {
                request = request.bearer_auth(token);
            }
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(%url, "access token rejected, refreshing once");
                refreshed = true;
                let token = self.refresher.refresh().await?;
                self.set_token(token);
                continue;
            }

            if !status.is_success() {
                let message = error_message(response.text().await.unwrap_or_default());
                debug!(%url, status = status.as_u16(), %message, "request failed");
                return Err(ApiError::from_status(status.as_u16(), message));
            }
            return Ok(response);
        }
    }
}

/// Pulls `message` (or `error`) out of a JSON error body, else returns the body as is.
fn error_message(body: String) -> String {
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message").or_else(|| v.get("error")).and_then(|m| m.as_str()).map(str::to_owned)
        })
        .unwrap_or(body)
}

#[async_trait]
impl StorefrontApi for HttpStorefrontApi {
    #[instrument(skip(self))]
    async fn check_availability(&self, product_id: &str, variant_id: Option<&str>, quantity: u32) -> Result<Availability, ApiError> {
        let mut query = vec![("quantity", quantity.to_string())];
        if let Some(variant_id) = variant_id {
            query.push(("variantId", variant_id.to_string()));
        }
        self.send::<(), _>(Method::GET, &["products", product_id, "availability"], &query, None, &[]).await
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product_id: &str) -> Result<Product, ApiError> {
        self.send::<(), _>(Method::GET, &["products", product_id], &[], None, &[]).await
    }

    #[instrument(skip(self, draft), fields(items = draft.items.len()))]
    async fn create_order(&self, draft: &OrderDraft, idempotency_key: &str) -> Result<Order, ApiError> {
        self.send(Method::POST, &["orders"], &[], Some(draft), &[("Idempotency-Key", idempotency_key)]).await
    }

    #[instrument(skip(self))]
    async fn create_payment_order(&self, order_id: &str) -> Result<GatewayOrder, ApiError> {
        self.send(Method::POST, &["payments", "create-order"], &[], Some(&json!({ "orderId": order_id })), &[]).await
    }

    #[instrument(skip(self, verification), fields(order_id = %verification.order_id))]
    async fn verify_payment(&self, verification: &PaymentVerification) -> Result<VerificationResult, ApiError> {
        self.send(Method::POST, &["payments", "verify"], &[], Some(verification), &[]).await
    }

    #[instrument(skip(self, report), fields(order_id = %report.order_id, cancelled = report.cancelled))]
    async fn report_payment_failure(&self, report: &PaymentFailureReport) -> Result<(), ApiError> {
        self.execute(Method::POST, &["payments", "failure"], &[], Some(report), &[]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reconcile_payment(&self, order_id: &str, gateway_order_id: &str) -> Result<ReconciliationResult, ApiError> {
        let body = json!({ "orderId": order_id, "gatewayOrderId": gateway_order_id });
        self.send(Method::POST, &["payments", "reconcile"], &[], Some(&body), &[]).await
    }
}
