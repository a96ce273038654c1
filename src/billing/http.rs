/// HTTP implementation of the billing client
///
/// Speaks the provider's form-encoded REST API with bearer authentication.
use crate::{
    billing::{
        BillingClient, CheckoutSession, PortalSession, ProviderCustomer, ProviderSubscription,
    },
    config::BillingConfig,
    error::{ApiError, ApiResult},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub struct HttpBillingClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl HttpBillingClient {
    pub fn new(config: &BillingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> ApiResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ApiError::PaymentProvider(format!("{} request failed: {}", path, e)))?;

        Self::decode(path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ApiError::PaymentProvider(format!("{} request failed: {}", path, e)))?;

        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::PaymentProvider(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::PaymentProvider(format!("{} returned invalid body: {}", path, e)))
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> ApiResult<ProviderCustomer> {
        self.post_form(
            "/v1/customers",
            &[
                ("email", email.to_string()),
                ("name", name.to_string()),
                ("metadata[user_id]", user_id.to_string()),
            ],
        )
        .await
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> ApiResult<CheckoutSession> {
        self.post_form(
            "/v1/checkout/sessions",
            &[
                ("customer", customer_id.to_string()),
                ("mode", "subscription".to_string()),
                ("line_items[0][price]", price_id.to_string()),
                ("line_items[0][quantity]", "1".to_string()),
                ("success_url", success_url.to_string()),
                ("cancel_url", cancel_url.to_string()),
                ("allow_promotion_codes", "true".to_string()),
            ],
        )
        .await
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> ApiResult<PortalSession> {
        self.post_form(
            "/v1/billing_portal/sessions",
            &[
                ("customer", customer_id.to_string()),
                ("return_url", return_url.to_string()),
            ],
        )
        .await
    }

    async fn get_subscription(&self, subscription_id: &str) -> ApiResult<ProviderSubscription> {
        self.get(&format!("/v1/subscriptions/{}", subscription_id))
            .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> ApiResult<ProviderSubscription> {
        // Cancel at period end rather than immediately, so paid-for time
        // is not cut short
        self.post_form(
            &format!("/v1/subscriptions/{}", subscription_id),
            &[("cancel_at_period_end", "true".to_string())],
        )
        .await
    }
}
