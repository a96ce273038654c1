/// Billing provider integration
///
/// The provider is consumed through the `BillingClient` trait so the
/// reconciler and session flows stay testable without a live network
/// dependency; tests use an in-memory fake implementing the same trait.
pub mod http;
pub mod signature;

pub use http::HttpBillingClient;

use crate::error::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Customer as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Checkout session as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Billing portal session as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// Subscription as returned by the provider. Period bounds are epoch
/// seconds on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_start: i64,
    pub current_period_end: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

impl ProviderSubscription {
    pub fn period_start(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.current_period_start, 0).unwrap_or_else(Utc::now)
    }

    pub fn period_end(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.current_period_end, 0).unwrap_or_else(Utc::now)
    }
}

/// Invoice as delivered inside payment webhook events
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    pub id: String,
    pub customer: String,
    pub subscription: Option<String>,
}

/// Remote billing provider operations. All calls may fail transiently
/// (network) or permanently (bad input); both surface as
/// `ApiError::PaymentProvider`.
#[async_trait]
pub trait BillingClient: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &str,
    ) -> ApiResult<ProviderCustomer>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> ApiResult<CheckoutSession>;

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> ApiResult<PortalSession>;

    async fn get_subscription(&self, subscription_id: &str) -> ApiResult<ProviderSubscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> ApiResult<ProviderSubscription>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::error::ApiError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// In-memory fake provider for tests
    #[derive(Default)]
    pub struct FakeBillingClient {
        pub subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
        pub customers: Mutex<Vec<ProviderCustomer>>,
        counter: AtomicU64,
    }

    impl FakeBillingClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_subscription(&self, subscription: ProviderSubscription) {
            self.subscriptions
                .lock()
                .unwrap()
                .insert(subscription.id.clone(), subscription);
        }
    }

    #[async_trait]
    impl BillingClient for FakeBillingClient {
        async fn create_customer(
            &self,
            email: &str,
            _name: &str,
            _user_id: &str,
        ) -> ApiResult<ProviderCustomer> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let customer = ProviderCustomer {
                id: format!("cus_fake_{}", n),
                email: Some(email.to_string()),
            };
            self.customers.lock().unwrap().push(customer.clone());
            Ok(customer)
        }

        async fn create_checkout_session(
            &self,
            customer_id: &str,
            _price_id: &str,
            _success_url: &str,
            _cancel_url: &str,
        ) -> ApiResult<CheckoutSession> {
            Ok(CheckoutSession {
                id: format!("cs_fake_{}", customer_id),
                url: Some("https://checkout.example.com/session".to_string()),
            })
        }

        async fn create_billing_portal_session(
            &self,
            _customer_id: &str,
            return_url: &str,
        ) -> ApiResult<PortalSession> {
            Ok(PortalSession {
                url: format!("https://portal.example.com/?return={}", return_url),
            })
        }

        async fn get_subscription(&self, subscription_id: &str) -> ApiResult<ProviderSubscription> {
            self.subscriptions
                .lock()
                .unwrap()
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| {
                    ApiError::PaymentProvider(format!(
                        "No such subscription: {}",
                        subscription_id
                    ))
                })
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
        ) -> ApiResult<ProviderSubscription> {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            let subscription = subscriptions.get_mut(subscription_id).ok_or_else(|| {
                ApiError::PaymentProvider(format!("No such subscription: {}", subscription_id))
            })?;
            subscription.cancel_at_period_end = true;
            Ok(subscription.clone())
        }
    }
}
