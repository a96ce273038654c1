/// Subscription reconciler
///
/// Consumes billing-provider webhook events and brings the local
/// subscription state (the user snapshot and the standalone record) into
/// agreement with the provider. Handlers are idempotent and tolerate
/// out-of-order, at-least-once delivery: every write is a whole-field
/// overwrite of provider-authoritative values, and a per-record event
/// watermark keeps redelivered stale events from regressing state.
use crate::{
    billing::{BillingClient, ProviderInvoice, ProviderSubscription},
    error::{ApiError, ApiResult},
    subscription::{SubscriptionRecord, SubscriptionStatus, WebhookEvent},
};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::sync::Arc;

/// What a processed event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State was written
    Applied,
    /// Event was older than the stored watermark and skipped
    Stale,
    /// Event type or payload is not one we act on
    Ignored,
}

pub struct Reconciler {
    db: SqlitePool,
    billing: Arc<dyn BillingClient>,
}

impl Reconciler {
    pub fn new(db: SqlitePool, billing: Arc<dyn BillingClient>) -> Self {
        Self { db, billing }
    }

    /// Dispatch a verified webhook event to its handler
    pub async fn process_event(&self, event: &WebhookEvent) -> ApiResult<ReconcileOutcome> {
        match event.kind.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                let subscription: ProviderSubscription = parse_object(event)?;
                self.apply_subscription(&subscription, event.created_at())
                    .await
            }
            "customer.subscription.deleted" => {
                let subscription: ProviderSubscription = parse_object(event)?;
                self.apply_deletion(&subscription, event.created_at()).await
            }
            "invoice.payment_succeeded" | "invoice.payment_failed" => {
                let invoice: ProviderInvoice = parse_object(event)?;
                match invoice.subscription {
                    Some(subscription_id) => {
                        // The invoice itself is not authoritative for
                        // subscription state; re-fetch from the provider
                        // and apply the updated mapping.
                        let subscription =
                            self.billing.get_subscription(&subscription_id).await?;
                        self.apply_subscription(&subscription, event.created_at())
                            .await
                    }
                    None => {
                        tracing::debug!(
                            event = %event.id,
                            "invoice event without subscription reference, ignoring"
                        );
                        Ok(ReconcileOutcome::Ignored)
                    }
                }
            }
            other => {
                tracing::debug!(event_type = %other, "ignoring unhandled billing event type");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Write provider-authoritative subscription state to the user
    /// snapshot and the record in one transaction
    async fn apply_subscription(
        &self,
        subscription: &ProviderSubscription,
        event_at: DateTime<Utc>,
    ) -> ApiResult<ReconcileOutcome> {
        let user_id = self.user_id_for_customer(&subscription.customer).await?;

        let snapshot_status = if subscription.status == "active" {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Inactive
        };
        let record_status = SubscriptionStatus::from_provider(&subscription.status);
        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(ApiError::Database)?;

        if Self::is_stale(&mut tx, &user_id, event_at).await? {
            tracing::debug!(
                user = %user_id,
                subscription = %subscription.id,
                "skipping stale subscription event"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        sqlx::query(
            "UPDATE users
             SET subscription_status = ?1, billing_customer_id = ?2,
                 billing_subscription_id = ?3, current_period_end = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(snapshot_status.as_str())
        .bind(&subscription.customer)
        .bind(&subscription.id)
        .bind(subscription.period_end())
        .bind(now)
        .bind(&user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::Database)?;

        sqlx::query(
            "INSERT INTO subscriptions
                 (user_id, billing_customer_id, billing_subscription_id, status,
                  current_period_start, current_period_end, cancel_at_period_end,
                  provider_event_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_id) DO UPDATE SET
                 billing_customer_id = excluded.billing_customer_id,
                 billing_subscription_id = excluded.billing_subscription_id,
                 status = excluded.status,
                 current_period_start = excluded.current_period_start,
                 current_period_end = excluded.current_period_end,
                 cancel_at_period_end = excluded.cancel_at_period_end,
                 provider_event_at = excluded.provider_event_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&user_id)
        .bind(&subscription.customer)
        .bind(&subscription.id)
        .bind(record_status.as_str())
        .bind(subscription.period_start())
        .bind(subscription.period_end())
        .bind(subscription.cancel_at_period_end)
        .bind(event_at)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::Database)?;

        tx.commit().await.map_err(ApiError::Database)?;

        tracing::info!(
            user = %user_id,
            subscription = %subscription.id,
            status = %subscription.status,
            "applied subscription state"
        );

        Ok(ReconcileOutcome::Applied)
    }

    /// Handle subscription deletion: force cancelled, keep the last known
    /// period end
    async fn apply_deletion(
        &self,
        subscription: &ProviderSubscription,
        event_at: DateTime<Utc>,
    ) -> ApiResult<ReconcileOutcome> {
        let user_id = self.user_id_for_customer(&subscription.customer).await?;
        let now = Utc::now();

        let mut tx = self.db.begin().await.map_err(ApiError::Database)?;

        if Self::is_stale(&mut tx, &user_id, event_at).await? {
            tracing::debug!(
                user = %user_id,
                subscription = %subscription.id,
                "skipping stale deletion event"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        sqlx::query(
            "UPDATE users SET subscription_status = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(SubscriptionStatus::Cancelled.as_str())
        .bind(now)
        .bind(&user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::Database)?;

        sqlx::query(
            "UPDATE subscriptions
             SET status = ?1, cancel_at_period_end = 1, provider_event_at = ?2, updated_at = ?3
             WHERE user_id = ?4",
        )
        .bind(SubscriptionStatus::Cancelled.as_str())
        .bind(event_at)
        .bind(now)
        .bind(&user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::Database)?;

        tx.commit().await.map_err(ApiError::Database)?;

        tracing::info!(user = %user_id, subscription = %subscription.id, "subscription cancelled");

        Ok(ReconcileOutcome::Applied)
    }

    /// Load the durable record for a user, if any
    pub async fn record_for_user(&self, user_id: &str) -> ApiResult<Option<SubscriptionRecord>> {
        let row = sqlx::query(
            "SELECT user_id, billing_customer_id, billing_subscription_id, status,
                    current_period_start, current_period_end, cancel_at_period_end,
                    provider_event_at
             FROM subscriptions WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(row.map(|row| {
            let status: String = row.get("status");
            SubscriptionRecord {
                user_id: row.get("user_id"),
                billing_customer_id: row.get("billing_customer_id"),
                billing_subscription_id: row.get("billing_subscription_id"),
                status: SubscriptionStatus::parse(&status),
                current_period_start: row.get("current_period_start"),
                current_period_end: row.get("current_period_end"),
                cancel_at_period_end: row.get("cancel_at_period_end"),
                provider_event_at: row.get("provider_event_at"),
            }
        }))
    }

    /// Resolve the local user owning a billing customer reference.
    ///
    /// A miss indicates a data-integrity gap between the provider and the
    /// local store; it is surfaced rather than swallowed.
    async fn user_id_for_customer(&self, customer_id: &str) -> ApiResult<String> {
        let row = sqlx::query("SELECT id FROM users WHERE billing_customer_id = ?1")
            .bind(customer_id)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::Database)?;

        row.map(|row| row.get("id")).ok_or_else(|| {
            ApiError::Integrity(format!(
                "No local user for billing customer {}",
                customer_id
            ))
        })
    }

    /// An event older than the stored watermark must not be applied
    async fn is_stale(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
        event_at: DateTime<Utc>,
    ) -> ApiResult<bool> {
        let watermark: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT provider_event_at FROM subscriptions WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(ApiError::Database)?;

        Ok(watermark.is_some_and(|watermark| event_at < watermark))
    }
}

/// Deserialize the event's inner object
fn parse_object<T: serde::de::DeserializeOwned>(event: &WebhookEvent) -> ApiResult<T> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| ApiError::Validation(format!("Malformed {} payload: {}", event.kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::testing::FakeBillingClient;
    use crate::db;
    use serde_json::json;

    async fn setup() -> (Reconciler, SqlitePool, Arc<FakeBillingClient>) {
        let pool = db::memory_pool().await;
        let billing = Arc::new(FakeBillingClient::new());
        let reconciler = Reconciler::new(pool.clone(), billing.clone());
        (reconciler, pool, billing)
    }

    async fn insert_user(pool: &SqlitePool, id: &str, customer_id: Option<&str>) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                                subscription_status, billing_customer_id, created_at, updated_at)
             VALUES (?1, ?2, 'hash', 'Test', 'User', 'user', 'inactive', ?3, ?4, ?5)",
        )
        .bind(id)
        .bind(format!("{}@example.com", id))
        .bind(customer_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    fn subscription_event(
        kind: &str,
        created: i64,
        customer: &str,
        status: &str,
        period_end: i64,
    ) -> WebhookEvent {
        serde_json::from_value(json!({
            "id": format!("evt_{}_{}", kind, created),
            "type": kind,
            "created": created,
            "data": {
                "object": {
                    "id": "sub_1",
                    "customer": customer,
                    "status": status,
                    "current_period_start": period_end - 2_592_000,
                    "current_period_end": period_end,
                    "cancel_at_period_end": false
                }
            }
        }))
        .unwrap()
    }

    fn invoice_event(kind: &str, created: i64, customer: &str, subscription: Option<&str>) -> WebhookEvent {
        serde_json::from_value(json!({
            "id": format!("evt_{}_{}", kind, created),
            "type": kind,
            "created": created,
            "data": {
                "object": {
                    "id": "in_1",
                    "customer": customer,
                    "subscription": subscription
                }
            }
        }))
        .unwrap()
    }

    async fn snapshot_of(pool: &SqlitePool, user_id: &str) -> (String, Option<DateTime<Utc>>) {
        let row = sqlx::query(
            "SELECT subscription_status, current_period_end FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap();
        (row.get("subscription_status"), row.get("current_period_end"))
    }

    #[tokio::test]
    async fn test_subscription_created_activates_snapshot_and_record() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let period_end = Utc::now().timestamp() + 2_592_000;
        let event = subscription_event(
            "customer.subscription.created",
            Utc::now().timestamp(),
            "cus_1",
            "active",
            period_end,
        );

        let outcome = reconciler.process_event(&event).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let (status, end) = snapshot_of(&pool, "u1").await;
        assert_eq!(status, "active");
        assert_eq!(end.unwrap().timestamp(), period_end);

        let record = reconciler.record_for_user("u1").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.billing_subscription_id, "sub_1");
        assert!(!record.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_non_active_provider_status_maps_to_inactive_snapshot() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let event = subscription_event(
            "customer.subscription.created",
            Utc::now().timestamp(),
            "cus_1",
            "incomplete",
            Utc::now().timestamp() + 1000,
        );
        reconciler.process_event(&event).await.unwrap();

        let (status, _) = snapshot_of(&pool, "u1").await;
        assert_eq!(status, "inactive");
    }

    #[tokio::test]
    async fn test_duplicate_event_is_idempotent() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let period_end = Utc::now().timestamp() + 2_592_000;
        let event = subscription_event(
            "customer.subscription.updated",
            Utc::now().timestamp(),
            "cus_1",
            "active",
            period_end,
        );

        reconciler.process_event(&event).await.unwrap();
        let first = reconciler.record_for_user("u1").await.unwrap().unwrap();

        reconciler.process_event(&event).await.unwrap();
        let second = reconciler.record_for_user("u1").await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.current_period_end, second.current_period_end);
        assert_eq!(first.cancel_at_period_end, second.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_stale_replay_does_not_regress_period() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let t1 = Utc::now().timestamp();
        let d1 = t1 + 2_592_000;
        let d2 = d1 + 2_592_000;

        let created = subscription_event("customer.subscription.created", t1, "cus_1", "active", d1);
        let updated =
            subscription_event("customer.subscription.updated", t1 + 60, "cus_1", "active", d2);

        reconciler.process_event(&created).await.unwrap();
        reconciler.process_event(&updated).await.unwrap();

        // Redelivery of the earlier event must be skipped
        let outcome = reconciler.process_event(&created).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Stale);

        let record = reconciler.record_for_user("u1").await.unwrap().unwrap();
        assert_eq!(record.current_period_end.timestamp(), d2);

        let (_, end) = snapshot_of(&pool, "u1").await;
        assert_eq!(end.unwrap().timestamp(), d2);
    }

    #[tokio::test]
    async fn test_deletion_forces_cancelled_and_keeps_period_end() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let t1 = Utc::now().timestamp();
        let period_end = t1 + 2_592_000;
        let created =
            subscription_event("customer.subscription.created", t1, "cus_1", "active", period_end);
        reconciler.process_event(&created).await.unwrap();

        let deleted = subscription_event(
            "customer.subscription.deleted",
            t1 + 120,
            "cus_1",
            "canceled",
            period_end,
        );
        reconciler.process_event(&deleted).await.unwrap();

        let (status, end) = snapshot_of(&pool, "u1").await;
        assert_eq!(status, "cancelled");
        // Last known period end survives the deletion
        assert_eq!(end.unwrap().timestamp(), period_end);

        let record = reconciler.record_for_user("u1").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Cancelled);
        assert!(record.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_invoice_failure_refetches_and_applies() {
        let (reconciler, pool, billing) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let now = Utc::now().timestamp();
        billing.put_subscription(ProviderSubscription {
            id: "sub_1".to_string(),
            customer: "cus_1".to_string(),
            status: "past_due".to_string(),
            current_period_start: now - 2_592_000,
            current_period_end: now + 100,
            cancel_at_period_end: false,
        });

        let event = invoice_event("invoice.payment_failed", now, "cus_1", Some("sub_1"));
        let outcome = reconciler.process_event(&event).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let (status, _) = snapshot_of(&pool, "u1").await;
        assert_eq!(status, "inactive");

        let record = reconciler.record_for_user("u1").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn test_invoice_without_subscription_is_ignored() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", Some("cus_1")).await;

        let event = invoice_event(
            "invoice.payment_succeeded",
            Utc::now().timestamp(),
            "cus_1",
            None,
        );
        let outcome = reconciler.process_event(&event).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_unknown_customer_surfaces_integrity_error() {
        let (reconciler, pool, _) = setup().await;
        insert_user(&pool, "u1", None).await;

        let event = subscription_event(
            "customer.subscription.created",
            Utc::now().timestamp(),
            "cus_unknown",
            "active",
            Utc::now().timestamp() + 1000,
        );

        let result = reconciler.process_event(&event).await;
        assert!(matches!(result, Err(ApiError::Integrity(_))));

        // No state was touched
        let (status, _) = snapshot_of(&pool, "u1").await;
        assert_eq!(status, "inactive");
    }

    #[tokio::test]
    async fn test_unrecognized_event_type_is_noop() {
        let (reconciler, _, _) = setup().await;

        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_x",
            "type": "charge.refunded",
            "created": Utc::now().timestamp(),
            "data": { "object": {} }
        }))
        .unwrap();

        let outcome = reconciler.process_event(&event).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }
}
