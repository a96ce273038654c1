/// Subscription state shared between the user snapshot, the standalone
/// subscription record, and the webhook reconciler.
mod reconciler;

pub use reconciler::{Reconciler, ReconcileOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription status as stored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::PastDue => "past_due",
        }
    }

    /// Parse a locally stored status value
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "cancelled" => SubscriptionStatus::Cancelled,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Inactive,
        }
    }

    /// Map a provider status onto the record's status vocabulary
    pub fn from_provider(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" | "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

/// Durable mirror of the last-known full billing state, keyed by user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub user_id: String,
    pub billing_customer_id: String,
    pub billing_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Watermark of the newest provider event applied to this record
    #[serde(skip_serializing)]
    pub provider_event_at: DateTime<Utc>,
}

/// A billing provider webhook event, as delivered
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation instant of the event at the provider, epoch seconds
    pub created: i64,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.created, 0).unwrap_or_else(Utc::now)
    }
}
