/// Subscription endpoints: checkout, billing portal, status, cancel, and
/// the provider webhook intake
use crate::{
    api::{success, success_message, ApiResponse},
    auth::CurrentUser,
    billing::signature,
    context::AppContext,
    entitlement,
    error::{ApiError, ApiResult},
    subscription::WebhookEvent,
    validation::validate_payload,
};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

/// Build subscription routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/subscriptions/checkout-session", post(create_checkout_session))
        .route("/api/subscriptions/billing-portal", post(create_billing_portal_session))
        .route("/api/subscriptions/status", get(subscription_status))
        .route("/api/subscriptions/cancel", post(cancel_subscription))
        .route("/api/subscriptions/webhook", post(webhook))
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    #[validate(length(min = 1, message = "Price ID is required"))]
    pub price_id: String,
    #[validate(url(message = "Success URL must be a valid URL"))]
    pub success_url: String,
    #[validate(url(message = "Cancel URL must be a valid URL"))]
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BillingPortalRequest {
    #[validate(url(message = "Return URL must be a valid URL"))]
    pub return_url: String,
}

/// Start a checkout session, lazily creating the provider customer on
/// first use and persisting its reference on the user snapshot
async fn create_checkout_session(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CheckoutSessionRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    validate_payload(&req)?;

    let customer_id = match &user.subscription.billing_customer_id {
        Some(customer_id) => customer_id.clone(),
        None => {
            let name = format!("{} {}", user.first_name, user.last_name);
            let customer = ctx
                .billing
                .create_customer(&user.email, &name, &user.id)
                .await?;
            ctx.accounts
                .set_billing_customer(&user.id, &customer.id)
                .await?;
            customer.id
        }
    };

    let session = ctx
        .billing
        .create_checkout_session(&customer_id, &req.price_id, &req.success_url, &req.cancel_url)
        .await?;

    Ok(success(
        "Checkout session created successfully",
        json!({ "sessionId": session.id, "url": session.url }),
    ))
}

/// Open the provider's billing portal for an existing customer
async fn create_billing_portal_session(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<BillingPortalRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    validate_payload(&req)?;

    let customer_id = user
        .subscription
        .billing_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::Validation("No subscription found for this user".to_string()))?;

    let session = ctx
        .billing
        .create_billing_portal_session(customer_id, &req.return_url)
        .await?;

    Ok(success(
        "Billing portal session created successfully",
        json!({ "url": session.url }),
    ))
}

/// Report the caller's subscription: live provider state alongside the
/// local record and the entitlement verdict
async fn subscription_status(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let Some(subscription_id) = user.subscription.billing_subscription_id.as_deref() else {
        return Ok(success(
            "No subscription found",
            json!({ "hasSubscription": false, "subscription": null }),
        ));
    };

    let provider = ctx.billing.get_subscription(subscription_id).await?;
    let record = ctx.reconciler.record_for_user(&user.id).await?;

    Ok(success(
        "Subscription status retrieved successfully",
        json!({
            "hasSubscription": true,
            "subscription": {
                "id": provider.id,
                "status": provider.status,
                "currentPeriodStart": provider.period_start(),
                "currentPeriodEnd": provider.period_end(),
                "cancelAtPeriodEnd": provider.cancel_at_period_end,
                "localStatus": record.map(|record| record.status),
                "isActive": entitlement::is_active(&user.subscription, Utc::now()),
            }
        }),
    ))
}

/// Cancel the caller's subscription at period end
async fn cancel_subscription(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let subscription_id = user
        .subscription
        .billing_subscription_id
        .as_deref()
        .ok_or_else(|| ApiError::Validation("No subscription found for this user".to_string()))?;

    let subscription = ctx.billing.cancel_subscription(subscription_id).await?;

    Ok(success(
        "Subscription cancelled successfully",
        json!({
            "cancelAtPeriodEnd": subscription.cancel_at_period_end,
            "currentPeriodEnd": subscription.period_end(),
        }),
    ))
}

/// Webhook intake. Signature verification is a hard gate before anything
/// else runs; once it passes, delivery is acknowledged even when
/// reconciliation hits a local data-integrity gap, which is logged and
/// alerted out-of-band instead of bounced back to the provider.
async fn webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<()>>> {
    let header = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Missing signature header".to_string()))?;

    signature::verify(
        &ctx.config.billing.webhook_secret,
        &body,
        header,
        ctx.config.billing.webhook_tolerance_secs,
        Utc::now(),
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Malformed webhook payload: {}", e)))?;

    match ctx.reconciler.process_event(&event).await {
        Ok(outcome) => {
            tracing::debug!(event = %event.id, event_type = %event.kind, ?outcome, "webhook processed");
        }
        Err(ApiError::Integrity(message)) => {
            // Acknowledge anyway: retrying cannot repair a missing local
            // user, and bouncing the delivery causes provider retry storms
            tracing::error!(event = %event.id, event_type = %event.kind, %message, "webhook reconciliation failed");
        }
        // Transient failures (provider re-fetch, database) bubble up as
        // 500 so the provider redelivers
        Err(e) => return Err(e),
    }

    Ok(success_message("Webhook processed successfully"))
}
