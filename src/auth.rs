/// Authentication extractors and authorization gates
use crate::{
    account::User,
    api::middleware::extract_bearer_token,
    context::AppContext,
    entitlement,
    error::{ApiError, ApiResult},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::Utc;

/// Authenticated identity - extracts and validates the bearer token, then
/// loads a fresh user row so entitlement checks never run on stale state
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppContext> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Authentication("Access token is required".to_string()))?;

        let claims = state.tokens.verify_access(&token)?;

        let user = state
            .accounts
            .get_user(&claims.sub)
            .await
            .map_err(|_| ApiError::Authentication("Invalid or expired token".to_string()))?;

        Ok(CurrentUser(user))
    }
}

/// Request identity for endpoints that serve both visitors and members.
/// "Auth attempted and failed" and "auth never attempted" both land on
/// `Anonymous`, explicitly, rather than an error swallowed somewhere.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            Identity::Anonymous => None,
        }
    }

    /// Whether this identity currently qualifies for premium content
    pub fn is_entitled(&self) -> bool {
        self.user()
            .is_some_and(|user| entitlement::is_active(&user.subscription, Utc::now()))
    }
}

/// Optional identity - never rejects
#[derive(Debug, Clone)]
pub struct OptionalIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppContext> for OptionalIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let identity = match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(user)) => Identity::User(user),
            Err(_) => Identity::Anonymous,
        };

        Ok(OptionalIdentity(identity))
    }
}

/// Macro to require a role on an authenticated user
/// Usage: require_role!(user, Role::Admin);
#[macro_export]
macro_rules! require_role {
    ($user:expr, $role:expr) => {
        if $user.role != $role {
            return Err($crate::error::ApiError::Authorization(
                "Insufficient permissions".to_string(),
            ));
        }
    };
}

/// Subscription gate: the user's freshly loaded snapshot must be entitled
pub fn require_entitled(user: &User) -> ApiResult<()> {
    if !entitlement::is_active(&user.subscription, Utc::now()) {
        return Err(ApiError::Authorization(
            "Active subscription required to access this content".to_string(),
        ));
    }

    Ok(())
}
