/// Session endpoints: register, login, refresh, logout, profile
use crate::{
    account::{LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest, UserProfile},
    api::{success, ApiResponse},
    auth::CurrentUser,
    context::AppContext,
    error::ApiResult,
    tokens::TokenPair,
    validation::{validate_payload, validate_password_strength},
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Build session routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/profile", get(profile))
}

/// User plus token pair, returned by register and login
#[derive(Debug, Serialize)]
pub struct SessionData {
    pub user: UserProfile,
    pub tokens: TokenPair,
}

/// Register endpoint
async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<SessionData>>)> {
    validate_payload(&req)?;
    validate_password_strength(&req.password)?;

    let (user, tokens) = ctx
        .accounts
        .register(&req.email, &req.password, &req.first_name, &req.last_name)
        .await?;

    Ok((
        StatusCode::CREATED,
        success(
            "User registered successfully",
            SessionData {
                user: UserProfile::from(&user),
                tokens,
            },
        ),
    ))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<ApiResponse<SessionData>>> {
    validate_payload(&req)?;

    let (user, tokens) = ctx.accounts.login(&req.email, &req.password).await?;

    Ok(success(
        "Login successful",
        SessionData {
            user: UserProfile::from(&user),
            tokens,
        },
    ))
}

/// Refresh endpoint: rotates the presented refresh token
async fn refresh(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<ApiResponse<TokenPair>>> {
    validate_payload(&req)?;

    let tokens = ctx.accounts.refresh(&req.refresh_token).await?;

    Ok(success("Token refreshed successfully", tokens))
}

/// Logout endpoint: revokes the presented refresh token, idempotently
async fn logout(
    State(ctx): State<AppContext>,
    Json(req): Json<LogoutRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    validate_payload(&req)?;

    ctx.accounts.logout(&req.refresh_token).await?;

    Ok(success("Logout successful", serde_json::json!({ "ok": true })))
}

/// Profile endpoint
async fn profile(CurrentUser(user): CurrentUser) -> ApiResult<Json<ApiResponse<UserProfile>>> {
    Ok(success(
        "Profile retrieved successfully",
        UserProfile::from(&user),
    ))
}
