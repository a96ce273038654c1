/// User profile and admin user management endpoints
use crate::{
    account::{Role, UpdateProfileRequest, UserProfile},
    api::{success, success_message, ApiResponse, Page, PageQuery},
    auth::CurrentUser,
    context::AppContext,
    error::ApiResult,
    require_role,
    validation::validate_payload,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/users/profile", put(update_profile))
        .route("/api/users", get(list_users))
        .route("/api/users/:id", get(get_user).delete(delete_user))
}

/// Update the caller's own profile
async fn update_profile(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ApiResponse<UserProfile>>> {
    validate_payload(&req)?;

    let updated = ctx
        .accounts
        .update_profile(
            &user.id,
            req.email.as_deref(),
            req.first_name.as_deref(),
            req.last_name.as_deref(),
        )
        .await?;

    Ok(success(
        "Profile updated successfully",
        UserProfile::from(&updated),
    ))
}

/// List users (admin only)
async fn list_users(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ApiResponse<Page<UserProfile>>>> {
    require_role!(user, Role::Admin);

    let (page, limit) = query.clamped();
    let (users, total) = ctx.accounts.list_users(page, limit).await?;
    let profiles = users.iter().map(UserProfile::from).collect();

    Ok(success(
        "Users retrieved successfully",
        Page::new(profiles, total, page, limit),
    ))
}

/// Get a user by id (admin only)
async fn get_user(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<UserProfile>>> {
    require_role!(user, Role::Admin);

    let target = ctx.accounts.get_user(&id).await?;

    Ok(success(
        "User retrieved successfully",
        UserProfile::from(&target),
    ))
}

/// Delete a user (admin only)
async fn delete_user(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    require_role!(user, Role::Admin);

    ctx.accounts.delete_user(&id).await?;

    Ok(success_message("User deleted successfully"))
}
