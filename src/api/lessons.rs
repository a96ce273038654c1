/// Lesson catalog endpoints
///
/// Listings are served to visitors and members alike; when the caller is
/// anonymous or unentitled, the effective query is forced to free content
/// server-side, regardless of what the query string asked for.
use crate::{
    account::Role,
    api::{success, success_message, ApiResponse, Page, PageQuery},
    auth::{require_entitled, CurrentUser, OptionalIdentity},
    context::AppContext,
    error::{ApiError, ApiResult},
    lessons::{CreateLessonRequest, Lesson, LessonFilter, UpdateLessonRequest},
    require_role,
    validation::{validate_payload, validate_tags},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

/// Build lesson routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/lessons", get(list_lessons).post(create_lesson))
        .route("/api/lessons/search", get(search_lessons))
        .route("/api/lessons/category/:category", get(lessons_by_category))
        .route("/api/lessons/premium/:id", get(get_premium_lesson))
        .route(
            "/api/lessons/:id",
            get(get_lesson).put(update_lesson).delete(delete_lesson),
        )
}

/// Catalog query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LessonQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    #[serde(rename = "isPremium")]
    pub is_premium: Option<bool>,
    pub search: Option<String>,
}

/// The premium filter a caller actually gets: their own request if they
/// are entitled, otherwise free content only. This override cannot be
/// bypassed by a query parameter.
fn effective_premium(identity: &OptionalIdentity, requested: Option<bool>) -> Option<bool> {
    if identity.0.is_entitled() {
        requested
    } else {
        Some(false)
    }
}

/// List lessons
async fn list_lessons(
    State(ctx): State<AppContext>,
    identity: OptionalIdentity,
    Query(query): Query<LessonQuery>,
) -> ApiResult<Json<ApiResponse<Page<Lesson>>>> {
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .clamped();

    let filter = LessonFilter {
        category: query.category.clone(),
        is_premium: effective_premium(&identity, query.is_premium),
        search: None,
        page,
        limit,
    };

    let (lessons, total) = ctx.lessons.list(&filter).await?;

    Ok(success(
        "Lessons retrieved successfully",
        Page::new(lessons, total, page, limit),
    ))
}

/// Search lessons by title, description, or tag text
async fn search_lessons(
    State(ctx): State<AppContext>,
    identity: OptionalIdentity,
    Query(query): Query<LessonQuery>,
) -> ApiResult<Json<ApiResponse<Page<Lesson>>>> {
    let term = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .ok_or_else(|| ApiError::Validation("Search term is required".to_string()))?
        .to_string();

    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .clamped();

    let filter = LessonFilter {
        category: query.category.clone(),
        is_premium: effective_premium(&identity, query.is_premium),
        search: Some(term),
        page,
        limit,
    };

    let (lessons, total) = ctx.lessons.list(&filter).await?;

    Ok(success(
        "Search completed successfully",
        Page::new(lessons, total, page, limit),
    ))
}

/// List lessons in a category
async fn lessons_by_category(
    State(ctx): State<AppContext>,
    identity: OptionalIdentity,
    Path(category): Path<String>,
    Query(query): Query<LessonQuery>,
) -> ApiResult<Json<ApiResponse<Page<Lesson>>>> {
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .clamped();

    let filter = LessonFilter {
        category: Some(category),
        is_premium: effective_premium(&identity, query.is_premium),
        search: None,
        page,
        limit,
    };

    let (lessons, total) = ctx.lessons.list(&filter).await?;

    Ok(success(
        "Lessons retrieved successfully",
        Page::new(lessons, total, page, limit),
    ))
}

/// Get a single lesson, gating premium content on the caller's current
/// entitlement
async fn get_lesson(
    State(ctx): State<AppContext>,
    identity: OptionalIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Lesson>>> {
    let lesson = ctx
        .lessons
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;

    if lesson.is_premium && !identity.0.is_entitled() {
        return Err(ApiError::Authorization(
            "Premium subscription required to access this lesson".to_string(),
        ));
    }

    Ok(success("Lesson retrieved successfully", lesson))
}

/// Premium variant of lesson retrieval: authentication and an active
/// subscription are required up front, even for free lessons
async fn get_premium_lesson(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Lesson>>> {
    require_entitled(&user)?;

    let lesson = ctx
        .lessons
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;

    Ok(success("Lesson retrieved successfully", lesson))
}

/// Create a lesson (admin only)
async fn create_lesson(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateLessonRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Lesson>>)> {
    require_role!(user, Role::Admin);
    validate_payload(&req)?;
    validate_tags(&req.tags)?;

    let lesson = ctx.lessons.create(&req).await?;

    Ok((
        StatusCode::CREATED,
        success("Lesson created successfully", lesson),
    ))
}

/// Update a lesson (admin only)
async fn update_lesson(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateLessonRequest>,
) -> ApiResult<Json<ApiResponse<Lesson>>> {
    require_role!(user, Role::Admin);
    validate_payload(&req)?;
    if let Some(tags) = &req.tags {
        validate_tags(tags)?;
    }

    let lesson = ctx.lessons.update(&id, &req).await?;

    Ok(success("Lesson updated successfully", lesson))
}

/// Delete a lesson (admin only)
async fn delete_lesson(
    State(ctx): State<AppContext>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    require_role!(user, Role::Admin);

    ctx.lessons.delete(&id).await?;

    Ok(success_message("Lesson deleted successfully"))
}
