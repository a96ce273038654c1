/// Lesson store implementation using runtime queries
use crate::{
    error::{ApiError, ApiResult},
    lessons::{CreateLessonRequest, Lesson, LessonFilter, UpdateLessonRequest},
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const LESSON_COLUMNS: &str = "id, title, description, content, video_url, thumbnail_url,
        duration_minutes, category, tags, is_premium, author, sort_order, created_at, updated_at";

pub struct LessonStore {
    db: SqlitePool,
}

impl LessonStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a lesson
    pub async fn create(&self, req: &CreateLessonRequest) -> ApiResult<Lesson> {
        let now = Utc::now();
        let lesson = Lesson {
            id: Uuid::new_v4().to_string(),
            title: req.title.clone(),
            description: req.description.clone(),
            content: req.content.clone(),
            video_url: req.video_url.clone(),
            thumbnail_url: req.thumbnail_url.clone(),
            duration_minutes: req.duration_minutes,
            category: req.category.clone(),
            tags: req.tags.clone(),
            is_premium: req.is_premium,
            author: req.author.clone(),
            sort_order: req.sort_order.unwrap_or(0),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO lessons (id, title, description, content, video_url, thumbnail_url,
                                  duration_minutes, category, tags, is_premium, author, sort_order,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&lesson.id)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.content)
        .bind(&lesson.video_url)
        .bind(&lesson.thumbnail_url)
        .bind(lesson.duration_minutes)
        .bind(&lesson.category)
        .bind(encode_tags(&lesson.tags))
        .bind(lesson.is_premium)
        .bind(&lesson.author)
        .bind(lesson.sort_order)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(lesson)
    }

    /// Get a lesson by id
    pub async fn get(&self, id: &str) -> ApiResult<Option<Lesson>> {
        let row = sqlx::query(&format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(row.map(|row| map_lesson_row(&row)))
    }

    /// Merge an update into an existing lesson
    pub async fn update(&self, id: &str, req: &UpdateLessonRequest) -> ApiResult<Lesson> {
        let mut lesson = self
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;

        if let Some(title) = &req.title {
            lesson.title = title.clone();
        }
        if let Some(description) = &req.description {
            lesson.description = description.clone();
        }
        if let Some(content) = &req.content {
            lesson.content = content.clone();
        }
        if let Some(video_url) = &req.video_url {
            lesson.video_url = Some(video_url.clone());
        }
        if let Some(thumbnail_url) = &req.thumbnail_url {
            lesson.thumbnail_url = Some(thumbnail_url.clone());
        }
        if let Some(duration) = req.duration_minutes {
            lesson.duration_minutes = duration;
        }
        if let Some(category) = &req.category {
            lesson.category = category.clone();
        }
        if let Some(tags) = &req.tags {
            lesson.tags = tags.clone();
        }
        if let Some(is_premium) = req.is_premium {
            lesson.is_premium = is_premium;
        }
        if let Some(author) = &req.author {
            lesson.author = author.clone();
        }
        if let Some(sort_order) = req.sort_order {
            lesson.sort_order = sort_order;
        }
        lesson.updated_at = Utc::now();

        sqlx::query(
            "UPDATE lessons
             SET title = ?1, description = ?2, content = ?3, video_url = ?4, thumbnail_url = ?5,
                 duration_minutes = ?6, category = ?7, tags = ?8, is_premium = ?9, author = ?10,
                 sort_order = ?11, updated_at = ?12
             WHERE id = ?13",
        )
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(&lesson.content)
        .bind(&lesson.video_url)
        .bind(&lesson.thumbnail_url)
        .bind(lesson.duration_minutes)
        .bind(&lesson.category)
        .bind(encode_tags(&lesson.tags))
        .bind(lesson.is_premium)
        .bind(&lesson.author)
        .bind(lesson.sort_order)
        .bind(lesson.updated_at)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(lesson)
    }

    /// Delete a lesson
    pub async fn delete(&self, id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Lesson not found".to_string()));
        }

        Ok(())
    }

    /// List lessons matching the filter, with a matching total count
    pub async fn list(&self, filter: &LessonFilter) -> ApiResult<(Vec<Lesson>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM lessons");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .map_err(ApiError::Database)?;

        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM lessons", LESSON_COLUMNS));
        push_filters(&mut query, filter);
        query.push(" ORDER BY sort_order ASC, created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind((filter.page - 1) * filter.limit);

        let rows = query
            .build()
            .fetch_all(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok((rows.iter().map(map_lesson_row).collect(), total))
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &LessonFilter) {
    let mut separator = " WHERE ";

    if let Some(category) = &filter.category {
        query.push(separator).push("category = ");
        query.push_bind(category.clone());
        separator = " AND ";
    }

    if let Some(is_premium) = filter.is_premium {
        query.push(separator).push("is_premium = ");
        query.push_bind(is_premium);
        separator = " AND ";
    }

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        query.push(separator).push("(title LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR description LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR tags LIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
}

fn map_lesson_row(row: &SqliteRow) -> Lesson {
    let tags: String = row.get("tags");

    Lesson {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        content: row.get("content"),
        video_url: row.get("video_url"),
        thumbnail_url: row.get("thumbnail_url"),
        duration_minutes: row.get("duration_minutes"),
        category: row.get("category"),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        is_premium: row.get("is_premium"),
        author: row.get("author"),
        sort_order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}
