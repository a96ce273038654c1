/// Account manager implementation using runtime queries
///
/// Owns the user table and the per-user set of live refresh tokens.
/// Refresh rotation is a single transaction so two concurrent refresh
/// calls can never both mint a pair from the same presented token.
use crate::{
    account::{normalize_email, Role, SubscriptionSnapshot, User},
    error::{ApiError, ApiResult},
    subscription::SubscriptionStatus,
    tokens::{TokenPair, TokenService},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    tokens: TokenService,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, tokens: TokenService) -> Self {
        Self { db, tokens }
    }

    /// Register a new user and open an initial session
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> ApiResult<(User, TokenPair)> {
        let email = normalize_email(email);

        if self.email_exists(&email, None).await? {
            return Err(ApiError::Conflict(
                "User with this email already exists".to_string(),
            ));
        }

        let password_hash = hash_password(password)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, role, subscription_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(first_name)
        .bind(last_name)
        .bind(Role::User.as_str())
        .bind(SubscriptionStatus::Inactive.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        let user = User {
            id,
            email,
            password_hash,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            role: Role::User,
            subscription: SubscriptionSnapshot::inactive(),
            created_at: now,
            updated_at: now,
        };

        let pair = self.tokens.issue_pair(&user)?;
        self.store_refresh_token(&user.id, &pair.refresh_token)
            .await?;

        tracing::info!("registered user {}", user.id);

        Ok((user, pair))
    }

    /// Authenticate by email and password and open a session.
    ///
    /// Absent email and wrong password produce the identical error so the
    /// endpoint cannot be used to enumerate accounts.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<(User, TokenPair)> {
        let email = normalize_email(email);

        let user = self
            .find_by_email(&email)
            .await?
            .ok_or_else(invalid_credentials)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(invalid_credentials());
        }

        let pair = self.tokens.issue_pair(&user)?;
        self.store_refresh_token(&user.id, &pair.refresh_token)
            .await?;

        Ok((user, pair))
    }

    /// Rotate a refresh token: verify, then atomically replace the
    /// presented token with a fresh one.
    ///
    /// Expired, revoked, and unknown tokens all fail with the same message.
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<TokenPair> {
        let claims = self
            .tokens
            .verify_refresh(refresh_token)
            .map_err(|_| invalid_refresh_token())?;

        let user = match self.get_user(&claims.sub).await {
            Ok(user) => user,
            Err(_) => return Err(invalid_refresh_token()),
        };

        let pair = self.tokens.issue_pair(&user)?;
        let now = Utc::now();

        // Rotation is one transaction. The conditional delete doubles as the
        // race guard: if a concurrent refresh already rotated this token out,
        // zero rows are affected and this call fails instead of minting a
        // second descendant pair.
        let mut tx = self.db.begin().await.map_err(ApiError::Database)?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?1 AND token = ?2")
            .bind(&user.id)
            .bind(refresh_token)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::Database)?;

        if deleted.rows_affected() == 0 {
            return Err(invalid_refresh_token());
        }

        sqlx::query("INSERT INTO refresh_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&pair.refresh_token)
            .bind(&user.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::Database)?;

        tx.commit().await.map_err(ApiError::Database)?;

        Ok(pair)
    }

    /// Revoke a refresh token wherever it lives. Idempotent: reports
    /// success even when the token was already absent, so the endpoint
    /// cannot be used as a token-probing oracle.
    pub async fn logout(&self, refresh_token: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token = ?1")
            .bind(refresh_token)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Get user by id
    pub async fn get_user(&self, id: &str) -> ApiResult<User> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, first_name, last_name, role,
                    subscription_status, billing_customer_id, billing_subscription_id,
                    current_period_end, created_at, updated_at
             FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        Ok(map_user_row(&row))
    }

    /// Find user by normalized email
    pub async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, first_name, last_name, role,
                    subscription_status, billing_customer_id, billing_subscription_id,
                    current_period_end, created_at, updated_at
             FROM users WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(row.map(|r| map_user_row(&r)))
    }

    /// Update profile fields. Never touches password, role, or the
    /// subscription snapshot.
    pub async fn update_profile(
        &self,
        id: &str,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> ApiResult<User> {
        let mut user = self.get_user(id).await?;

        if let Some(email) = email {
            let email = normalize_email(email);
            if email != user.email && self.email_exists(&email, Some(id)).await? {
                return Err(ApiError::Conflict(
                    "User with this email already exists".to_string(),
                ));
            }
            user.email = email;
        }
        if let Some(first_name) = first_name {
            user.first_name = first_name.to_string();
        }
        if let Some(last_name) = last_name {
            user.last_name = last_name.to_string();
        }
        user.updated_at = Utc::now();

        sqlx::query(
            "UPDATE users SET email = ?1, first_name = ?2, last_name = ?3, updated_at = ?4
             WHERE id = ?5",
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.updated_at)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok(user)
    }

    /// List users with pagination, newest first
    pub async fn list_users(&self, page: i64, limit: i64) -> ApiResult<(Vec<User>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .map_err(ApiError::Database)?;

        let rows = sqlx::query(
            "SELECT id, email, password_hash, first_name, last_name, role,
                    subscription_status, billing_customer_id, billing_subscription_id,
                    current_period_end, created_at, updated_at
             FROM users ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&self.db)
        .await
        .map_err(ApiError::Database)?;

        Ok((rows.iter().map(map_user_row).collect(), total))
    }

    /// Delete a user. Refresh tokens and the subscription record go with
    /// it via foreign-key cascade.
    pub async fn delete_user(&self, id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("User not found".to_string()));
        }

        tracing::info!("deleted user {}", id);

        Ok(())
    }

    /// Persist the billing customer reference on the user snapshot
    pub async fn set_billing_customer(&self, id: &str, customer_id: &str) -> ApiResult<()> {
        sqlx::query("UPDATE users SET billing_customer_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(customer_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }

    /// Check if email exists, optionally excluding one user id
    async fn email_exists(&self, email: &str, exclude_id: Option<&str>) -> ApiResult<bool> {
        let count: i64 = match exclude_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?1 AND id != ?2")
                    .bind(email)
                    .bind(id)
                    .fetch_one(&self.db)
                    .await
                    .map_err(ApiError::Database)?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?1")
                .bind(email)
                .fetch_one(&self.db)
                .await
                .map_err(ApiError::Database)?,
        };

        Ok(count > 0)
    }

    /// Append a refresh token to the user's live set
    async fn store_refresh_token(&self, user_id: &str, token: &str) -> ApiResult<()> {
        sqlx::query("INSERT INTO refresh_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.db)
            .await
            .map_err(ApiError::Database)?;

        Ok(())
    }
}

/// Map a users row to the domain struct
pub(crate) fn map_user_row(row: &SqliteRow) -> User {
    let status: String = row.get("subscription_status");
    let role: String = row.get("role");
    let current_period_end: Option<DateTime<Utc>> = row.get("current_period_end");

    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        role: Role::parse(&role),
        subscription: SubscriptionSnapshot {
            status: SubscriptionStatus::parse(&status),
            billing_customer_id: row.get("billing_customer_id"),
            billing_subscription_id: row.get("billing_subscription_id"),
            current_period_end,
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Hash a password with Argon2id and a random salt
fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored hash
fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(format!("Stored password hash is invalid: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn invalid_credentials() -> ApiError {
    ApiError::Authentication("Invalid email or password".to_string())
}

fn invalid_refresh_token() -> ApiError {
    ApiError::Authentication("Invalid refresh token".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AuthConfig, db};

    async fn create_test_manager() -> AccountManager {
        let pool = db::memory_pool().await;
        let tokens = TokenService::new(&AuthConfig {
            access_token_secret: "access-secret-for-tests-0123456789ab".to_string(),
            refresh_token_secret: "refresh-secret-for-tests-0123456789".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
        });

        AccountManager::new(pool, tokens)
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let manager = create_test_manager().await;

        let (user, tokens) = manager
            .register("Alice@Example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        // Email is normalized on the way in
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.subscription.status, SubscriptionStatus::Inactive);
        assert!(!tokens.access_token.is_empty());

        let (logged_in, _) = manager
            .login("alice@example.com", "Passw0rd")
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflict() {
        let manager = create_test_manager().await;

        let (first, _) = manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        let result = manager
            .register("alice@example.com", "Different1", "Mallory", "Jones")
            .await;

        match result {
            Err(ApiError::Conflict(_)) => {}
            other => panic!("Expected Conflict error, got {:?}", other.map(|_| ())),
        }

        // First user's data untouched
        let stored = manager.get_user(&first.id).await.unwrap();
        assert_eq!(stored.first_name, "Alice");
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let manager = create_test_manager().await;

        manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        let unknown_email = manager.login("bob@example.com", "Passw0rd").await;
        let wrong_password = manager.login("alice@example.com", "wrong").await;

        let msg_unknown = match unknown_email {
            Err(ApiError::Authentication(msg)) => msg,
            other => panic!("Expected Authentication error, got {:?}", other.map(|_| ())),
        };
        let msg_wrong = match wrong_password {
            Err(ApiError::Authentication(msg)) => msg,
            other => panic!("Expected Authentication error, got {:?}", other.map(|_| ())),
        };

        assert_eq!(msg_unknown, msg_wrong);
    }

    #[tokio::test]
    async fn test_refresh_rotation_is_single_use() {
        let manager = create_test_manager().await;

        let (_, tokens) = manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        // First refresh succeeds and rotates
        let rotated = manager.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, tokens.refresh_token);

        // Replaying the rotated-out token fails even though its JWT is
        // still within its own expiry
        let replay = manager.refresh(&tokens.refresh_token).await;
        assert!(matches!(replay, Err(ApiError::Authentication(_))));

        // The replacement still works
        manager.refresh(&rotated.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_after_logout_fails() {
        let manager = create_test_manager().await;

        let (_, tokens) = manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        manager.logout(&tokens.refresh_token).await.unwrap();

        let result = manager.refresh(&tokens.refresh_token).await;
        assert!(matches!(result, Err(ApiError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let manager = create_test_manager().await;

        let (_, tokens) = manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        manager.logout(&tokens.refresh_token).await.unwrap();
        // Second logout with the same token still reports success
        manager.logout(&tokens.refresh_token).await.unwrap();
        // As does a logout for a token that never existed
        manager.logout("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_with_forged_token_fails() {
        let manager = create_test_manager().await;

        manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();

        let result = manager.refresh("not-a-jwt").await;
        assert!(matches!(result, Err(ApiError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_update_profile_email_conflict() {
        let manager = create_test_manager().await;

        let (alice, _) = manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();
        manager
            .register("bob@example.com", "Passw0rd", "Bob", "Jones")
            .await
            .unwrap();

        let result = manager
            .update_profile(&alice.id, Some("bob@example.com"), None, None)
            .await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        // Updating the other fields still works
        let updated = manager
            .update_profile(&alice.id, None, Some("Alicia"), None)
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Alicia");
        assert_eq!(updated.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_list_and_delete_users() {
        let manager = create_test_manager().await;

        manager
            .register("alice@example.com", "Passw0rd", "Alice", "Smith")
            .await
            .unwrap();
        let (bob, _) = manager
            .register("bob@example.com", "Passw0rd", "Bob", "Jones")
            .await
            .unwrap();

        let (users, total) = manager.list_users(1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(users.len(), 2);

        manager.delete_user(&bob.id).await.unwrap();
        let (_, total) = manager.list_users(1, 10).await.unwrap();
        assert_eq!(total, 1);

        let result = manager.delete_user(&bob.id).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
