/// Application context and dependency injection
use crate::{
    account::AccountManager,
    billing::{BillingClient, HttpBillingClient},
    config::ServerConfig,
    db,
    error::{ApiError, ApiResult},
    lessons::LessonStore,
    subscription::Reconciler,
    tokens::TokenService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub tokens: TokenService,
    pub accounts: Arc<AccountManager>,
    pub lessons: Arc<LessonStore>,
    pub billing: Arc<dyn BillingClient>,
    pub reconciler: Arc<Reconciler>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let billing: Arc<dyn BillingClient> = Arc::new(HttpBillingClient::new(&config.billing));

        Ok(Self::assemble(config, pool, billing))
    }

    /// Wire the services together. The billing client is injected so tests
    /// can substitute a fake.
    pub fn assemble(
        config: ServerConfig,
        db: SqlitePool,
        billing: Arc<dyn BillingClient>,
    ) -> Self {
        let tokens = TokenService::new(&config.auth);
        let accounts = Arc::new(AccountManager::new(db.clone(), tokens.clone()));
        let lessons = Arc::new(LessonStore::new(db.clone()));
        let reconciler = Arc::new(Reconciler::new(db.clone(), billing.clone()));

        Self {
            config: Arc::new(config),
            db,
            tokens,
            accounts,
            lessons,
            billing,
            reconciler,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> ApiResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ApiError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
