/// LearnHub - subscription-gated lesson platform backend
///
/// REST API for accounts, the lesson catalog, and billing, built around a
/// webhook-driven subscription reconciler and token-pair sessions.

mod account;
mod api;
mod auth;
mod billing;
mod config;
mod context;
mod db;
mod entitlement;
mod error;
mod lessons;
mod server;
mod subscription;
mod tokens;
mod validation;

use config::ServerConfig;
use context::AppContext;
use error::ApiResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ApiResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "learnhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    __                           __  __      __
   / /   ___  ____ __________  / / / /_  __/ /_
  / /   / _ \/ __ `/ ___/ __ \/ /_/ / / / / __ \
 / /___/  __/ /_/ / /  / / / / __  / /_/ / /_/ /
/_____/\___/\__,_/_/  /_/ /_/_/ /_/\__,_/_.___/

        Lesson Platform API v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
