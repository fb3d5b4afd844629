pub mod article_queries;
pub mod job_execution_queries;
pub mod market_queries;
pub mod retry_queue_queries;
pub mod social_queries;
pub mod watchlist_queries;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Which credential the operational pool connects with. The factory is the
/// only place the two differ; everything downstream sees the same pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// Full-privilege connection used by the scheduler and jobs.
    ServiceRole,
    /// Restricted connection for read-mostly API consumers.
    Anon,
}

/// The two logical stores: operational (portfolios, trades, job state,
/// retry queue, FX) and research (articles, social posts, embeddings).
/// When no dedicated research URL is configured, both point at the same
/// database.
#[derive(Clone)]
pub struct Stores {
    pub ops: PgPool,
    pub research: PgPool,
}

impl Stores {
    pub async fn connect_from_env(role: StoreRole) -> Result<Self, sqlx::Error> {
        let ops_url = match role {
            StoreRole::ServiceRole => std::env::var("SUPABASE_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| sqlx::Error::Configuration(
                    "SUPABASE_DATABASE_URL or DATABASE_URL must be set".into(),
                ))?,
            StoreRole::Anon => std::env::var("SUPABASE_URL")
                .or_else(|_| std::env::var("SUPABASE_DATABASE_URL"))
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| sqlx::Error::Configuration(
                    "SUPABASE_URL or DATABASE_URL must be set".into(),
                ))?,
        };

        let ops = PgPoolOptions::new()
            .max_connections(10)
            .connect(&ops_url)
            .await?;

        let research = match std::env::var("RESEARCH_DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => {
                info!("Connecting dedicated research store");
                PgPoolOptions::new().max_connections(5).connect(&url).await?
            }
            _ => ops.clone(),
        };

        Ok(Self { ops, research })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.ops).await?;
        Ok(())
    }
}
