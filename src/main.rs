use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use portsight_backend::calendar::MarketCalendar;
use portsight_backend::cli::{generate_test_seed, seed_congress_trades};
use portsight_backend::db::{StoreRole, Stores};
use portsight_backend::external::yahoo::YahooProvider;
use portsight_backend::fetch::Fetcher;
use portsight_backend::llm::LlmRouter;
use portsight_backend::logging::{init_logging, init_sidecar_logging, LoggingConfig};
use portsight_backend::refresher::{self, RefresherConfig};
use portsight_backend::scheduler::{build_context, SchedulerService};
use portsight_backend::services::cache::CacheLayer;
use portsight_backend::services::rate_limiter::FixedWindowLimiter;
use portsight_backend::state::AppState;
use portsight_backend::{app, llm};

#[derive(Parser)]
#[command(name = "portsight", about = "Personal-scale financial intelligence platform")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and API server (default)
    Serve,
    /// Batch-import historical congress trades
    SeedCongressTrades {
        #[arg(long, default_value_t = 6)]
        months_back: u32,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        /// Skip trades newer than 3 days (the nightly job covers them)
        #[arg(long)]
        skip_recent: bool,
    },
    /// Write synthetic fixtures for local development
    GenerateTestSeed,
    /// Run the cookie-refresher sidecar in the foreground
    CookieRefresher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::SeedCongressTrades {
            months_back,
            page_size,
            start_page,
            skip_recent,
        } => {
            init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let stores = Stores::connect_from_env(StoreRole::ServiceRole).await?;
            let fetcher = Fetcher::from_env();
            let batch_id = seed_congress_trades::run(
                &stores,
                &fetcher,
                seed_congress_trades::SeedArgs {
                    months_back,
                    page_size,
                    start_page,
                    skip_recent,
                },
            )
            .await?;
            println!("{batch_id}");
            Ok(())
        }
        Command::GenerateTestSeed => {
            init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let stores = Stores::connect_from_env(StoreRole::ServiceRole).await?;
            generate_test_seed::run(&stores).await?;
            println!("test seed written");
            Ok(())
        }
        Command::CookieRefresher => cookie_refresher().await,
    }
}

async fn serve() -> anyhow::Result<()> {
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let stores = Stores::connect_from_env(StoreRole::ServiceRole).await?;
    if let Err(e) = stores.run_migrations().await {
        warn!("Migrations failed (continuing against existing schema): {e}");
    }

    let fetcher = Fetcher::from_env();
    let llm_router = LlmRouter::from_env();
    let cache = CacheLayer::default();
    let calendar = MarketCalendar::from_env();
    let provider = Arc::new(YahooProvider::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let context = build_context(
        stores.clone(),
        fetcher,
        llm_router,
        cache.clone(),
        calendar,
        provider,
        shutdown_rx.clone(),
    );

    let mut scheduler = SchedulerService::new(context, shutdown_tx.clone()).await?;
    scheduler.start().await?;

    let state = AppState {
        stores,
        cache,
        limiter: Arc::new(FixedWindowLimiter::from_env()),
    };
    let app = app::create_app(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    info!("🚀 Portsight backend running at http://{}/", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let result = server.await;

    // Stop firing and drain running handlers before the process exits
    if let Err(e) = scheduler.shutdown().await {
        error!("Scheduler shutdown error: {e}");
    }

    result.map_err(Into::into)
}

async fn cookie_refresher() -> anyhow::Result<()> {
    let config = RefresherConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    let log_dir = config
        .output_file
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| "/shared/cookies".into());
    let _guard = init_sidecar_logging(LoggingConfig::from_env(), &log_dir, "cookie_refresher.log")
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Fail fast with a descriptive message when nothing is provisioned
    if llm::CookieBundle::from_env().is_none() {
        anyhow::bail!(
            "no cookies provisioned: set WEBAI_COOKIES_JSON, WEBAI_COOKIES_JSON_B64, \
             WEBAI_SECURE_1PSID or provide {}",
            config.input_file.display()
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    refresher::run(config, shutdown_rx).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
