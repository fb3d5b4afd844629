//! Job scheduler core: cron registration, execution tracking, heartbeats
//! and graceful drain. One live instance per (job_name, target_date,
//! entity) is guaranteed by the tracking layer's run-key claim.

pub mod retry;
pub mod tracking;
pub mod watchdog;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::calendar::MarketCalendar;
use crate::db::{job_execution_queries, Stores};
use crate::errors::AppError;
use crate::external::price_provider::MarketDataProvider;
use crate::fetch::Fetcher;
use crate::jobs;
use crate::llm::LlmRouter;
use crate::pipeline::PipelineContext;
use crate::rss::RssClient;
use crate::services::cache::CacheLayer;

/// Scheduler tick (and heartbeat) interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);
/// How long shutdown waits for running handlers before abandoning them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a job handler needs, wired by the application root. No
/// globals: cancellation, cache epoch and clients all travel through here.
#[derive(Clone)]
pub struct JobContext {
    pub stores: Stores,
    pub fetcher: Fetcher,
    pub rss: RssClient,
    pub llm: LlmRouter,
    pub pipeline: PipelineContext,
    pub cache: CacheLayer,
    pub calendar: MarketCalendar,
    pub provider: Arc<dyn MarketDataProvider>,
    pub shutdown: watch::Receiver<bool>,
}

impl JobContext {
    /// Handlers must check this on long loops and wind down promptly.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// What a handler reports back on success.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub processed: i32,
    pub failed: i32,
    pub tickers: Vec<String>,
    pub message: String,
}

/// Per-job scheduling options beyond the cron expression.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Collapse triggers queued up behind a running instance into one.
    pub coalesce: bool,
    /// Random delay added to each fire: uniform(0, jitter).
    pub jitter: Option<Duration>,
    /// Maximum lateness before a missed trigger is dropped.
    pub misfire_grace: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            coalesce: true,
            jitter: None,
            misfire_grace: Duration::from_secs(15 * 60),
        }
    }
}

pub type HandlerFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<JobOutcome, AppError>> + Send>>;
pub type Handler = Arc<dyn Fn(JobContext, NaiveDate) -> HandlerFuture + Send + Sync>;

pub struct SchedulerService {
    scheduler: JobScheduler,
    context: JobContext,
    shutdown_tx: watch::Sender<bool>,
    active_jobs: Arc<AtomicI64>,
    process_id: String,
}

impl SchedulerService {
    pub async fn new(
        context: JobContext,
        shutdown_tx: watch::Sender<bool>,
    ) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            context,
            shutdown_tx,
            active_jobs: Arc::new(AtomicI64::new(0)),
            process_id: format!("portsight-{}", std::process::id()),
        })
    }

    /// Register every scheduled job and start firing. Cron format:
    /// sec min hour day month weekday, interpreted in the configured
    /// timezone by the cron runtime.
    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting job scheduler...");

        self.check_previous_heartbeat().await;

        // Nightly calculation chain, after US market close settles
        self.register(
            "0 10 2 * * *",
            jobs::UPDATE_PORTFOLIO_PRICES,
            "Daily at 2:10 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::update_portfolio_prices_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 40 2 * * *",
            jobs::PERFORMANCE_METRICS,
            "Daily at 2:40 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::performance_metrics_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 0 3 * * *",
            jobs::EXCHANGE_RATES,
            "Daily at 3:00 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::exchange_rates_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 20 3 * * *",
            jobs::BENCHMARK_REFRESH,
            "Daily at 3:20 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::benchmark_refresh_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 40 3 * * *",
            jobs::DIVIDEND_PROCESSING,
            "Daily at 3:40 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::dividend_processing_job::run(&ctx, date).await },
        )
        .await?;

        // Scrapers, spread out and jittered so sources never see a thundering herd
        self.register(
            "0 0 4 * * *",
            jobs::INSIDER_TRADES,
            "Daily at 4:00 AM",
            JobOptions {
                jitter: Some(Duration::from_secs(120)),
                ..Default::default()
            },
            |ctx, date| async move { jobs::insider_trades_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 30 4 * * *",
            jobs::CONGRESS_TRADES,
            "Daily at 4:30 AM",
            JobOptions {
                jitter: Some(Duration::from_secs(120)),
                ..Default::default()
            },
            |ctx, date| async move { jobs::congress_trades_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 15 */2 * * *",
            jobs::RSS_INGEST,
            "Every 2 hours at :15",
            JobOptions {
                jitter: Some(Duration::from_secs(60)),
                ..Default::default()
            },
            |ctx, date| async move { jobs::rss_ingest_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 45 */4 * * *",
            jobs::SOCIAL_SENTIMENT,
            "Every 4 hours at :45",
            JobOptions {
                jitter: Some(Duration::from_secs(300)),
                ..Default::default()
            },
            |ctx, date| async move { jobs::social_sentiment_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 30 */2 * * *",
            jobs::RESEARCH_INGEST,
            "Every 2 hours at :30",
            JobOptions::default(),
            |ctx, date| async move { jobs::research_ingest_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 0 5 * * *",
            jobs::WATCHLIST_UPDATE,
            "Daily at 5:00 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::watchlist_update_job::run(&ctx, date).await },
        )
        .await?;

        self.register(
            "0 30 5 * * *",
            jobs::TICKER_ANALYSIS,
            "Daily at 5:30 AM",
            JobOptions::default(),
            |ctx, date| async move { jobs::ticker_analysis_job::run(&ctx, date).await },
        )
        .await?;

        // Watchdog: every 30 minutes, offset from everything else
        self.register_untracked("0 5,35 * * * *", "watchdog", "Every 30 minutes", |ctx| async move {
            watchdog::run(&ctx).await
        })
        .await?;

        self.spawn_heartbeat();

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Job scheduler started");
        Ok(())
    }

    /// Stop firing, broadcast cancellation, wait out the drain window.
    /// Handlers still running afterwards are abandoned; the watchdog will
    /// pick their tracking rows up as stale on the next start.
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping job scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;

        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.active_jobs.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Drain timeout: abandoning {} running job(s)",
                    self.active_jobs.load(Ordering::SeqCst)
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        info!("✅ Job scheduler stopped");
        Ok(())
    }

    async fn check_previous_heartbeat(&self) {
        match job_execution_queries::latest_heartbeat(&self.context.stores.ops).await {
            Ok(Some(hb)) => {
                let gap = Utc::now() - hb.last_heartbeat_at;
                let suspect_after = chrono::Duration::seconds(TICK_INTERVAL.as_secs() as i64 * 2);
                if gap > suspect_after {
                    warn!(
                        "Previous heartbeat is {}s old (generation {}): running rows are suspected stale",
                        gap.num_seconds(),
                        hb.generation
                    );
                }
                let next_gen = hb.generation + 1;
                if let Err(e) = job_execution_queries::upsert_heartbeat(
                    &self.context.stores.ops,
                    &self.process_id,
                    next_gen,
                )
                .await
                {
                    warn!("Could not write startup heartbeat: {e}");
                }
            }
            Ok(None) => {
                if let Err(e) =
                    job_execution_queries::upsert_heartbeat(&self.context.stores.ops, &self.process_id, 1)
                        .await
                {
                    warn!("Could not write startup heartbeat: {e}");
                }
            }
            Err(e) => warn!("Could not read previous heartbeat: {e}"),
        }
    }

    fn spawn_heartbeat(&self) {
        let pool = self.context.stores.ops.clone();
        let process_id = self.process_id.clone();
        let mut shutdown = self.context.shutdown.clone();

        tokio::spawn(async move {
            let mut generation = 0i64;
            if let Ok(Some(hb)) = job_execution_queries::latest_heartbeat(&pool).await {
                generation = hb.generation;
            }
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) =
                            job_execution_queries::upsert_heartbeat(&pool, &process_id, generation).await
                        {
                            warn!("Heartbeat write failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Heartbeat task stopping");
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn register<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        description: &str,
        options: JobOptions,
        handler: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext, NaiveDate) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<JobOutcome, AppError>> + Send + 'static,
    {
        let context = self.context.clone();
        let handler: Handler = Arc::new(move |ctx, date| Box::pin(handler(ctx, date)));
        let active = self.active_jobs.clone();
        let opts = options.clone();

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let handler = handler.clone();
            let active = active.clone();
            let opts = opts.clone();
            Box::pin(async move {
                if *context.shutdown.borrow() {
                    return;
                }
                if let Some(jitter) = opts.jitter {
                    let delay = {
                        let mut rng = rand::rng();
                        Duration::from_millis(rng.random_range(0..jitter.as_millis().max(1) as u64))
                    };
                    tokio::time::sleep(delay).await;
                }
                active.fetch_add(1, Ordering::SeqCst);
                execute_with_tracking(job_name, context, handler, &opts).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled: {} - {} [cron: {}]", job_name, description, schedule);
        Ok(())
    }

    /// For jobs without a natural target date (the watchdog): logged to the
    /// scheduler log only, no tracking row.
    async fn register_untracked<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        description: &str,
        handler: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, AppError>> + Send + 'static,
    {
        let context = self.context.clone();
        let handler = Arc::new(handler);
        let active = self.active_jobs.clone();

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let handler = handler.clone();
            let active = active.clone();
            Box::pin(async move {
                if *context.shutdown.borrow() {
                    return;
                }
                active.fetch_add(1, Ordering::SeqCst);
                let started = Utc::now();
                let pool = context.stores.ops.clone();
                let result = handler(context).await;
                let duration_ms = (Utc::now() - started).num_milliseconds();
                match result {
                    Ok(message) => {
                        info!("✅ {job_name}: {message} ({duration_ms}ms)");
                        tracking::log_execution(&pool, job_name, true, &message, duration_ms).await;
                    }
                    Err(e) => {
                        error!("❌ {job_name} failed: {e}");
                        tracking::log_execution(&pool, job_name, false, &e.to_string(), duration_ms)
                            .await;
                    }
                }
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled: {} - {} [cron: {}]", job_name, description, schedule);
        Ok(())
    }
}

/// Tracking wrapper shared by the cron path and the retry processor.
///
/// Claims the run key, runs the handler on its own task so a panic is
/// contained, and records the terminal state. A duplicate-run refusal is
/// skipped silently under coalescing, or waited out (up to the misfire
/// grace) when the trigger should queue behind the running instance.
pub async fn execute_with_tracking(
    job_name: &'static str,
    context: JobContext,
    handler: Handler,
    options: &JobOptions,
) {
    let target_date = context.calendar.target_date(Utc::now());
    let pool = context.stores.ops.clone();

    let claim_deadline = tokio::time::Instant::now() + options.misfire_grace;
    loop {
        match tracking::mark_started(&pool, job_name, target_date, None).await {
            Ok(_) => break,
            Err(AppError::DuplicateRun { .. }) => {
                if options.coalesce {
                    debug!("Skipping {job_name} {target_date}: another instance is live");
                    return;
                }
                if tokio::time::Instant::now() >= claim_deadline {
                    debug!(
                        "Dropping queued {job_name} {target_date}: misfire grace exhausted"
                    );
                    return;
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Err(e) => {
                warn!("Tracking unavailable for {job_name}: {e}; running untracked");
                break;
            }
        }
    }

    let _ = run_claimed(job_name, target_date, context, handler).await;
}

/// Retry-processor path: the date is given, the key is claimed here, and
/// the handler result is surfaced so the retry state machine can branch.
pub async fn execute_for_date(
    job_name: &'static str,
    target_date: NaiveDate,
    context: JobContext,
    handler: Handler,
) -> Result<JobOutcome, AppError> {
    let pool = context.stores.ops.clone();

    match tracking::mark_started(&pool, job_name, target_date, None).await {
        Ok(_) => {}
        Err(e @ AppError::DuplicateRun { .. }) => {
            debug!("Retry for {job_name} {target_date} refused: another instance is live");
            return Err(e);
        }
        Err(e) => {
            warn!("Tracking unavailable for {job_name}: {e}; running untracked");
        }
    }

    run_claimed(job_name, target_date, context, handler).await
}

async fn run_claimed(
    job_name: &'static str,
    target_date: NaiveDate,
    context: JobContext,
    handler: Handler,
) -> Result<JobOutcome, AppError> {
    let pool = context.stores.ops.clone();

    info!("🏃 Starting job: {} (target {})", job_name, target_date);
    let started = Utc::now();

    // A panicking handler surfaces as a JoinError instead of tearing the
    // scheduler down
    let handle = tokio::spawn(handler(context, target_date));
    let result = handle.await;

    let duration_ms = (Utc::now() - started).num_milliseconds();

    match result {
        Ok(Ok(outcome)) => {
            info!(
                "✅ Job completed: {} ({}; duration {}ms)",
                job_name, outcome.message, duration_ms
            );
            tracking::mark_completed(
                &pool,
                job_name,
                target_date,
                None,
                &outcome.tickers,
                duration_ms,
            )
            .await;
            Ok(outcome)
        }
        Ok(Err(e)) => {
            error!("❌ Job failed: {} - {}", job_name, e);
            tracking::mark_failed(&pool, job_name, target_date, None, &e.to_string(), duration_ms)
                .await;
            Err(e)
        }
        Err(join_err) => {
            let message = format!("handler panicked: {join_err}");
            error!("❌ Job panicked: {} - {}", job_name, message);
            tracking::mark_failed(&pool, job_name, target_date, None, &message, duration_ms).await;
            Err(AppError::External(message))
        }
    }
}

/// Build a PipelineContext-backed JobContext from the application pieces.
#[allow(clippy::too_many_arguments)]
pub fn build_context(
    stores: Stores,
    fetcher: Fetcher,
    llm: LlmRouter,
    cache: CacheLayer,
    calendar: MarketCalendar,
    provider: Arc<dyn MarketDataProvider>,
    shutdown: watch::Receiver<bool>,
) -> JobContext {
    let rss = RssClient::new(fetcher.clone());
    let pipeline = PipelineContext::new(fetcher.clone(), llm.clone());
    JobContext {
        stores,
        fetcher,
        rss,
        llm,
        pipeline,
        cache,
        calendar,
        provider,
        shutdown,
    }
}
