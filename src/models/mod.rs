mod article;
mod job;
mod market;
mod retry;
mod social;
mod watchlist;

pub use article::{Article, ArticleAnalysis, ArticleSentiment, ParsedItem};
pub use job::{JobExecution, JobStatus, SchedulerHeartbeat, SchedulerLog};
pub use market::{
    BenchmarkBar, CongressTrade, Dividend, ExchangeRate, InsiderTrade, PortfolioPosition,
};
pub use retry::{FailureReason, RetryQueueEntry, RetryStatus, MAX_RETRIES, MAX_RETRY_AGE_DAYS};
pub use social::{CrowdSentimentLabel, SocialMetric, SocialPost};
pub use watchlist::{PriorityTier, TickerAnalysis, WatchedTicker};
