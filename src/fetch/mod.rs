mod flaresolverr;

pub use flaresolverr::{unwrap_browser_rendered_xml, FlareSolverrClient, SolverSolution};

use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DIRECT_TIMEOUT_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 300;
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Rotating browser-like header set. One pair is picked per request so a
/// crawl does not present a single fingerprint.
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const ACCEPT_HEADERS: [&str; 3] = [
    "application/rss+xml, application/xml, text/xml, */*",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    "application/xml;q=0.9, */*;q=0.8",
];

/// Distinct fetch outcomes. Callers must handle or propagate each kind.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("challenge solver could not bypass protection: {0}")]
    ChallengeUnbypassed(String),
    #[error("response could not be parsed: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Plain client with browser-like headers and bounded retries.
    Direct,
    /// Route through the challenge-solver proxy; fall back to direct when
    /// the solver is unreachable.
    Bypass,
    /// Bypass first (it handles both cases), direct on failure.
    Auto,
}

/// Retrying HTTPS client shared by every outbound scrape.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    solver: Option<FlareSolverrClient>,
    /// When set, a politeness delay of uniform(3, 8) seconds precedes each
    /// request. Enabled by jobs in a crawl pattern.
    crawl_delay: bool,
}

impl Fetcher {
    pub fn new(solver: Option<FlareSolverrClient>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DIRECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            solver,
            crawl_delay: false,
        }
    }

    pub fn from_env() -> Self {
        Self::new(FlareSolverrClient::from_env())
    }

    /// A copy of this fetcher that sleeps uniform(3, 8) s before each request.
    pub fn with_crawl_delay(&self) -> Self {
        let mut cloned = self.clone();
        cloned.crawl_delay = true;
        cloned
    }

    pub async fn fetch(&self, url: &str, mode: FetchMode) -> Result<Vec<u8>, FetchError> {
        if self.crawl_delay {
            let delay = {
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(3_000..8_000))
            };
            debug!("Crawl delay {}ms before {}", delay.as_millis(), url);
            tokio::time::sleep(delay).await;
        }

        match mode {
            FetchMode::Direct => self.fetch_direct(url).await,
            FetchMode::Bypass => match self.fetch_bypass(url).await {
                Ok(bytes) => Ok(bytes),
                // Solver unreachable: the contract is a transparent fallback
                Err(FetchError::ChallengeUnbypassed(reason)) => {
                    debug!("Solver unavailable ({reason}), falling back to direct: {url}");
                    self.fetch_direct(url).await
                }
                Err(e) => Err(e),
            },
            FetchMode::Auto => match self.fetch_bypass(url).await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    debug!("Bypass failed ({e}), falling back to direct: {url}");
                    self.fetch_direct(url).await
                }
            },
        }
    }

    /// Direct fetch with rotating headers and exponential backoff on
    /// retryable statuses (3 attempts, base 0.3 s).
    async fn fetch_direct(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (ua, accept) = pick_headers();

            let result = self
                .client
                .get(url)
                .header("User-Agent", ua)
                .header("Accept", accept)
                .header("Accept-Language", "en-US,en;q=0.9")
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() {
                        return resp
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| FetchError::ParseError(e.to_string()));
                    }
                    if RETRYABLE_STATUSES.contains(&status) && attempt < MAX_ATTEMPTS {
                        let backoff =
                            Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt - 1));
                        warn!(
                            "HTTP {} from {} (attempt {}/{}), backing off {:?}",
                            status, url, attempt, MAX_ATTEMPTS, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus(status));
                }
                Err(e) if e.is_timeout() => {
                    if attempt < MAX_ATTEMPTS {
                        let backoff =
                            Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt - 1));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(FetchError::Timeout);
                }
                Err(e) => return Err(FetchError::ParseError(e.to_string())),
            }
        }
    }

    async fn fetch_bypass(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let solver = self.solver.as_ref().ok_or_else(|| {
            FetchError::ChallengeUnbypassed("no challenge solver configured".to_string())
        })?;

        let solution = solver.solve_get(url).await?;

        if solution.status != 200 {
            return Err(FetchError::HttpStatus(solution.status));
        }

        // The solver's browser renders XML feeds as HTML documents. Detect
        // and unwrap so callers always see the original feed bytes.
        let content_type = solution
            .headers
            .get("content-type")
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();

        if content_type.contains("html") || solution.response.trim_start().starts_with("<html") {
            if let Some(xml) = unwrap_browser_rendered_xml(&solution.response) {
                debug!("Unwrapped browser-rendered XML for {}", url);
                return Ok(xml.into_bytes());
            }
        }

        Ok(solution.response.into_bytes())
    }
}

fn pick_headers() -> (&'static str, &'static str) {
    let mut rng = rand::rng();
    let ua = USER_AGENTS[rng.random_range(0..USER_AGENTS.len())];
    let accept = ACCEPT_HEADERS[rng.random_range(0..ACCEPT_HEADERS.len())];
    (ua, accept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_rotation_stays_in_set() {
        for _ in 0..32 {
            let (ua, accept) = pick_headers();
            assert!(USER_AGENTS.contains(&ua));
            assert!(ACCEPT_HEADERS.contains(&accept));
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for s in [429u16, 500, 502, 503, 504] {
            assert!(RETRYABLE_STATUSES.contains(&s));
        }
        assert!(!RETRYABLE_STATUSES.contains(&403));
        assert!(!RETRYABLE_STATUSES.contains(&404));
    }
}
