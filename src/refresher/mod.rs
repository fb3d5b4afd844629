//! Cookie refresher sidecar.
//!
//! Runs independently of the main server: every cycle it loads the current
//! bundle, drives a stealth headless browser to the web AI service with
//! those cookies installed, harvests the rotated session cookies, and
//! atomically replaces the shared artifact. Nothing here propagates an
//! error to the caller; failures are logged and retried on the next cycle.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, LaunchOptions};

use crate::llm::cookies::{cookie_input_path, cookie_output_path, CookieBundle};

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 1_800;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(60);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-CDP-call budget. Navigation waits loop on this so the cancel flag
/// is observed between polls and shutdown never blocks on the browser.
const STEP_TIMEOUT: Duration = Duration::from_secs(2);
/// SIGTERM must drain within this window.
const DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// Substrings that mark a security interstitial. Logged prominently but the
/// cycle continues — cookies may still be harvestable.
const SECURITY_INDICATORS: [&str; 11] = [
    "verify",
    "verification",
    "two-factor",
    "2fa",
    "2-step",
    "security check",
    "unusual activity",
    "suspicious",
    "confirm your identity",
    "enter code",
    "send code",
];

#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub service_url: String,
    pub interval: Duration,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
}

impl RefresherConfig {
    pub fn from_env() -> Result<Self, String> {
        let service_url = std::env::var("AI_SERVICE_WEB_URL")
            .map_err(|_| "AI_SERVICE_WEB_URL is not set".to_string())?;
        validate_service_url(&service_url)?;

        let interval = std::env::var("COOKIE_REFRESH_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);

        Ok(Self {
            service_url,
            interval: Duration::from_secs(interval),
            input_file: cookie_input_path(),
            output_file: cookie_output_path(),
        })
    }
}

pub fn validate_service_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("service URL cannot be empty".to_string());
    }
    if !url.starts_with("https://") {
        return Err(format!("service URL must use HTTPS: {url}"));
    }
    if url.to_lowercase().contains("example.com") {
        return Err(format!("service URL appears to be a placeholder: {url}"));
    }
    Ok(())
}

pub fn detect_security_challenges(page_content: &str) -> Vec<&'static str> {
    let lower = page_content.to_lowercase();
    SECURITY_INDICATORS
        .iter()
        .copied()
        .filter(|indicator| lower.contains(indicator))
        .collect()
}

/// Main loop. Refreshes immediately on startup, then on every interval
/// until the shutdown signal flips.
pub async fn run(config: RefresherConfig, mut shutdown: watch::Receiver<bool>) {
    info!("Cookie Refresher Service starting...");
    info!("  Refresh interval: {}s", config.interval.as_secs());
    info!("  Cookie output: {}", config.output_file.display());
    info!("  Cookie input: {}", config.input_file.display());

    refresh_with_retries(&config, &mut shutdown).await;

    loop {
        info!("Sleeping {}s until next refresh...", config.interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Received shutdown signal, exiting...");
                    return;
                }
            }
        }
        refresh_with_retries(&config, &mut shutdown).await;
    }
}

/// One refresh attempt chain: up to MAX_RETRIES, 60 s apart. After the
/// final failure the cycle is abandoned; the next scheduled cycle starts
/// clean.
async fn refresh_with_retries(config: &RefresherConfig, shutdown: &mut watch::Receiver<bool>) {
    for attempt in 1..=MAX_RETRIES {
        if *shutdown.borrow() {
            return;
        }
        info!("Refresh attempt {attempt}/{MAX_RETRIES}");

        // Re-read on each attempt: another writer may have landed fresher ones
        let existing = match CookieBundle::load(&config.input_file) {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("No existing cookies; cannot refresh without initial cookies: {e}");
                return;
            }
        };

        let result = match run_cancellable_refresh(config, existing, shutdown).await {
            Some(result) => result,
            // Shutdown observed mid-cycle; the flag has been set and the
            // browser work winds down on its own
            None => return,
        };

        match result {
            Ok(bundle) => match bundle.save_atomic(&config.output_file) {
                Ok(()) => {
                    info!(
                        "Cookie refresh successful (refresh #{}, PSIDTS {})",
                        bundle.refresh_count,
                        if bundle.secure_1psidts.is_some() { "present" } else { "missing" }
                    );
                    return;
                }
                Err(e) => {
                    error!("Failed to save refreshed cookies: {e}");
                    return;
                }
            },
            Err(e) => {
                if attempt < MAX_RETRIES {
                    warn!("Refresh failed ({e}), retrying in {}s...", RETRY_DELAY.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { return; }
                        }
                    }
                } else {
                    error!("All refresh attempts failed: {e}");
                }
            }
        }
    }
}

/// Drive one browser refresh while watching the shutdown channel. Returns
/// None when shutdown fired: the cancel flag is raised so the blocking
/// task exits at its next step boundary, and we wait for it only up to the
/// drain budget before letting process exit reap the browser.
async fn run_cancellable_refresh(
    config: &RefresherConfig,
    existing: CookieBundle,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Result<CookieBundle, String>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let refresh = refresh_once(config.clone(), existing, cancel.clone());
    tokio::pin!(refresh);

    loop {
        tokio::select! {
            result = &mut refresh => return Some(result),
            _ = shutdown.changed() => {
                if !*shutdown.borrow() {
                    continue;
                }
                info!("Shutdown during refresh; cancelling browser work...");
                cancel.store(true, Ordering::SeqCst);
                if tokio::time::timeout(DRAIN_BUDGET, &mut refresh).await.is_err() {
                    warn!("Browser work did not stop within {}s; abandoning", DRAIN_BUDGET.as_secs());
                }
                return None;
            }
        }
    }
}

/// Blocking CDP work runs on the blocking pool; the cancel flag is its
/// only view of shutdown.
async fn refresh_once(
    config: RefresherConfig,
    existing: CookieBundle,
    cancel: Arc<AtomicBool>,
) -> Result<CookieBundle, String> {
    tokio::task::spawn_blocking(move || refresh_blocking(&config, &existing, &cancel))
        .await
        .map_err(|e| format!("browser task panicked: {e}"))?
}

fn refresh_blocking(
    config: &RefresherConfig,
    existing: &CookieBundle,
    cancel: &AtomicBool,
) -> Result<CookieBundle, String> {
    let cancelled = || cancel.load(Ordering::SeqCst);
    if cancelled() {
        return Err("cancelled before browser launch".to_string());
    }

    info!("Refreshing cookies by visiting {}", config.service_url);

    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .window_size(Some((1920, 1080)))
        .args(vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-setuid-sandbox"),
            // Keeps navigator.webdriver undefined
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--lang=en-US"),
        ])
        .build()
        .map_err(|e| format!("launch options: {e}"))?;

    let browser = Browser::new(launch_options).map_err(|e| format!("launch browser: {e}"))?;
    let tab = browser.new_tab().map_err(|e| format!("new tab: {e}"))?;
    // Short per-call budget: every CDP call returns quickly so the cancel
    // flag is observed between steps
    tab.set_default_timeout(STEP_TIMEOUT);

    if cancelled() {
        return Err("cancelled after browser launch".to_string());
    }

    tab.set_user_agent(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        Some("en-US,en;q=0.9"),
        Some("Win32"),
    )
    .map_err(|e| format!("set user agent: {e}"))?;

    // Install the current session under the registrable domain with a
    // leading dot so subdomains are covered
    let domain = cookie_domain(&config.service_url)?;
    let mut params = vec![cookie_param("__Secure-1PSID", &existing.secure_1psid, &domain)];
    if let Some(ts) = &existing.secure_1psidts {
        params.push(cookie_param("__Secure-1PSIDTS", ts, &domain));
    }
    tab.set_cookies(params).map_err(|e| format!("set cookies: {e}"))?;
    info!("Installed existing cookies for domain {domain}");

    if cancelled() {
        return Err("cancelled before navigation".to_string());
    }

    if let Err(e) = tab.navigate_to(&config.service_url) {
        warn!("Navigation error, continuing: {e}");
    }

    // Poll navigation in STEP_TIMEOUT slices up to the full budget so a
    // raised cancel flag is seen within one slice
    let nav_deadline = Instant::now() + NAVIGATION_TIMEOUT;
    loop {
        if cancelled() {
            return Err("cancelled during navigation".to_string());
        }
        match tab.wait_until_navigated() {
            Ok(_) => break,
            Err(e) => {
                if Instant::now() >= nav_deadline {
                    warn!("Navigation timeout, continuing: {e}");
                    break;
                }
            }
        }
    }

    // Small human-like scroll before harvesting
    let _ = tab.evaluate("window.scrollTo(0, 100)", false);
    std::thread::sleep(Duration::from_millis(500));
    let _ = tab.evaluate("window.scrollTo(0, 0)", false);

    if cancelled() {
        return Err("cancelled before cookie harvest".to_string());
    }

    match tab.get_content() {
        Ok(content) => {
            let challenges = detect_security_challenges(&content);
            if !challenges.is_empty() {
                warn!("⚠️  Security challenge detected: {}", challenges.join(", "));
                warn!("The service may require manual verification; continuing anyway");
            }
        }
        Err(e) => warn!("Could not read page content: {e}"),
    }

    let cookies = tab.get_cookies().map_err(|e| format!("read cookies: {e}"))?;
    info!("Extracted {} cookies from browser", cookies.len());

    let mut psid = None;
    let mut psidts = None;
    for cookie in cookies {
        match cookie.name.as_str() {
            "__Secure-1PSID" => psid = Some(cookie.value),
            "__Secure-1PSIDTS" => psidts = Some(cookie.value),
            _ => {}
        }
    }

    let Some(psid) = psid else {
        return Err("__Secure-1PSID cookie not present after navigation".to_string());
    };
    if psidts.is_none() {
        warn!("__Secure-1PSIDTS not found; continuing with __Secure-1PSID only");
    }

    Ok(existing.refreshed(psid, psidts))
}

/// Registrable domain with a leading dot, e.g. ".google.com".
fn cookie_domain(service_url: &str) -> Result<String, String> {
    let parsed = url::Url::parse(service_url).map_err(|e| format!("bad service URL: {e}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| "service URL has no host".to_string())?;
    let parts: Vec<&str> = host.split('.').collect();
    let base = if parts.len() >= 2 {
        parts[parts.len() - 2..].join(".")
    } else {
        host.to_string()
    };
    Ok(format!(".{base}"))
}

fn cookie_param(name: &str, value: &str, domain: &str) -> CookieParam {
    CookieParam {
        name: name.to_string(),
        value: value.to_string(),
        url: None,
        domain: Some(domain.to_string()),
        path: Some("/".to_string()),
        secure: Some(true),
        http_only: Some(true),
        same_site: None,
        expires: None,
        priority: None,
        same_party: None,
        source_scheme: None,
        source_port: None,
        partition_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_service_url() {
        assert!(validate_service_url("https://gemini.google.com/app").is_ok());
        assert!(validate_service_url("").is_err());
        assert!(validate_service_url("http://insecure.site").is_err());
        assert!(validate_service_url("https://example.com/placeholder").is_err());
    }

    #[test]
    fn test_cookie_domain_covers_subdomains() {
        assert_eq!(
            cookie_domain("https://gemini.google.com/app").unwrap(),
            ".google.com"
        );
        assert_eq!(cookie_domain("https://localhost").unwrap(), ".localhost");
    }

    #[test]
    fn test_detect_security_challenges() {
        let page = "<html>Please VERIFY your identity and enter code we sent</html>";
        let found = detect_security_challenges(page);
        assert!(found.contains(&"verify"));
        assert!(found.contains(&"enter code"));

        assert!(detect_security_challenges("<html>all good</html>").is_empty());
    }
}
