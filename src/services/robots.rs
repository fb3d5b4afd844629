//! Robots.txt enforcement for scrape jobs.
//!
//! When `ENABLE_ROBOTS_TXT_CHECKS` is true, each job validates its
//! representative URLs before starting and aborts with a structured
//! robots-disallowed failure when a path is excluded for `User-agent: *`.

use tracing::{debug, info};
use url::Url;

use crate::errors::AppError;
use crate::fetch::{FetchMode, Fetcher};

pub fn robots_checks_enabled() -> bool {
    std::env::var("ENABLE_ROBOTS_TXT_CHECKS")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Validate `target_url` against its host's robots.txt. No-op when the env
/// flag is off. An unreachable or missing robots.txt counts as allowed.
pub async fn check_or_abort(fetcher: &Fetcher, target_url: &str) -> Result<(), AppError> {
    if !robots_checks_enabled() {
        return Ok(());
    }

    let parsed = Url::parse(target_url)
        .map_err(|e| AppError::Validation(format!("invalid URL {target_url}: {e}")))?;
    let origin = format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    );
    let robots_url = format!("{origin}/robots.txt");

    let body = match fetcher.fetch(&robots_url, FetchMode::Direct).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(e) => {
            debug!("robots.txt not retrievable from {robots_url} ({e}); allowing");
            return Ok(());
        }
    };

    if is_path_allowed(&body, parsed.path()) {
        info!("robots.txt allows {}", target_url);
        Ok(())
    } else {
        Err(AppError::RobotsDisallowed(target_url.to_string()))
    }
}

/// Minimal robots.txt evaluation for `User-agent: *` groups: longest-match
/// wins between Allow and Disallow; empty Disallow means allow-all.
pub fn is_path_allowed(robots_txt: &str, path: &str) -> bool {
    let mut in_star_group = false;
    let mut best_allow: Option<usize> = None;
    let mut best_disallow: Option<usize> = None;

    for raw_line in robots_txt.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => in_star_group = value == "*",
            "disallow" if in_star_group => {
                if !value.is_empty() && path.starts_with(value) {
                    best_disallow = best_disallow.max(Some(value.len()));
                }
            }
            "allow" if in_star_group => {
                if !value.is_empty() && path.starts_with(value) {
                    best_allow = best_allow.max(Some(value.len()));
                }
            }
            _ => {}
        }
    }

    match (best_allow, best_disallow) {
        (Some(a), Some(d)) => a >= d,
        (None, Some(_)) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
User-agent: *
Disallow: /private/
Allow: /private/ok
Disallow: /tmp

User-agent: special-bot
Disallow: /
";

    #[test]
    fn test_plain_allow() {
        assert!(is_path_allowed(ROBOTS, "/news/article"));
    }

    #[test]
    fn test_disallowed_prefix() {
        assert!(!is_path_allowed(ROBOTS, "/private/data"));
        assert!(!is_path_allowed(ROBOTS, "/tmp/file"));
    }

    #[test]
    fn test_longer_allow_overrides() {
        assert!(is_path_allowed(ROBOTS, "/private/ok/page"));
    }

    #[test]
    fn test_other_agent_group_ignored() {
        // special-bot's blanket Disallow must not leak into the * group
        assert!(is_path_allowed(ROBOTS, "/anything"));
    }

    #[test]
    fn test_empty_robots_allows_all() {
        assert!(is_path_allowed("", "/whatever"));
    }
}
