use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::FetchError;

/// Solver-side page load budget; the HTTP call gets a little longer.
const SOLVER_MAX_TIMEOUT_MS: u64 = 60_000;
const SOLVER_HTTP_TIMEOUT_SECS: u64 = 70;

const DEFAULT_SOLVER_URL: &str = "http://host.docker.internal:8191";

#[derive(Debug, Serialize)]
struct SolverRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout: u64,
    headers: HashMap<&'static str, &'static str>,
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    status: String,
    message: Option<String>,
    solution: Option<SolverSolutionRaw>,
}

#[derive(Debug, Deserialize)]
struct SolverSolutionRaw {
    status: u16,
    response: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// The rendered result the solver hands back for one request.
#[derive(Debug, Clone)]
pub struct SolverSolution {
    pub status: u16,
    pub response: String,
    /// Header names lowercased for case-insensitive lookup.
    pub headers: HashMap<String, String>,
}

/// Client for the FlareSolverr-compatible challenge-solver endpoint.
/// The solver drives a headless browser, satisfies JS challenges, and
/// returns the rendered body. Treated as a black box per its POST contract.
#[derive(Clone)]
pub struct FlareSolverrClient {
    base_url: String,
    client: Client,
}

impl FlareSolverrClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(SOLVER_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    /// Reads `FLARESOLVERR_URL`; falls back to the in-cluster default.
    /// Returns None only when explicitly disabled with an empty value.
    pub fn from_env() -> Option<Self> {
        match std::env::var("FLARESOLVERR_URL") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(Self::new(v)),
            Err(_) => Some(Self::new(DEFAULT_SOLVER_URL.to_string())),
        }
    }

    pub async fn solve_get(&self, url: &str) -> Result<SolverSolution, FetchError> {
        let mut headers = HashMap::new();
        headers.insert("Accept", "application/rss+xml, application/xml, text/xml, */*");
        headers.insert("Accept-Language", "en-US,en;q=0.9");

        let payload = SolverRequest {
            cmd: "request.get",
            url,
            max_timeout: SOLVER_MAX_TIMEOUT_MS,
            headers,
        };

        debug!("Requesting via challenge solver: {}", url);
        let resp = self
            .client
            .post(format!("{}/v1", self.base_url.trim_end_matches('/')))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::ChallengeUnbypassed(format!("solver unreachable: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(FetchError::ChallengeUnbypassed(format!(
                "solver returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let body: SolverResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::ParseError(format!("solver response: {e}")))?;

        if body.status != "ok" {
            let msg = body.message.unwrap_or_else(|| "unknown error".to_string());
            warn!("Challenge solver error for {}: {}", url, msg);
            return Err(FetchError::ChallengeUnbypassed(msg));
        }

        let raw = body.solution.ok_or_else(|| {
            FetchError::ParseError("solver response missing solution".to_string())
        })?;

        let headers = raw
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(SolverSolution {
            status: raw.status,
            response: raw.response,
            headers,
        })
    }
}

/// Recover original XML from a browser-rendered feed document.
///
/// A headless browser loading an XML feed wraps the escaped markup in an
/// HTML viewer (typically inside a `<pre>` block). Three strategies, in
/// order: unescape a `<pre>` block, find literal XML in the HTML, unescape
/// the whole body and extract. Returns None when no complete feed is found.
pub fn unwrap_browser_rendered_xml(html: &str) -> Option<String> {
    static PRE_RE: OnceLock<regex::Regex> = OnceLock::new();
    static XML_RE: OnceLock<regex::Regex> = OnceLock::new();

    let pre_re =
        PRE_RE.get_or_init(|| regex::Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").unwrap());
    let xml_re = XML_RE
        .get_or_init(|| regex::Regex::new(r"(?is)(<\?xml[^>]*>.*?</(?:rss|feed)>)").unwrap());

    if let Some(caps) = pre_re.captures(html) {
        let unescaped = unescape_html_entities(&caps[1]);
        let trimmed = unescaped.trim();
        if (trimmed.starts_with("<?xml") || trimmed.starts_with("<rss"))
            && (trimmed.contains("</rss>") || trimmed.contains("</feed>"))
        {
            return Some(trimmed.to_string());
        }
    }

    if let Some(caps) = xml_re.captures(html) {
        return Some(caps[1].to_string());
    }

    if html.contains("&lt;?xml") || html.contains("&lt;rss") {
        let unescaped = unescape_html_entities(html);
        if let Some(caps) = xml_re.captures(&unescaped) {
            return Some(caps[1].to_string());
        }
    }

    None
}

/// Minimal HTML entity decoder: the named entities browsers emit when
/// escaping markup, plus numeric references.
fn unescape_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let rest = &input[i..];
        let semi = match rest.find(';') {
            // Entities are short; anything longer is literal text
            Some(p) if p <= 10 => p,
            _ => {
                out.push(c);
                continue;
            }
        };
        let entity = &rest[1..semi];
        let replacement = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match replacement {
            Some(r) => {
                out.push(r);
                for _ in 0..semi {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_named_and_numeric() {
        assert_eq!(unescape_html_entities("&lt;rss&gt;"), "<rss>");
        assert_eq!(unescape_html_entities("a &amp; b"), "a & b");
        assert_eq!(unescape_html_entities("&quot;x&quot;"), "\"x\"");
        assert_eq!(unescape_html_entities("&#60;tag&#62;"), "<tag>");
        assert_eq!(unescape_html_entities("&#x3C;tag&#x3E;"), "<tag>");
        // Unknown entities pass through untouched
        assert_eq!(unescape_html_entities("&unknown;"), "&unknown;");
    }

    #[test]
    fn test_unwrap_pre_wrapped_feed() {
        let html = "<html><body><pre>&lt;?xml version=\"1.0\"?&gt;&lt;rss&gt;&lt;channel&gt;&lt;/channel&gt;&lt;/rss&gt;</pre></body></html>";
        let xml = unwrap_browser_rendered_xml(html).expect("should unwrap");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</rss>"));
    }

    #[test]
    fn test_unwrap_literal_xml_in_html() {
        let html = "<html><body><?xml version=\"1.0\"?><rss><channel></channel></rss></body></html>";
        let xml = unwrap_browser_rendered_xml(html).expect("should extract");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</rss>"));
    }

    #[test]
    fn test_unwrap_escaped_body_without_pre() {
        let html = "<html><div>&lt;?xml version=\"1.0\"?&gt;&lt;rss&gt;&lt;item/&gt;&lt;/rss&gt;</div></html>";
        let xml = unwrap_browser_rendered_xml(html).expect("should unescape body");
        assert!(xml.contains("<item/>"));
    }

    #[test]
    fn test_unwrap_rejects_incomplete_feed() {
        let html = "<html><pre>&lt;?xml version=\"1.0\"?&gt;&lt;rss&gt;truncated</pre></html>";
        assert!(unwrap_browser_rendered_xml(html).is_none());
    }

    #[test]
    fn test_unwrap_handles_atom() {
        let html = "<html><pre>&lt;?xml version=\"1.0\"?&gt;&lt;feed xmlns=\"http://www.w3.org/2005/Atom\"&gt;&lt;/feed&gt;</pre></html>";
        let xml = unwrap_browser_rendered_xml(html).expect("atom should unwrap");
        assert!(xml.ends_with("</feed>"));
    }
}
