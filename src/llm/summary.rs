//! Chain-of-thought summarization contract used by research ingest, plus
//! crowd-sentiment aggregation used by the social job.
//!
//! Responses are parsed leniently: code fences are stripped and the JSON
//! object is extracted from surrounding prose. Anything unparseable yields
//! an empty result — callers treat "no summary" as a recoverable no-op.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input text is clamped to this many characters before prompting.
pub const MAX_SUMMARY_INPUT_CHARS: usize = 6_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicCheck {
    DataBacked,
    HypeDetected,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainOfThoughtSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub fact_check: String,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub sentiment_score: f64,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub logic_check: LogicCheck,
}

impl ChainOfThoughtSummary {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
    }
}

/// Crowd verdict over a batch of social posts for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdSentiment {
    #[serde(default = "default_neutral")]
    pub sentiment: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub bull_ratio: f64,
    #[serde(default)]
    pub bear_ratio: f64,
    #[serde(default)]
    pub summary: String,
}

fn default_neutral() -> String {
    "NEUTRAL".to_string()
}

impl Default for CrowdSentiment {
    fn default() -> Self {
        Self {
            sentiment: default_neutral(),
            score: 0.0,
            bull_ratio: 0.0,
            bear_ratio: 0.0,
            summary: String::new(),
        }
    }
}

pub fn build_summary_prompt(text: &str) -> String {
    let clamped: String = text.chars().take(MAX_SUMMARY_INPUT_CHARS).collect();
    format!(
        r#"You are a financial research analyst. Read the article below and reason step by step, then answer with a single JSON object with exactly these fields:

{{
  "summary": "2-4 sentence factual summary",
  "claims": ["each substantive claim the article makes"],
  "fact_check": "which claims are verifiable vs speculation",
  "conclusion": "what an investor should take away",
  "sentiment": "VERY_BULLISH|BULLISH|NEUTRAL|BEARISH|VERY_BEARISH",
  "sentiment_score": -2.0 to 2.0,
  "tickers": ["mentioned ticker symbols"],
  "sectors": ["affected sectors"],
  "companies": ["mentioned company names"],
  "relationships": ["company-to-company or company-to-sector links"],
  "logic_check": "DATA_BACKED|HYPE_DETECTED|NEUTRAL"
}}

ARTICLE:
{clamped}"#
    )
}

pub fn build_crowd_sentiment_prompt(ticker: &str, texts: &[String]) -> String {
    let joined = texts.join("\n---\n");
    let clamped: String = joined.chars().take(MAX_SUMMARY_INPUT_CHARS).collect();
    format!(
        r#"Below are recent social media posts about ${ticker}. Judge the crowd mood and answer with a single JSON object:

{{
  "sentiment": "EUPHORIC|BULLISH|NEUTRAL|BEARISH|FEARFUL",
  "score": -2.0 to 2.0,
  "bull_ratio": fraction of clearly bullish posts,
  "bear_ratio": fraction of clearly bearish posts,
  "summary": "one sentence on what the crowd is saying"
}}

POSTS:
{clamped}"#
    )
}

/// Streaming deadline for crowd-sentiment calls scales with input size:
/// clamp(len / 100, 30, 90) seconds.
pub fn crowd_sentiment_timeout_secs(text_len: usize) -> u64 {
    ((text_len / 100) as u64).clamp(30, 90)
}

/// Extract the JSON object from an LLM response that may wrap it in code
/// fences or prose. Returns the balanced `{...}` substring.
pub fn extract_json_block(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    // Strip a code fence when present
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };

    let start = inner.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in inner[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&inner[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the chain-of-thought response. Empty/malformed input yields None.
pub fn parse_summary_response(response: &str) -> Option<ChainOfThoughtSummary> {
    let block = extract_json_block(response)?;
    match serde_json::from_str::<ChainOfThoughtSummary>(block) {
        Ok(parsed) if !parsed.is_empty() => Some(parsed),
        Ok(_) => {
            debug!("Summary response parsed but empty");
            None
        }
        Err(e) => {
            debug!("Summary response unparseable: {e}");
            None
        }
    }
}

/// Parse the crowd verdict; malformed output degrades to NEUTRAL/0.0.
pub fn parse_crowd_sentiment(response: &str) -> CrowdSentiment {
    extract_json_block(response)
        .and_then(|block| serde_json::from_str::<CrowdSentiment>(block).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_json() {
        let resp = r#"{"summary": "ok", "sentiment_score": 1.0}"#;
        assert_eq!(extract_json_block(resp), Some(resp));
    }

    #[test]
    fn test_extract_code_fenced_json() {
        let resp = "```json\n{\"summary\": \"ok\"}\n```";
        assert_eq!(extract_json_block(resp), Some("{\"summary\": \"ok\"}"));
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let resp = "Here is my analysis:\n{\"summary\": \"fine\", \"nested\": {\"a\": 1}}\nHope it helps!";
        let block = extract_json_block(resp).unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
        assert!(serde_json::from_str::<serde_json::Value>(block).is_ok());
    }

    #[test]
    fn test_extract_handles_braces_in_strings() {
        let resp = r#"{"summary": "uses { and } inside", "claims": []}"#;
        assert_eq!(extract_json_block(resp), Some(resp));
    }

    #[test]
    fn test_parse_full_summary() {
        let resp = r#"{
            "summary": "Strong quarter.",
            "claims": ["Revenue up 12%"],
            "fact_check": "Revenue figure matches the filing.",
            "conclusion": "Fundamentals improving.",
            "sentiment": "BULLISH",
            "sentiment_score": 1.2,
            "tickers": ["AAPL"],
            "sectors": ["Technology"],
            "companies": ["Apple"],
            "relationships": ["Apple supplies to carriers"],
            "logic_check": "DATA_BACKED"
        }"#;
        let parsed = parse_summary_response(resp).unwrap();
        assert_eq!(parsed.sentiment, "BULLISH");
        assert_eq!(parsed.logic_check, LogicCheck::DataBacked);
        assert_eq!(parsed.tickers, vec!["AAPL"]);
    }

    #[test]
    fn test_malformed_response_yields_none() {
        assert!(parse_summary_response("I could not analyze this.").is_none());
        assert!(parse_summary_response("").is_none());
        assert!(parse_summary_response("{\"summary\": ").is_none());
    }

    #[test]
    fn test_empty_summary_yields_none() {
        assert!(parse_summary_response(r#"{"summary": ""}"#).is_none());
    }

    #[test]
    fn test_crowd_sentiment_degrades_to_neutral() {
        let parsed = parse_crowd_sentiment("no json here");
        assert_eq!(parsed.sentiment, "NEUTRAL");
        assert_eq!(parsed.score, 0.0);
    }

    #[test]
    fn test_crowd_sentiment_parses() {
        let parsed = parse_crowd_sentiment(
            r#"{"sentiment": "EUPHORIC", "score": 1.8, "bull_ratio": 0.8, "bear_ratio": 0.1, "summary": "to the moon"}"#,
        );
        assert_eq!(parsed.sentiment, "EUPHORIC");
        assert!((parsed.score - 1.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timeout_scales_with_input() {
        assert_eq!(crowd_sentiment_timeout_secs(100), 30);
        assert_eq!(crowd_sentiment_timeout_secs(5_000), 50);
        assert_eq!(crowd_sentiment_timeout_secs(50_000), 90);
    }

    #[test]
    fn test_prompt_clamps_input() {
        let long = "x".repeat(20_000);
        let prompt = build_summary_prompt(&long);
        assert!(prompt.len() < 8_000);
    }
}
