//! Heuristic junk filtering for feed items.
//!
//! A pure, total function: an item passes only when all four rules hold —
//! no spam phrase, minimum content length, no blocked category, and at
//! least one financial keyword in title+content.

pub const SPAM_PHRASES: [&str; 8] = [
    "sign up now",
    "click here",
    "subscribe today",
    "limited time offer",
    "act now",
    "buy now",
    "sponsored content",
    "advertisement",
];

pub const FINANCIAL_KEYWORDS: [&str; 62] = [
    // Market terms
    "stock", "stocks", "share", "shares", "market", "markets", "trading", "trader",
    "investor", "investment", "portfolio", "equity", "equities",
    // Financial metrics
    "earnings", "revenue", "profit", "loss", "eps", "ebitda", "cashflow",
    "sales", "margin", "growth", "valuation", "p/e", "price target",
    // Corporate actions
    "ipo", "merger", "acquisition", "buyback", "dividend", "split",
    // Financial entities
    "sec", "nasdaq", "nyse", "tsx", "exchange", "fund", "etf", "index",
    "s&p", "dow", "russell", "ticker", "symbol",
    // Crypto (often covered by financial feeds)
    "bitcoin", "crypto", "cryptocurrency", "blockchain",
    // General business/finance
    "ceo", "cfo", "executive", "quarter", "quarterly", "fiscal", "guidance",
    "analyst", "forecast", "estimate", "rating", "upgrade", "downgrade",
];

pub const BLOCKED_CATEGORIES: [&str; 4] = ["sponsored", "advertisement", "press release", "promo"];

pub const MIN_CONTENT_LENGTH: usize = 100;

const MIN_KEYWORD_MATCHES: usize = 1;

pub fn passes_junk_filter(title: &str, content: &str, categories: &[String]) -> bool {
    let combined = format!("{} {}", title, content).to_lowercase();

    for phrase in SPAM_PHRASES {
        if combined.contains(phrase) {
            return false;
        }
    }

    if content.chars().count() < MIN_CONTENT_LENGTH {
        return false;
    }

    for cat in categories {
        let cat_lower = cat.to_lowercase();
        if BLOCKED_CATEGORIES.iter().any(|b| cat_lower.contains(b)) {
            return false;
        }
    }

    let mut matches = 0;
    for keyword in FINANCIAL_KEYWORDS {
        if combined.contains(keyword) {
            matches += 1;
            if matches >= MIN_KEYWORD_MATCHES {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_finance_content() -> String {
        "Revenue grew 12% year over year and EPS came in above analyst \
         estimates, pushing shares higher in pre-market trading on Thursday."
            .to_string()
    }

    #[test]
    fn test_admits_finance_article() {
        assert!(passes_junk_filter(
            "Apple reports Q3 earnings beat",
            &long_finance_content(),
            &[],
        ));
    }

    #[test]
    fn test_rejects_sponsored_ad() {
        let title = "Sign up now for free stock tips";
        let content = "Click here for the best deals, buy now while supplies last. \
                       This incredible offer will not wait for you, act today!";
        assert!(!passes_junk_filter(title, content, &["sponsored".to_string()]));
    }

    #[test]
    fn test_rejects_each_spam_phrase() {
        let filler = "stock market ".repeat(10);
        for phrase in SPAM_PHRASES {
            let content = format!("{} {}", filler, phrase);
            assert!(
                !passes_junk_filter("Title", &content, &[]),
                "phrase not rejected: {phrase}"
            );
        }
    }

    #[test]
    fn test_rejects_short_content() {
        assert!(!passes_junk_filter("Earnings beat", "stocks up", &[]));
    }

    #[test]
    fn test_rejects_blocked_category_case_insensitive() {
        assert!(!passes_junk_filter(
            "Earnings beat",
            &long_finance_content(),
            &["Press Release".to_string()],
        ));
    }

    #[test]
    fn test_rejects_irrelevant_content() {
        let content = "The local gardening club met on Sunday to discuss tulip \
                       varieties and the best compost mixes for spring planting season.";
        assert!(!passes_junk_filter("Gardening tips", content, &[]));
    }

    #[test]
    fn test_category_substring_match() {
        assert!(!passes_junk_filter(
            "Earnings beat",
            &long_finance_content(),
            &["promoted-promo-content".to_string()],
        ));
    }
}
