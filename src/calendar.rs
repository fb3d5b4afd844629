use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Wall-clock abstraction so jobs and the watchdog can be tested against a
/// fixed instant instead of `Utc::now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Market calendar for the configured exchange timezone.
///
/// Trading days are weekdays minus the US market holiday set. Half-days are
/// treated as full trading days; the jobs that care operate on daily closes.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self::from_env()
    }
}

impl MarketCalendar {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    pub fn from_env() -> Self {
        let tz = std::env::var("MARKET_TIMEZONE")
            .ok()
            .and_then(|s| s.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::America::New_York);
        Self::new(tz)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !is_market_holiday(date)
    }

    /// True when `t` falls inside the weekday 09:30–16:00 window in the
    /// exchange timezone. Holidays are intentionally not consulted here:
    /// the cache TTL policy only distinguishes "market window" from "rest".
    pub fn is_market_hours(&self, t: DateTime<Utc>) -> bool {
        let local = t.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }

    /// The logical business date for daily jobs: the most recent trading day
    /// strictly before today, so market-close prices are final.
    pub fn target_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let mut date = now.with_timezone(&self.tz).date_naive() - Duration::days(1);
        while !self.is_trading_day(date) {
            date -= Duration::days(1);
        }
        date
    }

    /// The most recent `count` trading days ending at `today` (inclusive),
    /// scanned over a bounded calendar window. Newest first.
    pub fn recent_trading_days(&self, today: NaiveDate, count: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(count);
        let mut date = today;
        let floor = today - Duration::days(14);
        while out.len() < count && date >= floor {
            if self.is_trading_day(date) {
                out.push(date);
            }
            date -= Duration::days(1);
        }
        out
    }

    /// Next market open after `t`, in UTC. Used for scheduling hints.
    pub fn next_open(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let local = t.with_timezone(&self.tz);
        let mut date = local.date_naive();
        if local.time() >= self.open || !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        while !self.is_trading_day(date) {
            date += Duration::days(1);
        }
        self.tz
            .from_local_datetime(&date.and_time(self.open))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(t)
    }
}

/// US market holidays (NYSE/Nasdaq set), with observed shifts for fixed-date
/// holidays landing on a weekend.
pub fn is_market_holiday(date: NaiveDate) -> bool {
    let year = date.year();

    let fixed = [
        observed(NaiveDate::from_ymd_opt(year, 1, 1).unwrap()), // New Year's Day
        observed(NaiveDate::from_ymd_opt(year, 6, 19).unwrap()), // Juneteenth
        observed(NaiveDate::from_ymd_opt(year, 7, 4).unwrap()), // Independence Day
        observed(NaiveDate::from_ymd_opt(year, 12, 25).unwrap()), // Christmas
    ];
    if fixed.contains(&date) {
        return true;
    }

    let floating = [
        nth_weekday(year, 1, Weekday::Mon, 3),  // MLK Day
        nth_weekday(year, 2, Weekday::Mon, 3),  // Presidents' Day
        last_weekday(year, 5, Weekday::Mon),    // Memorial Day
        nth_weekday(year, 9, Weekday::Mon, 1),  // Labor Day
        nth_weekday(year, 11, Weekday::Thu, 4), // Thanksgiving
    ];
    if floating.iter().flatten().any(|d| *d == date) {
        return true;
    }

    // Good Friday: two days before Easter Sunday
    easter_sunday(year)
        .map(|e| e - Duration::days(2) == date)
        .unwrap_or(false)
}

fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    for n in (1..=5).rev() {
        if let Some(d) = NaiveDate::from_weekday_of_month_opt(year, month, weekday, n) {
            return Some(d);
        }
    }
    None
}

/// Anonymous Gregorian computus.
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap().and_utc()
    }

    #[test]
    fn test_known_holidays_2025() {
        assert!(is_market_holiday(d("2025-01-01")));
        assert!(is_market_holiday(d("2025-01-20"))); // MLK
        assert!(is_market_holiday(d("2025-04-18"))); // Good Friday
        assert!(is_market_holiday(d("2025-05-26"))); // Memorial Day
        assert!(is_market_holiday(d("2025-11-27"))); // Thanksgiving
        assert!(is_market_holiday(d("2025-12-25")));
        assert!(!is_market_holiday(d("2025-06-05")));
    }

    #[test]
    fn test_observed_shift() {
        // July 4 2026 is a Saturday; observed Friday July 3
        assert!(is_market_holiday(d("2026-07-03")));
        assert!(!is_market_holiday(d("2026-07-04")));
    }

    #[test]
    fn test_weekends_are_not_trading_days() {
        let cal = MarketCalendar::new(chrono_tz::America::New_York);
        assert!(!cal.is_trading_day(d("2025-06-07"))); // Saturday
        assert!(!cal.is_trading_day(d("2025-06-08"))); // Sunday
        assert!(cal.is_trading_day(d("2025-06-09"))); // Monday
    }

    #[test]
    fn test_market_hours_window() {
        let cal = MarketCalendar::new(chrono_tz::America::New_York);
        // 2025-06-05 is a Thursday. 14:00 UTC = 10:00 ET (EDT), inside window.
        assert!(cal.is_market_hours(utc("2025-06-05 14:00")));
        // 21:00 UTC = 17:00 ET, after close.
        assert!(!cal.is_market_hours(utc("2025-06-05 21:00")));
        // Saturday
        assert!(!cal.is_market_hours(utc("2025-06-07 14:00")));
    }

    #[test]
    fn test_target_date_skips_weekend() {
        let cal = MarketCalendar::new(chrono_tz::America::New_York);
        // Monday June 9: previous trading day is Friday June 6
        assert_eq!(cal.target_date(utc("2025-06-09 12:00")), d("2025-06-06"));
    }

    #[test]
    fn test_recent_trading_days_count() {
        let cal = MarketCalendar::new(chrono_tz::America::New_York);
        let days = cal.recent_trading_days(d("2025-06-13"), 7);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], d("2025-06-13"));
        // Weekend of June 7/8 skipped
        assert!(days.contains(&d("2025-06-06")));
        assert!(!days.contains(&d("2025-06-08")));
    }
}
