//! Trading calendar and the freshness short-circuit policy.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Trading days in `(after, until]`.
    pub fn trading_days_between(&self, after: NaiveDate, until: NaiveDate) -> u32 {
        let mut count = 0;
        let mut day = after;
        while day < until {
            day = match day.succ_opt() {
                Some(d) => d,
                None => break,
            };
            if self.is_trading_day(day) {
                count += 1;
            }
        }
        count
    }
}

/// Decides whether an instrument's existing canonical data is recent enough
/// to skip resolution.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    pub max_lag_trading_days: u32,
    pub calendar: TradingCalendar,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_lag_trading_days: 1,
            calendar: TradingCalendar::default(),
        }
    }
}

impl FreshnessPolicy {
    pub fn is_fresh(&self, last_date: Option<NaiveDate>, today: NaiveDate) -> bool {
        match last_date {
            None => false,
            Some(last) if last >= today => true,
            Some(last) => {
                self.calendar.trading_days_between(last, today) <= self.max_lag_trading_days
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekend_is_not_a_trading_day() {
        let cal = TradingCalendar::default();
        // 2024-01-06 is a Saturday
        assert!(!cal.is_trading_day(d(2024, 1, 6)));
        assert!(!cal.is_trading_day(d(2024, 1, 7)));
        assert!(cal.is_trading_day(d(2024, 1, 8)));
    }

    #[test]
    fn friday_to_monday_is_one_trading_day() {
        let cal = TradingCalendar::default();
        assert_eq!(cal.trading_days_between(d(2024, 1, 5), d(2024, 1, 8)), 1);
    }

    #[test]
    fn holidays_are_skipped() {
        let cal = TradingCalendar::new([d(2024, 1, 8)]);
        assert_eq!(cal.trading_days_between(d(2024, 1, 5), d(2024, 1, 9)), 1);
    }

    #[test]
    fn no_data_is_never_fresh() {
        let policy = FreshnessPolicy::default();
        assert!(!policy.is_fresh(None, d(2024, 1, 8)));
    }

    #[test]
    fn one_day_lag_is_fresh_two_is_stale() {
        let policy = FreshnessPolicy::default();
        // Wednesday run, latest bar Tuesday
        assert!(policy.is_fresh(Some(d(2024, 1, 9)), d(2024, 1, 10)));
        // Wednesday run, latest bar Monday
        assert!(!policy.is_fresh(Some(d(2024, 1, 8)), d(2024, 1, 10)));
    }

    #[test]
    fn zero_lag_requires_todays_bar() {
        let policy = FreshnessPolicy {
            max_lag_trading_days: 0,
            ..FreshnessPolicy::default()
        };
        assert!(policy.is_fresh(Some(d(2024, 1, 10)), d(2024, 1, 10)));
        assert!(!policy.is_fresh(Some(d(2024, 1, 9)), d(2024, 1, 10)));
        // Saturday run, Friday bar
        assert!(policy.is_fresh(Some(d(2024, 1, 5)), d(2024, 1, 6)));
    }
}
