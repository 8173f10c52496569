//! Market event calendar filter.
//!
//! Config-driven date → event map. Holiday events veto entries outright;
//! high-volatility events (policy announcements, budget days) only produce a
//! caution warning that is surfaced in the decision log.

use chrono::NaiveDate;

use crate::config::EventsConfig;

/// How today's calendar affects trading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCheck {
    /// Nothing scheduled.
    Clear,
    /// Entries vetoed for the day.
    Holiday(String),
    /// Trade with caution; entries still allowed.
    HighVolatility(String),
    /// Known event with no special class.
    Other(String),
}

impl EventCheck {
    pub fn blocks_entries(&self) -> bool {
        matches!(self, Self::Holiday(_))
    }
}

/// Calendar lookup over the configured event map.
pub struct EventCalendar {
    config: Option<EventsConfig>,
}

impl EventCalendar {
    pub fn new(config: Option<EventsConfig>) -> Self {
        Self { config }
    }

    /// Classify the given date against the calendar.
    pub fn check(&self, date: NaiveDate) -> EventCheck {
        let config = match &self.config {
            Some(c) => c,
            None => return EventCheck::Clear,
        };

        let key = date.format("%Y-%m-%d").to_string();
        let event = match config.calendar.get(&key) {
            Some(e) => e.clone(),
            None => return EventCheck::Clear,
        };

        if config.holidays.iter().any(|h| h == &event) {
            EventCheck::Holiday(event)
        } else if config.high_volatility.iter().any(|h| h == &event) {
            EventCheck::HighVolatility(event)
        } else {
            EventCheck::Other(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn calendar() -> EventCalendar {
        let mut map = HashMap::new();
        map.insert("2026-08-15".to_string(), "Independence Day".to_string());
        map.insert("2026-08-07".to_string(), "RBI Monetary Policy".to_string());
        map.insert("2026-08-20".to_string(), "Earnings Season".to_string());
        EventCalendar::new(Some(EventsConfig {
            calendar: map,
            holidays: vec!["Independence Day".to_string()],
            high_volatility: vec!["RBI Monetary Policy".to_string()],
        }))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_holiday_blocks_entries() {
        let check = calendar().check(date("2026-08-15"));
        assert_eq!(check, EventCheck::Holiday("Independence Day".into()));
        assert!(check.blocks_entries());
    }

    #[test]
    fn test_high_volatility_warns_only() {
        let check = calendar().check(date("2026-08-07"));
        assert_eq!(check, EventCheck::HighVolatility("RBI Monetary Policy".into()));
        assert!(!check.blocks_entries());
    }

    #[test]
    fn test_unclassified_event() {
        let check = calendar().check(date("2026-08-20"));
        assert_eq!(check, EventCheck::Other("Earnings Season".into()));
        assert!(!check.blocks_entries());
    }

    #[test]
    fn test_clear_day() {
        assert_eq!(calendar().check(date("2026-08-10")), EventCheck::Clear);
    }

    #[test]
    fn test_no_calendar_configured() {
        let calendar = EventCalendar::new(None);
        assert_eq!(calendar.check(date("2026-08-15")), EventCheck::Clear);
    }
}
