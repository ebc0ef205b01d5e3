//! Options-derived gamma exposure context, consumed read-only.
//!
//! `GammaProfile` is produced by an external options-Greeks collaborator
//! (Black-Scholes GEX aggregation is out of scope here) and cached on the
//! order book; the iceberg analyzer reads it as a hint.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaProfile {
    pub total_gex: f64,
    pub total_gex_normalized: Option<f64>,
    pub call_wall: f64,
    pub put_wall: f64,
    pub expiry_timestamp: Option<DateTime<Utc>>,
}

impl GammaProfile {
    /// Hours remaining until `expiry_timestamp`, or `None` if it isn't set
    /// or has already passed.
    pub fn hours_to_expiry(&self, now: DateTime<Utc>) -> Option<f64> {
        let expiry = self.expiry_timestamp?;
        let delta = (expiry - now).num_milliseconds() as f64 / 3_600_000.0;
        if delta > 0.0 { Some(delta) } else { None }
    }

    pub fn is_gex_significant(&self) -> bool {
        self.total_gex_normalized.map(|n| n.abs() > 0.10).unwrap_or(false)
    }

    pub fn is_positive_gex(&self) -> bool {
        self.total_gex > 0.0
    }

    /// The next weekly options expiry: the upcoming Friday at 08:00 UTC
    /// (standard crypto-options cash-settlement time), or today at 08:00 UTC
    /// if it is already Friday and that time hasn't passed yet.
    pub fn get_next_options_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
        let today_08 = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 8, 0, 0)
            .single()
            .expect("valid calendar date");

        let days_until_friday = (Weekday::Fri.num_days_from_monday() as i64
            - now.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);

        if days_until_friday == 0 && now.hour() < 8 {
            today_08
        } else if days_until_friday == 0 {
            today_08 + Duration::days(7)
        } else {
            today_08 + Duration::days(days_until_friday)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_expiry_on_a_monday_is_that_weeks_friday() {
        let monday = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let expiry = GammaProfile::get_next_options_expiry(monday);
        assert_eq!(expiry.weekday(), Weekday::Fri);
        assert_eq!(expiry.hour(), 8);
    }

    #[test]
    fn next_expiry_friday_morning_before_0800_is_today() {
        let friday_early = Utc.with_ymd_and_hms(2026, 7, 31, 3, 0, 0).unwrap();
        let expiry = GammaProfile::get_next_options_expiry(friday_early);
        assert_eq!(expiry.day(), 31);
    }

    #[test]
    fn next_expiry_friday_after_0800_rolls_to_next_week() {
        let friday_late = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        let expiry = GammaProfile::get_next_options_expiry(friday_late);
        assert_eq!(expiry.day(), 7);
        assert_eq!(expiry.month(), 8);
    }

    #[test]
    fn hours_to_expiry_is_none_once_passed() {
        let profile = GammaProfile {
            total_gex: 0.0,
            total_gex_normalized: None,
            call_wall: 0.0,
            put_wall: 0.0,
            expiry_timestamp: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        };
        assert!(profile.hours_to_expiry(Utc::now()).is_none());
    }
}
