//! Business-day arithmetic for merchant settlement.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

#[derive(Debug, Clone)]
pub struct SettlementCalendar {
    pub delay_hours: i64,
    pub holidays: Vec<NaiveDate>,
}

impl Default for SettlementCalendar {
    fn default() -> Self {
        let holidays = [(1, 1), (5, 1), (5, 20), (8, 15), (12, 25)]
            .iter()
            .filter_map(|(m, d)| NaiveDate::from_ymd_opt(2024, *m, *d))
            .collect();
        Self {
            delay_hours: 24,
            holidays,
        }
    }
}

impl SettlementCalendar {
    pub fn from_env() -> Self {
        let mut calendar = Self::default();
        if let Some(hours) = std::env::var("SETTLEMENT_DELAY_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
        {
            calendar.delay_hours = hours;
        }
        if let Ok(raw) = std::env::var("SETTLEMENT_HOLIDAYS") {
            let parsed: Vec<NaiveDate> = raw
                .split(',')
                .filter_map(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
                .collect();
            if !parsed.is_empty() {
                calendar.holidays = parsed;
            }
        }
        calendar
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// First business day strictly after `date`.
    pub fn next_business_day(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let mut next = date + Duration::days(1);
        while !self.is_business_day(next.date_naive()) {
            next += Duration::days(1);
        }
        next
    }

    pub fn settlement_date(&self, transaction_time: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = transaction_time + Duration::hours(self.delay_hours);
        if self.is_business_day(candidate.date_naive()) {
            candidate
        } else {
            self.next_business_day(candidate)
        }
    }
}

pub fn is_business_day(date: NaiveDate) -> bool {
    SettlementCalendar::default().is_business_day(date)
}

pub fn get_next_business_day(date: DateTime<Utc>) -> DateTime<Utc> {
    SettlementCalendar::default().next_business_day(date)
}

pub fn calculate_settlement_date(transaction_time: DateTime<Utc>) -> DateTime<Utc> {
    SettlementCalendar::default().settlement_date(transaction_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn weekends_and_holidays_are_not_business_days() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).expect("valid date");
        assert!(!is_business_day(date(2024, 6, 1))); // Saturday
        assert!(!is_business_day(date(2024, 6, 2))); // Sunday
        assert!(!is_business_day(date(2024, 5, 20))); // National Day
        assert!(is_business_day(date(2024, 6, 3)));
    }

    #[test]
    fn settlement_adds_delay_on_weekdays() {
        // Tue 2024-06-04 10:00 -> Wed 2024-06-05 10:00
        assert_eq!(calculate_settlement_date(at(2024, 6, 4, 10)), at(2024, 6, 5, 10));
    }

    #[test]
    fn settlement_rolls_over_weekend() {
        // Fri 2024-06-07 -> Sat, rolls to Mon 2024-06-10
        assert_eq!(calculate_settlement_date(at(2024, 6, 7, 9)), at(2024, 6, 10, 9));
    }

    #[test]
    fn settlement_rolls_over_holidays() {
        // Wed 2024-08-14 -> Thu 08-15 (holiday) -> Fri 08-16
        assert_eq!(calculate_settlement_date(at(2024, 8, 14, 12)), at(2024, 8, 16, 12));
        // Tue 2024-12-24 -> Wed 12-25 (holiday) -> Thu 12-26
        assert_eq!(calculate_settlement_date(at(2024, 12, 24, 8)), at(2024, 12, 26, 8));
    }

    #[test]
    fn next_business_day_skips_forward() {
        assert_eq!(get_next_business_day(at(2024, 6, 7, 0)), at(2024, 6, 10, 0));
    }
}
