//! Month index to calendar month mapping.
//!
//! Month `i` of a scheme is `start_date + (i - 1)` months. Day-of-month is
//! clamped by chrono when the target month is shorter (Jan 31 -> Feb 29).

use chrono::{Datelike, Months, NaiveDate};

/// Calendar date of month `month_index` (1-based), keeping the start day.
pub fn month_date(start_date: NaiveDate, month_index: u32) -> NaiveDate {
    let offset = month_index.saturating_sub(1);
    start_date
        .checked_add_months(Months::new(offset))
        .unwrap_or(NaiveDate::MAX)
}

/// First day of the calendar month for `month_index`.
pub fn month_start(start_date: NaiveDate, month_index: u32) -> NaiveDate {
    let date = month_date(start_date, month_index);
    date.with_day(1).unwrap_or(date)
}

/// `MM/YYYY` label for a date.
pub fn month_label(date: NaiveDate) -> String {
    format!("{:02}/{}", date.month(), date.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_offsets_cross_year() {
        let start = d(2024, 11, 10);
        assert_eq!(month_date(start, 1), d(2024, 11, 10));
        assert_eq!(month_date(start, 2), d(2024, 12, 10));
        assert_eq!(month_date(start, 3), d(2025, 1, 10));
        assert_eq!(month_label(month_date(start, 3)), "01/2025");
    }

    #[test]
    fn test_short_month_clamps_day() {
        let start = d(2024, 1, 31);
        assert_eq!(month_date(start, 2), d(2024, 2, 29));
        assert_eq!(month_start(start, 2), d(2024, 2, 1));
    }
}
