//! Small calendar helpers shared by the metrics engine and its tests.
use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};

/// The UTC day bounds `[start, end)` for the given calendar date.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
    let end = start + chrono::Duration::days(1);
    (start, end)
}

/// The UTC bounds `[start, end)` of the given calendar month. Invalid month numbers clamp to the same month, which
/// yields an empty range.
pub fn month_bounds(month: u32, year: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap_or(start)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap_or(start)
    };
    (day_bounds(start).0, day_bounds(end).0)
}

/// The `n` calendar days before `today`, oldest first. `today` itself is excluded.
pub fn previous_days(today: NaiveDate, n: u64) -> Vec<NaiveDate> {
    (1..=n).rev().filter_map(|back| today.checked_sub_days(Days::new(back))).collect()
}

/// The (month, year) a date belongs to, in the shape the aggregate tables use.
pub fn month_of(date: NaiveDate) -> (u32, i32) {
    (date.month(), date.year())
}
