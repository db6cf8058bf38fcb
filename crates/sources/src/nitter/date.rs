use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<month>\w{3}) (?P<day>\d\d?), (?P<year>\d{4}) · (?P<hour>[01]?\d):(?P<minute>\d\d) (?P<ampm>AM|PM) UTC$",
    )
    .unwrap()
});

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parse the `title` of a tweet date link, e.g. `Nov 1, 2022 · 4:34 PM UTC`.
pub fn parse_tweet_date(title: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_REGEX.captures(title.trim())?;

    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(&caps["month"]))? as u32
        + 1;
    let day: u32 = caps["day"].parse().ok()?;
    let year: i32 = caps["year"].parse().ok()?;
    let mut hour: u32 = caps["hour"].parse().ok()?;
    let minute: u32 = caps["minute"].parse().ok()?;

    if !(1..=12).contains(&hour) {
        return None;
    }
    match &caps["ampm"] {
        "AM" if hour == 12 => hour = 0,
        "PM" if hour != 12 => hour += 12,
        _ => {}
    }

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, 0)
        .map(|dt| dt.and_utc())
}

/// Like [`parse_tweet_date`], falling back to the Unix epoch.
pub fn parse_tweet_date_or_epoch(title: &str) -> DateTime<Utc> {
    parse_tweet_date(title).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
