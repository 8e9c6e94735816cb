use chrono::{Datelike, Days, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::error::{BookingError, BookingResult};

/// Weekday number with 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parse a weekday given as a number (0 = Sunday) or a day name
/// (e.g. "monday", "mon", "seg").
pub fn parse_weekday(day: &str) -> Option<u8> {
    let day = day.trim().to_lowercase();
    if let Ok(n) = day.parse::<u8>() {
        return (n <= 6).then_some(n);
    }
    match day.as_str() {
        "sunday" | "sun" | "dom" | "domingo" => Some(0),
        "monday" | "mon" | "seg" | "segunda" => Some(1),
        "tuesday" | "tue" | "ter" | "terca" | "terça" => Some(2),
        "wednesday" | "wed" | "qua" | "quarta" => Some(3),
        "thursday" | "thu" | "qui" | "quinta" => Some(4),
        "friday" | "fri" | "sex" | "sexta" => Some(5),
        "saturday" | "sat" | "sab" | "sáb" | "sabado" | "sábado" => Some(6),
        _ => None,
    }
}

/// Parse a comma-separated weekday list, e.g. "1,2,3" or "mon,wed,fri".
pub fn parse_weekday_list(list: &str) -> BookingResult<Vec<u8>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse_weekday(s).ok_or_else(|| BookingError::validation(format!("Unknown weekday '{s}'")))
        })
        .collect()
}

/// Parse a time of day as `HH:MM` or `HH:MM:SS`.
pub fn parse_time(time: &str) -> BookingResult<NaiveTime> {
    let trimmed = time.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| BookingError::validation(format!("Invalid time '{trimmed}', expected HH:MM")))
}

/// Parse a calendar date as `YYYY-MM-DD`.
pub fn parse_date(date: &str) -> BookingResult<NaiveDate> {
    let trimmed = date.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| {
        BookingError::validation(format!("Invalid date '{trimmed}', expected YYYY-MM-DD"))
    })
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn parse_timezone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", name, e))
}

/// Today's date in the studio's timezone.
pub fn today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Every calendar day in `[start, end]`, each exactly once. Empty when `start > end`.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(start), |d| d.checked_add_days(Days::new(1)))
        .take_while(move |d| *d <= end)
}
