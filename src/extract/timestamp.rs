use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;

static PROVENANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{1,2}:\d{2}(?:\s*[AaPp][Mm])?),\s*(\d{1,2}/\d{1,2}/\d{2,4})\]\s*([^:]*)")
        .unwrap()
});

/// Parse the structured provenance string the client stamps on a bubble,
/// e.g. `"[12:46, 13/09/2025] Karl: "`. Returns the resolved instant plus
/// the sender name when one is present.
pub fn parse_provenance(raw: &str) -> Option<(DateTime<Utc>, Option<String>)> {
    let caps = PROVENANCE_RE.captures(raw.trim())?;
    let time = parse_clock(&caps[1])?;
    let date = parse_slash_date(&caps[2])?;
    let sender = caps
        .get(3)
        .map(|m| m.as_str().trim().trim_end_matches(':').trim())
        .filter(|s| !s.is_empty())
        .map(String::from);
    Some((Utc.from_utc_datetime(&date.and_time(time)), sender))
}

/// A visible bare clock label next to a bubble, combined with the current
/// date. Rejects edited markers and anything too long to be a clock.
pub fn parse_visible_label(label: &str, today: NaiveDate) -> Option<DateTime<Utc>> {
    let label = label.trim();
    if label.is_empty() || label.len() > 8 || label.contains("Edited") {
        return None;
    }
    let time = parse_clock(label)?;
    Some(Utc.from_utc_datetime(&today.and_time(time)))
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    let upper = raw.to_uppercase();
    if upper.ends_with("AM") || upper.ends_with("PM") {
        NaiveTime::parse_from_str(&upper, "%I:%M %p")
            .or_else(|_| NaiveTime::parse_from_str(&upper.replace(' ', ""), "%I:%M%p"))
            .ok()
    } else {
        NaiveTime::parse_from_str(raw, "%H:%M").ok()
    }
}

/// Day-first, falling back to month-first when day-first is impossible.
/// Genuinely ambiguous dates (03/04) resolve day-first; this is a known
/// mis-resolution risk, preserved deliberately.
fn parse_slash_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.split('/');
    let a: u32 = parts.next()?.trim().parse().ok()?;
    let b: u32 = parts.next()?.trim().parse().ok()?;
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let year = if year < 100 { year + 2000 } else { year };
    NaiveDate::from_ymd_opt(year, b, a).or_else(|| NaiveDate::from_ymd_opt(year, a, b))
}
