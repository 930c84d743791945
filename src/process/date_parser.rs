use chrono::{Datelike, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];

/// Parse a base-date cell. Slash dates are read day-first (`31/01/2020`).
/// Anything unrecognised is `None`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    // "YYYY-MM" means the first of the month
    if s.len() == 7 && s.as_bytes()[4] == b'-' {
        let year: i32 = s.get(0..4)?.parse().ok()?;
        let month: u32 = s.get(5..7)?.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }

    None
}

/// `NaiveDate::from_ymd(1970, 1, 1).num_days_from_ce()`
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Days since the Unix epoch, as stored in an Arrow `Date32`.
pub fn to_date32(d: NaiveDate) -> i32 {
    d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}
