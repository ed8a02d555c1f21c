use crate::error::{DashboardError, Result};
use crate::schema::Cell;
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime};

const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y", "%d %b %Y"];

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

/// Pivot column key for a date, e.g. "2025-11".
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Division that reports 0 instead of infinity or NaN for an empty denominator.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Converts an Excel serial day number (1900 date system, origin 1899-12-30) to a timestamp.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > MAX_EXCEL_SERIAL {
        return None;
    }
    let days = serial.floor();
    let secs = ((serial - days) * 86_400.0).round() as u32;

    let (y, m, d) = EXCEL_EPOCH;
    let date = NaiveDate::from_ymd_opt(y, m, d)?.checked_add_days(Days::new(days as u64))?;
    let time = if secs >= 86_400 {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?
    };
    Some(NaiveDateTime::new(date, time))
}

/// Best-effort timestamp from a cell. Returns `None` for blanks and anything unparseable,
/// which callers treat as "skip this row".
pub fn parse_datetime_cell(cell: &Cell) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(dt) => Some(*dt),
        Cell::Number(serial) => excel_serial_to_datetime(*serial),
        Cell::Text(text) => parse_datetime_text(text),
        Cell::Empty | Cell::Bool(_) => None,
    }
}

pub fn parse_date_cell(cell: &Cell) -> Option<NaiveDate> {
    parse_datetime_cell(cell).map(|dt| dt.date())
}

pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // Offsets are dropped and the wall-clock time kept.
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    if let Ok(serial) = text.parse::<f64>() {
        return excel_serial_to_datetime(serial);
    }

    None
}

/// Paid hours from a payroll cell: either a decimal number of hours or a duration
/// like "7h 30m". Unparseable cells count as zero hours.
pub fn parse_hours_cell(cell: &Cell) -> f64 {
    match cell {
        Cell::Number(n) if n.is_finite() => *n,
        Cell::Text(text) => parse_hours_text(text).unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn parse_hours_text(text: &str) -> Option<f64> {
    let text = text.trim().to_ascii_lowercase();
    if text.is_empty() {
        return None;
    }

    let Some((hours, rest)) = text.split_once('h') else {
        return text.parse::<f64>().ok().filter(|v| v.is_finite());
    };

    let hours: f64 = hours.trim().parse().ok()?;
    let minutes = rest.trim().trim_end_matches("min").trim_end_matches('m').trim();
    let minutes: f64 = if minutes.is_empty() {
        0.0
    } else {
        minutes.parse().ok()?
    };

    Some(hours + minutes / 60.0)
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// Returns (start_date, end_date)
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    match parts.len() {
        1 => {
            let start_date = parse_month_start(parts[0])?;
            let end_date = month_end(start_date)?;
            Ok((start_date, end_date))
        }
        2 => {
            let start_date = parse_month_start(parts[0])?;
            let end_date = month_end(parse_month_start(parts[1])?)?;
            Ok((start_date, end_date))
        }
        _ => Err(DashboardError::DateError(format!(
            "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
            period
        ))),
    }
}

fn parse_month_start(part: &str) -> Result<NaiveDate> {
    let start_str = format!("{}-01", part.trim());
    NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        DashboardError::DateError(format!(
            "Invalid date format in period: {}. Expected YYYY-MM",
            part
        ))
    })
}

fn month_end(date: NaiveDate) -> Result<NaiveDate> {
    last_day_of_month(date.year(), date.month()).ok_or_else(|| {
        DashboardError::DateError(format!("No month end for {}", date.format("%Y-%m")))
    })
}
