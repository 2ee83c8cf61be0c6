use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{Classification, FailureKind, FetchError};

/// Longest response body excerpt folded into an error message.
pub const MAX_BODY_CHARS: usize = 300;

/// Numeric retry hints above this are already milliseconds.
const MILLIS_THRESHOLD: f64 = 1000.0;

/// Obsolete HTTP date forms still accepted by recipients: RFC 850 and asctime.
/// Both are always UTC.
const OBSOLETE_HTTP_DATES: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Turns a non-2xx response into a classified error.
///
/// `retry_after` is the raw value of the retry-hint header, if any. It is only
/// consulted for retryable statuses.
pub fn classify_status(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    now: DateTime<Utc>,
) -> FetchError {
    let kind = FailureKind::HttpStatus(status);
    let excerpt = truncate_body(body, MAX_BODY_CHARS);
    let message = if excerpt.is_empty() {
        kind.to_string()
    } else {
        format!("{kind}: {excerpt}")
    };

    let classification = if kind.is_transient() {
        Classification::Retryable {
            hint: retry_after.and_then(|value| parse_retry_after(value, now)),
        }
    } else {
        Classification::Fatal
    };

    FetchError {
        kind,
        message,
        classification,
    }
}

/// Parses a `Retry-After` value into a wait.
///
/// Numbers are seconds, except values over 1000 which are taken as
/// milliseconds. Anything else is read as an HTTP date (IMF-fixdate, RFC 850
/// or asctime); a date in the past yields a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(number) = value.parse::<f64>() {
        if !number.is_finite() || number < 0.0 {
            return None;
        }
        let millis = if number > MILLIS_THRESHOLD {
            number
        } else {
            number * 1000.0
        };
        return Some(Duration::from_millis(millis.round() as u64));
    }

    let remaining = parse_http_date(value)? - now;
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    OBSOLETE_HTTP_DATES
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Collapses whitespace and cuts the body to at most `max_chars` characters.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
