use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$")
            .expect("email pattern compiles");
    static ref URL_RE: Regex = Regex::new(r"^https?://[A-Za-z0-9\-._~%]+(?::\d{1,5})?(?:[/?#][^\s]*)?$")
        .expect("url pattern compiles");
}

/// Validates the format of a UUID path segment.
///
/// # Returns
///
/// * `AppResult<Uuid>` - The parsed `Uuid` on success, or a `400 Bad Request` on failure.
pub fn validate_uuid(id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest(format!("Invalid UUID format: {}", sanitize_for_logging(id))))
}

pub fn is_valid_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

pub fn is_valid_email(value: &str) -> bool {
    value.len() <= 254 && EMAIL_RE.is_match(value)
}

/// Calendar date in `YYYY-MM-DD` form.
pub fn is_valid_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Absolute http(s) URL.
pub fn is_valid_url(value: &str) -> bool {
    value.len() <= 2048 && URL_RE.is_match(value)
}

/// Sanitizes user input for logging purposes.
///
/// This function removes control characters, limits the length of the string,
/// and escapes special characters.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}
