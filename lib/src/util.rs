use http::HeaderMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use validator::ValidateEmail;

use crate::{ErrorKind, Result};

/// Trims and lowercases an address, rejecting anything that doesn't look
/// like an email.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ErrorKind::BadInput("email is required".to_string()).into());
    }
    if !email.validate_email() {
        return Err(ErrorKind::BadInput(format!("invalid email address: {email}")).into());
    }
    Ok(email)
}

/// Trims a mandatory text field, rejecting blank values.
pub fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ErrorKind::BadInput(format!("{field} is required")).into());
    }
    Ok(value.to_string())
}

/// Generates a fresh opaque tracking token: milliseconds since epoch followed
/// by a random alphanumeric suffix. Uniqueness is still enforced on insert.
pub fn tracking_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!(
        "{:x}{}",
        chrono::Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

/// Best-effort client address, honoring the first `x-forwarded-for` hop.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Case-insensitive substring match over any of the given fields.
pub fn matches_search(search: Option<&str>, fields: &[&str]) -> bool {
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        None => true,
        Some(needle) => {
            let needle = needle.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&needle))
        }
    }
}
