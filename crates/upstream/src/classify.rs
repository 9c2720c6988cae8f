//! Status classification for upstream responses
//!
//! Maps HTTP status codes onto `ErrorKind`. The executor switches on the
//! kind: 429 and 5xx are retried on the same credential, 401/403 rotate to
//! another credential, and client errors fail fast.

use reqwest::header::HeaderValue;
use std::time::Duration;

use crate::ErrorKind;

/// Classify a non-2xx status.
///
/// `retry_after` is only meaningful for 429 and is attached to the
/// `RateLimited` kind so the executor can honor it.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited { retry_after },
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        400 | 422 => ErrorKind::Validation,
        408 => ErrorKind::Network,
        500..=599 => ErrorKind::Server { status },
        _ => ErrorKind::Unknown,
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// The HTTP-date form is not used by the upstream and is ignored, as are
/// negative or non-numeric values.
pub fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let text = value.to_str().ok()?.trim();
    let secs: f64 = text.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_millis((secs * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_carries_retry_after() {
        assert_eq!(
            classify_status(429, Some(Duration::from_secs(2))),
            ErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn classify_429_without_retry_after() {
        assert_eq!(
            classify_status(429, None),
            ErrorKind::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn classify_401_auth() {
        assert_eq!(classify_status(401, None), ErrorKind::Auth);
    }

    #[test]
    fn classify_403_auth() {
        assert_eq!(classify_status(403, None), ErrorKind::Auth);
    }

    #[test]
    fn classify_404_not_found() {
        assert_eq!(classify_status(404, None), ErrorKind::NotFound);
    }

    #[test]
    fn classify_400_and_422_validation() {
        assert_eq!(classify_status(400, None), ErrorKind::Validation);
        assert_eq!(classify_status(422, None), ErrorKind::Validation);
    }

    #[test]
    fn classify_408_network() {
        assert_eq!(classify_status(408, None), ErrorKind::Network);
    }

    #[test]
    fn classify_5xx_server() {
        for status in [500, 502, 503, 504, 599] {
            assert_eq!(classify_status(status, None), ErrorKind::Server { status });
        }
    }

    #[test]
    fn classify_unknown_status() {
        assert_eq!(classify_status(418, None), ErrorKind::Unknown);
        assert_eq!(classify_status(302, None), ErrorKind::Unknown);
    }

    #[test]
    fn retry_after_seconds_converted_to_duration() {
        let value = HeaderValue::from_static("2");
        assert_eq!(parse_retry_after(&value), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn retry_after_fractional_seconds() {
        let value = HeaderValue::from_static("0.5");
        assert_eq!(parse_retry_after(&value), Some(Duration::from_millis(500)));
    }

    #[test]
    fn retry_after_http_date_ignored() {
        let value = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(&value), None);
    }

    #[test]
    fn retry_after_negative_ignored() {
        let value = HeaderValue::from_static("-3");
        assert_eq!(parse_retry_after(&value), None);
    }
}
