//! RFC 3339 UTC timestamps, always with millisecond precision and a `Z` suffix.
//! Invariant (spec.md 8.2): `parse(rfc3339(x)) == x` for any `x` the projector produces.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts the handful of timestamp shapes OCI config blobs actually use (RFC 3339 with
/// fractional seconds of varying width, or without any), normalizing all of them to the
/// millisecond/`Z` form above.
pub fn parse_and_normalize(s: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| to_rfc3339(dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_identity() {
        let x = now();
        let s = to_rfc3339(x);
        assert!(s.ends_with('Z'));
        let parsed = DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc);
        assert_eq!(parsed.timestamp_millis(), x.timestamp_millis());
    }

    #[test]
    fn normalizes_varying_fractional_widths() {
        assert_eq!(
            parse_and_normalize("2023-01-02T03:04:05.123456789Z").unwrap(),
            "2023-01-02T03:04:05.123Z"
        );
        assert_eq!(
            parse_and_normalize("2023-01-02T03:04:05Z").unwrap(),
            "2023-01-02T03:04:05.000Z"
        );
    }
}
