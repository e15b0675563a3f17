use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Format a timestamp as RFC 3339. Out-of-range years format as an empty string.
pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}
