//! Small cross-cutting helpers shared by more than one component.

/// Current instant as an ISO-8601 UTC timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
