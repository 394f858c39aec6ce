use std::time::Duration;

/// Parses human-friendly durations for storage timeouts (e.g. `250ms`, `30s`, `2m`).
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim())
        .map_err(|err| format!("invalid duration {value:?}: {err}"))
}
