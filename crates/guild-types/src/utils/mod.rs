//! Small helpers shared across crates.

/// Adds a `0x` prefix unless one is already present.
pub fn with_0x_prefix(value: &str) -> String {
	if value.starts_with("0x") || value.starts_with("0X") {
		value.to_string()
	} else {
		format!("0x{}", value)
	}
}

/// Strips a leading `0x`/`0X` if present.
pub fn without_0x_prefix(value: &str) -> &str {
	value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
		.unwrap_or(value)
}

/// Milliseconds since the Unix epoch according to the local clock.
pub fn current_timestamp_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}
