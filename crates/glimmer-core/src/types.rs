/// Job and upscale-job identifiers are opaque UUIDs minted at submission.
pub type JobId = uuid::Uuid;

/// All persisted instants are milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}
