/// Seconds since the Unix epoch as a float. Every timestamp that crosses
/// the wire uses this representation.
pub fn epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Round to one decimal place for human-facing elapsed/remaining times.
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
