/// Converts a byte count to megabytes, rounded to two decimals for display.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let mb = bytes as f64 / 1_048_576.0;
    (mb * 100.0).round() / 100.0
}
