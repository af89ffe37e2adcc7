//! Distance → confidence percentage.

/// Default Euclidean distance at or below which two embeddings are the same face.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

const CURVE_EXPONENT: f64 = 0.2;

/// Map a match distance to a confidence percentage in [0, 100].
///
/// Above the threshold confidence falls off linearly. At or below it the
/// linear value is pushed towards 1 by a fractional power, so good matches
/// score in the 90s. The power base `(linear - 0.5) * 2` is non-negative
/// whenever `distance <= threshold < 1`; it is clamped at zero regardless.
///
/// `threshold` must lie in (0, 1).
pub fn face_confidence(distance: f64, threshold: f64) -> f64 {
    let range = 1.0 - threshold;
    let linear = (1.0 - distance) / (range * 2.0);

    let value = if distance > threshold {
        linear
    } else {
        let base = ((linear - 0.5) * 2.0).max(0.0);
        linear + (1.0 - linear) * base.powf(CURVE_EXPONENT)
    };

    round2((value * 100.0).clamp(0.0, 100.0))
}

/// Round to two decimals from the exact binary value, ties to even.
///
/// Scaling by 100 before rounding shifts values sitting next to a `.xx5`
/// boundary across it, so the decimal formatter does the rounding.
fn round2(v: f64) -> f64 {
    format!("{v:.2}").parse().unwrap_or(v)
}
