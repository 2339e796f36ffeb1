//! Small numeric and formatting helpers shared by the protocol and controller.

/// Round half away from zero to `decimals` places.
#[inline]
pub fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (x * scale).round() / scale
}

/// Shortest decimal text for `x` that always carries a fractional part
/// ("450" renders as "450.0"), matching what the pump firmware expects.
pub fn decimal_text(x: f64) -> String {
    let s = format!("{x}");
    if s.contains('.') || s.contains('e') || !x.is_finite() {
        s
    } else {
        format!("{s}.0")
    }
}

/// Left-pad `s` with zeros to `width` characters.
#[inline]
pub fn zero_pad(s: &str, width: usize) -> String {
    format!("{s:0>width$}")
}
