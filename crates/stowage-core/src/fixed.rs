use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Every weight and capacity in the kernel uses this type so running totals
/// maintained by deltas reconcile exactly with a fresh scan.
pub type Weight = I32F32;

/// Simulation clock value in seconds.
pub type SimTime = f64;

/// Convert an f64 to a Weight. Use only for initialization and input.
#[inline]
pub fn weight(v: f64) -> Weight {
    Weight::from_num(v)
}

/// Convert a Weight to f64. Use only for display and ratios.
#[inline]
pub fn weight_to_f64(v: Weight) -> f64 {
    v.to_num::<f64>()
}

/// `numerator / denominator` as f64, or 0 when the denominator is not positive.
#[inline]
pub fn ratio(numerator: Weight, denominator: Weight) -> f64 {
    if denominator <= Weight::ZERO {
        return 0.0;
    }
    weight_to_f64(numerator) / weight_to_f64(denominator)
}
