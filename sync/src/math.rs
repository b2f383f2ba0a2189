//! Fixed-Point Math Primitives
//!
//! Integer division, LUT-based arctangent and complex helpers used by the
//! CFO estimator and the channel estimator. Angles are represented with a
//! full scale of +/- pi mapped onto the signed range of the output width.

use num_complex::Complex;

/// Symmetric saturation of a value to a signed width of `bits`
pub fn saturate(value: i64, bits: u32) -> i64 {
    let max = (1i64 << (bits - 1)) - 1;
    value.clamp(-max, max)
}

/// Unsigned integer division, quotient truncated toward zero.
/// A zero denominator saturates to the all-ones quotient.
pub fn div(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        u64::MAX
    } else {
        numerator / denominator
    }
}

/// Fractional ratio `numerator / denominator` in Q(`frac_bits`), rounded
/// to nearest. Caller guarantees `numerator <= denominator`; the widened
/// intermediate holds the full shifted numerator.
fn ratio_frac(numerator: u64, denominator: u64, frac_bits: u32) -> u64 {
    if denominator == 0 {
        return (1 << frac_bits) - 1;
    }
    ((((numerator as u128) << frac_bits) + (denominator / 2) as u128) / denominator as u128) as u64
}

/// Widening complex multiply, no truncation
pub fn cmul(a: Complex<i64>, b: Complex<i64>) -> Complex<i64> {
    Complex::new(a.re * b.re - a.im * b.im, a.re * b.im + a.im * b.re)
}

/// Widening complex multiply with conjugated second operand, in 128-bit
/// precision for the CFO product of two correlator half sums
pub fn cmul_conj_wide(a: Complex<i64>, b: Complex<i64>) -> (i128, i128) {
    let re = a.re as i128 * b.re as i128 + a.im as i128 * b.im as i128;
    let im = a.im as i128 * b.re as i128 - a.re as i128 * b.im as i128;
    (re, im)
}

/// Number of LUT address bits for the arctangent table
const ATAN_LUT_BITS: u32 = 10;

/// Four-quadrant fixed-point arctangent.
///
/// The quarter-plane arctangent is a table indexed by the rounded Q10
/// ratio of the smaller to the larger operand magnitude; quadrant folding
/// recovers the full circle. Output full scale is +/- pi represented as
/// +/- (2^(width-1) - 1).
pub struct FixedAtan2 {
    lut: Vec<i64>,
    output_width: u32,
}

impl FixedAtan2 {
    pub fn new(output_width: u32) -> Self {
        let pi_q = Self::pi_scaled(output_width);
        let entries = (1usize << ATAN_LUT_BITS) + 1;
        let mut lut = Vec::with_capacity(entries);
        for i in 0..entries {
            let z = i as f64 / (1u64 << ATAN_LUT_BITS) as f64;
            let angle = z.atan() / std::f64::consts::PI;
            lut.push((angle * pi_q as f64).round() as i64);
        }
        Self { lut, output_width }
    }

    /// The representation of pi at this output width
    pub fn pi_scaled(output_width: u32) -> i64 {
        (1i64 << (output_width - 1)) - 1
    }

    /// Quarter-plane arctangent of `num/den` with `num <= den`
    fn atan_frac(&self, num: u64, den: u64) -> i64 {
        let idx = ratio_frac(num, den, ATAN_LUT_BITS) as usize;
        self.lut[idx.min(self.lut.len() - 1)]
    }

    /// atan2(y, x) with output full scale +/- pi
    pub fn atan2(&self, y: i64, x: i64) -> i64 {
        if x == 0 && y == 0 {
            return 0;
        }
        let pi = Self::pi_scaled(self.output_width);
        let half_pi = pi / 2;
        let ax = x.unsigned_abs();
        let ay = y.unsigned_abs();

        let base = if ay <= ax {
            self.atan_frac(ay, ax)
        } else {
            half_pi - self.atan_frac(ax, ay)
        };

        match (x >= 0, y >= 0) {
            (true, true) => base,
            (false, true) => pi - base,
            (false, false) => -(pi - base),
            (true, false) => -base,
        }
    }

    /// atan2 of a 128-bit complex value; both components are pre-shifted
    /// by a common amount until they fit the 64-bit datapath, which leaves
    /// the angle unchanged
    pub fn atan2_wide(&self, im: i128, re: i128) -> i64 {
        let magnitude = re.unsigned_abs().max(im.unsigned_abs());
        let excess = (128 - magnitude.leading_zeros()).saturating_sub(62);
        self.atan2((im >> excess) as i64, (re >> excess) as i64)
    }
}
