//! PSS Matched-Filter Correlator
//!
//! Correlates the incoming sample stream against one pre-computed PSS tap
//! set and emits the truncated squared magnitude after a fixed pipeline
//! latency. The accumulator carries the full bit growth of
//! ceil(log2(pss_len)) + input and tap widths; the squared magnitude is
//! right-shifted by the documented formula and masked to the output width.
//! The shift truncates (the magnitude is non-negative, so this equals
//! round-toward-zero); no rounding is applied.
//!
//! Three datapaths:
//! - direct convolution, bit-exact against a double-precision reference
//! - folded datapath exploiting the conjugate symmetry of the taps; the
//!   pre-adder drops one LSB, so parity with the direct datapath is
//!   tolerance-bound, and the half-window sums for CFO estimation are
//!   not available
//! - multiplier-reuse variant serializing the inner product; identical
//!   output, `mult_reuse` additional ticks of latency
//!
//! Pure function of the input history: no error conditions. Out-of-range
//! input amplitudes silently corrupt the result (caller's contract).

use crate::config::{CorrelatorAlgo, SyncConfig};
use crate::taps::PssTapSet;
use crate::SyncError;
use common::types::IqSample;
use num_complex::Complex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One correlator output sample
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrOutput {
    /// Truncated squared magnitude, masked to the output width
    pub mag: u64,
    /// Inner product over the first half of the taps (newest samples);
    /// zero for the folded datapath
    pub c0: Complex<i64>,
    /// Inner product over the second half of the taps
    pub c1: Complex<i64>,
}

/// Matched-filter correlator for one candidate N_id_2
pub struct PssCorrelator {
    taps: Arc<PssTapSet>,
    window: VecDeque<Complex<i32>>,
    pipeline: VecDeque<Option<CorrOutput>>,
    pipeline_len: usize,
    trunc_shift: u32,
    out_mask: u64,
    algo: CorrelatorAlgo,
}

impl PssCorrelator {
    pub fn new(config: &SyncConfig, taps: Arc<PssTapSet>) -> Result<Self, SyncError> {
        config.validate()?;
        if taps.len() != config.pss_len {
            return Err(SyncError::InvalidConfiguration(format!(
                "tap set holds {} taps but pss_len is {}",
                taps.len(),
                config.pss_len
            )));
        }

        let pipeline_len = match config.algo {
            CorrelatorAlgo::Direct => 3,
            CorrelatorAlgo::Folded => 4,
        } + if config.mult_reuse > 1 {
            config.mult_reuse
        } else {
            0
        };
        let out_mask = if config.out_dw >= 64 {
            u64::MAX
        } else {
            (1u64 << config.out_dw) - 1
        };

        let mut correlator = Self {
            taps,
            window: VecDeque::new(),
            pipeline: VecDeque::new(),
            pipeline_len,
            trunc_shift: config.corr_trunc_shift(),
            out_mask,
            algo: config.algo,
        };
        correlator.reset();
        Ok(correlator)
    }

    /// Clear the shift register and the output pipeline
    pub fn reset(&mut self) {
        self.window = VecDeque::from(vec![Complex::new(0, 0); self.taps.len()]);
        self.pipeline = VecDeque::from(vec![None; self.pipeline_len]);
    }

    /// Pipeline latency in ticks from a sample entering the window to its
    /// correlation emerging at the output
    pub fn latency(&self) -> usize {
        self.pipeline_len - 1
    }

    /// Advance by one tick. `input` carries the sample when the stream is
    /// valid this tick; output gaps mirror input gaps after the fixed
    /// pipeline latency.
    pub fn tick(&mut self, input: Option<IqSample>) -> Option<CorrOutput> {
        let computed = input.map(|sample| {
            self.window.pop_back();
            self.window
                .push_front(Complex::new(sample.re as i32, sample.im as i32));
            match self.algo {
                CorrelatorAlgo::Direct => self.correlate_direct(),
                CorrelatorAlgo::Folded => self.correlate_folded(),
            }
        });
        self.pipeline.push_front(computed);
        self.pipeline.pop_back().flatten()
    }

    fn output_of(&self, c0: Complex<i64>, c1: Complex<i64>) -> CorrOutput {
        let acc_re = c0.re + c1.re;
        let acc_im = c0.im + c1.im;
        let mag_sq = acc_re as i128 * acc_re as i128 + acc_im as i128 * acc_im as i128;
        CorrOutput {
            mag: ((mag_sq >> self.trunc_shift) as u64) & self.out_mask,
            c0,
            c1,
        }
    }

    fn correlate_direct(&self) -> CorrOutput {
        let half = self.taps.len() / 2;
        let mut c0 = Complex::new(0i64, 0i64);
        let mut c1 = Complex::new(0i64, 0i64);
        for (i, (tap, w)) in self.taps.taps().iter().zip(self.window.iter()).enumerate() {
            let re = tap.re as i64 * w.re as i64 - tap.im as i64 * w.im as i64;
            let im = tap.re as i64 * w.im as i64 + tap.im as i64 * w.re as i64;
            if i < half {
                c0.re += re;
                c0.im += im;
            } else {
                c1.re += re;
                c1.im += im;
            }
        }
        self.output_of(c0, c1)
    }

    /// Folded inner product: taps[len-n] = conj(taps[n]), so sample pairs
    /// share one multiplier through a pre-adder. The pre-adder output is
    /// truncated by one bit to hold the multiplier input width and the
    /// product is re-scaled, which loses the pair-sum LSB.
    fn correlate_folded(&self) -> CorrOutput {
        let len = self.taps.len();
        let half = len / 2;
        let taps = self.taps.taps();
        let w = &self.window;

        let mut acc = Complex::new(0i64, 0i64);
        // unpaired taps: index 0 and the center tap
        for &n in &[0usize, half] {
            let t = taps[n];
            let s = w[n];
            acc.re += t.re as i64 * s.re as i64 - t.im as i64 * s.im as i64;
            acc.im += t.re as i64 * s.im as i64 + t.im as i64 * s.re as i64;
        }
        for n in 1..half {
            let t = taps[n];
            let s = w[n];
            let r = w[len - n];
            let sum_re = (s.re as i64 + r.re as i64) >> 1;
            let diff_im = (s.im as i64 - r.im as i64) >> 1;
            let sum_im = (s.im as i64 + r.im as i64) >> 1;
            let diff_re = (s.re as i64 - r.re as i64) >> 1;
            acc.re += (t.re as i64 * sum_re - t.im as i64 * diff_im) << 1;
            acc.im += (t.re as i64 * sum_im + t.im as i64 * diff_re) << 1;
        }
        self.output_of(acc, Complex::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taps::PssTapSet;

    /// Small deterministic generator for test stimulus
    struct Lcg(u64);
    impl Lcg {
        fn next_i16(&mut self, amplitude: i16) -> i16 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as i32 % (amplitude as i32 + 1)) as i16
                * if self.0 & 1 == 0 { 1 } else { -1 }
        }
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            corr_decim: 1,
            ..SyncConfig::default()
        }
    }

    /// Reference model: double-precision convolution, squared magnitude
    /// truncated by the documented bit-growth formula
    fn float_reference(samples: &[IqSample], taps: &[Complex<i32>], shift: u32, mask: u64) -> Vec<u64> {
        let len = taps.len();
        let mut out = Vec::new();
        for n in 0..samples.len() {
            let mut acc_re = 0.0f64;
            let mut acc_im = 0.0f64;
            for (i, tap) in taps.iter().enumerate() {
                let s = if n >= i {
                    samples[n - i]
                } else {
                    IqSample::new(0, 0)
                };
                acc_re += tap.re as f64 * s.re as f64 - tap.im as f64 * s.im as f64;
                acc_im += tap.re as f64 * s.im as f64 + tap.im as f64 * s.re as f64;
            }
            // accumulators are integer-valued and well below 2^53, so the
            // conversion back to exact integers is lossless
            let re = acc_re as i128;
            let im = acc_im as i128;
            out.push((((re * re + im * im) >> shift) as u64) & mask);
        }
        out
    }

    #[test]
    fn test_direct_matches_float_reference_bit_exact() {
        let cfg = test_config();
        let taps = Arc::new(PssTapSet::generate(0, cfg.pss_len, cfg.tap_dw).unwrap());
        let mut correlator = PssCorrelator::new(&cfg, taps.clone()).unwrap();

        let mut lcg = Lcg(7);
        let samples: Vec<IqSample> = (0..400)
            .map(|_| IqSample::new(lcg.next_i16(30000), lcg.next_i16(30000)))
            .collect();
        let expected = float_reference(&samples, taps.taps(), cfg.corr_trunc_shift(), (1u64 << 32) - 1);

        let mut received = Vec::new();
        for &s in &samples {
            if let Some(out) = correlator.tick(Some(s)) {
                received.push(out.mag);
            }
        }
        // flush the pipeline
        for _ in 0..correlator.latency() {
            if let Some(out) = correlator.tick(None) {
                received.push(out.mag);
            }
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_folded_within_tolerance() {
        let cfg = test_config();
        let folded_cfg = SyncConfig {
            algo: CorrelatorAlgo::Folded,
            ..test_config()
        };
        let taps = Arc::new(PssTapSet::generate(1, cfg.pss_len, cfg.tap_dw).unwrap());
        let mut direct = PssCorrelator::new(&cfg, taps.clone()).unwrap();
        let mut folded = PssCorrelator::new(&folded_cfg, taps).unwrap();

        let mut lcg = Lcg(99);
        let mut direct_out = Vec::new();
        let mut folded_out = Vec::new();
        for _ in 0..300 {
            let s = IqSample::new(lcg.next_i16(20000), lcg.next_i16(20000));
            if let Some(out) = direct.tick(Some(s)) {
                direct_out.push(out.mag);
            }
            if let Some(out) = folded.tick(Some(s)) {
                folded_out.push(out.mag);
            }
        }
        // folded output lags one extra tick
        let n = folded_out.len();
        for i in 0..n {
            let d = direct_out[i] as f64;
            let f = folded_out[i] as f64;
            let tolerance = d / 64.0 + 16.0;
            assert!(
                (d - f).abs() <= tolerance,
                "sample {}: direct {} folded {}",
                i,
                d,
                f
            );
        }
    }

    #[test]
    fn test_mult_reuse_equals_direct_modulo_latency() {
        let cfg = test_config();
        let mr_cfg = SyncConfig {
            mult_reuse: 4,
            ..test_config()
        };
        let taps = Arc::new(PssTapSet::generate(2, cfg.pss_len, cfg.tap_dw).unwrap());
        let mut parallel = PssCorrelator::new(&cfg, taps.clone()).unwrap();
        let mut serialized = PssCorrelator::new(&mr_cfg, taps).unwrap();
        assert_eq!(serialized.latency(), parallel.latency() + 4);

        let mut lcg = Lcg(1234);
        let mut parallel_out = Vec::new();
        let mut serialized_out = Vec::new();
        for _ in 0..200 {
            let s = IqSample::new(lcg.next_i16(30000), lcg.next_i16(30000));
            if let Some(out) = parallel.tick(Some(s)) {
                parallel_out.push(out.mag);
            }
            if let Some(out) = serialized.tick(Some(s)) {
                serialized_out.push(out.mag);
            }
        }
        assert_eq!(
            parallel_out[..serialized_out.len()],
            serialized_out[..]
        );
    }

    #[test]
    fn test_invalid_ticks_leave_gaps() {
        let cfg = test_config();
        let taps = Arc::new(PssTapSet::generate(0, cfg.pss_len, cfg.tap_dw).unwrap());
        let mut correlator = PssCorrelator::new(&cfg, taps).unwrap();

        let mut count = 0;
        for i in 0..100 {
            let input = if i % 3 == 0 {
                Some(IqSample::new(1000, -1000))
            } else {
                None
            };
            if correlator.tick(input).is_some() {
                count += 1;
            }
        }
        // ticks 0,3,..,99 carry samples (34 total); outputs emerge two
        // ticks after their sample, so the last one is still in flight
        assert_eq!(count, 33);
    }

    #[test]
    fn test_tap_length_mismatch_rejected() {
        let mut cfg = test_config();
        cfg.pss_len = 256;
        let taps = Arc::new(PssTapSet::generate(0, 128, cfg.tap_dw).unwrap());
        assert!(PssCorrelator::new(&cfg, taps).is_err());
    }
}
