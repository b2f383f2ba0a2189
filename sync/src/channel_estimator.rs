//! PBCH Channel Estimation and Equalization
//!
//! Consumes the three demodulated PBCH symbols of one SSB. The SSB index
//! hypothesis ibar_SSB (0..=7) is resolved by correlating the received
//! pilots of every symbol against each hypothesis DMRS and selecting the
//! hypothesis whose per-symbol correlations add up most coherently across
//! the symbols. The winning pilots yield one complex channel coefficient
//! per DMRS subcarrier; data subcarriers get a linearly interpolated
//! estimate, are equalized with the conjugate estimate normalized by its
//! squared magnitude, and leave as both fixed-amplitude symbols and
//! soft bits.
//!
//! Equalized symbols are normalized to +/- 2^(eq_scale-1) per axis
//! regardless of channel gain, which keeps the demapper's saturation
//! behavior independent of the input level.

use crate::config::SyncConfig;
use crate::demap::QpskDemapper;
use crate::dmrs::{
    data_subcarriers, dmrs_offset, dmrs_subcarriers, pbch_dmrs_sequence, DMRS_PER_SSB,
    PBCH_DATA_PER_SSB,
};
use crate::fft_demod::SSB_GRID_LEN;
use crate::SyncError;
use common::types::{IqSample, Pci};
use num_complex::Complex;
use tracing::debug;

/// Number of ibar_SSB hypotheses
pub const NUM_IBAR_SSB: u8 = 8;

/// Equalized PBCH payload of one SSB
#[derive(Debug, Clone)]
pub struct PbchResult {
    /// Detected SSB index (including the half-frame bit for L_max = 4)
    pub ibar_ssb: u8,
    /// Winning hypothesis metric
    pub metric: u128,
    /// 432 equalized data symbols in mapping order
    pub symbols: Vec<IqSample>,
    /// 864 soft bits, two per symbol, I axis first
    pub llrs: Vec<i8>,
    /// 864 hard decisions
    pub hard_bits: Vec<u8>,
}

/// Pilot-based channel estimator and equalizer
pub struct ChannelEstimator {
    eq_scale: u32,
    demapper: QpskDemapper,
}

impl ChannelEstimator {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            eq_scale: config.eq_scale,
            demapper: QpskDemapper::new(config)?,
        })
    }

    /// Process the three PBCH symbols of one SSB
    pub fn process(&self, grids: [&[IqSample]; 3], pci: Pci) -> Result<PbchResult, SyncError> {
        for grid in &grids {
            if grid.len() != SSB_GRID_LEN {
                return Err(SyncError::ProcessingError(format!(
                    "PBCH symbol carries {} subcarriers, expected {}",
                    grid.len(),
                    SSB_GRID_LEN
                )));
            }
        }

        let (ibar_ssb, metric, refs) = self.detect_ibar_ssb(&grids, pci);
        debug!("ibar_SSB = {} (metric {})", ibar_ssb, metric);

        let mut symbols = Vec::with_capacity(PBCH_DATA_PER_SSB);
        let mut llrs = Vec::with_capacity(PBCH_DATA_PER_SSB * 2);
        let mut hard_bits = Vec::with_capacity(PBCH_DATA_PER_SSB * 2);
        let mut ref_idx = 0usize;
        for sym in 0..3u8 {
            let grid = grids[sym as usize];
            let pilots = dmrs_subcarriers(pci.0, sym);
            let estimates: Vec<Complex<i64>> = pilots
                .iter()
                .map(|&sc| {
                    let h = pilot_estimate(grid[sc], refs[ref_idx]);
                    ref_idx += 1;
                    h
                })
                .collect();

            let estimate_at = |sc: usize| -> Complex<i64> {
                let (lo, block) = block_of(sym, sc);
                interpolate(&estimates[block], lo, pci.0, sc)
            };

            for &sc in &data_subcarriers(pci.0, sym) {
                let h = estimate_at(sc);
                let equalized = self.equalize(grid[sc], h);
                llrs.extend_from_slice(&self.demapper.demap(equalized));
                hard_bits.extend_from_slice(&self.demapper.hard(equalized));
                symbols.push(equalized);
            }
        }

        Ok(PbchResult {
            ibar_ssb,
            metric,
            symbols,
            llrs,
            hard_bits,
        })
    }

    /// Correlate pilots against every hypothesis; the winner maximizes the
    /// phase-coherent sum across the three symbols, ties to the lowest
    fn detect_ibar_ssb(
        &self,
        grids: &[&[IqSample]; 3],
        pci: Pci,
    ) -> (u8, u128, Vec<Complex<i32>>) {
        let mut best = 0u8;
        let mut best_metric = 0u128;
        let mut best_refs = Vec::new();
        for hyp in 0..NUM_IBAR_SSB {
            let refs = pbch_dmrs_sequence(pci.0, hyp);
            let mut total = Complex::new(0i64, 0i64);
            let mut ref_idx = 0usize;
            for sym in 0..3u8 {
                let grid = grids[sym as usize];
                for &sc in &dmrs_subcarriers(pci.0, sym) {
                    total += pilot_estimate(grid[sc], refs[ref_idx]);
                    ref_idx += 1;
                }
            }
            debug_assert_eq!(ref_idx, DMRS_PER_SSB);
            let metric =
                total.re as i128 * total.re as i128 + total.im as i128 * total.im as i128;
            let metric = metric as u128;
            if metric > best_metric {
                best_metric = metric;
                best = hyp;
                best_refs = refs;
            } else if best_refs.is_empty() {
                best_refs = refs;
            }
        }
        (best, best_metric, best_refs)
    }

    /// Conjugate equalization normalized to the fixed output amplitude
    fn equalize(&self, y: IqSample, h: Complex<i64>) -> IqSample {
        let norm = h.re as i128 * h.re as i128 + h.im as i128 * h.im as i128;
        if norm == 0 {
            return IqSample::new(0, 0);
        }
        let e_re = y.re as i128 * h.re as i128 + y.im as i128 * h.im as i128;
        let e_im = y.im as i128 * h.re as i128 - y.re as i128 * h.im as i128;
        let out_re = (e_re << self.eq_scale) / norm;
        let out_im = (e_im << self.eq_scale) / norm;
        IqSample::new(
            out_re.clamp(i16::MIN as i128, i16::MAX as i128) as i16,
            out_im.clamp(i16::MIN as i128, i16::MAX as i128) as i16,
        )
    }
}

/// Raw channel estimate at a pilot: y * conj(r) with the quadbit
/// reference, i.e. twice the channel coefficient at the pilot amplitude
fn pilot_estimate(y: IqSample, r: Complex<i32>) -> Complex<i64> {
    Complex::new(
        y.re as i64 * r.re as i64 + y.im as i64 * r.im as i64,
        y.im as i64 * r.re as i64 - y.re as i64 * r.im as i64,
    )
}

/// Which contiguous pilot block a subcarrier belongs to: full-width
/// symbols have one block of 60 pilots, the SSS symbol two side blocks of
/// 12. Returns the block's first grid subcarrier and its index range into
/// the symbol's pilot list.
fn block_of(sym: u8, sc: usize) -> (usize, std::ops::Range<usize>) {
    match sym {
        1 if sc >= 192 => (192, 12..24),
        1 => (0, 0..12),
        _ => (0, 0..60),
    }
}

/// Linear interpolation between the two neighboring pilots of the comb;
/// flat extrapolation beyond the outermost pilots
fn interpolate(pilots: &[Complex<i64>], lo: usize, n_id: u16, sc: usize) -> Complex<i64> {
    let v = dmrs_offset(n_id);
    let rel = sc - lo;
    if rel <= v {
        return pilots[0];
    }
    let k0 = (rel - v) / 4;
    if k0 >= pilots.len() - 1 {
        return pilots[pilots.len() - 1];
    }
    let d = (rel - v - 4 * k0) as i64;
    if d == 0 {
        return pilots[k0];
    }
    let h0 = pilots[k0];
    let h1 = pilots[k0 + 1];
    Complex::new(
        (h0.re * (4 - d) + h1.re * d) / 4,
        (h0.im * (4 - d) + h1.im * d) / 4,
    )
}
