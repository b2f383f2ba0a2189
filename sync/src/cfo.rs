//! CFO Estimation and Correction
//!
//! The carrier frequency offset is derived at a detected peak from the two
//! half-window sums of the matched correlator: the angle of C0*conj(C1)
//! corresponds to the phase accumulated over half a PSS symbol. The angle
//! is scaled to Hz by the half-window duration and quantized to a phase
//! increment for the numerically controlled oscillator, which rotates
//! every subsequent sample until the next re-estimation overwrites it.
//!
//! When |C1| is near zero the angle is undefined; the estimate is then
//! noise and is accepted as such rather than flagged.

use crate::config::SyncConfig;
use crate::math::{cmul_conj_wide, FixedAtan2};
use crate::SyncError;
use common::types::IqSample;
use num_complex::Complex;

/// CFO estimate produced at a peak; persists until re-estimated
#[derive(Debug, Clone, Copy)]
pub struct CfoEstimate {
    /// Fixed-point angle of C0*conj(C1), full scale +/- pi
    pub angle: i64,
    /// Estimated carrier offset in Hz
    pub freq_hz: f64,
    /// NCO phase increment cancelling the measured offset
    pub phase_inc: i64,
}

/// Estimates the CFO from the correlator half-window sums
pub struct CfoEstimator {
    atan2: FixedAtan2,
    cfo_dw: u32,
    dds_phase_dw: u32,
    /// spacing of the two half windows in input samples
    half_window: f64,
    sample_rate: f64,
}

impl CfoEstimator {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            atan2: FixedAtan2::new(config.cfo_dw),
            cfo_dw: config.cfo_dw,
            dds_phase_dw: config.dds_phase_dw,
            half_window: (config.pss_len / 2 * config.corr_decim) as f64,
            sample_rate: config.sample_rate_hz,
        })
    }

    /// Estimate the offset from the half-window sums at a peak.
    /// C0 spans the newer half of the window, C1 the older half.
    pub fn estimate(&self, c0: Complex<i64>, c1: Complex<i64>) -> CfoEstimate {
        let (re, im) = cmul_conj_wide(c0, c1);
        let angle = self.atan2.atan2_wide(im, re);
        let pi_q = FixedAtan2::pi_scaled(self.cfo_dw) as f64;
        // angle/pi_q * pi radians over half_window samples
        let freq_hz = angle as f64 / (2.0 * pi_q) * self.sample_rate / self.half_window;
        let dds_scale = ((1u64 << self.dds_phase_dw) - 1) as f64;
        let phase_inc = (-freq_hz / self.sample_rate * dds_scale).round() as i64;
        CfoEstimate {
            angle,
            freq_hz,
            phase_inc,
        }
    }
}

/// Number of LUT address bits for the oscillator table
const NCO_LUT_BITS: u32 = 10;

/// Free-running numerically controlled oscillator rotating the sample
/// stream by a programmable phase increment per tick
pub struct Nco {
    lut: Vec<Complex<i32>>,
    phase: i64,
    phase_inc: i64,
    phase_mask: i64,
    phase_dw: u32,
}

impl Nco {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let entries = 1usize << NCO_LUT_BITS;
        let lut = (0..entries)
            .map(|i| {
                let angle = 2.0 * std::f64::consts::PI * i as f64 / entries as f64;
                Complex::new(
                    (angle.cos() * 32767.0).round() as i32,
                    (angle.sin() * 32767.0).round() as i32,
                )
            })
            .collect();
        Ok(Self {
            lut,
            phase: 0,
            phase_inc: 0,
            phase_mask: (1i64 << config.dds_phase_dw) - 1,
            phase_dw: config.dds_phase_dw,
        })
    }

    pub fn reset(&mut self) {
        self.phase = 0;
        self.phase_inc = 0;
    }

    /// Program a new increment; takes effect from the next tick
    pub fn set_increment(&mut self, phase_inc: i64) {
        self.phase_inc = phase_inc;
    }

    pub fn increment(&self) -> i64 {
        self.phase_inc
    }

    /// Rotate one sample by the current phase, then advance the phase
    pub fn tick(&mut self, sample: IqSample) -> IqSample {
        let index = (self.phase as u64 >> (self.phase_dw - NCO_LUT_BITS)) as usize;
        let rot = self.lut[index & ((1 << NCO_LUT_BITS) - 1)];
        self.phase = (self.phase + self.phase_inc) & self.phase_mask;

        let re = (sample.re as i64 * rot.re as i64 - sample.im as i64 * rot.im as i64) >> 15;
        let im = (sample.re as i64 * rot.im as i64 + sample.im as i64 * rot.re as i64) >> 15;
        IqSample::new(
            re.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
            im.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
        )
    }
}
