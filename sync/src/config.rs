//! Pipeline Configuration
//!
//! All bit widths, lengths and timing constants of the synchronization
//! pipeline are fixed here at initialization time and never mutated at
//! runtime. Validation failures are fatal before the pipeline starts.

use crate::SyncError;
use serde::{Deserialize, Serialize};

/// Correlator datapath selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelatorAlgo {
    /// Direct convolution, bit-exact against a double-precision reference
    Direct,
    /// Folded datapath exploiting tap conjugate symmetry; half the
    /// multipliers, one extra pipeline stage, tolerance-bound only
    Folded,
}

/// CFO correction operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfoMode {
    /// Estimate on every accepted peak and reprogram the NCO
    Auto,
    /// Keep whatever increment was programmed externally
    Manual,
}

/// Static configuration of the synchronization pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Complex input width in bits (I and Q each take half)
    pub in_dw: u32,
    /// Correlator magnitude output width in bits
    pub out_dw: u32,
    /// Complex tap width in bits (I and Q each take half)
    pub tap_dw: u32,
    /// Matched filter length in taps
    pub pss_len: usize,
    /// Correlator datapath
    pub algo: CorrelatorAlgo,
    /// Multiplier-reuse factor for the serialized correlator variant;
    /// 0 or 1 selects the fully parallel datapath
    pub mult_reuse: usize,
    /// Sample decimation into the correlator path relative to the input
    /// stream (the matched filter spans one PSS symbol at this rate)
    pub corr_decim: usize,

    /// Peak detector sliding window length
    pub window_len: usize,
    /// Window position checked for a peak, counted from the newest sample
    pub detection_offset: usize,
    /// Absolute detection threshold on the truncated magnitude
    pub threshold: u64,
    /// Noise-relative detection factor; 0 disables the relative threshold
    pub detection_factor: u32,
    /// log2 of the noise-floor averaging constant
    pub noise_avg_log2: u32,
    /// Extra right shift on magnitudes during initial acquisition
    pub initial_detection_shift: u32,

    /// CFO angle width in bits, full scale = +/- pi
    pub cfo_dw: u32,
    /// NCO phase accumulator / increment width in bits
    pub dds_phase_dw: u32,
    /// CFO correction mode
    pub cfo_mode: CfoMode,

    /// log2 of the FFT length
    pub nfft: u32,
    /// Complex FFT output width in bits (I and Q each take half)
    pub fft_out_dw: u32,
    /// Use half of the short CP as window advance instead of the full CP
    pub half_cp_advance: bool,

    /// Soft bit width in bits
    pub llr_dw: u32,
    /// log2 of the equalizer output amplitude per axis
    pub eq_scale: u32,

    /// Input sample rate in Hz
    pub sample_rate_hz: f64,
    /// SSB transmission period in milliseconds
    pub ssb_period_ms: u32,
    /// Consecutive missed SSB occasions tolerated before sync loss
    pub sync_loss_limit: u32,
    /// Re-detection tolerance around the predicted peak, in samples
    pub peak_tolerance: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            in_dw: 32,
            out_dw: 32,
            tap_dw: 32,
            pss_len: 128,
            algo: CorrelatorAlgo::Direct,
            mult_reuse: 0,
            corr_decim: 2,
            window_len: 8,
            detection_offset: 4,
            threshold: 1 << 20,
            detection_factor: 0,
            noise_avg_log2: 4,
            initial_detection_shift: 3,
            cfo_dw: 24,
            dds_phase_dw: 24,
            cfo_mode: CfoMode::Auto,
            nfft: 8,
            fft_out_dw: 32,
            half_cp_advance: true,
            llr_dw: 8,
            eq_scale: 13,
            sample_rate_hz: 3.84e6,
            ssb_period_ms: 20,
            sync_loss_limit: 4,
            peak_tolerance: 16,
        }
    }
}

impl SyncConfig {
    /// FFT length in samples
    pub fn fft_len(&self) -> usize {
        1usize << self.nfft
    }

    /// Long cyclic prefix (slot symbols 0 and 7)
    pub fn cp1_len(&self) -> usize {
        20 * self.fft_len() / 256
    }

    /// Short cyclic prefix (all other symbols)
    pub fn cp2_len(&self) -> usize {
        18 * self.fft_len() / 256
    }

    /// Cyclic-prefix samples consumed before an FFT window opens; the
    /// window therefore starts `cp2_len - cp_advance` samples ahead of the
    /// ideal symbol boundary, which the demodulator's phase-correction
    /// table compensates
    pub fn cp_advance(&self) -> usize {
        if self.half_cp_advance {
            self.cp2_len() / 2
        } else {
            self.cp2_len()
        }
    }

    /// How many samples ahead of the ideal symbol boundary each FFT window
    /// opens, the misalignment tolerance of the frame synchronizer
    pub fn window_advance(&self) -> usize {
        self.cp2_len() - self.cp_advance()
    }

    /// Cyclic prefix length of a slot symbol (0..13)
    pub fn cp_len(&self, symbol: u32) -> usize {
        if symbol == 0 || symbol == 7 {
            self.cp1_len()
        } else {
            self.cp2_len()
        }
    }

    /// Samples per slot (14 OFDM symbols)
    pub fn slot_len(&self) -> usize {
        (0..14).map(|s| self.fft_len() + self.cp_len(s)).sum()
    }

    /// SSB period in input samples
    pub fn ssb_period_samples(&self) -> usize {
        (self.sample_rate_hz / 1000.0) as usize * self.ssb_period_ms as usize
    }

    /// Truncation shift of the correlator magnitude per the documented
    /// bit-growth formula
    pub fn corr_trunc_shift(&self) -> u32 {
        let growth = 2 * (self.pss_len as f64).log2().ceil() as u32 + self.in_dw + self.tap_dw + 2;
        growth.saturating_sub(self.out_dw)
    }

    /// Peak event latency relative to the last sample of the PSS symbol,
    /// in input samples: correlator pipeline plus detection window offset
    /// at the correlator rate, plus the sub-tick offset of the decimated
    /// window end within the full-rate stream
    pub fn detector_latency(&self) -> usize {
        let pipeline = match self.algo {
            CorrelatorAlgo::Direct => 2,
            CorrelatorAlgo::Folded => 3,
        } + if self.mult_reuse > 1 { self.mult_reuse } else { 0 };
        self.corr_decim * (pipeline + self.detection_offset) + (self.corr_decim - 1)
    }

    /// Validate the configuration; errors here are fatal at initialization
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.in_dw == 0 || self.in_dw > 32 || self.in_dw % 2 != 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "in_dw must be an even width up to 32, got {}",
                self.in_dw
            )));
        }
        if self.tap_dw == 0 || self.tap_dw > 32 || self.tap_dw % 2 != 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "tap_dw must be an even width up to 32, got {}",
                self.tap_dw
            )));
        }
        if self.out_dw == 0 || self.out_dw > 48 {
            return Err(SyncError::InvalidConfiguration(format!(
                "out_dw must be between 1 and 48, got {}",
                self.out_dw
            )));
        }
        if self.pss_len < 2 {
            return Err(SyncError::InvalidConfiguration(format!(
                "pss_len must be at least 2, got {}",
                self.pss_len
            )));
        }
        if self.mult_reuse > 1 && self.pss_len % self.mult_reuse != 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "mult_reuse {} does not divide pss_len {}",
                self.mult_reuse, self.pss_len
            )));
        }
        if self.algo == CorrelatorAlgo::Folded && self.pss_len % 2 != 0 {
            return Err(SyncError::InvalidConfiguration(
                "folded correlator requires an even pss_len".into(),
            ));
        }
        if self.corr_decim == 0 {
            return Err(SyncError::InvalidConfiguration(
                "corr_decim must be at least 1".into(),
            ));
        }
        if self.window_len < 2 || self.detection_offset >= self.window_len {
            return Err(SyncError::InvalidConfiguration(format!(
                "detection_offset {} must lie inside window_len {}",
                self.detection_offset, self.window_len
            )));
        }
        if self.cfo_dw < 8 || self.cfo_dw > 32 {
            return Err(SyncError::InvalidConfiguration(format!(
                "cfo_dw must be between 8 and 32, got {}",
                self.cfo_dw
            )));
        }
        if self.dds_phase_dw < 8 || self.dds_phase_dw > 31 {
            return Err(SyncError::InvalidConfiguration(format!(
                "dds_phase_dw must be between 8 and 31, got {}",
                self.dds_phase_dw
            )));
        }
        // the 240-subcarrier SSB grid must fit the transform
        if self.nfft < 8 || self.nfft > 13 {
            return Err(SyncError::InvalidConfiguration(format!(
                "nfft must be between 8 and 13, got {}",
                self.nfft
            )));
        }
        if self.fft_out_dw == 0 || self.fft_out_dw > 32 || self.fft_out_dw % 2 != 0 {
            return Err(SyncError::InvalidConfiguration(format!(
                "fft_out_dw must be an even width up to 32, got {}",
                self.fft_out_dw
            )));
        }
        // the transform runs in truncation mode and can only scale down
        if self.fft_out_dw / 2 > self.nfft + self.in_dw / 2 {
            return Err(SyncError::InvalidConfiguration(format!(
                "fft_out_dw {} exceeds the transform bit growth",
                self.fft_out_dw
            )));
        }
        if self.llr_dw < 2 || self.llr_dw > 8 {
            return Err(SyncError::InvalidConfiguration(format!(
                "llr_dw must be between 2 and 8, got {}",
                self.llr_dw
            )));
        }
        if self.eq_scale < self.llr_dw || self.eq_scale > 14 {
            return Err(SyncError::InvalidConfiguration(format!(
                "eq_scale must be between llr_dw and 14, got {}",
                self.eq_scale
            )));
        }
        if self.sample_rate_hz <= 0.0 {
            return Err(SyncError::InvalidConfiguration(
                "sample_rate_hz must be positive".into(),
            ));
        }
        Ok(())
    }
}
