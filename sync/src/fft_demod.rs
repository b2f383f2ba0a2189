//! FFT Window Demodulation
//!
//! Captures one cyclic-prefix-aware FFT window at a time, runs the
//! black-box transform, and maps the result onto the 240-subcarrier SSB
//! grid. Because the frame synchronizer opens each window after consuming
//! only `cp_advance` of the cyclic prefix, every output bin is rotated by
//! a pre-computed phase-correction table entry compensating the remaining
//! time shift of `cp_len - cp_advance` samples.
//!
//! The transform output is scaled down in truncation mode by
//! 2^(nfft + in_width - out_width) like the original core. A started
//! window is irrevocable and each OFDM symbol is transformed at most once.

use crate::config::SyncConfig;
use crate::taps::fft_phase_table;
use crate::SyncError;
use common::types::IqSample;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::warn;

/// Number of subcarriers in the SSB grid
pub const SSB_GRID_LEN: usize = 240;
/// Number of SSS subcarriers
pub const SSS_LEN: usize = 127;
/// First SSS subcarrier within the SSB grid
pub const SSS_GRID_START: usize = 56;

/// Role of a demodulated OFDM symbol within the SSB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// SSS symbol (also carries the two PBCH side blocks)
    Sss,
    /// PBCH symbol with its index 0..2 within the SSB
    Pbch(u8),
}

/// One demodulated, phase-corrected SSB symbol
#[derive(Debug, Clone)]
pub struct DemodSymbol {
    pub kind: SymbolKind,
    /// The 240 SSB subcarriers in ascending frequency order
    pub grid: Vec<IqSample>,
}

impl DemodSymbol {
    /// The 127 SSS subcarriers (centered within the grid)
    pub fn sss_bins(&self) -> &[IqSample] {
        &self.grid[SSS_GRID_START..SSS_GRID_START + SSS_LEN]
    }
}

/// Drives the FFT engine for one window at a time
pub struct FftDemod {
    fft: Arc<dyn Fft<f32>>,
    phase_table: Vec<Complex<i32>>,
    fft_len: usize,
    scale_shift: u32,
    buffer: Vec<Complex<f32>>,
    active: Option<SymbolKind>,
}

impl FftDemod {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let fft_len = config.fft_len();
        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            fft: planner.plan_fft_forward(fft_len),
            phase_table: fft_phase_table(
                config.nfft,
                config.cp2_len(),
                config.cp_advance(),
                config.fft_out_dw,
            ),
            fft_len,
            scale_shift: config.nfft + config.in_dw / 2 - config.fft_out_dw / 2,
            buffer: Vec::with_capacity(fft_len),
            active: None,
        })
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = None;
    }

    /// True while a window is collecting samples
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Open the FFT window for the next `fft_len` samples. A window that
    /// is already collecting is never revised; a second start is dropped.
    pub fn start_window(&mut self, kind: SymbolKind) {
        if self.active.is_some() {
            warn!("FFT window start while a window is active, dropped");
            return;
        }
        self.buffer.clear();
        self.active = Some(kind);
    }

    /// Feed one corrected sample; returns the demodulated symbol when the
    /// window completes
    pub fn push(&mut self, sample: IqSample) -> Option<DemodSymbol> {
        let kind = self.active?;
        self.buffer
            .push(Complex::new(sample.re as f32, sample.im as f32));
        if self.buffer.len() < self.fft_len {
            return None;
        }
        self.active = None;

        self.fft.process(&mut self.buffer);

        // FFT-shift, truncate to the output width, rotate by the
        // phase-correction entry, then cut out the SSB grid
        let half = self.fft_len / 2;
        let grid_start = half - SSB_GRID_LEN / 2;
        let scale = (1u64 << self.scale_shift) as f32;
        let mut grid = Vec::with_capacity(SSB_GRID_LEN);
        for i in grid_start..grid_start + SSB_GRID_LEN {
            let bin = self.buffer[(i + half) % self.fft_len];
            let re = (bin.re / scale) as i64;
            let im = (bin.im / scale) as i64;
            let rot = self.phase_table[i];
            let out_re = (re * rot.re as i64 - im * rot.im as i64) >> 15;
            let out_im = (re * rot.im as i64 + im * rot.re as i64) >> 15;
            grid.push(IqSample::new(
                out_re.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
                out_im.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
            ));
        }
        Some(DemodSymbol { kind, grid })
    }
}
