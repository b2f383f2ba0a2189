//! Frame Synchronization
//!
//! Consumes peak and CFO events from the PSS detector and times the
//! cyclic-prefix-aware FFT windows for the SSS and PBCH symbols of each
//! SSB, driving the FFT demodulator. Window starts are derived from the
//! peak position and the alternating two-CP slot pattern (long CP at slot
//! symbols 0 and 7; the SSB itself only spans short-CP symbols). Each
//! window opens after `cp_advance` samples of cyclic prefix, i.e.
//! `window_advance` samples ahead of the ideal boundary, and is
//! irrevocable once started; every OFDM symbol is transformed at most
//! once.
//!
//! States: Idle -> AwaitCfoLock -> WaitSssSymbol -> DemodSss ->
//! WaitPbchSymbols -> DemodPbch -> (loop, or back to Idle on sync loss).
//! The first SSB only yields its SSS symbol (the cell identity is still
//! unknown); every following SSB occasion yields all three PBCH-bearing
//! symbols. A missed occasion is coasted on predicted timing; after
//! `sync_loss_limit` consecutive misses the attempt is abandoned and all
//! partial state is discarded.

use crate::config::SyncConfig;
use crate::fft_demod::{DemodSymbol, FftDemod, SymbolKind};
use crate::pss_detector::{DetectorMode, PssDetectorOutput};
use crate::SyncError;
use common::types::IqSample;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Frame synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No timing reference, searching
    Idle,
    /// Peak accepted, waiting one tick for the CFO correction to settle
    AwaitCfoLock,
    /// Timing armed, waiting for the SSS symbol window of the first SSB
    WaitSssSymbol,
    /// SSS window collecting
    DemodSss,
    /// Tracking, waiting for the next SSB occasion
    WaitPbchSymbols,
    /// PBCH windows of a tracked SSB collecting
    DemodPbch,
}

/// Per-tick output of the frame synchronizer
#[derive(Debug, Default)]
pub struct FrameSyncOutput {
    /// Completed demodulated symbol, if a window closed this tick
    pub symbol: Option<DemodSymbol>,
    /// Absolute index of the last PSS sample of a newly accepted SSB
    pub ssb_start: Option<u64>,
    /// Sync was abandoned this tick; all partial state is discarded
    pub sync_lost: bool,
}

/// Sample lookback covering detector latency plus re-detection tolerance
const RING_CAPACITY: usize = 512;

pub struct FrameSync {
    state: SyncState,
    fft_demod: FftDemod,

    // static timing constants
    fft_len: usize,
    cp2_len: usize,
    cp_advance: usize,
    detector_latency: usize,
    period: u64,
    peak_tolerance: u64,
    sync_loss_limit: u32,

    // sample bookkeeping
    sample_idx: u64,
    ring: VecDeque<IqSample>,
    ring_base: u64,

    // SSB timing
    pss_end: u64,
    predicted_pss_end: u64,
    missed: u32,
    window_queue: VecDeque<(u64, SymbolKind)>,
    windows_left: usize,

    // slot symbol counter, anchored once a peak is accepted
    symbol_idx: u32,
    sample_in_symbol: usize,
    anchored: bool,
}

impl FrameSync {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            state: SyncState::Idle,
            fft_demod: FftDemod::new(config)?,
            fft_len: config.fft_len(),
            cp2_len: config.cp2_len(),
            cp_advance: config.cp_advance(),
            detector_latency: config.detector_latency(),
            period: config.ssb_period_samples() as u64,
            peak_tolerance: config.peak_tolerance as u64,
            sync_loss_limit: config.sync_loss_limit,
            sample_idx: 0,
            ring: VecDeque::with_capacity(RING_CAPACITY),
            ring_base: 0,
            pss_end: 0,
            predicted_pss_end: 0,
            missed: 0,
            window_queue: VecDeque::new(),
            windows_left: 0,
            symbol_idx: 0,
            sample_in_symbol: 0,
            anchored: false,
        })
    }

    pub fn reset(&mut self) {
        self.state = SyncState::Idle;
        self.fft_demod.reset();
        self.sample_idx = 0;
        self.ring.clear();
        self.ring_base = 0;
        self.pss_end = 0;
        self.predicted_pss_end = 0;
        self.missed = 0;
        self.window_queue.clear();
        self.windows_left = 0;
        self.symbol_idx = 0;
        self.sample_in_symbol = 0;
        self.anchored = false;
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Slot symbol index 0..13 once timing is anchored
    pub fn symbol_index(&self) -> Option<u32> {
        self.anchored.then_some(self.symbol_idx)
    }

    /// Absolute index of the last PSS sample of the current SSB anchor
    pub fn pss_end(&self) -> u64 {
        self.pss_end
    }

    /// Peak acceptance mode the detector should run in for this state
    pub fn detector_mode(&self) -> DetectorMode {
        match self.state {
            SyncState::Idle => DetectorMode::Search,
            _ => DetectorMode::Find,
        }
    }

    /// Advance one tick with the detector output of the same tick
    pub fn tick(&mut self, det: &PssDetectorOutput) -> FrameSyncOutput {
        let mut output = FrameSyncOutput::default();
        let sample = match det.corrected {
            Some(s) => s,
            None => return output,
        };

        let now = self.sample_idx;
        self.push_ring(sample);
        self.advance_symbol_counter();

        match self.state {
            SyncState::Idle => {
                if det.peak.is_some() {
                    self.accept_first_peak(now, &mut output);
                }
            }
            SyncState::AwaitCfoLock => {
                // the NCO was reprogrammed with the peak; from this tick on
                // the stream is corrected and the armed windows hold
                self.state = SyncState::WaitSssSymbol;
                debug!("CFO locked, waiting for SSS symbol");
            }
            SyncState::WaitSssSymbol | SyncState::WaitPbchSymbols => {
                if self.state == SyncState::WaitPbchSymbols {
                    self.track_occasion(now, det, &mut output);
                }
            }
            SyncState::DemodSss | SyncState::DemodPbch => {}
        }

        // open a due window, catching up on buffered samples
        if let Some(symbol) = self.service_windows(now, sample) {
            self.windows_left = self.windows_left.saturating_sub(1);
            match self.state {
                SyncState::DemodSss => {
                    self.state = SyncState::WaitPbchSymbols;
                    debug!("SSS symbol demodulated, tracking");
                }
                SyncState::DemodPbch if self.windows_left == 0 => {
                    self.state = SyncState::WaitPbchSymbols;
                }
                _ => {}
            }
            output.symbol = Some(symbol);
        } else {
            match self.state {
                SyncState::WaitSssSymbol if self.fft_demod.is_active() => {
                    self.state = SyncState::DemodSss;
                }
                SyncState::WaitPbchSymbols
                    if self.fft_demod.is_active() || !self.window_queue.is_empty() =>
                {
                    if self.windows_left > 0 {
                        self.state = SyncState::DemodPbch;
                    }
                }
                _ => {}
            }
        }

        self.sample_idx += 1;
        output
    }

    /// First acquisition: anchor timing on the peak and arm the SSS window
    fn accept_first_peak(&mut self, now: u64, output: &mut FrameSyncOutput) {
        let pss_end = now.saturating_sub(self.detector_latency as u64);
        self.pss_end = pss_end;
        self.predicted_pss_end = pss_end.wrapping_add(self.period);
        self.missed = 0;
        self.anchor_symbol_counter(now, pss_end);

        // the SSS symbol follows one PBCH symbol after the PSS
        let symbol_len = (self.cp2_len + self.fft_len) as u64;
        let sss_window = pss_end + 1 + symbol_len + self.cp_advance as u64;
        self.window_queue.push_back((sss_window, SymbolKind::Sss));
        self.windows_left = 1;

        self.state = SyncState::AwaitCfoLock;
        output.ssb_start = Some(pss_end);
        info!("SSB acquired, PSS symbol ends at sample {}", pss_end);
    }

    /// Tracking: realign on a re-detected peak or coast on predicted
    /// timing; abandon after too many consecutive misses
    fn track_occasion(&mut self, now: u64, det: &PssDetectorOutput, output: &mut FrameSyncOutput) {
        if det.peak.is_some() {
            let pss_end = now.saturating_sub(self.detector_latency as u64);
            let deviation = pss_end.abs_diff(self.predicted_pss_end);
            if deviation <= self.peak_tolerance {
                self.missed = 0;
                self.arm_ssb_windows(pss_end, now, output);
                return;
            }
            debug!(
                "peak at {} deviates {} samples from prediction, ignored",
                pss_end, deviation
            );
        }

        // miss decision point: the re-detection window has passed
        let deadline = self.predicted_pss_end
            + self.detector_latency as u64
            + self.peak_tolerance;
        if now >= deadline {
            self.missed += 1;
            if self.missed >= self.sync_loss_limit {
                info!("lost sync after {} missed SSB occasions", self.missed);
                self.abandon();
                output.sync_lost = true;
                return;
            }
            debug!(
                "SSB occasion missed ({} of {}), coasting on predicted timing",
                self.missed, self.sync_loss_limit
            );
            let predicted = self.predicted_pss_end;
            self.arm_ssb_windows(predicted, now, output);
        }
    }

    /// Arm the three windows of one tracked SSB (PBCH, SSS, PBCH)
    fn arm_ssb_windows(&mut self, pss_end: u64, now: u64, output: &mut FrameSyncOutput) {
        self.pss_end = pss_end;
        self.predicted_pss_end = pss_end.wrapping_add(self.period);
        self.anchor_symbol_counter(now, pss_end);

        let symbol_len = (self.cp2_len + self.fft_len) as u64;
        let first = pss_end + 1 + self.cp_advance as u64;
        let kinds = [SymbolKind::Pbch(0), SymbolKind::Sss, SymbolKind::Pbch(2)];
        for (k, kind) in kinds.into_iter().enumerate() {
            self.window_queue
                .push_back((first + k as u64 * symbol_len, kind));
        }
        self.windows_left = 3;
        output.ssb_start = Some(pss_end);
    }

    /// Abandon the attempt: discard queued windows and partial demod state
    fn abandon(&mut self) {
        self.state = SyncState::Idle;
        self.window_queue.clear();
        self.windows_left = 0;
        self.fft_demod.reset();
        self.anchored = false;
    }

    /// Start a due window (feeding buffered samples when the start lies in
    /// the past) and feed the active window with the current sample
    fn service_windows(&mut self, now: u64, sample: IqSample) -> Option<DemodSymbol> {
        if !self.fft_demod.is_active() {
            if let Some(&(start, kind)) = self.window_queue.front() {
                if start <= now {
                    self.window_queue.pop_front();
                    self.fft_demod.start_window(kind);
                    // catch up from the lookback buffer, current sample last
                    let mut completed = None;
                    for idx in start..=now {
                        let pos = (idx - self.ring_base) as usize;
                        completed = self.fft_demod.push(self.ring[pos]).or(completed);
                    }
                    return completed;
                }
            }
            return None;
        }
        self.fft_demod.push(sample)
    }

    fn push_ring(&mut self, sample: IqSample) {
        self.ring.push_back(sample);
        if self.ring.len() > RING_CAPACITY {
            self.ring.pop_front();
            self.ring_base += 1;
        }
    }

    /// Anchor the slot symbol counter: the sample after the PSS symbol is
    /// the first cyclic-prefix sample of slot symbol 3 (SSB starts at
    /// slot symbol 2 in the case A burst pattern)
    fn anchor_symbol_counter(&mut self, now: u64, pss_end: u64) {
        self.symbol_idx = 3;
        self.sample_in_symbol = (now - pss_end - 1) as usize;
        self.anchored = true;
    }

    fn advance_symbol_counter(&mut self) {
        if !self.anchored {
            return;
        }
        let cp = if self.symbol_idx == 0 || self.symbol_idx == 7 {
            // long CP symbols
            self.cp2_len + 2 * self.fft_len / 256
        } else {
            self.cp2_len
        };
        self.sample_in_symbol += 1;
        if self.sample_in_symbol >= cp + self.fft_len {
            self.sample_in_symbol = 0;
            self.symbol_idx = (self.symbol_idx + 1) % 14;
        }
    }
}
