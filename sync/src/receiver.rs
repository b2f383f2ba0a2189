//! SSB Receiver
//!
//! Top-level composition of the synchronization pipeline. One call to
//! `tick` per input sample advances every stage exactly once and returns
//! the events produced this tick; sample n's effect at any stage always
//! precedes sample n+1's. The only mutable cross-stage state is the NCO
//! phase (written by the PSS detector, read by everything downstream
//! through the corrected stream) and the frame-sync state.
//!
//! Outputs: peak and CFO events, the SSS score vector and detected cell
//! identity, channel-equalized PBCH symbols and soft bits, and a status
//! snapshot for an external register surface.

use crate::channel_estimator::{ChannelEstimator, PbchResult};
use crate::config::SyncConfig;
use crate::fft_demod::{DemodSymbol, SymbolKind};
use crate::frame_sync::{FrameSync, SyncState};
use crate::pss_detector::PssDetector;
use crate::sss_detector::{SssDetector, SssResult};
use crate::taps::PssTapSet;
use crate::SyncError;
use common::types::{IqSample, Pci};
use std::sync::Arc;
use tracing::{info, warn};

/// Events produced by one receiver tick
#[derive(Debug)]
pub enum ReceiverEvent {
    /// Correlation peak accepted at this input sample index
    PeakDetected { sample: u64, nid2: u8, mag: u64 },
    /// CFO re-estimated; `total_hz` is the accumulated correction
    CfoEstimated { freq_hz: f64, total_hz: f64 },
    /// A new SSB was accepted; index of the last PSS sample
    SsbStart { pss_end: u64 },
    /// An FFT window completed
    SymbolDemodulated { kind: SymbolKind },
    /// SSS detection episode finished (score vector inside)
    SssDetected(SssResult),
    /// Cell identity resolved or changed
    CellAcquired { pci: Pci },
    /// PBCH symbols of one SSB equalized and demapped
    PbchDecoded(PbchResult),
    /// Synchronization abandoned; acquisition restarts from scratch
    SyncLost,
}

/// Status snapshot for an external control/status surface
#[derive(Debug, Clone, Copy)]
pub struct ReceiverStatus {
    pub state: SyncState,
    pub pci: Option<Pci>,
    pub ibar_ssb: Option<u8>,
    /// accumulated CFO correction in Hz
    pub cfo_hz: f64,
    pub peak_count: u64,
    pub symbol_index: Option<u32>,
}

/// The complete cell-search receiver
pub struct SsbReceiver {
    config: SyncConfig,
    pss_detector: PssDetector,
    frame_sync: FrameSync,
    sss_detector: SssDetector,
    channel_estimator: ChannelEstimator,

    sample_idx: u64,
    pci: Option<Pci>,
    ibar_ssb: Option<u8>,
    cfo_total_hz: f64,
    peak_count: u64,
    pbch_symbols: Vec<DemodSymbol>,
}

impl SsbReceiver {
    /// Build a receiver generating its tap tables from the PSS sequences
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let taps = [
            Arc::new(PssTapSet::generate(0, config.pss_len, config.tap_dw)?),
            Arc::new(PssTapSet::generate(1, config.pss_len, config.tap_dw)?),
            Arc::new(PssTapSet::generate(2, config.pss_len, config.tap_dw)?),
        ];
        Self::with_tap_sets(config, taps)
    }

    /// Build a receiver around externally loaded tap tables
    pub fn with_tap_sets(
        config: SyncConfig,
        tap_sets: [Arc<PssTapSet>; 3],
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            pss_detector: PssDetector::new(&config, tap_sets)?,
            frame_sync: FrameSync::new(&config)?,
            sss_detector: SssDetector::new(),
            channel_estimator: ChannelEstimator::new(&config)?,
            config,
            sample_idx: 0,
            pci: None,
            ibar_ssb: None,
            cfo_total_hz: 0.0,
            peak_count: 0,
            pbch_symbols: Vec::new(),
        })
    }

    /// Full reset; replaying an identical stream afterwards yields an
    /// identical detection sequence
    pub fn reset(&mut self) {
        self.pss_detector.reset();
        self.frame_sync.reset();
        self.sample_idx = 0;
        self.pci = None;
        self.ibar_ssb = None;
        self.cfo_total_hz = 0.0;
        self.peak_count = 0;
        self.pbch_symbols.clear();
    }

    pub fn status(&self) -> ReceiverStatus {
        ReceiverStatus {
            state: self.frame_sync.state(),
            pci: self.pci,
            ibar_ssb: self.ibar_ssb,
            cfo_hz: self.cfo_total_hz,
            peak_count: self.peak_count,
            symbol_index: self.frame_sync.symbol_index(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Advance the pipeline by one input sample
    pub fn tick(&mut self, input: Option<IqSample>) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();

        let det = self.pss_detector.tick(input);
        if let Some(peak) = det.peak {
            self.peak_count += 1;
            events.push(ReceiverEvent::PeakDetected {
                sample: self.sample_idx,
                nid2: peak.nid2,
                mag: peak.mag,
            });
        }
        if let Some(cfo) = det.cfo {
            self.cfo_total_hz += cfo.freq_hz;
            events.push(ReceiverEvent::CfoEstimated {
                freq_hz: cfo.freq_hz,
                total_hz: self.cfo_total_hz,
            });
        }

        let fs_out = self.frame_sync.tick(&det);
        self.pss_detector.set_mode(self.frame_sync.detector_mode());

        if let Some(pss_end) = fs_out.ssb_start {
            events.push(ReceiverEvent::SsbStart { pss_end });
        }
        if fs_out.sync_lost {
            // re-acquisition is indistinguishable from first acquisition
            self.pss_detector.reset();
            self.pci = None;
            self.ibar_ssb = None;
            self.cfo_total_hz = 0.0;
            self.pbch_symbols.clear();
            events.push(ReceiverEvent::SyncLost);
        }
        if let Some(symbol) = fs_out.symbol {
            events.push(ReceiverEvent::SymbolDemodulated { kind: symbol.kind });
            self.consume_symbol(symbol, &mut events);
        }

        if input.is_some() {
            self.sample_idx += 1;
        }
        events
    }

    fn consume_symbol(&mut self, symbol: DemodSymbol, events: &mut Vec<ReceiverEvent>) {
        match symbol.kind {
            SymbolKind::Sss => {
                let nid2 = match self.pss_detector.last_nid2() {
                    Some(nid2) => nid2,
                    None => {
                        warn!("SSS symbol without a detected N_id_2, dropped");
                        return;
                    }
                };
                match self.sss_detector.detect(symbol.sss_bins(), nid2) {
                    Ok(result) => {
                        let pci = result.pci;
                        if self.pci != Some(pci) {
                            info!("cell acquired: N_id = {} (N_id_1 = {})", pci.0, result.nid1);
                            self.pci = Some(pci);
                            events.push(ReceiverEvent::CellAcquired { pci });
                        }
                        events.push(ReceiverEvent::SssDetected(result));
                    }
                    Err(e) => warn!("SSS detection failed: {}", e),
                }
                // tracked SSBs interleave the SSS symbol between the two
                // full PBCH symbols
                if self.pbch_symbols.len() == 1 {
                    self.pbch_symbols.push(symbol);
                }
            }
            SymbolKind::Pbch(0) => {
                self.pbch_symbols.clear();
                self.pbch_symbols.push(symbol);
            }
            SymbolKind::Pbch(_) => {
                if self.pbch_symbols.len() != 2 {
                    warn!("incomplete SSB symbol set, PBCH dropped");
                    self.pbch_symbols.clear();
                    return;
                }
                let pci = match self.pci {
                    Some(pci) => pci,
                    None => {
                        self.pbch_symbols.clear();
                        return;
                    }
                };
                self.pbch_symbols.push(symbol);
                let grids = [
                    self.pbch_symbols[0].grid.as_slice(),
                    self.pbch_symbols[1].grid.as_slice(),
                    self.pbch_symbols[2].grid.as_slice(),
                ];
                match self.channel_estimator.process(grids, pci) {
                    Ok(result) => {
                        self.ibar_ssb = Some(result.ibar_ssb);
                        events.push(ReceiverEvent::PbchDecoded(result));
                    }
                    Err(e) => warn!("PBCH equalization failed: {}", e),
                }
                self.pbch_symbols.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmrs::{data_subcarriers, dmrs_subcarriers, pbch_dmrs_sequence};
    use crate::fft_demod::{SSB_GRID_LEN, SSS_GRID_START};
    use crate::sss_detector::sss_reference;
    use crate::taps::pss_sequence;
    use num_complex::Complex;
    use rustfft::FftPlanner;

    /// Synthesize the four OFDM symbols of one SSB (PSS, PBCH, SSS+PBCH,
    /// PBCH) as frequency grids
    fn build_ssb_grids(pci: Pci, i_ssb: u8, data: &[Complex<f64>]) -> [Vec<Complex<f64>>; 4] {
        let mut grids: [Vec<Complex<f64>>; 4] = [
            vec![Complex::new(0.0, 0.0); SSB_GRID_LEN],
            vec![Complex::new(0.0, 0.0); SSB_GRID_LEN],
            vec![Complex::new(0.0, 0.0); SSB_GRID_LEN],
            vec![Complex::new(0.0, 0.0); SSB_GRID_LEN],
        ];

        for (i, &chip) in pss_sequence(pci.nid2()).iter().enumerate() {
            grids[0][SSS_GRID_START + i] = Complex::new(chip as f64, 0.0);
        }
        for (i, &chip) in sss_reference(pci.nid1(), pci.nid2()).iter().enumerate() {
            grids[2][SSS_GRID_START + i] = Complex::new(chip as f64, 0.0);
        }

        let scale = std::f64::consts::FRAC_1_SQRT_2;
        let refs = pbch_dmrs_sequence(pci.0, i_ssb);
        let mut ref_idx = 0;
        let mut data_idx = 0;
        for sym in 0..3u8 {
            let grid = &mut grids[1 + sym as usize];
            for &sc in &dmrs_subcarriers(pci.0, sym) {
                let r = refs[ref_idx];
                ref_idx += 1;
                grid[sc] = Complex::new(r.re as f64 * scale, r.im as f64 * scale);
            }
            for &sc in &data_subcarriers(pci.0, sym) {
                let d = data[data_idx % data.len()];
                data_idx += 1;
                grid[sc] = d * scale;
            }
        }
        grids
    }

    /// CP-OFDM modulate the SSB grids into a full-rate sample stream with
    /// a common gain; the SSB occupies 4 consecutive short-CP symbols
    fn modulate_ssb(cfg: &SyncConfig, grids: &[Vec<Complex<f64>>; 4]) -> Vec<Complex<f64>> {
        let n = cfg.fft_len();
        let half = n / 2;
        let grid_start = half - SSB_GRID_LEN / 2;
        let cp = cfg.cp2_len();
        let mut planner = FftPlanner::<f64>::new();
        let ifft = planner.plan_fft_inverse(n);

        let mut time = Vec::with_capacity(4 * (n + cp));
        for grid in grids {
            let mut freq = vec![Complex::new(0.0, 0.0); n];
            for (i, &v) in grid.iter().enumerate() {
                freq[(grid_start + i + half) % n] = v;
            }
            ifft.process(&mut freq);
            time.extend_from_slice(&freq[n - cp..]);
            time.extend_from_slice(&freq);
        }
        time
    }

    /// Noise-like QPSK payload; structured patterns would concentrate the
    /// OFDM symbol energy in time and distort the amplitude normalization
    fn qpsk_data() -> Vec<Complex<f64>> {
        let mut state = 0x9e3779b97f4a7c15u64;
        (0..432)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                Complex::new(
                    if state & (1 << 40) == 0 { 1.0 } else { -1.0 },
                    if state & (1 << 41) == 0 { 1.0 } else { -1.0 },
                )
            })
            .collect()
    }

    /// Full waveform: two SSB occasions one period apart, optional CFO
    fn synthesize_waveform(
        cfg: &SyncConfig,
        pci: Pci,
        i_ssb: u8,
        ssb_offset: usize,
        cfo_hz: f64,
    ) -> Vec<IqSample> {
        let grids = build_ssb_grids(pci, i_ssb, &qpsk_data());
        let ssb = modulate_ssb(cfg, &grids);
        let period = cfg.ssb_period_samples();
        let total = ssb_offset + period + ssb.len() + 2048;

        let mut wave = vec![Complex::new(0.0, 0.0); total];
        for occasion in 0..2 {
            let base = ssb_offset + occasion * period;
            for (i, &s) in ssb.iter().enumerate() {
                wave[base + i] = s;
            }
        }

        let peak = wave
            .iter()
            .flat_map(|c| [c.re.abs(), c.im.abs()])
            .fold(0.0f64, f64::max);
        let gain = 16000.0 / peak;
        wave.iter()
            .enumerate()
            .map(|(n, c)| {
                let phi = 2.0 * std::f64::consts::PI * cfo_hz * n as f64 / cfg.sample_rate_hz;
                let rotated = c * Complex::new(phi.cos(), phi.sin()) * gain;
                IqSample::new(rotated.re.round() as i16, rotated.im.round() as i16)
            })
            .collect()
    }

    fn e2e_config() -> SyncConfig {
        SyncConfig {
            ssb_period_ms: 1,
            // the synthetic waveform is normalized to the highest-PAPR
            // symbol, leaving the PSS correlation around 2^16
            threshold: 1 << 13,
            initial_detection_shift: 0,
            ..SyncConfig::default()
        }
    }

    fn run_receiver(receiver: &mut SsbReceiver, wave: &[IqSample]) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();
        for &s in wave {
            events.extend(receiver.tick(Some(s)));
        }
        events
    }

    #[test]
    fn test_end_to_end_acquisition() {
        let cfg = e2e_config();
        let pci = Pci(209); // N_id_1 = 69, N_id_2 = 2
        // odd offset aligns the synthesized symbol with the decimated
        // correlator phase
        let ssb_offset = 501usize;
        let wave = synthesize_waveform(&cfg, pci, 0, ssb_offset, 0.0);
        let mut receiver = SsbReceiver::new(cfg.clone()).unwrap();
        let events = run_receiver(&mut receiver, &wave);

        // peak at the documented fixed offset: the last PSS sample plus
        // the detector latency
        let pss_end = (ssb_offset + cfg.cp2_len() + cfg.fft_len() - 1) as u64;
        let peaks: Vec<(u64, u8)> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::PeakDetected { sample, nid2, .. } => Some((*sample, *nid2)),
                _ => None,
            })
            .collect();
        assert_eq!(peaks.len(), 2, "both SSB occasions must be detected");
        assert_eq!(peaks[0].0, pss_end + cfg.detector_latency() as u64);
        assert_eq!(peaks[0].1, 2);
        assert_eq!(
            peaks[1].0 - peaks[0].0,
            cfg.ssb_period_samples() as u64
        );

        // cell identity from the first SSB's SSS
        let acquired: Vec<Pci> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::CellAcquired { pci } => Some(*pci),
                _ => None,
            })
            .collect();
        assert_eq!(acquired, vec![pci]);

        let sss_results: Vec<&SssResult> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::SssDetected(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(sss_results.len(), 2, "SSS runs on every SSB");
        for result in &sss_results {
            assert_eq!(result.nid1, 69);
            assert_eq!(result.pci, pci);
        }

        // the tracked SSB yields equalized PBCH
        let pbch: Vec<&PbchResult> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::PbchDecoded(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(pbch.len(), 1, "PBCH equalized from the second SSB on");
        let pbch = pbch[0];
        assert_eq!(pbch.ibar_ssb, 0);
        assert_eq!(pbch.symbols.len(), 432);
        assert_eq!(pbch.llrs.len(), 864);

        // hard bits reproduce the transmitted QPSK exactly
        let data = qpsk_data();
        for (i, sym) in pbch.symbols.iter().enumerate() {
            let d = data[i % data.len()];
            assert_eq!(sym.re > 0, d.re > 0.0, "symbol {} I sign", i);
            assert_eq!(sym.im > 0, d.im > 0.0, "symbol {} Q sign", i);
        }
        for (llr, bit) in pbch.llrs.iter().zip(pbch.hard_bits.iter()) {
            assert_eq!(*bit, (*llr < 0) as u8);
        }

        let status = receiver.status();
        assert_eq!(status.pci, Some(pci));
        assert_eq!(status.ibar_ssb, Some(0));
        assert_eq!(status.peak_count, 2);
    }

    #[test]
    fn test_end_to_end_with_cfo() {
        let cfg = e2e_config();
        let pci = Pci(209);
        let cfo = 400.0;
        let wave = synthesize_waveform(&cfg, pci, 0, 501, cfo);
        let mut receiver = SsbReceiver::new(cfg).unwrap();
        let events = run_receiver(&mut receiver, &wave);

        let estimates: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::CfoEstimated { freq_hz, .. } => Some(*freq_hz),
                _ => None,
            })
            .collect();
        assert_eq!(estimates.len(), 2);
        assert!(
            (estimates[0] - cfo).abs() < 60.0,
            "first estimate {} Hz for {} Hz applied",
            estimates[0],
            cfo
        );
        // the residual after correction stays within tolerance
        assert!(estimates[1].abs() < 60.0, "residual {} Hz", estimates[1]);

        // acquisition still succeeds end to end
        assert!(events.iter().any(|e| matches!(
            e,
            ReceiverEvent::CellAcquired { pci: p } if *p == pci
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ReceiverEvent::PbchDecoded(r) if r.ibar_ssb == 0)));
    }

    #[test]
    fn test_replay_after_reset_is_idempotent() {
        let cfg = e2e_config();
        let pci = Pci(42);
        let wave = synthesize_waveform(&cfg, pci, 2, 501, 0.0);
        let mut receiver = SsbReceiver::new(cfg).unwrap();

        let first = run_receiver(&mut receiver, &wave);
        let first_peak = first.iter().find_map(|e| match e {
            ReceiverEvent::PeakDetected { sample, nid2, .. } => Some((*sample, *nid2)),
            _ => None,
        });
        let first_pci = receiver.status().pci;

        receiver.reset();
        assert_eq!(receiver.status().pci, None);
        assert_eq!(receiver.status().peak_count, 0);

        let second = run_receiver(&mut receiver, &wave);
        let second_peak = second.iter().find_map(|e| match e {
            ReceiverEvent::PeakDetected { sample, nid2, .. } => Some((*sample, *nid2)),
            _ => None,
        });
        assert_eq!(first_peak, second_peak);
        assert_eq!(first_pci, receiver.status().pci);
        assert_eq!(first_pci, Some(pci));
    }

    #[test]
    fn test_ibar_ssb_hypotheses_in_synthetic_burst() {
        // each hypothesis is detected from its own synthetic SSB stream
        let cfg = e2e_config();
        let pci = Pci(101);
        for i_ssb in [1u8, 5] {
            let wave = synthesize_waveform(&cfg, pci, i_ssb, 501, 0.0);
            let mut receiver = SsbReceiver::new(cfg.clone()).unwrap();
            let events = run_receiver(&mut receiver, &wave);
            let detected = events.iter().find_map(|e| match e {
                ReceiverEvent::PbchDecoded(r) => Some(r.ibar_ssb),
                _ => None,
            });
            assert_eq!(detected, Some(i_ssb), "hypothesis {} missed", i_ssb);
        }
    }
}
