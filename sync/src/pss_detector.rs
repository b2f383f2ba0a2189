//! PSS Detector
//!
//! Composes the three matched-filter correlators (one per candidate
//! N_id_2), the sliding-window peak detector and the CFO estimator into
//! the acquisition front end. The NCO sits ahead of the correlators, so a
//! programmed correction feeds back into subsequent detection; the
//! corrected stream is also what the frame synchronizer demodulates.
//!
//! The correlator path runs at a decimated rate (`corr_decim`); the taps
//! span one PSS symbol at that rate. Peak positions are therefore quantized
//! to the correlator rate, which the cyclic-prefix window advance absorbs.
//!
//! Operating modes follow the original register surface: `Search` accepts
//! any peak, `Find` only peaks whose N_id_2 matches the previous
//! detection, `Pause` ignores peaks entirely.

use crate::cfo::{CfoEstimate, CfoEstimator, Nco};
use crate::config::{CfoMode, CorrelatorAlgo, SyncConfig};
use crate::peak_detector::{PeakDetector, PeakEvent};
use crate::pss_correlator::PssCorrelator;
use crate::taps::PssTapSet;
use crate::SyncError;
use common::types::IqSample;
use num_complex::Complex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Peak acceptance mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    /// Accept any peak
    Search,
    /// Accept only peaks matching the previously detected N_id_2
    Find,
    /// Ignore peaks
    Pause,
}

/// Per-tick output of the detector
#[derive(Debug, Clone, Copy, Default)]
pub struct PssDetectorOutput {
    /// CFO-corrected sample, present when the input was valid
    pub corrected: Option<IqSample>,
    /// Accepted peak event, one tick wide
    pub peak: Option<PeakEvent>,
    /// CFO estimate produced with this peak
    pub cfo: Option<CfoEstimate>,
}

type HalfSums = [(Complex<i64>, Complex<i64>); 3];

/// Acquisition front end: NCO, correlator bank, peak detector, CFO
pub struct PssDetector {
    correlators: [PssCorrelator; 3],
    peak_detector: PeakDetector,
    estimator: CfoEstimator,
    nco: Nco,
    mode: DetectorMode,
    cfo_mode: CfoMode,
    algo: CorrelatorAlgo,
    corr_decim: usize,
    decim_cnt: usize,
    detection_offset: usize,
    window_len: usize,
    history: VecDeque<HalfSums>,
    last_nid2: Option<u8>,
}

impl PssDetector {
    pub fn new(config: &SyncConfig, tap_sets: [Arc<PssTapSet>; 3]) -> Result<Self, SyncError> {
        config.validate()?;
        let [t0, t1, t2] = tap_sets;
        let correlators = [
            PssCorrelator::new(config, t0)?,
            PssCorrelator::new(config, t1)?,
            PssCorrelator::new(config, t2)?,
        ];
        Ok(Self {
            correlators,
            peak_detector: PeakDetector::new(config)?,
            estimator: CfoEstimator::new(config)?,
            nco: Nco::new(config)?,
            mode: DetectorMode::Search,
            cfo_mode: config.cfo_mode,
            algo: config.algo,
            corr_decim: config.corr_decim,
            decim_cnt: 0,
            detection_offset: config.detection_offset,
            window_len: config.window_len,
            history: VecDeque::new(),
            last_nid2: None,
        })
    }

    pub fn reset(&mut self) {
        for correlator in &mut self.correlators {
            correlator.reset();
        }
        self.peak_detector.reset();
        self.nco.reset();
        self.mode = DetectorMode::Search;
        self.decim_cnt = 0;
        self.history.clear();
        self.last_nid2 = None;
    }

    pub fn set_mode(&mut self, mode: DetectorMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    pub fn last_nid2(&self) -> Option<u8> {
        self.last_nid2
    }

    /// Externally program the NCO (manual CFO mode)
    pub fn set_cfo_increment(&mut self, phase_inc: i64) {
        self.nco.set_increment(phase_inc);
    }

    /// Currently programmed NCO increment
    pub fn cfo_increment(&self) -> i64 {
        self.nco.increment()
    }

    /// Advance one input-stream tick
    pub fn tick(&mut self, input: Option<IqSample>) -> PssDetectorOutput {
        let mut output = PssDetectorOutput::default();
        let sample = match input {
            Some(s) => s,
            None => return output,
        };
        let corrected = self.nco.tick(sample);
        output.corrected = Some(corrected);

        // decimated correlator path
        self.decim_cnt += 1;
        if self.decim_cnt < self.corr_decim {
            return output;
        }
        self.decim_cnt = 0;

        let c0 = self.correlators[0].tick(Some(corrected));
        let c1 = self.correlators[1].tick(Some(corrected));
        let c2 = self.correlators[2].tick(Some(corrected));
        let (r0, r1, r2) = match (c0, c1, c2) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return output,
        };

        self.history.push_front([(r0.c0, r0.c1), (r1.c0, r1.c1), (r2.c0, r2.c1)]);
        if self.history.len() > self.window_len {
            self.history.pop_back();
        }

        let event = match self.peak_detector.tick([r0.mag, r1.mag, r2.mag]) {
            Some(event) => event,
            None => return output,
        };

        let accepted = match self.mode {
            DetectorMode::Search => true,
            DetectorMode::Find => self.last_nid2 == Some(event.nid2),
            DetectorMode::Pause => false,
        };
        if !accepted {
            return output;
        }

        self.last_nid2 = Some(event.nid2);
        output.peak = Some(event);

        // the folded datapath does not expose half-window sums
        if self.cfo_mode == CfoMode::Auto && self.algo == CorrelatorAlgo::Direct {
            let (half0, half1) = self.history[self.detection_offset][event.nid2 as usize];
            let estimate = self.estimator.estimate(half0, half1);
            // an active correction means the estimate is the residual
            self.nco.set_increment(self.nco.increment() + estimate.phase_inc);
            debug!(
                "peak N_id_2={} mag={} CFO {:+.1} Hz (inc {})",
                event.nid2, event.mag, estimate.freq_hz, estimate.phase_inc
            );
            output.cfo = Some(estimate);
        } else {
            debug!("peak N_id_2={} mag={}", event.nid2, event.mag);
        }

        output
    }
}
