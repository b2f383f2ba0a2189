//! Correlation Peak Detector
//!
//! Slides a window over the per-tick maximum of the three correlator
//! magnitudes and fires a one-tick pulse when the sample at the configured
//! detection position is the strict maximum of the window and exceeds the
//! absolute threshold or the noise-relative threshold. Ties resolve to the
//! earliest sample: a later equal value never displaces the candidate, an
//! earlier equal value suppresses it. Detection latency equals the
//! detection offset, at most half the window length with the default
//! configuration.

use crate::config::SyncConfig;
use crate::SyncError;
use std::collections::VecDeque;

/// Detected SSB-start candidate, valid for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakEvent {
    /// Winning sector identity
    pub nid2: u8,
    /// Truncated correlation magnitude after the acquisition shift
    pub mag: u64,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    mag: u64,
    nid2: u8,
}

/// Sliding-window maximum detector over the correlator magnitudes
pub struct PeakDetector {
    window: VecDeque<WindowEntry>,
    window_len: usize,
    detection_offset: usize,
    threshold: u64,
    detection_factor: u32,
    noise_avg_log2: u32,
    initial_shift: u32,
    noise_level: u64,
}

impl PeakDetector {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            window: VecDeque::with_capacity(config.window_len),
            window_len: config.window_len,
            detection_offset: config.detection_offset,
            threshold: config.threshold,
            detection_factor: config.detection_factor,
            noise_avg_log2: config.noise_avg_log2,
            initial_shift: config.initial_detection_shift,
            noise_level: 0,
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.noise_level = 0;
    }

    /// Current noise-floor estimate (after the acquisition shift)
    pub fn noise_level(&self) -> u64 {
        self.noise_level
    }

    /// Detection latency in valid ticks
    pub fn latency(&self) -> usize {
        self.detection_offset
    }

    /// Advance by one valid correlator tick with the three candidate
    /// magnitudes; returns a peak event for at most one tick per maximum
    pub fn tick(&mut self, mags: [u64; 3]) -> Option<PeakEvent> {
        // per-tick winner across candidates, ties to the lowest N_id_2
        let mut nid2 = 0u8;
        let mut mag = mags[0];
        for (i, &m) in mags.iter().enumerate().skip(1) {
            if m > mag {
                mag = m;
                nid2 = i as u8;
            }
        }
        let mag = mag >> self.initial_shift;

        // running noise-floor average
        let delta = mag as i64 - self.noise_level as i64;
        self.noise_level = (self.noise_level as i64 + (delta >> self.noise_avg_log2)) as u64;

        self.window.push_front(WindowEntry { mag, nid2 });
        if self.window.len() < self.window_len {
            return None;
        }
        if self.window.len() > self.window_len {
            self.window.pop_back();
        }

        let candidate = self.window[self.detection_offset];
        for (i, entry) in self.window.iter().enumerate() {
            if i < self.detection_offset && entry.mag > candidate.mag {
                return None;
            }
            if i > self.detection_offset && entry.mag >= candidate.mag {
                return None;
            }
        }

        let mut limit = self.threshold;
        if self.detection_factor > 0 {
            limit = limit.max(self.noise_level.saturating_mul(self.detection_factor as u64));
        }
        if candidate.mag < limit {
            return None;
        }

        Some(PeakEvent {
            nid2: candidate.nid2,
            mag: candidate.mag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_config(threshold: u64) -> SyncConfig {
        SyncConfig {
            threshold,
            initial_detection_shift: 0,
            detection_factor: 0,
            ..SyncConfig::default()
        }
    }

    fn feed(detector: &mut PeakDetector, mags: &[u64]) -> Vec<(usize, PeakEvent)> {
        let mut events = Vec::new();
        for (i, &m) in mags.iter().enumerate() {
            if let Some(event) = detector.tick([m, 0, 0]) {
                events.push((i, event));
            }
        }
        events
    }

    #[test]
    fn test_single_peak_fires_once_at_offset() {
        let cfg = detector_config(100);
        let mut detector = PeakDetector::new(&cfg).unwrap();

        let mut mags = vec![10u64; 32];
        mags[16] = 5000;
        let events = feed(&mut detector, &mags);
        assert_eq!(events.len(), 1);
        // the peak sample fires when it reaches the detection offset
        assert_eq!(events[0].0, 16 + cfg.detection_offset);
        assert_eq!(events[0].1.mag, 5000);
    }

    #[test]
    fn test_below_threshold_is_ignored() {
        let cfg = detector_config(10_000);
        let mut detector = PeakDetector::new(&cfg).unwrap();
        let mut mags = vec![10u64; 32];
        mags[16] = 5000;
        assert!(feed(&mut detector, &mags).is_empty());
    }

    #[test]
    fn test_tie_resolves_to_earliest() {
        let cfg = detector_config(100);
        let mut detector = PeakDetector::new(&cfg).unwrap();
        let mut mags = vec![10u64; 32];
        mags[16] = 5000;
        mags[18] = 5000; // later duplicate inside the same window
        let events = feed(&mut detector, &mags);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 16 + cfg.detection_offset);
    }

    #[test]
    fn test_winning_nid2_reported() {
        let cfg = detector_config(100);
        let mut detector = PeakDetector::new(&cfg).unwrap();
        let mut events = Vec::new();
        for i in 0..32 {
            let mags = if i == 16 { [10, 10, 7000] } else { [10, 10, 10] };
            if let Some(event) = detector.tick(mags) {
                events.push(event);
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].nid2, 2);
    }

    #[test]
    fn test_noise_relative_threshold() {
        let cfg = SyncConfig {
            threshold: 0,
            detection_factor: 8,
            noise_avg_log2: 2,
            initial_detection_shift: 0,
            ..SyncConfig::default()
        };
        let mut detector = PeakDetector::new(&cfg).unwrap();

        // raise the noise floor to about 1000, then offer a bump of 4000:
        // below 8 * noise, so it must not fire
        let mut mags = vec![1000u64; 64];
        mags[40] = 4000;
        let events = feed(&mut detector, &mags);
        assert!(events.is_empty(), "{:?}", events);

        // a bump clearly above the relative limit fires
        let mut mags = vec![1000u64; 64];
        mags[40] = 60_000;
        let events = feed(&mut detector, &mags);
        assert_eq!(events.len(), 1);
    }
}
