//! SSS Detection
//!
//! Correlates the 127 demodulated SSS subcarriers against the reference
//! sequences of every candidate cell identity group and reports the
//! argmax. Each reference is built from the two length-127 m-sequences of
//! 3GPP TS 38.211 Section 7.4.2.3 (generator polynomials x^7+x^4+1 and
//! x^7+x+1, both seeded with 0000001), cyclically shifted by
//! m0 = 15*(N_id_1/112) + 5*N_id_2 and m1 = N_id_1 mod 112.
//!
//! The reference table is generated once at startup and never mutated.
//! Ties resolve to the lowest candidate index.

use crate::fft_demod::SSS_LEN;
use crate::SyncError;
use common::types::{IqSample, Pci};

/// Number of cell identity group candidates (N_id_1 = 0..=335)
pub const NUM_NID1: usize = 336;

/// Result of one detection episode
#[derive(Debug, Clone)]
pub struct SssResult {
    /// Detected cell identity group
    pub nid1: u16,
    /// Full cell identity 3*N_id_1 + N_id_2
    pub pci: Pci,
    /// Winning correlation score
    pub score: u64,
    /// Squared correlation magnitude per candidate, consumed once per
    /// detection episode
    pub scores: Vec<u64>,
}

/// SSS correlator over all candidate identity groups
pub struct SssDetector {
    /// references[nid2][nid1][n], BPSK chips
    references: Vec<Vec<[i8; SSS_LEN]>>,
}

impl SssDetector {
    pub fn new() -> Self {
        let references = (0..3u8)
            .map(|nid2| {
                (0..NUM_NID1 as u16)
                    .map(|nid1| sss_reference(nid1, nid2))
                    .collect()
            })
            .collect();
        Self { references }
    }

    /// Correlate the demodulated SSS subcarriers against every candidate
    /// for the already-known N_id_2
    pub fn detect(&self, bins: &[IqSample], nid2: u8) -> Result<SssResult, SyncError> {
        if bins.len() != SSS_LEN {
            return Err(SyncError::ProcessingError(format!(
                "SSS detection needs {} subcarriers, got {}",
                SSS_LEN,
                bins.len()
            )));
        }
        if nid2 > 2 {
            return Err(SyncError::ProcessingError(format!(
                "invalid N_id_2 {}",
                nid2
            )));
        }

        let mut scores = Vec::with_capacity(NUM_NID1);
        let mut best = 0u16;
        let mut best_score = 0u64;
        for (nid1, reference) in self.references[nid2 as usize].iter().enumerate() {
            let mut acc_re = 0i64;
            let mut acc_im = 0i64;
            for (chip, bin) in reference.iter().zip(bins.iter()) {
                acc_re += *chip as i64 * bin.re as i64;
                acc_im += *chip as i64 * bin.im as i64;
            }
            let score = (acc_re * acc_re + acc_im * acc_im) as u64;
            // strictly greater keeps the earliest candidate on ties
            if score > best_score {
                best_score = score;
                best = nid1 as u16;
            }
            scores.push(score);
        }

        Ok(SssResult {
            nid1: best,
            pci: Pci(3 * best + nid2 as u16),
            score: best_score,
            scores,
        })
    }
}

impl Default for SssDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the BPSK SSS reference d(n) for one (N_id_1, N_id_2)
pub fn sss_reference(nid1: u16, nid2: u8) -> [i8; SSS_LEN] {
    // m-sequence x0 with polynomial x^7 + x^4 + 1
    let mut x0 = [0u8; SSS_LEN + 7];
    x0[0] = 1;
    for i in 0..SSS_LEN {
        x0[i + 7] = (x0[i + 4] + x0[i]) % 2;
    }
    // m-sequence x1 with polynomial x^7 + x + 1
    let mut x1 = [0u8; SSS_LEN + 7];
    x1[0] = 1;
    for i in 0..SSS_LEN {
        x1[i + 7] = (x1[i + 1] + x1[i]) % 2;
    }

    let m0 = (15 * (nid1 / 112) + 5 * nid2 as u16) as usize;
    let m1 = (nid1 % 112) as usize;

    let mut d = [0i8; SSS_LEN];
    for (n, out) in d.iter_mut().enumerate() {
        let d0 = 1 - 2 * x0[(n + m0) % SSS_LEN] as i8;
        let d1 = 1 - 2 * x1[(n + m1) % SSS_LEN] as i8;
        *out = d0 * d1;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_is_bpsk() {
        let d = sss_reference(69, 2);
        assert!(d.iter().all(|&c| c == 1 || c == -1));
    }

    #[test]
    fn test_exhaustive_self_detection() {
        // feeding the exact reference must return its N_id_1 with a
        // strictly maximal score, for every (N_id_1, N_id_2) pair
        let detector = SssDetector::new();
        for nid2 in 0..3u8 {
            for nid1 in 0..NUM_NID1 as u16 {
                let reference = sss_reference(nid1, nid2);
                let bins: Vec<IqSample> = reference
                    .iter()
                    .map(|&c| IqSample::new(c as i16 * 8192, 0))
                    .collect();
                let result = detector.detect(&bins, nid2).unwrap();
                assert_eq!(
                    result.nid1, nid1,
                    "N_id_1 {} / N_id_2 {} detected as {}",
                    nid1, nid2, result.nid1
                );
                assert_eq!(result.pci.0, 3 * nid1 + nid2 as u16);
                // strict maximum over every other candidate
                for (i, &s) in result.scores.iter().enumerate() {
                    if i != nid1 as usize {
                        assert!(s < result.score);
                    }
                }
            }
        }
    }

    #[test]
    fn test_detection_with_phase_rotation() {
        // a common phase rotation must not disturb the magnitude argmax
        let detector = SssDetector::new();
        let reference = sss_reference(208, 1);
        let bins: Vec<IqSample> = reference
            .iter()
            .map(|&c| IqSample::new(c as i16 * 5000, c as i16 * -3000))
            .collect();
        let result = detector.detect(&bins, 1).unwrap();
        assert_eq!(result.nid1, 208);
    }

    #[test]
    fn test_all_zero_input_ties_to_lowest() {
        let detector = SssDetector::new();
        let bins = vec![IqSample::new(0, 0); SSS_LEN];
        let result = detector.detect(&bins, 0).unwrap();
        assert_eq!(result.nid1, 0);
        assert_eq!(result.score, 0);
        assert_eq!(result.scores.len(), NUM_NID1);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let detector = SssDetector::new();
        let bins = vec![IqSample::new(0, 0); 64];
        assert!(detector.detect(&bins, 0).is_err());
    }
}
