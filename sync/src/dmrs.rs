//! PBCH DMRS Generation
//!
//! Demodulation reference signal for the PBCH according to 3GPP TS 38.211
//! Section 7.4.1.4: a length-31 Gold sequence seeded from the cell
//! identity and the SSB index, QPSK-mapped onto every fourth subcarrier of
//! the three PBCH symbols. The frequency offset of the pilot comb is
//! v = N_id mod 4.
//!
//! Pilots are kept in integer quadbit form (+/-1 +/- j) so the channel
//! estimator can correlate and conjugate without rounding; the nominal
//! 1/sqrt(2) QPSK amplitude is absorbed into the estimator scaling.

use num_complex::Complex;

/// DMRS resource elements per SSB (60 + 24 + 60)
pub const DMRS_PER_SSB: usize = 144;
/// PBCH data resource elements per SSB (180 + 72 + 180)
pub const PBCH_DATA_PER_SSB: usize = 432;

/// Length-31 Gold sequence generator (x1 ^ x2, Nc = 1600 fast-forward)
pub struct GoldSequence {
    x1: u32,
    x2: u32,
}

impl GoldSequence {
    /// Create a new generator with the given initialization value
    pub fn new(c_init: u32) -> Self {
        // x1 starts from all ones, x2 from c_init
        let mut x1 = 0x7FFFFFFF;
        let mut x2 = c_init & 0x7FFFFFFF;

        // Advance by Nc=1600 iterations as per 3GPP spec
        for _ in 0..1600 {
            let x1_new = ((x1 >> 3) ^ x1) & 1;
            x1 = ((x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

            let x2_new = ((x2 >> 3) ^ (x2 >> 2) ^ (x2 >> 1) ^ x2) & 1;
            x2 = ((x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
        }

        Self { x1, x2 }
    }

    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }

    /// Generate the next scrambling bit
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Generate the next QPSK symbol in quadbit form:
    /// (1-2c(2m)) + j(1-2c(2m+1))
    pub fn next_quadbit(&mut self) -> Complex<i32> {
        let c0 = self.next_bit();
        let c1 = self.next_bit();
        Complex::new(1 - 2 * c0 as i32, 1 - 2 * c1 as i32)
    }

    /// Skip n QPSK symbols (2 bits each)
    pub fn skip(&mut self, n_symbols: usize) {
        for _ in 0..(n_symbols * 2) {
            self.advance();
        }
    }
}

/// PBCH DMRS initialization value per TS 38.211 Section 7.4.1.4.1.
/// `i_ssb` already includes the half-frame bit for L_max = 4, so the
/// hypothesis range is 0..=7.
pub fn pbch_dmrs_cinit(n_id: u16, i_ssb: u8) -> u32 {
    let i = i_ssb as u32;
    let n_id_div_4 = (n_id / 4) as u32;
    let n_id_mod_4 = (n_id % 4) as u32;
    (((i + 1) * (n_id_div_4 + 1)) << 11) + ((i + 1) << 6) + n_id_mod_4
}

/// The 144 DMRS pilots of one SSB for a cell identity and SSB index
/// hypothesis, in mapping order across the three PBCH symbols
pub fn pbch_dmrs_sequence(n_id: u16, i_ssb: u8) -> Vec<Complex<i32>> {
    let mut generator = GoldSequence::new(pbch_dmrs_cinit(n_id, i_ssb));
    (0..DMRS_PER_SSB).map(|_| generator.next_quadbit()).collect()
}

/// Pilot comb offset within the SSB grid
pub fn dmrs_offset(n_id: u16) -> usize {
    (n_id % 4) as usize
}

/// DMRS subcarriers of one PBCH symbol (0..=2) within the 240-bin grid
pub fn dmrs_subcarriers(n_id: u16, pbch_symbol: u8) -> Vec<usize> {
    let v = dmrs_offset(n_id);
    match pbch_symbol {
        // full-width PBCH symbols
        0 | 2 => (0..60).map(|k| v + 4 * k).collect(),
        // the SSS symbol carries PBCH only in the two side blocks
        1 => (0..12)
            .map(|k| v + 4 * k)
            .chain((0..12).map(|k| 192 + v + 4 * k))
            .collect(),
        _ => Vec::new(),
    }
}

/// PBCH data subcarriers of one PBCH symbol within the 240-bin grid
pub fn data_subcarriers(n_id: u16, pbch_symbol: u8) -> Vec<usize> {
    let v = dmrs_offset(n_id);
    let is_dmrs = |sc: usize| sc % 4 == v;
    match pbch_symbol {
        0 | 2 => (0..240).filter(|&sc| !is_dmrs(sc)).collect(),
        1 => (0..48)
            .chain(192..240)
            .filter(|&sc| !is_dmrs(sc))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cinit_formula() {
        // c_init = 2^11 (i+1)(floor(N/4)+1) + 2^6 (i+1) + N mod 4
        assert_eq!(pbch_dmrs_cinit(0, 0), (1 << 11) + (1 << 6));
        assert_eq!(
            pbch_dmrs_cinit(209, 3),
            (4 * (52 + 1) << 11) + (4 << 6) + 1
        );
    }

    #[test]
    fn test_gold_sequence_against_direct_recurrence() {
        // independent array-based evaluation of c(n) = x1(n+Nc) ^ x2(n+Nc)
        let c_init = pbch_dmrs_cinit(209, 0);
        let n = 64;
        let nc = 1600;
        let len = nc + n + 31;
        let mut x1 = vec![0u8; len];
        let mut x2 = vec![0u8; len];
        x1[0] = 1;
        for i in 0..31 {
            x2[i] = ((c_init >> i) & 1) as u8;
        }
        for i in 0..len - 31 {
            x1[i + 31] = x1[i + 3] ^ x1[i];
            x2[i + 31] = x2[i + 3] ^ x2[i + 2] ^ x2[i + 1] ^ x2[i];
        }

        let mut generator = GoldSequence::new(c_init);
        for i in 0..n {
            assert_eq!(
                generator.next_bit(),
                x1[i + nc] ^ x2[i + nc],
                "bit {} differs",
                i
            );
        }
    }

    #[test]
    fn test_sequence_is_qpsk() {
        let seq = pbch_dmrs_sequence(209, 0);
        assert_eq!(seq.len(), DMRS_PER_SSB);
        assert!(seq
            .iter()
            .all(|s| s.re.abs() == 1 && s.im.abs() == 1));
    }

    #[test]
    fn test_hypotheses_differ() {
        let a = pbch_dmrs_sequence(209, 0);
        let b = pbch_dmrs_sequence(209, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_re_layout_counts() {
        for n_id in [0u16, 209, 1007] {
            assert_eq!(dmrs_subcarriers(n_id, 0).len(), 60);
            assert_eq!(dmrs_subcarriers(n_id, 1).len(), 24);
            assert_eq!(dmrs_subcarriers(n_id, 2).len(), 60);
            assert_eq!(data_subcarriers(n_id, 0).len(), 180);
            assert_eq!(data_subcarriers(n_id, 1).len(), 72);
            assert_eq!(data_subcarriers(n_id, 2).len(), 180);
        }
    }

    #[test]
    fn test_comb_offset_follows_cell_identity() {
        assert_eq!(dmrs_subcarriers(209, 0)[0], 1); // 209 mod 4 = 1
        assert_eq!(dmrs_subcarriers(208, 0)[0], 0);
        // data and pilot sets are disjoint and cover the PBCH region
        let pilots = dmrs_subcarriers(209, 1);
        let data = data_subcarriers(209, 1);
        assert!(pilots.iter().all(|sc| !data.contains(sc)));
        assert_eq!(pilots.len() + data.len(), 96);
    }
}
