//! Correlator Tap Tables
//!
//! Builds the three PSS matched-filter tap sets (time-domain transform of
//! the frequency-domain PSS sequence, quantized to the configured tap
//! width) and the FFT demodulation phase-correction table. Tap sets can
//! also be loaded from newline-delimited hexadecimal files with packed
//! real/imaginary pairs; any length or width mismatch is fatal.
//!
//! All tables are immutable after construction and shared by reference.

use crate::SyncError;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::path::Path;

/// PSS sequence length in subcarriers
pub const PSS_SEQ_LEN: usize = 127;

/// Generate the BPSK PSS sequence d(n) for one N_id_2 per
/// 3GPP TS 38.211 Section 7.4.2.2
pub fn pss_sequence(nid2: u8) -> [i8; PSS_SEQ_LEN] {
    // m-sequence x(i+7) = (x(i+4) + x(i)) mod 2 with initial state 1110110
    let mut x = [0u8; PSS_SEQ_LEN + 7];
    x[6] = 1;
    x[5] = 1;
    x[4] = 1;
    x[3] = 0;
    x[2] = 1;
    x[1] = 1;
    x[0] = 0;
    for i in 0..PSS_SEQ_LEN {
        x[i + 7] = (x[i + 4] + x[i]) % 2;
    }

    let shift = 43 * nid2 as usize % PSS_SEQ_LEN;
    let mut seq = [0i8; PSS_SEQ_LEN];
    for (n, out) in seq.iter_mut().enumerate() {
        let m = (n + shift) % PSS_SEQ_LEN;
        *out = 1 - 2 * x[m] as i8;
    }
    seq
}

/// One immutable matched-filter tap set for a candidate N_id_2
#[derive(Debug, Clone)]
pub struct PssTapSet {
    nid2: u8,
    taps: Vec<Complex<i32>>,
}

impl PssTapSet {
    /// Build the tap set from the PSS sequence: inverse transform of the
    /// FFT-shifted, zero-padded sequence, normalized to the tap width.
    /// Quantization truncates toward zero like the reference tooling.
    pub fn generate(nid2: u8, pss_len: usize, tap_dw: u32) -> Result<Self, SyncError> {
        if nid2 > 2 {
            return Err(SyncError::InvalidConfiguration(format!(
                "N_id_2 must be 0..=2, got {}",
                nid2
            )));
        }
        if pss_len <= PSS_SEQ_LEN {
            return Err(SyncError::InvalidConfiguration(format!(
                "pss_len {} cannot hold the {}-symbol PSS sequence",
                pss_len, PSS_SEQ_LEN
            )));
        }

        let seq = pss_sequence(nid2);
        let mut freq = vec![Complex::new(0.0f64, 0.0); pss_len];
        for (i, &d) in seq.iter().enumerate() {
            freq[i] = Complex::new(d as f64, 0.0);
        }

        // fftshift then inverse transform
        let half = pss_len / 2;
        let mut shifted = vec![Complex::new(0.0f64, 0.0); pss_len];
        for i in 0..pss_len {
            shifted[i] = freq[(i + half) % pss_len];
        }
        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_inverse(pss_len).process(&mut shifted);

        // normalize to the tap width by the largest component magnitude
        // (for N_id_2 = 0 the negative extreme is the largest, so a
        // signed-max normalization would overflow the tap width); the
        // inverse transform's 1/N factor cancels in the normalization
        let peak = shifted
            .iter()
            .flat_map(|c| [c.re.abs(), c.im.abs()])
            .fold(0.0f64, f64::max);
        let full_scale = ((1i64 << (tap_dw / 2 - 1)) - 1) as f64;
        let taps = shifted
            .iter()
            .map(|c| {
                Complex::new(
                    (c.re / peak * full_scale).trunc() as i32,
                    (c.im / peak * full_scale).trunc() as i32,
                )
            })
            .collect();

        Ok(Self { nid2, taps })
    }

    /// Load a tap set from a newline-delimited hex file of packed
    /// imag/real pairs (imaginary part in the upper half word)
    pub fn from_hex_file<P: AsRef<Path>>(
        path: P,
        nid2: u8,
        pss_len: usize,
        tap_dw: u32,
    ) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(&path)?;
        let half = tap_dw / 2;
        let mut taps = Vec::with_capacity(pss_len);
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let packed = u64::from_str_radix(line, 16).map_err(|e| {
                SyncError::TapTable(format!("line {}: bad hex value: {}", lineno + 1, e))
            })?;
            if tap_dw < 64 && packed >> tap_dw != 0 {
                return Err(SyncError::TapTable(format!(
                    "line {}: value does not fit {} bits",
                    lineno + 1,
                    tap_dw
                )));
            }
            let re = sign_extend(packed & ((1 << half) - 1), half);
            let im = sign_extend((packed >> half) & ((1 << half) - 1), half);
            taps.push(Complex::new(re, im));
        }
        if taps.len() != pss_len {
            return Err(SyncError::TapTable(format!(
                "tap file holds {} taps, expected {}",
                taps.len(),
                pss_len
            )));
        }
        Ok(Self { nid2, taps })
    }

    /// Store the tap set in the hex file format accepted by `from_hex_file`
    pub fn to_hex_file<P: AsRef<Path>>(&self, path: P, tap_dw: u32) -> Result<(), SyncError> {
        let half = tap_dw / 2;
        let mask = (1u64 << half) - 1;
        let mut out = String::new();
        for tap in &self.taps {
            let packed = ((tap.im as i64 as u64 & mask) << half) | (tap.re as i64 as u64 & mask);
            out.push_str(&format!("{:x}\n", packed));
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn nid2(&self) -> u8 {
        self.nid2
    }

    pub fn taps(&self) -> &[Complex<i32>] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

/// Build the FFT demodulation phase-correction table: one unit-magnitude
/// rotation per output bin compensating the window advance of
/// `cp_len - cp_advance` samples, quantized to `out_dw/2`-bit components
pub fn fft_phase_table(nfft: u32, cp_len: usize, cp_advance: usize, out_dw: u32) -> Vec<Complex<i32>> {
    let fft_len = 1usize << nfft;
    let delta = (cp_len - cp_advance) as f64;
    let angle_step = 2.0 * PI * delta / fft_len as f64;
    let const_angle = PI * delta;
    let full_scale = ((1i64 << (out_dw / 2 - 1)) - 1) as f64;

    (0..fft_len)
        .map(|i| {
            let angle = angle_step * i as f64 + const_angle;
            Complex::new(
                (angle.cos() * full_scale).trunc() as i32,
                (angle.sin() * full_scale).trunc() as i32,
            )
        })
        .collect()
}

fn sign_extend(value: u64, bits: u32) -> i32 {
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as i32
}
