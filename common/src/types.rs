//! Common Types for the Cell-Search Receiver
//!
//! Defines fundamental types used throughout the synchronization pipeline.

use num_complex::Complex;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Complex baseband sample, signed 16-bit I/Q
pub type IqSample = Complex<i16>;

/// Widened complex value for intermediate arithmetic
pub type IqWide = Complex<i64>;

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Build a PCI from its cell-group and sector components
    ///
    /// N_id = 3 * N_id_1 + N_id_2 with N_id_1 in 0..=335 and N_id_2 in 0..=2.
    pub fn from_components(nid1: u16, nid2: u8) -> Option<Self> {
        if nid1 <= 335 && nid2 <= 2 {
            Some(Self(3 * nid1 + nid2 as u16))
        } else {
            None
        }
    }

    /// Cell identity group N_id_1 (0-335)
    pub fn nid1(&self) -> u16 {
        self.0 / 3
    }

    /// Sector identity N_id_2 (0-2)
    pub fn nid2(&self) -> u8 {
        (self.0 % 3) as u8
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Spacing in Hz
    pub fn as_hz(&self) -> u32 {
        (*self as u32) * 1000
    }
}

/// SSB burst pattern case (frequency-range dependent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsbCase {
    /// Case A: f <= 3 GHz, 15 kHz SCS, L_max = 4
    CaseA,
    /// Case B: 3 GHz < f <= 6 GHz, 30 kHz SCS, L_max = 8
    CaseB,
}

impl SsbCase {
    /// Maximum number of SSBs per burst
    pub fn l_max(&self) -> u8 {
        match self {
            SsbCase::CaseA => 4,
            SsbCase::CaseB => 8,
        }
    }

    /// First OFDM symbols of the SSBs within the burst window
    pub fn start_symbols(&self) -> &'static [u32] {
        match self {
            SsbCase::CaseA => &[2, 8, 16, 22],
            SsbCase::CaseB => &[4, 8, 16, 20, 32, 36, 44, 48],
        }
    }
}
