//! QPSK Soft-Bit Demapper
//!
//! Maps equalized PBCH symbols to log-likelihood ratios, two per symbol
//! (I axis first), saturated to the configured soft-bit width. Positive
//! LLR means bit 0; hard decisions are the LLR signs.

use crate::config::SyncConfig;
use crate::math::saturate;
use crate::SyncError;
use common::types::IqSample;

pub struct QpskDemapper {
    llr_shift: u32,
    llr_dw: u32,
}

impl QpskDemapper {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        // the equalizer normalizes to +/- 2^(eq_scale-1) per axis; scale
        // that down so a clean symbol lands mid-range of the soft-bit width
        Ok(Self {
            llr_shift: config.eq_scale + 1 - config.llr_dw,
            llr_dw: config.llr_dw,
        })
    }

    /// Two LLRs for one equalized symbol, I axis then Q axis
    pub fn demap(&self, symbol: IqSample) -> [i8; 2] {
        [
            saturate(symbol.re as i64 >> self.llr_shift, self.llr_dw) as i8,
            saturate(symbol.im as i64 >> self.llr_shift, self.llr_dw) as i8,
        ]
    }

    /// Hard decisions, bit = 1 for a negative axis
    pub fn hard(&self, symbol: IqSample) -> [u8; 2] {
        [(symbol.re < 0) as u8, (symbol.im < 0) as u8]
    }
}
