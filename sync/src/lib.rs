//! SSB Synchronization Pipeline Library
//!
//! This crate implements the cell-search / initial-synchronization front end
//! of a 5G NR downlink receiver according to 3GPP TS 38.211: PSS matched
//! filtering, peak detection, CFO estimation and correction, frame
//! synchronization, SSS detection and PBCH channel estimation.
//!
//! The pipeline is a single synchronous stream of fixed-point complex
//! samples. Every stage is a small state object advanced by one tick per
//! input sample; there is no queuing and no backpressure.

pub mod cfo;
pub mod channel_estimator;
pub mod config;
pub mod demap;
pub mod dmrs;
pub mod fft_demod;
pub mod frame_sync;
pub mod math;
pub mod peak_detector;
pub mod pss_correlator;
pub mod pss_detector;
pub mod receiver;
pub mod sss_detector;
pub mod taps;

use thiserror::Error;

/// Common errors for the synchronization pipeline
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Tap table error: {0}")]
    TapTable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
