//! Cell-Search Receiver Front End
//!
//! Runs the SSB synchronization pipeline over a recorded downlink capture
//! and reports the detected cell: peak positions, CFO, N_id, ibar_SSB and
//! the equalized PBCH soft bits for a downstream polar decoder.

mod capture;
mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use sync::receiver::{ReceiverEvent, SsbReceiver};
use sync::taps::PssTapSet;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// SSB cell-search receiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Capture data file (overrides the configuration)
    #[arg(long)]
    capture: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write the PBCH soft bits of the first decoded SSB to this file
    #[arg(long)]
    llr_out: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(env_filter).with_target(true).init();

    let mut app_config = match &args.config {
        Some(path) => AppConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration {}", path))?,
        None => AppConfig::default(),
    };
    if let Some(capture_file) = args.capture {
        app_config.capture.data_file = capture_file;
    }
    if app_config.capture.data_file.is_empty() {
        bail!("no capture file given; use --capture or the configuration file");
    }

    let mut sync_config = app_config.sync.clone();
    sync_config.validate()?;

    let capture = capture::load_capture(&app_config.capture, sync_config.in_dw)?;
    if let Some(rate) = capture.sample_rate {
        if (rate - sync_config.sample_rate_hz).abs() > 1.0 {
            info!(
                "capture metadata reports {} Sps, overriding configured {}",
                rate, sync_config.sample_rate_hz
            );
            sync_config.sample_rate_hz = rate;
        }
    }

    info!("pipeline configuration:");
    info!(
        "  pss_len {} taps, window_len {}, nfft {} ({} bins)",
        sync_config.pss_len,
        sync_config.window_len,
        sync_config.nfft,
        sync_config.fft_len()
    );
    info!(
        "  sample rate {} Sps, SSB period {} ms",
        sync_config.sample_rate_hz, sync_config.ssb_period_ms
    );
    // sub-3 GHz deployment assumed for the burst pattern
    let burst = common::types::SsbCase::CaseA;
    info!(
        "  burst pattern {:?}, L_max = {}, start symbols {:?}",
        burst,
        burst.l_max(),
        burst.start_symbols()
    );

    let mut receiver = match &app_config.tap_dir {
        Some(dir) => {
            let load = |nid2: u8| -> Result<Arc<PssTapSet>> {
                let path = format!("{}/PSS_taps_{}.hex", dir, nid2);
                Ok(Arc::new(PssTapSet::from_hex_file(
                    &path,
                    nid2,
                    sync_config.pss_len,
                    sync_config.tap_dw,
                )
                .with_context(|| format!("loading {}", path))?))
            };
            let tap_sets = [load(0)?, load(1)?, load(2)?];
            SsbReceiver::with_tap_sets(sync_config, tap_sets)?
        }
        None => SsbReceiver::new(sync_config)?,
    };

    let mut first_llrs: Option<Vec<i8>> = None;
    let mut pbch_count = 0usize;
    for &sample in &capture.samples {
        for event in receiver.tick(Some(sample)) {
            match event {
                ReceiverEvent::PeakDetected { sample, nid2, mag } => {
                    info!("peak at sample {} (N_id_2 = {}, mag {})", sample, nid2, mag);
                }
                ReceiverEvent::CfoEstimated { freq_hz, total_hz } => {
                    info!("CFO estimate {:+.1} Hz (total {:+.1} Hz)", freq_hz, total_hz);
                }
                ReceiverEvent::CellAcquired { pci } => {
                    info!(
                        "cell acquired: N_id = {} (N_id_1 = {}, N_id_2 = {})",
                        pci.0,
                        pci.nid1(),
                        pci.nid2()
                    );
                }
                ReceiverEvent::SssDetected(result) => {
                    info!("SSS detected N_id_1 = {} (score {})", result.nid1, result.score);
                }
                ReceiverEvent::PbchDecoded(result) => {
                    pbch_count += 1;
                    info!(
                        "PBCH equalized: ibar_SSB = {}, {} soft bits",
                        result.ibar_ssb,
                        result.llrs.len()
                    );
                    if first_llrs.is_none() {
                        first_llrs = Some(result.llrs);
                    }
                }
                ReceiverEvent::SyncLost => warn!("synchronization lost"),
                ReceiverEvent::SsbStart { .. } | ReceiverEvent::SymbolDemodulated { .. } => {}
            }
        }
    }

    let status = receiver.status();
    info!("capture processed, final state {:?}", status.state);
    match status.pci {
        Some(pci) => info!(
            "detected cell N_id = {} with ibar_SSB = {:?}, CFO {:+.1} Hz, {} peaks, {} PBCH blocks",
            pci.0, status.ibar_ssb, status.cfo_hz, status.peak_count, pbch_count
        ),
        None => warn!("no cell detected in capture"),
    }

    if let Some(path) = args.llr_out {
        match first_llrs {
            Some(llrs) => {
                let bytes: Vec<u8> = llrs.iter().map(|&v| v as u8).collect();
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("writing soft bits to {}", path))?;
                info!("wrote {} soft bits to {}", bytes.len(), path);
            }
            None => warn!("no PBCH decoded, soft bit file not written"),
        }
    }

    Ok(())
}
