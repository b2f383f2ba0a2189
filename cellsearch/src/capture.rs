//! Capture File Loading
//!
//! Reads recorded downlink baseband captures: interleaved little-endian
//! I/Q samples (int16 or float32), optionally described by a SigMF-style
//! JSON metadata file. Captures are normalized to the configured input
//! full scale with a 0.8 backoff so filter transients cannot overflow the
//! fixed-point pipeline.

use crate::config::CaptureConfig;
use anyhow::{bail, Context, Result};
use common::types::IqSample;
use serde::Deserialize;
use tracing::info;

/// SigMF-style metadata, global section only
#[derive(Debug, Deserialize)]
pub struct CaptureMeta {
    pub global: CaptureGlobal,
}

#[derive(Debug, Deserialize)]
pub struct CaptureGlobal {
    #[serde(rename = "core:sample_rate")]
    pub sample_rate: Option<f64>,
    #[serde(rename = "core:datatype")]
    pub datatype: Option<String>,
}

/// Loaded capture ready for the pipeline
pub struct Capture {
    pub samples: Vec<IqSample>,
    pub sample_rate: Option<f64>,
}

/// Load a capture according to the configuration; `in_dw` is the complex
/// input width of the pipeline
pub fn load_capture(config: &CaptureConfig, in_dw: u32) -> Result<Capture> {
    let mut datatype = config.datatype.clone();
    let mut sample_rate = None;

    if let Some(meta_file) = &config.meta_file {
        let meta: CaptureMeta = serde_json::from_str(
            &std::fs::read_to_string(meta_file)
                .with_context(|| format!("reading metadata {}", meta_file))?,
        )
        .with_context(|| format!("parsing metadata {}", meta_file))?;
        if let Some(dt) = meta.global.datatype {
            datatype = dt;
        }
        sample_rate = meta.global.sample_rate;
    }

    let bytes = std::fs::read(&config.data_file)
        .with_context(|| format!("reading capture {}", config.data_file))?;

    let mut raw: Vec<(f64, f64)> = match datatype.as_str() {
        "ci16_le" => bytes
            .chunks_exact(4)
            .map(|c| {
                (
                    i16::from_le_bytes([c[0], c[1]]) as f64,
                    i16::from_le_bytes([c[2], c[3]]) as f64,
                )
            })
            .collect(),
        "cf32_le" => bytes
            .chunks_exact(8)
            .map(|c| {
                (
                    f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64,
                    f32::from_le_bytes([c[4], c[5], c[6], c[7]]) as f64,
                )
            })
            .collect(),
        other => bail!("unsupported capture datatype {}", other),
    };
    if let Some(max) = config.max_samples {
        raw.truncate(max);
    }
    if raw.is_empty() {
        bail!("capture {} holds no samples", config.data_file);
    }

    let full_scale = ((1i32 << (in_dw / 2 - 1)) - 1) as f64;
    let scale = if config.normalize {
        let peak = raw
            .iter()
            .flat_map(|&(re, im)| [re.abs(), im.abs()])
            .fold(0.0f64, f64::max);
        if peak == 0.0 {
            bail!("capture {} is all zeros", config.data_file);
        }
        full_scale * 0.8 / peak
    } else {
        1.0
    };

    let samples: Vec<IqSample> = raw
        .iter()
        .map(|&(re, im)| {
            IqSample::new(
                (re * scale).round().clamp(-full_scale, full_scale) as i16,
                (im * scale).round().clamp(-full_scale, full_scale) as i16,
            )
        })
        .collect();

    info!(
        "loaded {} samples from {} ({}, scale {:.3})",
        samples.len(),
        config.data_file,
        datatype,
        scale
    );
    Ok(Capture {
        samples,
        sample_rate,
    })
}
