//! Common Utilities
//!
//! Provides utility functions used across the receiver implementation.

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pack bits into bytes (MSB first)
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 1 << (7 - i);
            }
        }
        bytes.push(byte);
    }

    bytes
}

/// Unpack bytes into bits (MSB first)
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte & (1 << (7 - i))) != 0);
        }
    }

    bits
}

/// Convert dB to linear amplitude
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to dB
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.log10()
}

/// Time utilities for slot/frame calculations
pub mod time {
    /// Slot duration in microseconds for different SCS
    pub fn slot_duration_us(scs_khz: u16) -> u32 {
        match scs_khz {
            15 => 1000,
            30 => 500,
            60 => 250,
            120 => 125,
            240 => 62, // 0.0625 ms (approximated)
            _ => panic!("Invalid SCS: {}", scs_khz),
        }
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(scs_khz: u16) -> u16 {
        match scs_khz {
            15 => 10,
            30 => 20,
            60 => 40,
            120 => 80,
            240 => 160,
            _ => panic!("Invalid SCS: {}", scs_khz),
        }
    }
}
