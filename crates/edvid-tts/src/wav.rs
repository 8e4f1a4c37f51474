//! Minimal RIFF/WAVE header probing.
//!
//! The TTS service returns a complete waveform file; duration is measured
//! from the file itself (data chunk size over byte rate) rather than
//! trusted from the service.

use std::path::Path;

use crate::error::{TtsError, TtsResult};

/// Measure the duration of a PCM WAV file in seconds.
pub async fn wav_duration(path: &Path) -> TtsResult<f64> {
    let bytes = tokio::fs::read(path).await?;
    duration_from_bytes(&bytes).ok_or_else(|| TtsError::BadWaveform {
        path: path.to_path_buf(),
    })
}

/// Parse the fmt and data chunks out of a RIFF/WAVE byte stream.
pub(crate) fn duration_from_bytes(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut byte_rate: Option<u32> = None;
    let mut data_len: Option<u32> = None;

    let mut offset = 12usize;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?);
        let body = offset + 8;

        match chunk_id {
            b"fmt " if body + 16 <= bytes.len() => {
                byte_rate = Some(u32::from_le_bytes(
                    bytes[body + 8..body + 12].try_into().ok()?,
                ));
            }
            b"data" => {
                data_len = Some(chunk_size);
            }
            _ => {}
        }

        // Chunks are word-aligned.
        offset = body + chunk_size as usize + (chunk_size as usize & 1);
    }

    match (byte_rate, data_len) {
        (Some(rate), Some(len)) if rate > 0 && len > 0 => Some(len as f64 / rate as f64),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn build_test_wav(sample_rate: u32, channels: u16, seconds: f64) -> Vec<u8> {
    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample / 8) as u32;
    let data_len = (byte_rate as f64 * seconds) as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * bits_per_sample / 8).to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend(std::iter::repeat(0u8).take(data_len as usize));
    out
}
