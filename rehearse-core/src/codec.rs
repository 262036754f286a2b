//! 16-bit PCM transport codec.
//!
//! Outbound frames and inbound replies travel as base64 text wrapping
//! little-endian signed 16-bit PCM, tagged with a MIME descriptor such as
//! `audio/pcm;rate=16000`.
//!
//! ```text
//! f32 [-1, 1] ──×32768, trunc──► i16 ──LE bytes──► base64   (encode)
//! base64 ──bytes──► i16 (LE pairs) ──÷32768──► f32           (decode)
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{RehearseError, Result};

/// Sample rate of outbound (microphone) audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound (respondent) audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

const PCM_SCALE: f32 = 32768.0;

/// Encoded audio block ready for the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportPayload {
    /// Base64 of little-endian i16 samples.
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl TransportPayload {
    pub fn new(data: String, mime_type: String) -> Self {
        Self { data, mime_type }
    }

    /// Sample rate declared by the `rate=` parameter of the MIME descriptor.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert one sample to i16 by scaling and truncating toward zero.
///
/// Out-of-range input saturates at the i16 bounds (so `1.0` maps to
/// `i16::MAX`, not a wrapped negative value).
#[inline]
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i16
}

/// Encode f32 samples into a transport payload.
pub fn encode_samples(samples: &[f32], sample_rate: u32) -> TransportPayload {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    TransportPayload::new(BASE64.encode(bytes), pcm_mime_type(sample_rate))
}

/// Decode base64 text of LE i16 PCM into f32 samples in [-1, 1).
///
/// # Errors
/// `RehearseError::Decode` on invalid base64 or an odd byte count.
pub fn decode_samples(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| RehearseError::Decode(format!("invalid base64: {e}")))?;
    pcm16_to_f32(&bytes)
}

/// Interpret raw bytes as LE i16 samples and rescale to f32.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(RehearseError::Decode(format!(
            "odd PCM byte count {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn round_trip_stays_within_quantization_step() {
        let samples: Vec<f32> = (0..2048)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([-1.0, -0.5, 0.0, 0.25, 0.99997])
            .collect();

        let payload = encode_samples(&samples, CAPTURE_SAMPLE_RATE);
        let decoded = decode_samples(&payload.data).expect("decode own payload");

        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded) {
            assert!(
                (orig - back).abs() <= 1.0 / 32768.0,
                "orig={orig} back={back}"
            );
        }
    }

    #[test]
    fn quantize_truncates_toward_zero_and_saturates() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(-1.0), i16::MIN);
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(2.5), i16::MAX);
        // 0.5 / 32768 above 1 LSB truncates down, negative truncates up
        assert_eq!(quantize(1.5 / 32768.0), 1);
        assert_eq!(quantize(-1.5 / 32768.0), -1);
    }

    #[test]
    fn decodes_little_endian_pairs() {
        // 0x8000 = i16::MIN, 0x4000 = 16384
        let data = BASE64.encode([0x00, 0x80, 0x00, 0x40]);
        let samples = decode_samples(&data).unwrap();
        assert_abs_diff_eq!(samples[0], -1.0);
        assert_abs_diff_eq!(samples[1], 0.5);
    }

    #[test]
    fn rejects_odd_byte_count() {
        let data = BASE64.encode([0x01, 0x02, 0x03]);
        assert!(matches!(
            decode_samples(&data),
            Err(RehearseError::Decode(_))
        ));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_samples("not base64 at all!"),
            Err(RehearseError::Decode(_))
        ));
    }

    #[test]
    fn payload_reports_declared_rate() {
        let payload = encode_samples(&[0.1, 0.2], CAPTURE_SAMPLE_RATE);
        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        assert_eq!(payload.sample_rate(), Some(16_000));

        let inbound = TransportPayload::new(String::new(), "audio/pcm; rate=24000".into());
        assert_eq!(inbound.sample_rate(), Some(24_000));
        let bare = TransportPayload::new(String::new(), "audio/pcm".into());
        assert_eq!(bare.sample_rate(), None);
    }

    #[test]
    fn payload_serializes_with_camel_case_mime_type() {
        let payload = encode_samples(&[0.0], CAPTURE_SAMPLE_RATE);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AAA=");
    }
}
