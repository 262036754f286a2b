//! Audio device enumeration for the `devices` command and input selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Inputs only: the name suggests it records system output, not a voice.
    pub is_loopback_like: bool,
    /// Inputs only: best guess for an interview microphone.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
    "virtual output",
];

const HEADSET_KEYWORDS: &[&str] = &["headset", "headphone mic", "airpods", "buds"];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "array", "usb", "webcam", "yeti"];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Rank an input name for spoken conversation. Headsets win because they
/// keep the interviewer's voice out of the microphone.
pub fn input_preference_score(name: &str, is_default: bool) -> i32 {
    let lowered = name.to_ascii_lowercase();
    if is_loopback_like_name(&lowered) {
        return -20;
    }
    let mut score = 4;
    if HEADSET_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 8;
    } else if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 5;
    }
    if is_default {
        score += 2;
    }
    score
}

/// Flag the best input in `list` as recommended and order inputs first,
/// recommended first, then defaults, then by name.
pub fn rank_devices(list: &mut [DeviceInfo]) {
    let best = list
        .iter()
        .enumerate()
        .filter(|(_, d)| d.direction == DeviceDirection::Input)
        .max_by_key(|(_, d)| input_preference_score(&d.name, d.is_default))
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        list[idx].is_recommended = !list[idx].is_loopback_like;
    }

    list.sort_by_key(|d| {
        (
            d.direction == DeviceDirection::Output,
            !d.is_recommended,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List input and output devices on the default host.
///
/// Returns an empty `Vec` if enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = Vec::new();
    match host.input_devices() {
        Ok(devices) => list.extend(devices.filter_map(|d| d.name().ok()).map(|name| {
            DeviceInfo {
                is_default: default_in.as_deref() == Some(name.as_str()),
                is_loopback_like: is_loopback_like_name(&name),
                direction: DeviceDirection::Input,
                is_recommended: false,
                name,
            }
        })),
        Err(e) => tracing::warn!("failed to enumerate input devices: {e}"),
    }
    match host.output_devices() {
        Ok(devices) => list.extend(devices.filter_map(|d| d.name().ok()).map(|name| {
            DeviceInfo {
                is_default: default_out.as_deref() == Some(name.as_str()),
                is_loopback_like: false,
                direction: DeviceDirection::Output,
                is_recommended: false,
                name,
            }
        })),
        Err(e) => tracing::warn!("failed to enumerate output devices: {e}"),
    }

    rank_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}
