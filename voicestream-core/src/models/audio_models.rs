use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical origin of captured audio.
///
/// Discriminants follow the platform capture-source codes accepted in
/// `CaptureOptions::audio_source`. Code 4 (voice call, both directions) is
/// deliberately absent: it is not a supported capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioSourceKind {
    Default = 0,
    Mic = 1,
    VoiceUplink = 2,
    VoiceDownlink = 3,
    Camcorder = 5,
    VoiceRecognition = 6,
    VoiceCommunication = 7,
}

impl AudioSourceKind {
    pub const ALL: [AudioSourceKind; 7] = [
        Self::Default,
        Self::Mic,
        Self::VoiceUplink,
        Self::VoiceDownlink,
        Self::Camcorder,
        Self::VoiceRecognition,
        Self::VoiceCommunication,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Accepts the camelCase name (`voiceRecognition`) or the
    /// SCREAMING_SNAKE platform constant (`VOICE_RECOGNITION`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().to_lowercase() == normalized)
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Mic => "mic",
            Self::VoiceUplink => "voiceUplink",
            Self::VoiceDownlink => "voiceDownlink",
            Self::Camcorder => "camcorder",
            Self::VoiceRecognition => "voiceRecognition",
            Self::VoiceCommunication => "voiceCommunication",
        }
    }
}

/// Interleaved little-endian PCM layout of a capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmFormat {
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channel_count) * usize::from(self.bits_per_sample / 8)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate_hz as usize * self.bytes_per_frame()
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / per_second as f64)
    }
}

/// One delivered unit of captured audio.
///
/// The payload is exactly the bytes returned by one device read: raw PCM in the
/// session's `PcmFormat`, no header, no padding. Sequence numbers restart at 0
/// for every recording; `recording_id` tells recordings apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    recording_id: Uuid,
    sequence: u64,
    captured_at: DateTime<Utc>,
    payload: Vec<u8>,
}

impl AudioChunk {
    pub fn new(recording_id: Uuid, sequence: u64, captured_at: DateTime<Utc>, payload: Vec<u8>) -> Self {
        Self {
            recording_id,
            sequence,
            captured_at,
            payload,
        }
    }

    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
