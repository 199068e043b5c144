use std::fmt;

use thiserror::Error;

use super::state::SessionState;

/// Option field rejected by capture configuration validation.
///
/// Displays as the caller-facing option name (`sampleRate`, `channels`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    SampleRate,
    Channels,
    BitsPerSample,
    AudioSource,
    BufferSize,
}

impl ConfigField {
    pub fn option_name(&self) -> &'static str {
        match self {
            Self::SampleRate => "sampleRate",
            Self::Channels => "channels",
            Self::BitsPerSample => "bitsPerSample",
            Self::AudioSource => "audioSource",
            Self::BufferSize => "bufferSize",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.option_name())
    }
}

/// Errors reported by an audio device, either while opening it or mid-stream.
///
/// Mid-stream errors are terminal for the current recording only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("invalid operation on audio device")]
    InvalidOperation,

    #[error("bad value passed to audio device")]
    BadValue,

    #[error("audio device is no longer valid")]
    DeadObject,

    #[error("audio device failure: {0}")]
    Failure(String),

    #[error("audio device returned no data for {consecutive_empty_reads} consecutive reads")]
    Starved { consecutive_empty_reads: u32 },
}

/// Errors returned by capture session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("invalid config: {0}")]
    InvalidConfig(ConfigField),

    #[error("malformed capture options: {0}")]
    MalformedOptions(String),

    #[error("unsupported device config: {0}")]
    UnsupportedDeviceConfig(String),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available: {0}")]
    DeviceUnavailable(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}
