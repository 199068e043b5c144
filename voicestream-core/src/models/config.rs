use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioSourceKind, PcmFormat};
use super::error::{CaptureError, ConfigField};
use crate::traits::audio_source::AudioBackend;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 44100;
pub const DEFAULT_CHANNEL_COUNT: u16 = 1;
pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
pub const DEFAULT_BUFFER_BYTES: usize = 2048;

pub const MIN_SAMPLE_RATE_HZ: i64 = 8000;
pub const MAX_SAMPLE_RATE_HZ: i64 = 48000;
pub const MIN_REQUESTED_BUFFER_BYTES: i64 = 1024;

/// Upper bound on a single device read, independent of the device buffer.
pub const MAX_READ_CHUNK_BYTES: usize = 4096;

/// Capture source as given by the caller: a platform code or a symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    Code(i64),
    Name(String),
}

impl SourceSpec {
    fn resolve(&self) -> Option<AudioSourceKind> {
        match self {
            Self::Code(code) => AudioSourceKind::from_code(*code),
            Self::Name(name) => AudioSourceKind::from_name(name),
        }
    }
}

impl From<AudioSourceKind> for SourceSpec {
    fn from(kind: AudioSourceKind) -> Self {
        Self::Code(kind.code())
    }
}

/// Raw capture options as received from the embedding application.
///
/// Every field is optional; missing fields fall back to the defaults
/// (44100 Hz, mono, 16-bit, microphone, 2048 bytes). Numeric fields are
/// wide signed integers so out-of-range values surface as a field-specific
/// `InvalidConfig` rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOptions {
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub bits_per_sample: Option<i64>,
    pub audio_source: Option<SourceSpec>,
    pub buffer_size: Option<i64>,
}

impl CaptureOptions {
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        serde_json::from_str(json).map_err(|e| CaptureError::MalformedOptions(e.to_string()))
    }

    pub fn with_sample_rate(mut self, hz: i64) -> Self {
        self.sample_rate = Some(hz);
        self
    }

    pub fn with_channels(mut self, channels: i64) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_bits_per_sample(mut self, bits: i64) -> Self {
        self.bits_per_sample = Some(bits);
        self
    }

    pub fn with_audio_source(mut self, source: impl Into<SourceSpec>) -> Self {
        self.audio_source = Some(source.into());
        self
    }

    pub fn with_buffer_size(mut self, bytes: i64) -> Self {
        self.buffer_size = Some(bytes);
        self
    }
}

/// Validated, immutable capture parameters for one configured session.
///
/// Built only through [`CaptureConfig::resolve`], which enforces the field
/// ranges and consults the backend for the minimum device buffer. A new
/// `configure()` replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    format: PcmFormat,
    source_kind: AudioSourceKind,
    requested_buffer_bytes: usize,
    min_buffer_bytes: usize,
    effective_buffer_bytes: usize,
}

impl CaptureConfig {
    /// Validate `options` field by field, then query the backend minimum.
    ///
    /// Fields are checked in the order sample rate, channels, bits per sample,
    /// audio source, buffer size; the first violation is reported. A requested
    /// buffer below the platform minimum is raised to it, not rejected.
    pub fn resolve<B>(options: &CaptureOptions, backend: &B) -> Result<Self, CaptureError>
    where
        B: AudioBackend + ?Sized,
    {
        let sample_rate = options.sample_rate.unwrap_or(i64::from(DEFAULT_SAMPLE_RATE_HZ));
        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&sample_rate) {
            return Err(CaptureError::InvalidConfig(ConfigField::SampleRate));
        }

        let channels = options.channels.unwrap_or(i64::from(DEFAULT_CHANNEL_COUNT));
        if ![1, 2].contains(&channels) {
            return Err(CaptureError::InvalidConfig(ConfigField::Channels));
        }

        let bits = options.bits_per_sample.unwrap_or(i64::from(DEFAULT_BITS_PER_SAMPLE));
        if ![8, 16].contains(&bits) {
            return Err(CaptureError::InvalidConfig(ConfigField::BitsPerSample));
        }

        let source_kind = match &options.audio_source {
            Some(spec) => spec
                .resolve()
                .ok_or(CaptureError::InvalidConfig(ConfigField::AudioSource))?,
            None => AudioSourceKind::Mic,
        };

        let requested = options.buffer_size.unwrap_or(DEFAULT_BUFFER_BYTES as i64);
        if requested < MIN_REQUESTED_BUFFER_BYTES {
            return Err(CaptureError::InvalidConfig(ConfigField::BufferSize));
        }
        let requested_buffer_bytes = usize::try_from(requested)
            .map_err(|_| CaptureError::InvalidConfig(ConfigField::BufferSize))?;

        // Ranges were checked above, so these narrowings cannot fail.
        let format = PcmFormat {
            sample_rate_hz: sample_rate as u32,
            channel_count: channels as u16,
            bits_per_sample: bits as u16,
        };

        let min_buffer_bytes = backend.min_buffer_bytes(&format, source_kind).map_err(|e| {
            CaptureError::UnsupportedDeviceConfig(format!(
                "{} Hz, {} channel(s), {}-bit: {}",
                format.sample_rate_hz, format.channel_count, format.bits_per_sample, e
            ))
        })?;

        let effective_buffer_bytes = requested_buffer_bytes.max(min_buffer_bytes);
        if effective_buffer_bytes > requested_buffer_bytes {
            log::warn!(
                "Buffer size increased to minimum required: {} (requested {})",
                effective_buffer_bytes,
                requested_buffer_bytes
            );
        }

        Ok(Self {
            format,
            source_kind,
            requested_buffer_bytes,
            min_buffer_bytes,
            effective_buffer_bytes,
        })
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.format.sample_rate_hz
    }

    pub fn channel_count(&self) -> u16 {
        self.format.channel_count
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.format.bits_per_sample
    }

    pub fn source_kind(&self) -> AudioSourceKind {
        self.source_kind
    }

    pub fn requested_buffer_bytes(&self) -> usize {
        self.requested_buffer_bytes
    }

    pub fn min_buffer_bytes(&self) -> usize {
        self.min_buffer_bytes
    }

    pub fn effective_buffer_bytes(&self) -> usize {
        self.effective_buffer_bytes
    }

    /// Buffer size handed to the device when it is opened: the effective
    /// buffer, but never less than twice the platform minimum.
    pub fn device_buffer_bytes(&self) -> usize {
        self.effective_buffer_bytes
            .max(self.min_buffer_bytes.saturating_mul(2))
    }

    /// Granularity of a single device read.
    pub fn read_chunk_bytes(&self) -> usize {
        (self.effective_buffer_bytes / 4).min(MAX_READ_CHUNK_BYTES)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.format.bytes_per_second()
    }

    /// Playback length of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        self.format.duration_of(bytes)
    }
}

/// What the capture loop does when the device keeps returning zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyReadPolicy {
    /// Keep polling for as long as the recording lasts.
    #[default]
    Tolerate,
    /// End the recording with `DeviceError::Starved` after this many
    /// consecutive empty reads.
    FailAfter(u32),
}

impl EmptyReadPolicy {
    pub fn is_starved(&self, consecutive_empty_reads: u32) -> bool {
        match self {
            Self::Tolerate => false,
            Self::FailAfter(limit) => consecutive_empty_reads >= (*limit).max(1),
        }
    }
}

/// Engine tuning that is fixed for the lifetime of a `CaptureSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long `stop()` waits for the capture worker before releasing the
    /// device anyway.
    pub stop_timeout_ms: u64,

    pub empty_read_policy: EmptyReadPolicy,

    /// Back-off after a zero-byte read.
    pub empty_read_backoff_ms: u64,
}

impl SessionSettings {
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        serde_json::from_str(json).map_err(|e| CaptureError::MalformedOptions(e.to_string()))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn empty_read_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_read_backoff_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 500,
            empty_read_policy: EmptyReadPolicy::Tolerate,
            empty_read_backoff_ms: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::DeviceError;
    use crate::simulated::SimulatedBackend;

    fn resolve(options: CaptureOptions) -> Result<CaptureConfig, CaptureError> {
        CaptureConfig::resolve(&options, &SimulatedBackend::new())
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = resolve(CaptureOptions::default()).unwrap();
        assert_eq!(config.sample_rate_hz(), 44100);
        assert_eq!(config.channel_count(), 1);
        assert_eq!(config.bits_per_sample(), 16);
        assert_eq!(config.source_kind(), AudioSourceKind::Mic);
        assert_eq!(config.requested_buffer_bytes(), 2048);
    }

    #[test]
    fn sample_rate_bounds_are_inclusive() {
        assert!(resolve(CaptureOptions::default().with_sample_rate(8000)).is_ok());
        assert!(resolve(CaptureOptions::default().with_sample_rate(48000)).is_ok());
        assert_eq!(
            resolve(CaptureOptions::default().with_sample_rate(7999)),
            Err(CaptureError::InvalidConfig(ConfigField::SampleRate))
        );
        assert_eq!(
            resolve(CaptureOptions::default().with_sample_rate(96000)),
            Err(CaptureError::InvalidConfig(ConfigField::SampleRate))
        );
    }

    #[test]
    fn each_field_is_identified() {
        assert_eq!(
            resolve(CaptureOptions::default().with_channels(3)),
            Err(CaptureError::InvalidConfig(ConfigField::Channels))
        );
        assert_eq!(
            resolve(CaptureOptions::default().with_bits_per_sample(24)),
            Err(CaptureError::InvalidConfig(ConfigField::BitsPerSample))
        );
        assert_eq!(
            resolve(CaptureOptions::default().with_audio_source(SourceSpec::Code(4))),
            Err(CaptureError::InvalidConfig(ConfigField::AudioSource))
        );
        assert_eq!(
            resolve(CaptureOptions::default().with_buffer_size(1023)),
            Err(CaptureError::InvalidConfig(ConfigField::BufferSize))
        );
    }

    #[test]
    fn first_violated_field_wins() {
        let options = CaptureOptions::default()
            .with_sample_rate(1)
            .with_channels(0)
            .with_buffer_size(0);
        assert_eq!(
            resolve(options),
            Err(CaptureError::InvalidConfig(ConfigField::SampleRate))
        );

        let options = CaptureOptions::default().with_bits_per_sample(12).with_buffer_size(0);
        assert_eq!(
            resolve(options),
            Err(CaptureError::InvalidConfig(ConfigField::BitsPerSample))
        );
    }

    #[test]
    fn undersized_buffer_is_raised_to_platform_minimum() {
        let backend = SimulatedBackend::new().with_min_buffer_bytes(3528);
        let options = CaptureOptions::default().with_buffer_size(2048);
        let config = CaptureConfig::resolve(&options, &backend).unwrap();

        assert_eq!(config.requested_buffer_bytes(), 2048);
        assert_eq!(config.min_buffer_bytes(), 3528);
        assert_eq!(config.effective_buffer_bytes(), 3528);
        assert_eq!(config.device_buffer_bytes(), 7056);
    }

    #[test]
    fn larger_request_is_kept() {
        let backend = SimulatedBackend::new().with_min_buffer_bytes(1024);
        let options = CaptureOptions::default().with_buffer_size(16384);
        let config = CaptureConfig::resolve(&options, &backend).unwrap();

        assert_eq!(config.effective_buffer_bytes(), 16384);
        assert_eq!(config.device_buffer_bytes(), 16384);
    }

    #[test]
    fn effective_buffer_covers_request_and_minimum_across_valid_inputs() {
        for min in [0usize, 640, 1024, 3528, 9000] {
            let backend = SimulatedBackend::new().with_min_buffer_bytes(min);
            for rate in [8000, 16000, 22050, 44100, 48000] {
                for channels in [1, 2] {
                    for bits in [8, 16] {
                        for requested in [1024, 2048, 4096, 10000] {
                            let options = CaptureOptions::default()
                                .with_sample_rate(rate)
                                .with_channels(channels)
                                .with_bits_per_sample(bits)
                                .with_buffer_size(requested);
                            let config = CaptureConfig::resolve(&options, &backend).unwrap();
                            assert!(config.effective_buffer_bytes() >= requested as usize);
                            assert!(config.effective_buffer_bytes() >= min);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn minimum_is_queried_for_the_configured_source() {
        let backend = SimulatedBackend::new()
            .with_min_buffer_bytes(2048)
            .with_source_min_buffer_bytes(AudioSourceKind::VoiceCommunication, 6000);

        let mic = resolve_with(&backend, CaptureOptions::default());
        assert_eq!(mic.min_buffer_bytes(), 2048);

        let call = resolve_with(
            &backend,
            CaptureOptions::default().with_audio_source(AudioSourceKind::VoiceCommunication),
        );
        assert_eq!(call.min_buffer_bytes(), 6000);
        assert_eq!(call.effective_buffer_bytes(), 6000);
    }

    fn resolve_with(backend: &SimulatedBackend, options: CaptureOptions) -> CaptureConfig {
        CaptureConfig::resolve(&options, backend).unwrap()
    }

    #[test]
    fn unsupported_combination_is_reported() {
        let backend = SimulatedBackend::new().with_unsupported_format(PcmFormat {
            sample_rate_hz: 22050,
            channel_count: 2,
            bits_per_sample: 8,
        });
        let options = CaptureOptions::default()
            .with_sample_rate(22050)
            .with_channels(2)
            .with_bits_per_sample(8);

        match CaptureConfig::resolve(&options, &backend) {
            Err(CaptureError::UnsupportedDeviceConfig(msg)) => {
                assert!(msg.contains("22050"));
                assert!(msg.contains(&DeviceError::BadValue.to_string()));
            }
            other => panic!("expected UnsupportedDeviceConfig, got {:?}", other),
        }
    }

    #[test]
    fn reports_data_rate_of_configured_format() {
        let config = resolve(CaptureOptions::default().with_sample_rate(16000)).unwrap();
        assert_eq!(config.bytes_per_second(), 32000);
        assert_eq!(config.duration_of(3200), Duration::from_millis(100));
    }

    #[test]
    fn read_chunk_is_quarter_buffer_capped_at_4096() {
        let backend = SimulatedBackend::new().with_min_buffer_bytes(0);

        let small = resolve_with_buffer(&backend, 2048);
        assert_eq!(small.read_chunk_bytes(), 512);

        let large = resolve_with_buffer(&backend, 65536);
        assert_eq!(large.read_chunk_bytes(), 4096);
    }

    fn resolve_with_buffer(backend: &SimulatedBackend, buffer: i64) -> CaptureConfig {
        CaptureConfig::resolve(&CaptureOptions::default().with_buffer_size(buffer), backend).unwrap()
    }

    #[test]
    fn options_parse_from_camel_case_json() {
        let options = CaptureOptions::from_json(
            r#"{"sampleRate":16000,"channels":2,"bitsPerSample":8,"audioSource":"VOICE_RECOGNITION","bufferSize":4096}"#,
        )
        .unwrap();
        let config = CaptureConfig::resolve(&options, &SimulatedBackend::new()).unwrap();

        assert_eq!(config.sample_rate_hz(), 16000);
        assert_eq!(config.channel_count(), 2);
        assert_eq!(config.bits_per_sample(), 8);
        assert_eq!(config.source_kind(), AudioSourceKind::VoiceRecognition);
        assert_eq!(config.requested_buffer_bytes(), 4096);
    }

    #[test]
    fn numeric_audio_source_codes_parse() {
        let options = CaptureOptions::from_json(r#"{"audioSource":7}"#).unwrap();
        let config = CaptureConfig::resolve(&options, &SimulatedBackend::new()).unwrap();
        assert_eq!(config.source_kind(), AudioSourceKind::VoiceCommunication);
    }

    #[test]
    fn malformed_json_is_not_a_field_error() {
        let err = CaptureOptions::from_json(r#"{"sampleRate":"fast"}"#).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedOptions(_)));
    }

    #[test]
    fn settings_default_and_partial_json() {
        let defaults = SessionSettings::default();
        assert_eq!(defaults.stop_timeout(), Duration::from_millis(500));
        assert_eq!(defaults.empty_read_policy, EmptyReadPolicy::Tolerate);

        let settings =
            SessionSettings::from_json(r#"{"stopTimeoutMs":50,"emptyReadPolicy":{"failAfter":3}}"#)
                .unwrap();
        assert_eq!(settings.stop_timeout_ms, 50);
        assert_eq!(settings.empty_read_policy, EmptyReadPolicy::FailAfter(3));
        assert_eq!(settings.empty_read_backoff_ms, 1);
    }

    #[test]
    fn starvation_policy() {
        assert!(!EmptyReadPolicy::Tolerate.is_starved(u32::MAX));
        assert!(!EmptyReadPolicy::FailAfter(3).is_starved(2));
        assert!(EmptyReadPolicy::FailAfter(3).is_starved(3));
        assert!(EmptyReadPolicy::FailAfter(0).is_starved(1));
    }
}
