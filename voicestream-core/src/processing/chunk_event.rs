use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::models::audio_models::AudioChunk;
use crate::models::error::CaptureError;
use crate::traits::chunk_sink::ChunkSink;

/// Text-safe form of an [`AudioChunk`] for event bridges that only carry
/// strings or JSON.
///
/// `data` is the raw PCM payload in standard base64 with no line wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    pub recording_id: String,
    pub sequence: u64,
    /// RFC 3339 capture timestamp.
    pub captured_at: String,
    pub byte_length: usize,
    pub data: String,
}

impl ChunkEvent {
    pub fn from_chunk(chunk: &AudioChunk) -> Self {
        Self {
            recording_id: chunk.recording_id().to_string(),
            sequence: chunk.sequence(),
            captured_at: chunk.captured_at().to_rfc3339(),
            byte_length: chunk.len(),
            data: STANDARD.encode(chunk.payload()),
        }
    }

    pub fn to_json(&self) -> Result<String, CaptureError> {
        serde_json::to_string(self)
            .map_err(|e| CaptureError::Unknown(format!("failed to serialize chunk event: {}", e)))
    }

    /// Decode `data` back into PCM bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, CaptureError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| CaptureError::Unknown(format!("invalid base64 payload: {}", e)))
    }
}

/// [`ChunkSink`] adapter that base64-frames each chunk and hands the
/// resulting [`ChunkEvent`] to `emit`.
pub struct Base64Sink<F> {
    emit: F,
}

impl<F> Base64Sink<F>
where
    F: Fn(ChunkEvent) -> Result<(), String> + Send + Sync,
{
    pub fn new(emit: F) -> Self {
        Self { emit }
    }
}

impl<F> ChunkSink for Base64Sink<F>
where
    F: Fn(ChunkEvent) -> Result<(), String> + Send + Sync,
{
    fn deliver(&self, chunk: AudioChunk) -> Result<(), String> {
        (self.emit)(ChunkEvent::from_chunk(&chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn chunk(payload: Vec<u8>) -> AudioChunk {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AudioChunk::new(Uuid::nil(), 7, at, payload)
    }

    #[test]
    fn event_carries_base64_payload() {
        let event = ChunkEvent::from_chunk(&chunk(vec![0x00, 0xff, 0x10, 0x80]));

        assert_eq!(event.sequence, 7);
        assert_eq!(event.byte_length, 4);
        assert_eq!(event.data, "AP8QgA==");
        assert_eq!(event.captured_at, "2024-05-01T12:00:00+00:00");
        assert_eq!(event.decode_payload().unwrap(), vec![0x00, 0xff, 0x10, 0x80]);
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let json = ChunkEvent::from_chunk(&chunk(vec![1, 2])).to_json().unwrap();

        assert!(json.contains("\"recordingId\":\"00000000-0000-0000-0000-000000000000\""));
        assert!(json.contains("\"byteLength\":2"));
        assert!(json.contains("\"capturedAt\""));
        assert!(json.contains("\"data\":\"AQI=\""));
    }

    #[test]
    fn bad_base64_is_an_error() {
        let mut event = ChunkEvent::from_chunk(&chunk(vec![1]));
        event.data = "not base64!".into();
        assert!(event.decode_payload().is_err());
    }

    #[test]
    fn sink_emits_events_and_passes_errors_through() {
        let seen = Mutex::new(Vec::new());
        let sink = Base64Sink::new(|event: ChunkEvent| {
            seen.lock().push(event.data.clone());
            if event.byte_length == 0 {
                Err("empty".into())
            } else {
                Ok(())
            }
        });

        assert!(sink.deliver(chunk(vec![1, 2, 3])).is_ok());
        assert_eq!(sink.deliver(chunk(Vec::new())), Err("empty".to_string()));
        assert_eq!(*seen.lock(), vec!["AQID".to_string(), String::new()]);
    }
}
