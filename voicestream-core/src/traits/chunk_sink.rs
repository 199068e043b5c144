use crate::models::audio_models::AudioChunk;

/// The single consumer of captured audio.
///
/// Called on the session's delivery thread, never on the capture thread, one
/// chunk at a time in sequence order. A slow sink delays later chunks but not
/// capture. Errors (and panics) are logged and counted; they never stop the
/// recording.
///
/// `stop()` waits for a delivery already in progress, but only within its stop
/// timeout. The device is stopped and released first, so a sink that blocks
/// never keeps the device open.
pub trait ChunkSink: Send + Sync {
    fn deliver(&self, chunk: AudioChunk) -> Result<(), String>;
}

impl<F> ChunkSink for F
where
    F: Fn(AudioChunk) -> Result<(), String> + Send + Sync,
{
    fn deliver(&self, chunk: AudioChunk) -> Result<(), String> {
        self(chunk)
    }
}
