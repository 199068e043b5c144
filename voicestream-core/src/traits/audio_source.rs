use crate::models::audio_models::{AudioSourceKind, PcmFormat};
use crate::models::config::CaptureConfig;
use crate::models::error::DeviceError;

/// A live connection to a capture device.
///
/// The session shares one handle between the capture worker (which calls
/// `read`) and whichever thread stops or tears the session down (which calls
/// `stop` and `release`), so every method takes `&self`.
///
/// Implementations must make `stop` interrupt or shorten a blocked `read` as
/// far as the platform allows, tolerate `read` after `stop`, and treat a
/// repeated `release` as a no-op.
pub trait AudioSourceHandle: Send + Sync {
    /// Blocking read of up to `buffer.len()` bytes of raw little-endian PCM.
    ///
    /// `Ok(0)` means no data was available this time round; errors are
    /// terminal for the current recording.
    fn read(&self, buffer: &mut [u8]) -> Result<usize, DeviceError>;

    /// Stop the device from producing data.
    fn stop(&self) -> Result<(), DeviceError>;

    /// Free the underlying device.
    fn release(&self) -> Result<(), DeviceError>;
}

/// Platform capture backend: answers format queries and opens devices.
///
/// Implemented by:
/// - `SimulatedBackend` (this crate)
/// - `WasapiBackend` (voicestream-windows)
pub trait AudioBackend: Send + Sync {
    type Source: AudioSourceHandle + 'static;

    /// Smallest device buffer, in bytes, the platform accepts for `format` on
    /// the device a recording from `source` would open.
    ///
    /// An error means the combination is not supported on this device.
    fn min_buffer_bytes(&self, format: &PcmFormat, source: AudioSourceKind) -> Result<usize, DeviceError>;

    /// Open and start a device for `config`.
    ///
    /// The returned source is already producing data.
    fn open(&self, config: &CaptureConfig) -> Result<Self::Source, DeviceError>;
}
