//! WASAPI capture backend.
//!
//! Opens a capture endpoint in shared mode and asks the audio engine to
//! convert to the requested PCM format, so the session receives exactly the
//! sample rate, channel count and bit depth it was configured with.
//!
//! All COM objects live on the capture thread. The [`WasapiSource`] handed to
//! the session only holds channel ends and flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use windows::core::*;
use windows::Win32::Foundation::{E_INVALIDARG, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use voicestream_core::models::audio_models::{AudioSourceKind, PcmFormat};
use voicestream_core::models::config::CaptureConfig;
use voicestream_core::models::error::DeviceError;
use voicestream_core::traits::audio_source::{AudioBackend, AudioSourceHandle};

/// 100-nanosecond units per second, the unit of WASAPI durations.
const HNS_PER_SECOND: i64 = 10_000_000;

/// How often the capture thread drains the endpoint.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a blocked `read` waits before re-checking for `stop()`.
const READ_WAKE_INTERVAL: Duration = Duration::from_millis(50);

type Packet = std::result::Result<Vec<u8>, DeviceError>;

/// WASAPI shared-mode capture backend.
///
/// Targets the default capture endpoint for the role matching the configured
/// source kind, or a fixed endpoint by id.
#[derive(Debug, Clone, Default)]
pub struct WasapiBackend {
    device_id: Option<String>,
}

impl WasapiBackend {
    /// Capture from the system default microphone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from a specific endpoint by MMDevice id.
    pub fn with_device(id: impl Into<String>) -> Self {
        Self {
            device_id: Some(id.into()),
        }
    }
}

impl AudioBackend for WasapiBackend {
    type Source = WasapiSource;

    /// Two default device periods of audio, rounded up to whole frames, on
    /// the endpoint `open()` would pick for `source`.
    fn min_buffer_bytes(
        &self,
        format: &PcmFormat,
        source: AudioSourceKind,
    ) -> std::result::Result<usize, DeviceError> {
        let _com = ComScope::enter()?;
        let default_period = unsafe {
            let device = endpoint(self.device_id.as_deref(), source)?;
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| device_error("Activate failed", e))?;

            let mut default_period: i64 = 0;
            client
                .GetDevicePeriod(Some(&mut default_period), None)
                .map_err(|e| device_error("GetDevicePeriod failed", e))?;
            default_period
        };

        Ok(bytes_for_duration(format, default_period * 2))
    }

    fn open(&self, config: &CaptureConfig) -> std::result::Result<WasapiSource, DeviceError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (data_tx, data_rx) = crossbeam_channel::unbounded();
        let stopped = Arc::new(AtomicBool::new(false));

        let request = CaptureRequest {
            device_id: self.device_id.clone(),
            kind: config.source_kind(),
            format: config.format(),
            buffer_duration: duration_for_bytes(&config.format(), config.device_buffer_bytes()),
        };

        let thread = {
            let stopped = Arc::clone(&stopped);
            thread::Builder::new()
                .name("wasapi-capture".into())
                .spawn(move || capture_thread(request, &stopped, ready_tx, &data_tx))
                .map_err(|e| DeviceError::Failure(format!("failed to spawn capture thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(DeviceError::Failure("capture thread exited during open".into()));
            }
        }

        log::debug!(
            "WASAPI capture open: {} Hz, {} ch, {} bit, {} byte buffer",
            config.sample_rate_hz(),
            config.channel_count(),
            config.bits_per_sample(),
            config.device_buffer_bytes()
        );

        Ok(WasapiSource {
            data: data_rx,
            pending: Mutex::new(Vec::new()),
            stopped,
            released: AtomicBool::new(false),
            thread: Mutex::new(Some(thread)),
        })
    }
}

/// A running WASAPI capture stream.
///
/// `read` blocks until the capture thread has bytes, carrying any excess over
/// to the next call.
pub struct WasapiSource {
    data: Receiver<Packet>,
    pending: Mutex<Vec<u8>>,
    stopped: Arc<AtomicBool>,
    released: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WasapiSource {
    fn take_pending(&self, buffer: &mut [u8]) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        n
    }
}

impl AudioSourceHandle for WasapiSource {
    fn read(&self, buffer: &mut [u8]) -> std::result::Result<usize, DeviceError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(DeviceError::DeadObject);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DeviceError::InvalidOperation);
        }

        let n = self.take_pending(buffer);
        if n > 0 {
            return Ok(n);
        }

        loop {
            match self.data.recv_timeout(READ_WAKE_INTERVAL) {
                Ok(Ok(bytes)) => {
                    let n = bytes.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.pending.lock().extend_from_slice(&bytes[n..]);
                    }
                    return Ok(n);
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return Err(DeviceError::InvalidOperation);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(if self.stopped.load(Ordering::SeqCst) {
                        DeviceError::InvalidOperation
                    } else {
                        DeviceError::Failure("capture thread exited".into())
                    });
                }
            }
        }
    }

    fn stop(&self) -> std::result::Result<(), DeviceError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> std::result::Result<(), DeviceError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.pending.lock().clear();

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                return Err(DeviceError::Failure("capture thread panicked".into()));
            }
        }
        Ok(())
    }
}

impl Drop for WasapiSource {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Error releasing WASAPI source: {}", e);
        }
    }
}

struct CaptureRequest {
    device_id: Option<String>,
    kind: AudioSourceKind,
    format: PcmFormat,
    buffer_duration: i64,
}

/// Capture thread body.
///
/// Setup failures are reported through `ready` and fail `open()`; failures
/// while streaming are queued on `data` for the next `read`.
fn capture_thread(
    request: CaptureRequest,
    stopped: &AtomicBool,
    ready: Sender<std::result::Result<(), DeviceError>>,
    data: &Sender<Packet>,
) {
    let _com = match ComScope::enter() {
        Ok(com) => com,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let (audio_client, capture_client) = match unsafe { start_stream(&request) } {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("WASAPI capture failed to start: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let block_align = request.format.bytes_per_frame();
    let drained = unsafe { drain_until_stopped(&capture_client, block_align, stopped, data) };
    unsafe {
        let _ = audio_client.Stop();
    }

    if let Err(e) = drained {
        log::error!("WASAPI capture error: {}", e);
        let _ = data.send(Err(e));
    }
}

/// Sequence:
/// 1. Resolve the endpoint (by id, or default for the source kind's role)
/// 2. Activate IAudioClient
/// 3. Initialize shared mode with PCM auto-conversion to the requested format
/// 4. Get IAudioCaptureClient, register with MMCSS, start
unsafe fn start_stream(
    request: &CaptureRequest,
) -> std::result::Result<(IAudioClient, IAudioCaptureClient), DeviceError> {
    let device = endpoint(request.device_id.as_deref(), request.kind)?;
    let audio_client: IAudioClient = device
        .Activate(CLSCTX_ALL, None)
        .map_err(|e| device_error("Activate failed", e))?;

    let wave_format = wave_format(&request.format);
    audio_client
        .Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY
                | AUDCLNT_STREAMFLAGS_NOPERSIST,
            request.buffer_duration,
            0,
            &wave_format,
            None,
        )
        .map_err(|e| device_error("IAudioClient::Initialize failed", e))?;

    let capture_client: IAudioCaptureClient = audio_client
        .GetService()
        .map_err(|e| device_error("GetService failed", e))?;

    let mut task_index: u32 = 0;
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

    audio_client
        .Start()
        .map_err(|e| device_error("IAudioClient::Start failed", e))?;

    Ok((audio_client, capture_client))
}

unsafe fn drain_until_stopped(
    capture_client: &IAudioCaptureClient,
    block_align: usize,
    stopped: &AtomicBool,
    data: &Sender<Packet>,
) -> std::result::Result<(), DeviceError> {
    while !stopped.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);

        let mut packet_length = capture_client
            .GetNextPacketSize()
            .map_err(|e| device_error("GetNextPacketSize failed", e))?;

        while packet_length > 0 {
            let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
            let mut num_frames: u32 = 0;
            let mut flags: u32 = 0;

            capture_client
                .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                .map_err(|e| device_error("GetBuffer failed", e))?;

            let byte_count = num_frames as usize * block_align;
            if byte_count > 0 && !buffer_ptr.is_null() {
                let bytes = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                    vec![0u8; byte_count]
                } else {
                    std::slice::from_raw_parts(buffer_ptr, byte_count).to_vec()
                };
                if data.send(Ok(bytes)).is_err() {
                    // Source dropped without release; nothing left to feed.
                    let _ = capture_client.ReleaseBuffer(num_frames);
                    return Ok(());
                }
            }

            capture_client
                .ReleaseBuffer(num_frames)
                .map_err(|e| device_error("ReleaseBuffer failed", e))?;

            packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| device_error("GetNextPacketSize failed", e))?;
        }
    }
    Ok(())
}

unsafe fn endpoint(device_id: Option<&str>, kind: AudioSourceKind) -> std::result::Result<IMMDevice, DeviceError> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| device_error("failed to create enumerator", e))?;

    match device_id {
        Some(id) => {
            let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
            enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|e| device_error("GetDevice failed", e))
        }
        None => enumerator
            .GetDefaultAudioEndpoint(eCapture, endpoint_role(kind))
            .map_err(|e| device_error("no default capture endpoint", e)),
    }
}

/// Voice-communication capture follows the communications endpoint; all
/// other kinds use the console default.
pub(crate) fn endpoint_role(kind: AudioSourceKind) -> ERole {
    match kind {
        AudioSourceKind::VoiceCommunication => eCommunications,
        _ => eConsole,
    }
}

pub(crate) fn wave_format(format: &PcmFormat) -> WAVEFORMATEX {
    let block_align = format.bytes_per_frame() as u16;
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM as u16,
        nChannels: format.channel_count,
        nSamplesPerSec: format.sample_rate_hz,
        nAvgBytesPerSec: format.sample_rate_hz * block_align as u32,
        nBlockAlign: block_align,
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Bytes covering `hns` of audio, rounded up to whole frames.
pub(crate) fn bytes_for_duration(format: &PcmFormat, hns: i64) -> usize {
    let frame = format.bytes_per_frame().max(1) as i64;
    let frames = (format.sample_rate_hz as i64 * hns.max(0) + HNS_PER_SECOND - 1) / HNS_PER_SECOND;
    (frames * frame) as usize
}

pub(crate) fn duration_for_bytes(format: &PcmFormat, bytes: usize) -> i64 {
    let per_second = format.bytes_per_second().max(1) as i64;
    bytes as i64 * HNS_PER_SECOND / per_second
}

fn device_error(context: &str, e: Error) -> DeviceError {
    let code = e.code();
    if code == AUDCLNT_E_DEVICE_INVALIDATED {
        DeviceError::DeadObject
    } else if code == AUDCLNT_E_UNSUPPORTED_FORMAT || code == E_INVALIDARG {
        DeviceError::BadValue
    } else {
        DeviceError::Failure(format!("{}: {}", context, e))
    }
}

/// COM apartment for the current thread, uninitialized on drop when this
/// scope initialized it.
pub(crate) struct ComScope {
    owned: bool,
}

impl ComScope {
    pub(crate) fn enter() -> std::result::Result<Self, DeviceError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // Already in an STA; COM is usable, just not ours to tear down.
            return Ok(Self { owned: false });
        }
        hr.ok()
            .map_err(|e| DeviceError::Failure(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_16k() -> PcmFormat {
        PcmFormat {
            sample_rate_hz: 16000,
            channel_count: 1,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn ten_ms_period_rounds_to_whole_frames() {
        assert_eq!(bytes_for_duration(&mono_16k(), 100_000), 320);

        let stereo_44k = PcmFormat {
            sample_rate_hz: 44100,
            channel_count: 2,
            bits_per_sample: 16,
        };
        // 441 frames × 4 bytes.
        assert_eq!(bytes_for_duration(&stereo_44k, 100_000), 1764);
        assert_eq!(bytes_for_duration(&stereo_44k, 1) % 4, 0);
    }

    #[test]
    fn buffer_bytes_convert_to_hns() {
        assert_eq!(duration_for_bytes(&mono_16k(), 32000), HNS_PER_SECOND);
        assert_eq!(duration_for_bytes(&mono_16k(), 3200), HNS_PER_SECOND / 10);
    }

    #[test]
    fn wave_format_describes_requested_pcm() {
        let fmt = wave_format(&mono_16k());
        assert_eq!(fmt.wFormatTag, WAVE_FORMAT_PCM as u16);
        assert_eq!(fmt.nBlockAlign, 2);
        assert_eq!(fmt.nAvgBytesPerSec, 32000);
        assert_eq!(fmt.cbSize, 0);
    }

    #[test]
    fn communication_capture_uses_communications_role() {
        assert_eq!(endpoint_role(AudioSourceKind::VoiceCommunication), eCommunications);
        assert_eq!(endpoint_role(AudioSourceKind::Mic), eConsole);
        assert_eq!(endpoint_role(AudioSourceKind::Default), eConsole);
    }
}
