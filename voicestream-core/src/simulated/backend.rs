use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::models::audio_models::{AudioSourceKind, PcmFormat};
use crate::models::config::CaptureConfig;
use crate::models::error::DeviceError;
use crate::traits::audio_source::{AudioBackend, AudioSourceHandle};

/// One scripted step of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Return these bytes (truncated to the read buffer).
    Data(Vec<u8>),
    /// Return this many bytes of a counting pattern (0, 1, 2, … wrapping)
    /// that continues across reads, so concatenated payloads are checkable.
    Bytes(usize),
    /// Return `Ok(0)`.
    Empty,
    /// Fail the read.
    Fail(DeviceError),
    /// Wait this long, or until the source is stopped, then go on to the next
    /// step within the same read.
    Pause(Duration),
    /// Sleep this long ignoring `stop()`, like a driver read that cannot be
    /// interrupted, then go on to the next step.
    Hang(Duration),
}

/// Open/stop/release/read counters, shared by a backend and its sources.
#[derive(Debug, Default)]
struct SourceStats {
    opened: AtomicUsize,
    stopped: AtomicUsize,
    released: AtomicUsize,
    reads: AtomicUsize,
    last_device_buffer_bytes: AtomicUsize,
}

/// Deterministic in-process audio backend.
///
/// Every `open()` yields a fresh [`SimulatedSource`] replaying the same script.
/// Once a non-repeating script runs out, reads block until the source is
/// stopped, like a live device with nothing to say.
pub struct SimulatedBackend {
    min_buffer_bytes: Option<usize>,
    source_min_buffer_bytes: Vec<(AudioSourceKind, usize)>,
    unsupported: Vec<PcmFormat>,
    open_error: Mutex<Option<DeviceError>>,
    release_error: Option<DeviceError>,
    script: Vec<ReadStep>,
    repeat: bool,
    stats: Arc<SourceStats>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            min_buffer_bytes: None,
            source_min_buffer_bytes: Vec::new(),
            unsupported: Vec::new(),
            open_error: Mutex::new(None),
            release_error: None,
            script: Vec::new(),
            repeat: false,
            stats: Arc::new(SourceStats::default()),
        }
    }

    /// A device producing `bytes_per_read` bytes every `interval`, forever.
    pub fn streaming(bytes_per_read: usize, interval: Duration) -> Self {
        Self::new()
            .with_script(vec![ReadStep::Pause(interval), ReadStep::Bytes(bytes_per_read)])
            .repeating()
    }

    /// Fix the platform minimum buffer. By default it is 40 ms of audio in
    /// the requested format.
    pub fn with_min_buffer_bytes(mut self, bytes: usize) -> Self {
        self.min_buffer_bytes = Some(bytes);
        self
    }

    /// Override the minimum buffer for one source kind, as when that kind
    /// maps to a different endpoint.
    pub fn with_source_min_buffer_bytes(mut self, source: AudioSourceKind, bytes: usize) -> Self {
        self.source_min_buffer_bytes.push((source, bytes));
        self
    }

    pub fn with_unsupported_format(mut self, format: PcmFormat) -> Self {
        self.unsupported.push(format);
        self
    }

    pub fn with_script(mut self, script: Vec<ReadStep>) -> Self {
        self.script = script;
        self
    }

    /// Replay the script from the start once it runs out.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn failing_open(self, error: DeviceError) -> Self {
        self.set_open_error(Some(error));
        self
    }

    /// `release()` on every source reports this error (after releasing).
    pub fn failing_release(mut self, error: DeviceError) -> Self {
        self.release_error = Some(error);
        self
    }

    pub fn set_open_error(&self, error: Option<DeviceError>) {
        *self.open_error.lock() = error;
    }

    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stats.stopped.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.stats.reads.load(Ordering::SeqCst)
    }

    /// Sources opened and not yet released.
    pub fn live_sources(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }

    /// Device buffer size requested by the most recent `open()`.
    pub fn last_device_buffer_bytes(&self) -> usize {
        self.stats.last_device_buffer_bytes.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    type Source = SimulatedSource;

    fn min_buffer_bytes(&self, format: &PcmFormat, source: AudioSourceKind) -> Result<usize, DeviceError> {
        if self.unsupported.contains(format) {
            return Err(DeviceError::BadValue);
        }
        if let Some(&(_, bytes)) = self.source_min_buffer_bytes.iter().find(|(kind, _)| *kind == source) {
            return Ok(bytes);
        }
        Ok(self
            .min_buffer_bytes
            .unwrap_or_else(|| format.bytes_per_second() / 25))
    }

    fn open(&self, config: &CaptureConfig) -> Result<SimulatedSource, DeviceError> {
        if let Some(error) = self.open_error.lock().clone() {
            return Err(error);
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        self.stats
            .last_device_buffer_bytes
            .store(config.device_buffer_bytes(), Ordering::SeqCst);

        Ok(SimulatedSource {
            script: self.script.clone(),
            repeat: self.repeat,
            release_error: self.release_error.clone(),
            state: Mutex::new(SourceState::default()),
            wake: Condvar::new(),
            stats: Arc::clone(&self.stats),
        })
    }
}

#[derive(Debug, Default)]
struct SourceState {
    cursor: usize,
    next_byte: u8,
    stopped: bool,
    released: bool,
}

/// A device opened by [`SimulatedBackend`].
pub struct SimulatedSource {
    script: Vec<ReadStep>,
    repeat: bool,
    release_error: Option<DeviceError>,
    state: Mutex<SourceState>,
    wake: Condvar,
    stats: Arc<SourceStats>,
}

impl SimulatedSource {
    fn next_step(&self, state: &mut SourceState) -> Option<ReadStep> {
        if state.cursor >= self.script.len() {
            if !self.repeat || self.script.is_empty() {
                return None;
            }
            state.cursor = 0;
        }
        let step = self.script[state.cursor].clone();
        state.cursor += 1;
        Some(step)
    }

    fn pause(&self, state: &mut MutexGuard<'_, SourceState>, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !state.stopped && !state.released {
            if self.wake.wait_until(state, deadline).timed_out() {
                break;
            }
        }
    }
}

impl AudioSourceHandle for SimulatedSource {
    fn read(&self, buffer: &mut [u8]) -> Result<usize, DeviceError> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        loop {
            if state.released {
                return Err(DeviceError::DeadObject);
            }
            if state.stopped {
                return Err(DeviceError::InvalidOperation);
            }

            let Some(step) = self.next_step(&mut state) else {
                self.wake.wait(&mut state);
                continue;
            };

            match step {
                ReadStep::Data(bytes) => {
                    let n = bytes.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&bytes[..n]);
                    return Ok(n);
                }
                ReadStep::Bytes(count) => {
                    let n = count.min(buffer.len());
                    for byte in &mut buffer[..n] {
                        *byte = state.next_byte;
                        state.next_byte = state.next_byte.wrapping_add(1);
                    }
                    return Ok(n);
                }
                ReadStep::Empty => return Ok(0),
                ReadStep::Fail(error) => return Err(error),
                ReadStep::Pause(duration) => self.pause(&mut state, duration),
                ReadStep::Hang(duration) => {
                    MutexGuard::unlocked(&mut state, || thread::sleep(duration));
                }
            }
        }
    }

    fn stop(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            self.stats.stopped.fetch_add(1, Ordering::SeqCst);
        }
        self.wake.notify_all();
        Ok(())
    }

    fn release(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.released {
            state.released = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
        self.wake.notify_all();
        match &self.release_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::CaptureOptions;

    fn open(backend: &SimulatedBackend) -> SimulatedSource {
        let config = CaptureConfig::resolve(&CaptureOptions::default(), backend).unwrap();
        backend.open(&config).unwrap()
    }

    #[test]
    fn default_minimum_is_forty_milliseconds() {
        let backend = SimulatedBackend::new();
        let format = PcmFormat {
            sample_rate_hz: 44100,
            channel_count: 1,
            bits_per_sample: 16,
        };
        assert_eq!(backend.min_buffer_bytes(&format, AudioSourceKind::Mic), Ok(3528));
    }

    #[test]
    fn counting_pattern_continues_across_reads() {
        let backend = SimulatedBackend::new().with_script(vec![ReadStep::Bytes(3), ReadStep::Bytes(2)]);
        let source = open(&backend);
        let mut buf = [0u8; 8];

        assert_eq!(source.read(&mut buf), Ok(3));
        assert_eq!(&buf[..3], &[0, 1, 2]);
        assert_eq!(source.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], &[3, 4]);
    }

    #[test]
    fn data_is_truncated_to_buffer() {
        let backend = SimulatedBackend::new().with_script(vec![ReadStep::Data(vec![9; 10])]);
        let source = open(&backend);
        let mut buf = [0u8; 4];

        assert_eq!(source.read(&mut buf), Ok(4));
        assert_eq!(buf, [9; 4]);
    }

    #[test]
    fn exhausted_script_blocks_until_stopped() {
        let backend = SimulatedBackend::new();
        let source = Arc::new(open(&backend));

        let reader = {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                source.read(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(20));
        source.stop().unwrap();
        assert_eq!(reader.join().unwrap(), Err(DeviceError::InvalidOperation));
        assert_eq!(backend.stopped(), 1);
    }

    #[test]
    fn release_is_counted_once() {
        let backend = SimulatedBackend::new();
        let source = open(&backend);

        source.release().unwrap();
        source.release().unwrap();
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.released(), 1);
        assert_eq!(backend.live_sources(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf), Err(DeviceError::DeadObject));
    }

    #[test]
    fn repeating_script_wraps() {
        let backend = SimulatedBackend::new()
            .with_script(vec![ReadStep::Empty, ReadStep::Bytes(1)])
            .repeating();
        let source = open(&backend);
        let mut buf = [0u8; 4];

        assert_eq!(source.read(&mut buf), Ok(0));
        assert_eq!(source.read(&mut buf), Ok(1));
        assert_eq!(source.read(&mut buf), Ok(0));
        assert_eq!(source.read(&mut buf), Ok(1));
        assert_eq!(backend.reads(), 4);
    }

    #[test]
    fn open_error_can_be_toggled() {
        let backend = SimulatedBackend::new().failing_open(DeviceError::Failure("busy".into()));
        let config = CaptureConfig::resolve(&CaptureOptions::default(), &backend).unwrap();
        assert!(backend.open(&config).is_err());

        backend.set_open_error(None);
        assert!(backend.open(&config).is_ok());
        assert_eq!(backend.opened(), 1);
    }
}
