use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::audio_models::AudioChunk;
use crate::models::diagnostics::LoopReport;
use crate::models::error::DeviceError;
use crate::models::state::SessionState;
use crate::traits::capture_observer::CaptureObserver;
use crate::traits::chunk_sink::ChunkSink;
use crate::traits::permission::PermissionProvider;

/// Permission answer that can be flipped at runtime.
pub struct StaticPermission {
    granted: AtomicBool,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self {
            granted: AtomicBool::new(true),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: AtomicBool::new(false),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionProvider for StaticPermission {
    fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

/// Sink that keeps every chunk it receives.
#[derive(Default)]
pub struct CollectingSink {
    chunks: Mutex<Vec<AudioChunk>>,
    arrived: Condvar,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.chunks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.chunks.lock().iter().map(AudioChunk::sequence).collect()
    }

    /// Concatenated payloads, in arrival order.
    pub fn payload(&self) -> Vec<u8> {
        self.chunks
            .lock()
            .iter()
            .flat_map(|chunk| chunk.payload().iter().copied())
            .collect()
    }

    /// Block until at least `count` chunks arrived or `timeout` elapsed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut chunks = self.chunks.lock();
        while chunks.len() < count {
            if self.arrived.wait_until(&mut chunks, deadline).timed_out() {
                return chunks.len() >= count;
            }
        }
        true
    }
}

impl ChunkSink for CollectingSink {
    fn deliver(&self, chunk: AudioChunk) -> Result<(), String> {
        self.chunks.lock().push(chunk);
        self.arrived.notify_all();
        Ok(())
    }
}

#[derive(Default)]
struct Events {
    states: Vec<SessionState>,
    device_errors: Vec<DeviceError>,
    reports: Vec<LoopReport>,
}

/// Observer that records every notification.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Events>,
    changed: Condvar,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events.lock().states.clone()
    }

    pub fn device_errors(&self) -> Vec<DeviceError> {
        self.events.lock().device_errors.clone()
    }

    pub fn reports(&self) -> Vec<LoopReport> {
        self.events.lock().reports.clone()
    }

    /// Block until `count` loop reports arrived or `timeout` elapsed.
    pub fn wait_for_reports(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while events.reports.len() < count {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return events.reports.len() >= count;
            }
        }
        true
    }
}

impl CaptureObserver for EventLog {
    fn on_state_changed(&self, state: SessionState) {
        self.events.lock().states.push(state);
        self.changed.notify_all();
    }

    fn on_device_error(&self, error: &DeviceError) {
        self.events.lock().device_errors.push(error.clone());
        self.changed.notify_all();
    }

    fn on_loop_finished(&self, report: &LoopReport) {
        self.events.lock().reports.push(report.clone());
        self.changed.notify_all();
    }
}
