use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::config::{CaptureConfig, CaptureOptions, SessionSettings};
use crate::models::diagnostics::{CaptureDiagnostics, LoopReport, StopOutcome};
use crate::models::error::{CaptureError, DeviceError};
use crate::models::state::SessionState;
use crate::session::capture_loop::{CaptureLoop, WorkerHandle};
use crate::session::delivery::{spawn_delivery, DeliveryGate};
use crate::traits::audio_source::{AudioBackend, AudioSourceHandle};
use crate::traits::capture_observer::CaptureObserver;
use crate::traits::chunk_sink::ChunkSink;
use crate::traits::permission::PermissionProvider;

/// Why the stop path is running.
pub(crate) enum StopCause {
    Requested,
    /// The capture worker hit a terminal device error. Only honoured if the
    /// session is still on the same recording.
    DeviceError { generation: u64, error: DeviceError },
}

/// Resources of the recording in progress. Present exactly while the state is
/// `Recording`; the stop and teardown paths take it out under the lock.
struct ActiveRecording<S> {
    recording_id: Uuid,
    source: Arc<S>,
    cancel: Arc<AtomicBool>,
    gate: Arc<DeliveryGate>,
    worker: Option<WorkerHandle>,
}

/// Everything the session lock protects.
struct SessionCore<S> {
    state: SessionState,
    config: Option<CaptureConfig>,
    /// Bumped by every `start()`; lets a worker tell its own recording apart
    /// from a later one.
    generation: u64,
    active: Option<ActiveRecording<S>>,
}

/// State shared between the session handle, the capture worker and the
/// delivery thread.
pub(crate) struct Shared<B: AudioBackend> {
    backend: B,
    permissions: Arc<dyn PermissionProvider>,
    sink: RwLock<Arc<dyn ChunkSink>>,
    observer: RwLock<Option<Arc<dyn CaptureObserver>>>,
    settings: SessionSettings,
    core: Mutex<SessionCore<B::Source>>,
    /// Counters of the current (or most recent) recording.
    diagnostics: RwLock<Arc<Mutex<CaptureDiagnostics>>>,
}

impl<B: AudioBackend + 'static> Shared<B> {
    pub(crate) fn is_recording(&self, generation: u64) -> bool {
        let core = self.core.lock();
        core.state.is_recording() && core.generation == generation
    }

    pub(crate) fn sink(&self) -> Arc<dyn ChunkSink> {
        Arc::clone(&self.sink.read())
    }

    pub(crate) fn notify_loop_finished(&self, report: &LoopReport) {
        if let Some(observer) = self.observer() {
            observer.on_loop_finished(report);
        }
    }

    fn observer(&self) -> Option<Arc<dyn CaptureObserver>> {
        self.observer.read().clone()
    }

    fn notify_state(&self, state: SessionState) {
        if let Some(observer) = self.observer() {
            observer.on_state_changed(state);
        }
    }

    /// Recording → Stopping → Configured.
    ///
    /// Shared by `stop()` and by a capture worker that hit a device error. A
    /// no-op unless the session is recording.
    pub(crate) fn stop_recording(&self, cause: StopCause) -> StopOutcome {
        let active = {
            let mut core = self.core.lock();
            if !core.state.is_recording() {
                return StopOutcome::NotRecording;
            }
            if let StopCause::DeviceError { generation, .. } = &cause {
                if *generation != core.generation {
                    return StopOutcome::NotRecording;
                }
            }
            core.state = SessionState::Stopping;
            core.active.take()
        };

        let from_worker = match &cause {
            StopCause::Requested => false,
            StopCause::DeviceError { error, .. } => {
                if let Some(observer) = self.observer() {
                    observer.on_device_error(error);
                }
                true
            }
        };
        self.notify_state(SessionState::Stopping);

        let outcome = match active {
            Some(active) => {
                let recording_id = active.recording_id;
                let outcome = self.shut_down(active, !from_worker);
                log::info!("Recording {} stopped ({:?})", recording_id, outcome);
                outcome
            }
            None => StopOutcome::Clean,
        };

        // Teardown may have run meanwhile; only settle our own transition.
        let settled = {
            let mut core = self.core.lock();
            if core.state == SessionState::Stopping {
                core.state = SessionState::Configured;
                true
            } else {
                false
            }
        };
        if settled {
            self.notify_state(SessionState::Configured);
        }

        outcome
    }

    /// Close delivery, cancel the worker and stop the device, wait for the
    /// worker (unless the caller is the worker itself), release the device,
    /// then wait for a sink call still in progress.
    ///
    /// Both waits share one stop timeout, so neither a stuck read nor a stuck
    /// sink holds the device or the caller past it. Never fails: device errors
    /// here are logged and swallowed.
    fn shut_down(&self, active: ActiveRecording<B::Source>, wait_for_worker: bool) -> StopOutcome {
        let deadline = Instant::now() + self.settings.stop_timeout();

        active.gate.close();
        active.cancel.store(true, Ordering::SeqCst);

        if let Err(e) = active.source.stop() {
            log::warn!("Error stopping audio source: {}", e);
        }

        let mut outcome = StopOutcome::Clean;
        if let Some(worker) = active.worker {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait_for_worker && !worker.join_within(remaining) {
                log::warn!(
                    "Recording job didn't finish gracefully within {:?}, releasing device anyway",
                    self.settings.stop_timeout()
                );
                outcome = StopOutcome::WorkerAbandoned;
            }
        }

        if let Err(e) = active.source.release() {
            log::warn!("Error releasing audio source: {}", e);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !active.gate.wait_idle(remaining) {
            log::warn!("Chunk sink still busy after {:?}, leaving it behind", self.settings.stop_timeout());
            if outcome == StopOutcome::Clean {
                outcome = StopOutcome::DeliveryAbandoned;
            }
        }

        outcome
    }
}

/// Continuous capture session: one device, one producer, one consumer.
///
/// All operations take `&self` and may be called from any thread; share the
/// session with `Arc`. Lifecycle transitions are serialized by a single lock
/// held around the state check, device open and state update, so concurrent
/// `start()` calls open at most one device.
///
/// Data flow:
/// ```text
/// [AudioBackend::open] → [capture worker: read → AudioChunk]
///                            → [crossbeam channel] → [delivery thread] → [ChunkSink]
/// ```
///
/// Dropping the session tears it down.
pub struct CaptureSession<B: AudioBackend + 'static> {
    shared: Arc<Shared<B>>,
}

impl<B: AudioBackend + 'static> CaptureSession<B> {
    pub fn new(backend: B, permissions: Arc<dyn PermissionProvider>, sink: Arc<dyn ChunkSink>) -> Self {
        Self::with_settings(backend, permissions, sink, SessionSettings::default())
    }

    pub fn with_settings(
        backend: B,
        permissions: Arc<dyn PermissionProvider>,
        sink: Arc<dyn ChunkSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                permissions,
                sink: RwLock::new(sink),
                observer: RwLock::new(None),
                settings,
                core: Mutex::new(SessionCore {
                    state: SessionState::Uninitialized,
                    config: None,
                    generation: 0,
                    active: None,
                }),
                diagnostics: RwLock::new(Arc::new(Mutex::new(CaptureDiagnostics::default()))),
            }),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn CaptureObserver>) {
        *self.shared.observer.write() = Some(observer);
    }

    /// Register a new consumer in place of the current one.
    ///
    /// Takes effect from the next chunk handed out; the previous sink receives
    /// nothing further.
    pub fn replace_sink(&self, sink: Arc<dyn ChunkSink>) {
        *self.shared.sink.write() = sink;
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state
    }

    pub fn current_config(&self) -> Option<CaptureConfig> {
        self.shared.core.lock().config.clone()
    }

    /// Id of the recording in progress.
    pub fn recording_id(&self) -> Option<Uuid> {
        self.shared
            .core
            .lock()
            .active
            .as_ref()
            .map(|active| active.recording_id)
    }

    /// Counters of the current recording, or of the last one once stopped.
    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.shared.diagnostics.read().lock().clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Validate `options` and make them the session's config.
    /// Transitions: uninitialized/configured → configured.
    pub fn configure(&self, options: &CaptureOptions) -> Result<(), CaptureError> {
        let previous = {
            let mut core = self.shared.core.lock();
            if !core.state.accepts_config() {
                return Err(CaptureError::InvalidState {
                    operation: "configure",
                    state: core.state,
                });
            }

            let config = CaptureConfig::resolve(options, &self.shared.backend)?;
            log::debug!(
                "Capture configured - SampleRate: {}, Channels: {}, BitsPerSample: {}, AudioSource: {}, BufferSize: {}, MinBufferSize: {}",
                config.sample_rate_hz(),
                config.channel_count(),
                config.bits_per_sample(),
                config.source_kind().name(),
                config.effective_buffer_bytes(),
                config.min_buffer_bytes()
            );

            core.config = Some(config);
            std::mem::replace(&mut core.state, SessionState::Configured)
        };

        if previous != SessionState::Configured {
            self.shared.notify_state(SessionState::Configured);
        }
        Ok(())
    }

    /// Parse JSON capture options (camelCase keys) and configure.
    pub fn configure_json(&self, json: &str) -> Result<(), CaptureError> {
        self.configure(&CaptureOptions::from_json(json)?)
    }

    /// Open the device and start streaming chunks to the sink.
    /// Transitions: configured → recording. A no-op while already recording.
    pub fn start(&self) -> Result<(), CaptureError> {
        let shared = &self.shared;
        let mut core = shared.core.lock();

        match core.state {
            SessionState::Recording => {
                log::warn!("Already recording");
                return Ok(());
            }
            SessionState::Configured => {}
            state => {
                return Err(CaptureError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        let Some(config) = core.config.clone() else {
            return Err(CaptureError::InvalidState {
                operation: "start",
                state: core.state,
            });
        };

        if !shared.permissions.is_granted() {
            return Err(CaptureError::PermissionDenied);
        }

        let source = shared.backend.open(&config).map_err(|e| {
            log::error!("Failed to open audio device: {}", e);
            CaptureError::DeviceUnavailable(e.to_string())
        })?;
        let source = Arc::new(source);

        core.generation += 1;
        let generation = core.generation;
        let recording_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(DeliveryGate::new());
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded();

        let diagnostics = Arc::new(Mutex::new(CaptureDiagnostics::default()));

        let spawned = spawn_delivery(
            Arc::clone(shared),
            chunk_rx,
            Arc::clone(&gate),
            Arc::clone(&diagnostics),
        )
        .and_then(|_delivery| {
            CaptureLoop {
                shared: Arc::clone(shared),
                generation,
                recording_id,
                source: Arc::clone(&source),
                cancel: Arc::clone(&cancel),
                chunks: chunk_tx,
                diagnostics: Arc::clone(&diagnostics),
                read_chunk_bytes: config.read_chunk_bytes(),
                empty_read_policy: shared.settings.empty_read_policy,
                empty_read_backoff: shared.settings.empty_read_backoff(),
            }
            .spawn()
        });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                gate.close();
                if let Err(stop_err) = source.stop() {
                    log::warn!("Error stopping audio source: {}", stop_err);
                }
                if let Err(release_err) = source.release() {
                    log::warn!("Error releasing audio source: {}", release_err);
                }
                return Err(CaptureError::Unknown(format!("failed to spawn capture threads: {}", e)));
            }
        };

        // The worker blocks on this lock for its first state check, so it
        // cannot observe the session before it is marked recording.
        *shared.diagnostics.write() = diagnostics;
        core.state = SessionState::Recording;
        core.active = Some(ActiveRecording {
            recording_id,
            source,
            cancel,
            gate,
            worker: Some(worker),
        });
        drop(core);

        log::info!("Voice stream started, recording {}", recording_id);
        shared.notify_state(SessionState::Recording);
        Ok(())
    }

    /// Stop the recording and release the device.
    /// Transitions: recording → stopping → configured.
    ///
    /// Always succeeds and returns within about the configured stop timeout.
    /// The device is stopped at once and released once the capture worker has
    /// exited or the timeout has run out. No new delivery starts once this
    /// returns; a sink call already running when the timeout ends is left to
    /// finish on its own and reported as `StopOutcome::DeliveryAbandoned`.
    pub fn stop(&self) -> StopOutcome {
        let outcome = self.shared.stop_recording(StopCause::Requested);
        if outcome == StopOutcome::NotRecording {
            log::warn!("Not currently recording");
        }
        outcome
    }

    /// Cancel any recording, release the device and forget the config.
    /// Transitions: any → uninitialized.
    pub fn teardown(&self) {
        let (previous, active) = {
            let mut core = self.shared.core.lock();
            let previous = std::mem::replace(&mut core.state, SessionState::Uninitialized);
            core.config = None;
            (previous, core.active.take())
        };

        if let Some(active) = active {
            let outcome = self.shared.shut_down(active, true);
            log::info!("Capture session torn down during recording ({:?})", outcome);
        }

        if previous != SessionState::Uninitialized {
            self.shared.notify_state(SessionState::Uninitialized);
        }
    }
}

impl<B: AudioBackend + 'static> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
