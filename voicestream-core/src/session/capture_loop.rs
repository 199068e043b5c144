use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::AudioChunk;
use crate::models::config::EmptyReadPolicy;
use crate::models::diagnostics::{CaptureDiagnostics, LoopExit, LoopReport};
use crate::models::error::DeviceError;
use crate::session::capture_session::{Shared, StopCause};
use crate::traits::audio_source::{AudioBackend, AudioSourceHandle};

/// Join handle for a capture worker that supports waiting with a deadline.
///
/// The worker owns the sending half of `finished`; the channel disconnects
/// when the worker's closure returns (or unwinds).
pub(crate) struct WorkerHandle {
    thread: thread::JoinHandle<()>,
    finished: Receiver<()>,
}

impl WorkerHandle {
    /// Wait up to `timeout` for the worker to exit.
    ///
    /// Returns `false` on timeout, in which case the thread is detached.
    pub(crate) fn join_within(self, timeout: Duration) -> bool {
        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    log::error!("Capture worker panicked");
                }
                true
            }
        }
    }
}

/// The producer side of a recording: reads the device and queues chunks.
///
/// Runs on its own thread. The blocking `read` is the only suspension point;
/// the session state and the cancellation token are checked before and after
/// every read. The loop never releases the source; that belongs to the
/// session's stop path.
pub(crate) struct CaptureLoop<B: AudioBackend> {
    pub(crate) shared: Arc<Shared<B>>,
    pub(crate) generation: u64,
    pub(crate) recording_id: Uuid,
    pub(crate) source: Arc<B::Source>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) chunks: Sender<AudioChunk>,
    pub(crate) diagnostics: Arc<Mutex<CaptureDiagnostics>>,
    pub(crate) read_chunk_bytes: usize,
    pub(crate) empty_read_policy: EmptyReadPolicy,
    pub(crate) empty_read_backoff: Duration,
}

impl<B: AudioBackend + 'static> CaptureLoop<B> {
    pub(crate) fn spawn(self) -> io::Result<WorkerHandle> {
        let (finished_tx, finished) = crossbeam_channel::bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("voicestream-capture".into())
            .spawn(move || {
                let _finished = finished_tx;
                self.run();
            })?;
        Ok(WorkerHandle { thread, finished })
    }

    fn run(self) {
        log::debug!(
            "Starting audio recording loop {} ({} byte reads)",
            self.recording_id,
            self.read_chunk_bytes
        );

        let report = self.capture();

        // Stop handing out chunks before the session moves on.
        let CaptureLoop {
            shared,
            generation,
            chunks,
            ..
        } = self;
        drop(chunks);

        if let LoopExit::DeviceError(error) = &report.exit {
            log::error!("Audio device error in recording {}: {}", report.recording_id, error);
            shared.stop_recording(StopCause::DeviceError {
                generation,
                error: error.clone(),
            });
        }

        log::debug!(
            "Audio recording loop finished ({}): {} chunks, {} bytes, {} empty reads",
            report.exit.label(),
            report.chunks_produced,
            report.bytes_captured,
            report.empty_reads
        );
        shared.notify_loop_finished(&report);
    }

    fn capture(&self) -> LoopReport {
        let mut buffer = vec![0u8; self.read_chunk_bytes.max(1)];
        let mut report = LoopReport {
            recording_id: self.recording_id,
            chunks_produced: 0,
            bytes_captured: 0,
            empty_reads: 0,
            exit: LoopExit::Stopped,
        };
        let mut consecutive_empty: u32 = 0;

        report.exit = loop {
            if let Some(exit) = self.interrupted() {
                break exit;
            }

            let read = self.source.read(&mut buffer);
            let captured_at = Utc::now();

            // A stop may have landed during the read; drop whatever it returned.
            if let Some(exit) = self.interrupted() {
                break exit;
            }

            match read {
                Ok(0) => {
                    consecutive_empty = consecutive_empty.saturating_add(1);
                    report.empty_reads += 1;
                    self.diagnostics.lock().record_read(0);
                    if self.empty_read_policy.is_starved(consecutive_empty) {
                        break LoopExit::DeviceError(DeviceError::Starved {
                            consecutive_empty_reads: consecutive_empty,
                        });
                    }
                    thread::sleep(self.empty_read_backoff);
                }
                Ok(n) => {
                    consecutive_empty = 0;
                    let n = n.min(buffer.len());
                    let chunk = AudioChunk::new(
                        self.recording_id,
                        report.chunks_produced,
                        captured_at,
                        buffer[..n].to_vec(),
                    );
                    report.chunks_produced += 1;
                    report.bytes_captured += n as u64;
                    self.diagnostics.lock().record_read(n);

                    if self.chunks.send(chunk).is_err() {
                        log::warn!("Delivery worker is gone, dropping captured audio");
                    }
                    thread::yield_now();
                }
                Err(error) => break LoopExit::DeviceError(error),
            }
        };

        report
    }

    fn interrupted(&self) -> Option<LoopExit> {
        if self.cancel.load(Ordering::SeqCst) {
            return Some(LoopExit::Cancelled);
        }
        if !self.shared.is_recording(self.generation) {
            return Some(LoopExit::Stopped);
        }
        None
    }
}
