use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::models::audio_models::AudioChunk;
use crate::models::diagnostics::CaptureDiagnostics;
use crate::session::capture_session::Shared;
use crate::traits::audio_source::AudioBackend;

/// Admission control between the delivery thread and `stop()`.
///
/// Every delivery holds `in_flight` while it checks `open` and calls the sink,
/// so once `close()` has run no new delivery starts. `wait_idle` then waits,
/// with a deadline, for the one that may already be running. Waiting from the
/// delivery thread itself (a sink that stops its own session) returns at once.
pub(crate) struct DeliveryGate {
    open: AtomicBool,
    in_flight: Mutex<()>,
    delivery_thread: OnceLock<ThreadId>,
}

impl DeliveryGate {
    pub(crate) fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            in_flight: Mutex::new(()),
            delivery_thread: OnceLock::new(),
        }
    }

    /// Refuse further deliveries. Does not wait.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for a delivery in progress to return.
    ///
    /// Returns `false` if the sink is still busy at the deadline.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        if self.delivery_thread.get() == Some(&thread::current().id()) {
            return true;
        }
        self.in_flight.try_lock_for(timeout).is_some()
    }

    /// Run `deliver` unless the gate is closed.
    fn admit<R>(&self, deliver: impl FnOnce() -> R) -> Option<R> {
        let _in_flight = self.in_flight.lock();
        if !self.is_open() {
            return None;
        }
        Some(deliver())
    }

    fn bind_current_thread(&self) {
        let _ = self.delivery_thread.set(thread::current().id());
    }
}

/// Spawn the thread that hands captured chunks to the session's sink.
///
/// The thread ends once the capture loop drops its sender and the queue is
/// drained; chunks still queued after the gate closes are discarded. Counts go
/// to `diagnostics`, the set belonging to this recording.
pub(crate) fn spawn_delivery<B>(
    shared: Arc<Shared<B>>,
    chunks: Receiver<AudioChunk>,
    gate: Arc<DeliveryGate>,
    diagnostics: Arc<Mutex<CaptureDiagnostics>>,
) -> io::Result<thread::JoinHandle<()>>
where
    B: AudioBackend + 'static,
{
    thread::Builder::new()
        .name("voicestream-delivery".into())
        .spawn(move || {
            gate.bind_current_thread();

            for chunk in chunks.iter() {
                let sequence = chunk.sequence();
                let delivered = gate.admit(|| {
                    let sink = shared.sink();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(chunk)));

                    let mut d = diagnostics.lock();
                    match outcome {
                        Ok(Ok(())) => d.chunks_delivered += 1,
                        Ok(Err(e)) => {
                            log::warn!("Chunk sink rejected chunk {}: {}", sequence, e);
                            d.sink_failures += 1;
                        }
                        Err(_) => {
                            log::error!("Chunk sink panicked on chunk {}", sequence);
                            d.sink_failures += 1;
                        }
                    }
                });

                if delivered.is_none() {
                    diagnostics.lock().chunks_discarded += 1;
                }
            }

            log::debug!("Delivery worker finished");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn closed_gate_rejects_deliveries() {
        let gate = DeliveryGate::new();
        assert_eq!(gate.admit(|| 1), Some(1));

        gate.close();
        assert!(!gate.is_open());
        assert_eq!(gate.admit(|| 2), None);
    }

    #[test]
    fn wait_idle_waits_for_in_flight_delivery() {
        let gate = Arc::new(DeliveryGate::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);

        let worker = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                gate.bind_current_thread();
                gate.admit(|| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        entered_rx.recv().unwrap();
        gate.close();
        assert!(gate.wait_idle(Duration::from_secs(5)));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn close_does_not_wait_and_wait_idle_gives_up_at_deadline() {
        let gate = Arc::new(DeliveryGate::new());
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);

        let worker = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.bind_current_thread();
                gate.admit(|| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(600));
                });
            })
        };

        entered_rx.recv().unwrap();
        let started = Instant::now();
        gate.close();
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(!gate.wait_idle(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_millis(400));
        worker.join().unwrap();
    }

    #[test]
    fn waiting_from_delivery_thread_does_not_deadlock() {
        let gate = Arc::new(DeliveryGate::new());
        let worker = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.bind_current_thread();
                gate.admit(|| {
                    gate.close();
                    gate.wait_idle(Duration::from_secs(5))
                })
            })
        };

        assert_eq!(worker.join().unwrap(), Some(true));
        assert!(!gate.is_open());
    }
}
