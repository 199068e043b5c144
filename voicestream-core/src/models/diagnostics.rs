use serde::Serialize;
use uuid::Uuid;

use super::error::DeviceError;

/// Counters for the current (or most recent) recording.
///
/// Every successful `start()` begins a fresh set; threads left over from an
/// earlier recording keep counting into that recording's own set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDiagnostics {
    pub reads: u64,
    pub empty_reads: u64,
    pub bytes_captured: u64,
    pub chunks_delivered: u64,
    /// Chunks dropped because the recording stopped before they reached the sink.
    pub chunks_discarded: u64,
    pub sink_failures: u64,
}

impl CaptureDiagnostics {
    pub(crate) fn record_read(&mut self, bytes: usize) {
        self.reads += 1;
        if bytes == 0 {
            self.empty_reads += 1;
        } else {
            self.bytes_captured += bytes as u64;
        }
    }
}

/// Why a capture loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The session left the recording state (stop or teardown).
    Stopped,
    /// The cancellation token fired.
    Cancelled,
    DeviceError(DeviceError),
}

impl LoopExit {
    pub fn label(&self) -> &'static str {
        match self {
            LoopExit::Stopped => "stopped",
            LoopExit::Cancelled => "cancelled",
            LoopExit::DeviceError(_) => "device_error",
        }
    }
}

/// Summary of one capture loop run, handed to the observer when it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub recording_id: Uuid,
    pub chunks_produced: u64,
    pub bytes_captured: u64,
    pub empty_reads: u64,
    pub exit: LoopExit,
}

/// How a `stop()` call went. Every variant is a success from the caller's
/// point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was recording.
    NotRecording,
    /// The capture worker finished within the stop timeout.
    Clean,
    /// The worker did not finish in time; the device was released anyway and
    /// the worker was left to exit on its own.
    WorkerAbandoned,
    /// The device was stopped and released, but a sink call that was already
    /// running outlasted the stop timeout. It is left to return on its own;
    /// nothing further is delivered.
    DeliveryAbandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_split_into_empty_and_captured() {
        let mut d = CaptureDiagnostics::default();
        d.record_read(0);
        d.record_read(512);
        d.record_read(100);

        assert_eq!(d.reads, 3);
        assert_eq!(d.empty_reads, 1);
        assert_eq!(d.bytes_captured, 612);
    }

    #[test]
    fn exit_labels() {
        assert_eq!(LoopExit::Stopped.label(), "stopped");
        assert_eq!(LoopExit::Cancelled.label(), "cancelled");
        assert_eq!(LoopExit::DeviceError(DeviceError::BadValue).label(), "device_error");
    }
}
