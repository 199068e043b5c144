use crate::models::diagnostics::LoopReport;
use crate::models::error::DeviceError;
use crate::models::state::SessionState;

/// Out-of-band status channel for a capture session.
///
/// Mid-stream device errors are only ever reported here; they never surface
/// from an unrelated session call. Methods run on whichever thread caused the
/// event (a caller thread or the capture worker), never while the session lock
/// is held. Implementations should marshal to a UI thread if needed.
pub trait CaptureObserver: Send + Sync {
    /// Called after every state transition.
    fn on_state_changed(&self, state: SessionState);

    /// Called when the device fails mid-recording, before the session
    /// returns to `Configured`.
    fn on_device_error(&self, error: &DeviceError);

    /// Called when a capture loop exits, for any reason.
    fn on_loop_finished(&self, report: &LoopReport);
}
