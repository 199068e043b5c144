//! # voicestream-core
//!
//! Platform-agnostic continuous audio capture.
//!
//! A [`CaptureSession`] owns one capture device at a time, runs a producer
//! thread that reads raw PCM from it, and hands every read to a single
//! [`ChunkSink`] on a separate delivery thread. Platform backends (Windows
//! WASAPI, the in-process simulator) implement [`AudioBackend`] and plug into
//! the generic session.
//!
//! ## Architecture
//!
//! ```text
//! voicestream-core (this crate)
//! ├── traits/       ← AudioBackend, AudioSourceHandle, ChunkSink, PermissionProvider, CaptureObserver
//! ├── models/       ← CaptureError, SessionState, CaptureOptions/CaptureConfig, AudioChunk, diagnostics
//! ├── session/      ← CaptureSession state machine, capture loop, delivery hand-off
//! ├── processing/   ← base64 chunk events
//! └── simulated/    ← scripted backend, sinks and observers for tests and demos
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod simulated;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioChunk, AudioSourceKind, PcmFormat};
pub use models::config::{CaptureConfig, CaptureOptions, EmptyReadPolicy, SessionSettings, SourceSpec};
pub use models::diagnostics::{CaptureDiagnostics, LoopExit, LoopReport, StopOutcome};
pub use models::error::{CaptureError, ConfigField, DeviceError};
pub use models::state::SessionState;
pub use processing::chunk_event::{Base64Sink, ChunkEvent};
pub use session::capture_session::CaptureSession;
pub use traits::audio_source::{AudioBackend, AudioSourceHandle};
pub use traits::capture_observer::CaptureObserver;
pub use traits::chunk_sink::ChunkSink;
pub use traits::permission::PermissionProvider;
