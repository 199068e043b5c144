//! # voicestream-windows
//!
//! Windows WASAPI backend for voicestream.
//!
//! Provides:
//! - `WasapiBackend` / `WasapiSource`: shared-mode capture endpoint with PCM
//!   conversion to the configured format
//! - `WindowsMicPermission`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1803+ for the microphone privacy setting
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use voicestream_core::CaptureSession;
//! use voicestream_windows::{WasapiBackend, WindowsMicPermission};
//!
//! let session = CaptureSession::new(
//!     WasapiBackend::new(),
//!     Arc::new(WindowsMicPermission::default()),
//!     Arc::new(|chunk: voicestream_core::AudioChunk| { println!("{} bytes", chunk.len()); Ok(()) }),
//! );
//! session.configure_json(r#"{"sampleRate":16000}"#)?;
//! session.start()?;
//! ```

#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_source;

#[cfg(target_os = "windows")]
pub use permissions::WindowsMicPermission;
#[cfg(target_os = "windows")]
pub use wasapi_source::{WasapiBackend, WasapiSource};
