pub mod audio_models;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod state;
