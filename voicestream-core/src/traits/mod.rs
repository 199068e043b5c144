pub mod audio_source;
pub mod capture_observer;
pub mod chunk_sink;
pub mod permission;
