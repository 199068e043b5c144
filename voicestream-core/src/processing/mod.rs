pub mod chunk_event;
