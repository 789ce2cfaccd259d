//! Decoding of streamed answers: raw chunks to lines to typed events.

pub mod decoder;
pub mod event;

pub use decoder::{FrameDecoder, Framing, Utf8Carry};
pub use event::StreamEvent;
