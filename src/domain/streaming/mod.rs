//! Streaming progress vocabulary shared by the engine and collaborators

mod event;
mod sink;

pub use event::StreamEvent;
pub use sink::{EventSink, ProgressSink};

#[cfg(test)]
pub use sink::mock;
