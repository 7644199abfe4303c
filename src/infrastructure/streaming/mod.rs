//! Streaming progress delivery

mod reporter;

pub use reporter::{EventStream, ProgressReporter, DEFAULT_EVENT_BUFFER};
