//! Progress sink handed to collaborators

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::event::StreamEvent;

/// Destination of progress events
pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: StreamEvent);
}

/// Non-terminal event emitter scoped to a step
///
/// Terminal events are owned by whoever finishes the execution, so `emit` drops them.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sink: Option<Arc<dyn EventSink>>,
    step_id: Option<String>,
}

impl ProgressSink {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink: Some(sink),
            step_id: None,
        }
    }

    /// A sink that discards everything
    pub fn noop() -> Self {
        Self::default()
    }

    /// Same destination, events tagged with the given step id
    pub fn for_step(&self, step_id: impl Into<String>) -> Self {
        Self {
            sink: self.sink.clone(),
            step_id: Some(step_id.into()),
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        self.step_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, event: StreamEvent) {
        if event.is_terminal() {
            warn!(
                event_type = event.event_type(),
                "Dropping terminal event emitted through a progress sink"
            );
            return;
        }

        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    pub fn thinking(&self, message: Option<String>) {
        self.emit(StreamEvent::Thinking {
            step_id: self.step_id.clone(),
            message,
        });
    }

    pub fn tool_start(&self, tool: impl Into<String>, input: Option<Value>) {
        self.emit(StreamEvent::ToolStart {
            step_id: self.step_id.clone(),
            tool: tool.into(),
            input,
        });
    }

    pub fn tool_end(&self, tool: impl Into<String>, output: Option<Value>, error: Option<String>) {
        self.emit(StreamEvent::ToolEnd {
            step_id: self.step_id.clone(),
            tool: tool.into(),
            output,
            error,
        });
    }

    pub fn retrieving(&self, source: Option<String>) {
        self.emit(StreamEvent::Retrieving {
            step_id: self.step_id.clone(),
            source,
        });
    }

    pub fn retrieved(&self, count: Option<usize>) {
        self.emit(StreamEvent::Retrieved {
            step_id: self.step_id.clone(),
            count,
        });
    }

    pub fn generating(&self) {
        self.emit(StreamEvent::Generating {
            step_id: self.step_id.clone(),
        });
    }

    pub fn chunk(&self, content: impl Into<String>) {
        self.emit(StreamEvent::Chunk {
            step_id: self.step_id.clone(),
            content: content.into(),
        });
    }
}
