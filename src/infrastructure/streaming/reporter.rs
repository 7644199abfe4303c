//! Channel-backed progress reporter
//!
//! One reporter feeds one listener. Progress events flow through a bounded
//! mpsc channel; the terminal event is sent by consuming the reporter, so a
//! feed can never carry two of them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{
    EventSink, ExecutionId, ExecutionResult, ExecutionStatus, ProgressSink, StreamEvent,
};

/// Default buffer between the execution and its listener
pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Debug)]
struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
    abort: CancellationToken,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: StreamEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    event_type = event.event_type(),
                    "Progress listener is lagging, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.abort.cancel();
            }
        }
    }
}

/// Producer half of an execution's event feed
#[derive(Debug)]
pub struct ProgressReporter {
    sink: Arc<ChannelSink>,
    watcher_stop: CancellationToken,
}

impl ProgressReporter {
    /// Create a reporter and the stream its listener consumes
    ///
    /// Must be called inside a tokio runtime: a watcher task cancels the abort
    /// token as soon as the listener goes away.
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let abort = CancellationToken::new();
        let watcher_stop = CancellationToken::new();

        tokio::spawn({
            let tx = tx.clone();
            let abort = abort.clone();
            let stop = watcher_stop.clone();
            async move {
                tokio::select! {
                    _ = tx.closed() => {
                        debug!("Progress listener dropped, aborting execution");
                        abort.cancel();
                    }
                    _ = stop.cancelled() => {}
                }
            }
        });

        let reporter = Self {
            sink: Arc::new(ChannelSink { tx, abort }),
            watcher_stop,
        };

        (reporter, EventStream::new(rx))
    }

    /// Token fired when the listener disappears
    pub fn abort_token(&self) -> CancellationToken {
        self.sink.abort.clone()
    }

    /// Sink for non-terminal progress events
    pub fn progress(&self) -> ProgressSink {
        ProgressSink::new(self.sink.clone())
    }

    pub fn is_listening(&self) -> bool {
        !self.sink.tx.is_closed()
    }

    /// End the feed with the event matching the execution's final status
    pub async fn finish_ok(self, result: &ExecutionResult) {
        let execution_id = result.execution_id().to_string();

        let event = match result.status() {
            status @ (ExecutionStatus::Completed | ExecutionStatus::Cancelled) => {
                StreamEvent::Complete {
                    execution_id,
                    status,
                    output: result.output().cloned(),
                }
            }
            ExecutionStatus::Failed => StreamEvent::Error {
                execution_id,
                message: result.error().unwrap_or("Execution failed").to_string(),
            },
            ExecutionStatus::Running => StreamEvent::Error {
                execution_id,
                message: "Execution ended without reaching a terminal status".to_string(),
            },
        };

        self.finish(event).await;
    }

    /// End the feed with an error that happened outside of any step
    pub async fn finish_err(self, execution_id: &ExecutionId, message: impl Into<String>) {
        self.finish(StreamEvent::Error {
            execution_id: execution_id.to_string(),
            message: message.into(),
        })
        .await;
    }

    async fn finish(self, event: StreamEvent) {
        let event_type = event.event_type();
        if self.sink.tx.send(event).await.is_err() {
            debug!(event_type, "Listener gone before the terminal event");
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.watcher_stop.cancel();
    }
}

/// Consumer half of an execution's event feed
///
/// Ends right after the terminal event, even if step-scoped sinks are still alive.
#[derive(Debug)]
pub struct EventStream {
    inner: ReceiverStream<StreamEvent>,
    finished: bool,
}

impl EventStream {
    fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            finished: false,
        }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
