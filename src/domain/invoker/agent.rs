//! Agent invoker trait

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::context::InvocationContext;
use super::error::InvokerError;
use crate::domain::streaming::ProgressSink;

/// A resolved call to a conversational agent
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_id: String,
    pub input: String,
    pub timeout: Duration,
    pub context: InvocationContext,
}

/// Calls agents on behalf of `agent` steps and parallel branches
#[async_trait]
pub trait AgentInvoker: Send + Sync + Debug {
    /// Invoke an agent, reporting intermediate progress through `progress`
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: &ProgressSink,
    ) -> Result<Value, InvokerError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Behavior {
        script: VecDeque<Result<Value, InvokerError>>,
        fallback: Option<Result<Value, InvokerError>>,
        delay: Option<Duration>,
    }

    /// Scripted agent invoker for testing
    ///
    /// Unknown agents echo their input back as a string.
    #[derive(Debug, Default)]
    pub struct MockAgentInvoker {
        behaviors: Mutex<HashMap<String, Behavior>>,
        calls: Mutex<Vec<AgentRequest>>,
    }

    impl MockAgentInvoker {
        pub fn new() -> Self {
            Self::default()
        }

        fn update(&self, agent_id: &str, f: impl FnOnce(&mut Behavior)) {
            let mut behaviors = self.behaviors.lock().unwrap();
            let behavior = behaviors.entry(agent_id.to_string()).or_insert(Behavior {
                script: VecDeque::new(),
                fallback: None,
                delay: None,
            });
            f(behavior);
        }

        /// Always respond with `output`
        pub fn with_response(self, agent_id: &str, output: Value) -> Self {
            self.update(agent_id, |b| b.fallback = Some(Ok(output)));
            self
        }

        /// Always fail with `message`
        pub fn with_failure(self, agent_id: &str, message: &str) -> Self {
            self.update(agent_id, |b| {
                b.fallback = Some(Err(InvokerError::failed(message)))
            });
            self
        }

        /// Responses consumed in order before the fallback applies
        pub fn with_script(self, agent_id: &str, script: Vec<Result<Value, InvokerError>>) -> Self {
            self.update(agent_id, |b| b.script = script.into());
            self
        }

        /// Sleep before answering
        pub fn with_delay(self, agent_id: &str, delay: Duration) -> Self {
            self.update(agent_id, |b| b.delay = Some(delay));
            self
        }

        pub fn call_count(&self, agent_id: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.agent_id == agent_id)
                .count()
        }

        pub fn inputs(&self, agent_id: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.agent_id == agent_id)
                .map(|r| r.input.clone())
                .collect()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AgentInvoker for MockAgentInvoker {
        async fn invoke(
            &self,
            request: AgentRequest,
            progress: &ProgressSink,
        ) -> Result<Value, InvokerError> {
            self.calls.lock().unwrap().push(request.clone());

            let (delay, result) = {
                let mut behaviors = self.behaviors.lock().unwrap();
                match behaviors.get_mut(&request.agent_id) {
                    Some(behavior) => {
                        let result = behavior
                            .script
                            .pop_front()
                            .or_else(|| behavior.fallback.clone())
                            .unwrap_or_else(|| Ok(Value::String(request.input.clone())));
                        (behavior.delay, result)
                    }
                    None => (None, Ok(Value::String(request.input.clone()))),
                }
            };

            progress.generating();

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Ok(Value::String(text)) = &result {
                progress.chunk(text.clone());
            }

            result
        }
    }
}
