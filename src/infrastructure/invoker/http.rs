//! HTTP agent and tool invokers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::domain::{
    AgentInvoker, AgentRequest, BranchCandidate, BranchRanker, InvocationContext, InvokerError,
    ProgressSink, ToolInvoker, ToolRequest,
};

/// Default deadline for ranking calls
pub const DEFAULT_RANKER_TIMEOUT: Duration = Duration::from_secs(60);

/// POST a JSON body, honoring the call deadline and forwarding credentials
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    context: &InvocationContext,
    timeout: Duration,
) -> Result<Value, InvokerError> {
    let mut request = client.post(url).timeout(timeout).json(body);

    if let Some(credentials) = &context.credentials {
        request = request.bearer_auth(credentials);
    }

    let response = request.send().await.map_err(map_transport_error)?;

    if !response.status().is_success() {
        let status = response.status();
        let error_body = response.text().await.unwrap_or_default();
        return Err(InvokerError::failed(format!("HTTP {}: {}", status, error_body)));
    }

    let body: Value = response.json().await.map_err(map_transport_error)?;
    Ok(unwrap_output(body))
}

fn map_transport_error(e: reqwest::Error) -> InvokerError {
    if e.is_timeout() {
        InvokerError::Timeout
    } else {
        InvokerError::failed(format!("Request failed: {}", e))
    }
}

/// Responses may wrap the result as `{"output": ...}`
fn unwrap_output(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("output") => {
            map.remove("output").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Invokes agents over HTTP at `POST {base_url}/agents/{agent_id}/invoke`
#[derive(Debug, Clone)]
pub struct HttpAgentInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    #[instrument(skip(self, request, progress), fields(agent_id = %request.agent_id))]
    async fn invoke(
        &self,
        request: AgentRequest,
        progress: &ProgressSink,
    ) -> Result<Value, InvokerError> {
        let url = join_url(&self.base_url, &format!("agents/{}/invoke", request.agent_id));
        let body = json!({
            "input": request.input,
            "execution_id": request.context.execution_id,
            "session_id": request.context.session_id,
        });

        progress.generating();
        debug!(url = %url, "Invoking agent");

        let output = post_json(&self.client, &url, &body, &request.context, request.timeout).await?;

        if let Value::String(text) = &output {
            progress.chunk(text.clone());
        }

        Ok(output)
    }
}

/// Invokes tools over HTTP at `POST {base_url}/tools/{tool}/invoke`
#[derive(Debug, Clone)]
pub struct HttpToolInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    #[instrument(skip(self, request), fields(tool = %request.tool))]
    async fn invoke(&self, request: ToolRequest) -> Result<Value, InvokerError> {
        let url = join_url(&self.base_url, &format!("tools/{}/invoke", request.tool));
        debug!(url = %url, "Invoking tool");

        post_json(
            &self.client,
            &url,
            &request.payload,
            &request.context,
            request.timeout,
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RankingAnswer {
    branch_id: String,
}

/// Asks a judge agent which branch produced the best output
#[derive(Debug, Clone)]
pub struct AgentBranchRanker {
    agents: Arc<dyn AgentInvoker>,
    judge_agent_id: String,
    timeout: Duration,
}

impl AgentBranchRanker {
    pub fn new(agents: Arc<dyn AgentInvoker>, judge_agent_id: impl Into<String>) -> Self {
        Self {
            agents,
            judge_agent_id: judge_agent_id.into(),
            timeout: DEFAULT_RANKER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn prompt(candidates: &[BranchCandidate]) -> String {
        let listing = serde_json::to_string_pretty(candidates).unwrap_or_default();
        format!(
            "Pick the best candidate output. Reply with the branch_id only.\n\nCandidates:\n{}",
            listing
        )
    }

    fn parse_answer(output: Value) -> Option<String> {
        match output {
            Value::String(text) => Some(text.trim().trim_matches('"').to_string()),
            other => serde_json::from_value::<RankingAnswer>(other)
                .ok()
                .map(|a| a.branch_id),
        }
    }
}

#[async_trait]
impl BranchRanker for AgentBranchRanker {
    #[instrument(skip(self, candidates, context), fields(judge = %self.judge_agent_id))]
    async fn rank(
        &self,
        candidates: &[BranchCandidate],
        context: &InvocationContext,
    ) -> Result<String, InvokerError> {
        let request = AgentRequest {
            agent_id: self.judge_agent_id.clone(),
            input: Self::prompt(candidates),
            timeout: self.timeout,
            context: context.clone(),
        };

        let output = self.agents.invoke(request, &ProgressSink::noop()).await?;

        let choice = Self::parse_answer(output)
            .ok_or_else(|| InvokerError::failed("Judge agent returned no branch id"))?;

        if candidates.iter().any(|c| c.branch_id == choice) {
            Ok(choice)
        } else {
            warn!(choice = %choice, "Judge agent picked an unknown branch");
            Err(InvokerError::failed(format!(
                "Judge agent picked unknown branch '{}'",
                choice
            )))
        }
    }
}
