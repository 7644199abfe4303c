//! Collaborator implementations backed by remote services

mod http;

pub use http::{AgentBranchRanker, HttpAgentInvoker, HttpToolInvoker, DEFAULT_RANKER_TIMEOUT};
