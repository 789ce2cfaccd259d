use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use anyhow::{Result, anyhow};
use tracing::debug;

use crate::config::{Config, Endpoints};
use crate::state::HistoryEntry;
use crate::stream::Framing;

/// Body of both the streaming and the one-shot query endpoints.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<HistoryEntry>>,
}

impl QueryRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            agent_name: None,
            chat_history: None,
        }
    }

    pub fn with_agent(mut self, agent_name: &str) -> Self {
        self.agent_name = Some(agent_name.to_string());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.chat_history = if history.is_empty() { None } else { Some(history) };
        self
    }
}

/// Reply of the one-shot query endpoint.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl QueryResponse {
    /// `answer` wins over `output`; empty when the server sent neither.
    pub fn into_text(self) -> String {
        self.answer.or(self.output).unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub graph_enabled: Option<bool>,
    #[serde(default)]
    pub graph_modes: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_endpoints(base_url, Endpoints::default())
    }

    pub fn with_endpoints(base_url: &str, endpoints: Endpoints) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoints,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_endpoints(&config.base_url(), config.endpoints.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open a streaming answer. The body is left unread for the caller; a
    /// non-success status is reported as an error with the server's text.
    pub async fn open_stream(&self, request: &QueryRequest, framing: Framing) -> Result<Response> {
        let url = format!("{}{}", self.base_url, self.endpoints.for_framing(framing));
        debug!(%url, framing = framing.as_str(), "opening answer stream");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("Could not reach the agent service at {}: {}", self.base_url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Stream request failed with status {}: {}", status, text));
        }

        Ok(response)
    }

    /// One-shot query, used when a stream ends without content.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let url = format!("{}{}", self.base_url, self.endpoints.query);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("Could not reach the agent service at {}: {}", self.base_url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Query failed with status {}: {}", status, text));
        }

        let query_response: QueryResponse = response.json().await?;
        Ok(query_response)
    }

    pub async fn health(&self) -> Result<Health> {
        let url = format!("{}{}", self.base_url, self.endpoints.health);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Health check failed: {}", response.status()));
        }

        let health: Health = response.json().await?;
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;

    #[test]
    fn test_request_omits_empty_fields() {
        let request = QueryRequest::new("hello").with_history(Vec::new());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"query": "hello"}));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = QueryRequest::new("and now?")
            .with_agent("research_agent")
            .with_history(vec![HistoryEntry {
                role: ChatRole::Assistant,
                content: "earlier".to_string(),
            }]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "query": "and now?",
                "agent_name": "research_agent",
                "chat_history": [{"role": "assistant", "content": "earlier"}]
            })
        );
    }

    #[test]
    fn test_answer_preferred_over_output() {
        let both: QueryResponse =
            serde_json::from_str(r#"{"agent_name":"default","answer":"a","output":"o"}"#).unwrap();
        assert_eq!(both.into_text(), "a");

        let output_only: QueryResponse = serde_json::from_str(r#"{"output":"o"}"#).unwrap();
        assert_eq!(output_only.into_text(), "o");

        let neither: QueryResponse = serde_json::from_str(r#"{"agent_name":"default"}"#).unwrap();
        assert_eq!(neither.into_text(), "");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = AgentClient::new("http://localhost:8002/");
        assert_eq!(client.base_url(), "http://localhost:8002");
    }
}
