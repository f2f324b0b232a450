use std::fmt;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;
use crate::foundry::projects::{AGENTS_API_VERSION, ProjectApi, ProjectClient};

/// Grounds answers in web search through a Bing connection.
#[derive(Debug, Clone)]
pub struct BingGroundingTool {
    connection_id: String,
}

impl BingGroundingTool {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
        }
    }

    pub fn definitions(&self) -> Vec<Value> {
        vec![json!({
            "type": "bing_grounding",
            "bing_grounding": {
                "connections": [{"connection_id": self.connection_id}]
            }
        })]
    }
}

/// Searches one Azure AI Search index reachable through a project connection.
#[derive(Debug, Clone)]
pub struct AzureAiSearchTool {
    index_connection_id: String,
    index_name: String,
}

impl AzureAiSearchTool {
    pub fn new(index_connection_id: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            index_connection_id: index_connection_id.into(),
            index_name: index_name.into(),
        }
    }

    pub fn definitions(&self) -> Vec<Value> {
        vec![json!({"type": "azure_ai_search"})]
    }

    pub fn resources(&self) -> Value {
        json!({
            "azure_ai_search": {
                "indexes": [{
                    "index_connection_id": self.index_connection_id,
                    "index_name": self.index_name,
                }]
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub name: String,
    pub instructions: String,
    pub tools: Vec<Value>,
    pub tool_resources: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentList {
    #[serde(default)]
    pub data: Vec<Agent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentThread {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    Incomplete,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::InProgress | Self::RequiresAction | Self::Cancelling
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadRun {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub step_details: StepDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDetails {
    #[serde(default)]
    pub tool_calls: Vec<StepToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub azure_ai_search: Option<SearchCallDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCallDetails {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
}

#[derive(Debug, Deserialize)]
pub struct RunStepList {
    #[serde(default)]
    pub data: Vec<RunStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlCitation {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextAnnotation {
    UrlCitation { url_citation: UrlCitation },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageText {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<TextAnnotation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContentPart {
    Text { text: MessageText },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContentPart>,
}

impl ThreadMessage {
    pub fn text_messages(&self) -> impl Iterator<Item = &MessageText> {
        self.content.iter().filter_map(|part| match part {
            MessageContentPart::Text { text } => Some(text),
            MessageContentPart::Other => None,
        })
    }

    pub fn url_citation_annotations(&self) -> impl Iterator<Item = &UrlCitation> {
        self.text_messages()
            .flat_map(|text| text.annotations.iter())
            .filter_map(|annotation| match annotation {
                TextAnnotation::UrlCitation { url_citation } => Some(url_citation),
                TextAnnotation::Other => None,
            })
    }
}

/// Thread messages, newest first.
#[derive(Debug, Deserialize)]
pub struct MessageList {
    #[serde(default)]
    pub data: Vec<ThreadMessage>,
}

impl MessageList {
    pub fn last_message_by_role(&self, role: &str) -> Option<&ThreadMessage> {
        self.data.iter().find(|message| message.role == role)
    }
}

pub const ROLE_USER: &str = "user";
pub const ROLE_AGENT: &str = "assistant";

/// Agent, thread, message and run operations of a project.
pub struct Agents<'a> {
    project: &'a ProjectClient,
    poll_interval: Duration,
}

impl<'a> Agents<'a> {
    pub(crate) fn new(project: &'a ProjectClient) -> Self {
        Self {
            project,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn create_agent(&self, options: &AgentOptions) -> Result<Agent> {
        let mut body = json!({
            "model": options.model,
            "name": options.name,
            "instructions": options.instructions,
            "tools": options.tools,
        });
        if let Some(resources) = &options.tool_resources {
            body["tool_resources"] = resources.clone();
        }
        self.project
            .send_versioned(
                ProjectApi::Agents,
                Method::POST,
                "/assistants",
                AGENTS_API_VERSION,
                Some(body),
                true,
            )
            .await
    }

    pub async fn list_agents(&self) -> Result<AgentList> {
        self.project
            .send(ProjectApi::Agents, Method::GET, "/assistants", None)
            .await
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let _: Value = self
            .project
            .send(
                ProjectApi::Agents,
                Method::DELETE,
                &format!("/assistants/{agent_id}"),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn create_thread(&self) -> Result<AgentThread> {
        self.project
            .send(ProjectApi::Agents, Method::POST, "/threads", Some(json!({})))
            .await
    }

    pub async fn create_message(
        &self,
        thread_id: &str,
        role: &str,
        content: &str,
    ) -> Result<ThreadMessage> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::POST,
                &format!("/threads/{thread_id}/messages"),
                Some(json!({"role": role, "content": content})),
            )
            .await
    }

    pub async fn list_messages(&self, thread_id: &str) -> Result<MessageList> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::GET,
                &format!("/threads/{thread_id}/messages"),
                None,
            )
            .await
    }

    pub async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<ThreadRun> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::POST,
                &format!("/threads/{thread_id}/runs"),
                Some(json!({"assistant_id": agent_id})),
            )
            .await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}"),
                None,
            )
            .await
    }

    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
                Some(json!({})),
            )
            .await
    }

    /// Starts a run and polls it until it leaves the pending states.
    ///
    /// No local function tools are registered, so a run asking for tool
    /// outputs is cancelled.
    pub async fn create_and_process_run(&self, thread_id: &str, agent_id: &str) -> Result<ThreadRun> {
        let mut run = self.create_run(thread_id, agent_id).await?;
        debug!(run_id = %run.id, status = %run.status, "run created");

        while run.status.is_pending() {
            sleep(self.poll_interval).await;
            run = self.get_run(thread_id, &run.id).await?;
            debug!(run_id = %run.id, status = %run.status, "run polled");

            if run.status == RunStatus::RequiresAction {
                warn!(run_id = %run.id, "run requires tool outputs; cancelling");
                run = self.cancel_run(thread_id, &run.id).await?;
            }
        }

        Ok(run)
    }

    pub async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<RunStepList> {
        self.project
            .send(
                ProjectApi::Agents,
                Method::GET,
                &format!("/threads/{thread_id}/runs/{run_id}/steps"),
                None,
            )
            .await
    }
}
