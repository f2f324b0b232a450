use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, field, info_span};

use crate::config::RequestOptions;
use crate::error::{LabError, Result};
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::http::{client, send_with_retry};
use crate::foundry::tools::{ToolCall, ToolDefinition};

pub const DEFAULT_API_VERSION: &str = "2024-05-01-preview";

const SERVICE: &str = "inference";

/// One chat message in request wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: MessageContent,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_items(items: Vec<ContentItem>) -> Self {
        Self::User {
            content: MessageContent::Items(items),
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: None,
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Items(Vec<ContentItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionsRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ChatCompletionsRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            model: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Other => "other",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prompt_tokens={} completion_tokens={} total_tokens={}",
            self.prompt_tokens, self.completion_tokens, self.total_tokens
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletions {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatCompletions {
    pub fn first_choice(&self) -> Result<&Choice> {
        self.choices.first().ok_or(LabError::EmptyResponse {
            service: SERVICE,
            what: "any choices",
        })
    }
}

/// Anything that can answer a chat completions request.
pub trait Completions {
    fn complete(
        &self,
        request: &ChatCompletionsRequest,
    ) -> impl Future<Output = Result<ChatCompletions>>;
}

/// Key-authenticated client for the model inference and Azure OpenAI chat
/// completions routes.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    endpoint: String,
    credential: AzureKeyCredential,
    api_version: String,
    model: Option<String>,
    options: RequestOptions,
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    /// `endpoint` is the route prefix in front of `/chat/completions`.
    pub fn new(endpoint: impl Into<String>, credential: AzureKeyCredential) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(LabError::Config(format!(
                "Endpoint '{endpoint}' must be an http(s) URL."
            )));
        }
        Ok(Self {
            endpoint,
            credential,
            api_version: DEFAULT_API_VERSION.to_string(),
            model: None,
            options: RequestOptions::default(),
            http: client(false)?,
        })
    }

    /// Client for a deployment behind an Azure OpenAI style resource endpoint.
    pub fn azure_openai(
        endpoint: &str,
        deployment: &str,
        credential: AzureKeyCredential,
    ) -> Result<Self> {
        Self::new(
            format!(
                "{}/openai/deployments/{deployment}",
                endpoint.trim_end_matches('/')
            ),
            credential,
        )
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions?api-version={}",
            self.endpoint, self.api_version
        )
    }

    async fn send(&self, request: &ChatCompletionsRequest) -> Result<ChatCompletions> {
        let mut request = request.clone();
        if request.model.is_none() {
            request.model.clone_from(&self.model);
        }

        let span = tracing::Span::current();
        span.record("gen_ai.request.model", request.model.as_deref().unwrap_or(""));

        let url = self.url();
        let response = send_with_retry(SERVICE, self.options, || {
            self.credential.apply(self.http.post(&url)).json(&request)
        })
        .await?;

        let completions: ChatCompletions =
            response.json().await.map_err(LabError::request(SERVICE))?;

        let finish_reasons = completions
            .choices
            .iter()
            .filter_map(|choice| choice.finish_reason)
            .map(|reason| reason.to_string())
            .collect::<Vec<_>>()
            .join(",");
        span.record("gen_ai.response.id", completions.id.as_str());
        span.record("gen_ai.response.model", completions.model.as_str());
        span.record("gen_ai.response.finish_reasons", finish_reasons.as_str());
        span.record("gen_ai.usage.input_tokens", completions.usage.prompt_tokens);
        span.record("gen_ai.usage.output_tokens", completions.usage.completion_tokens);

        Ok(completions)
    }
}

impl Completions for ChatCompletionsClient {
    async fn complete(&self, request: &ChatCompletionsRequest) -> Result<ChatCompletions> {
        let span = info_span!(
            "chat",
            gen_ai.system = "az.ai.inference",
            gen_ai.operation.name = "chat",
            server.address = self.endpoint.as_str(),
            gen_ai.request.model = field::Empty,
            gen_ai.response.id = field::Empty,
            gen_ai.response.model = field::Empty,
            gen_ai.response.finish_reasons = field::Empty,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );
        self.send(request).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_serialize_with_role_tag() {
        let value = serde_json::to_value(ChatMessage::tool("Nice weather", "call_1")).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "content": "Nice weather", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn multimodal_user_message_uses_content_items() {
        let message = ChatMessage::user_items(vec![
            ContentItem::text("What is this?"),
            ContentItem::image_url("data:image/png;base64,AAAA"),
        ]);
        let value = serde_json::to_value(message).unwrap();
        assert_eq!(value["content"][0], json!({"type": "text", "text": "What is this?"}));
        assert_eq!(
            value["content"][1],
            json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}})
        );
    }

    #[test]
    fn optional_request_fields_are_omitted() {
        let request = ChatCompletionsRequest::new(vec![ChatMessage::user("hi")]);
        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value, json!({"messages": [{"role": "user", "content": "hi"}]}));
    }

    #[test]
    fn unknown_finish_reason_maps_to_other() {
        let raw = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "x"},
                "finish_reason": "something_new"
            }]
        });
        let completions: ChatCompletions = serde_json::from_value(raw).unwrap();
        assert_eq!(
            completions.first_choice().unwrap().finish_reason,
            Some(FinishReason::Other)
        );
        assert_eq!(completions.usage.total_tokens, 0);
    }

    #[test]
    fn azure_openai_endpoint_includes_deployment() {
        let client = ChatCompletionsClient::azure_openai(
            "https://res.openai.azure.com/",
            "gpt-4o",
            AzureKeyCredential::new("k"),
        )
        .unwrap()
        .with_api_version("2024-08-01-preview");
        assert_eq!(
            client.url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-08-01-preview"
        );
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let err = ChatCompletionsClient::new("res.openai.azure.com", AzureKeyCredential::new("k"))
            .unwrap_err();
        assert!(err.to_string().contains("must be an http(s) URL"));
    }
}
