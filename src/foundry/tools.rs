use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};
use tracing::info_span;

use crate::error::{LabError, Result};
use crate::foundry::inference::{
    ChatCompletions, ChatCompletionsRequest, ChatMessage, Completions, FinishReason,
};

/// JSON schema primitive types supported for tool parameters.
#[derive(Debug, Clone, Copy)]
pub enum ToolParamType {
    Integer,
    Number,
    String,
    Boolean,
}

impl ToolParamType {
    fn as_str(self) -> &'static str {
        match self {
            ToolParamType::Integer => "integer",
            ToolParamType::Number => "number",
            ToolParamType::String => "string",
            ToolParamType::Boolean => "boolean",
        }
    }
}

/// One function parameter definition.
#[derive(Debug, Clone)]
pub struct ToolParam {
    /// Parameter name.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// JSON schema type.
    pub kind: ToolParamType,
    /// Whether the model must supply the parameter.
    pub required: bool,
}

impl ToolParam {
    /// Builds a parameter definition.
    pub fn new(
        name: impl Into<String>,
        kind: ToolParamType,
        required: bool,
        description: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            kind,
            required,
        }
    }
}

/// Function declaration offered to the model.
#[derive(Debug, Clone)]
pub struct ToolFunction {
    /// Function name, as the model will call it.
    pub name: String,
    /// What the function does.
    pub description: String,
    /// Parameter definitions.
    pub params: Vec<ToolParam>,
}

impl ToolFunction {
    /// Creates a function definition with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Appends one parameter definition.
    pub fn with_param(mut self, param: ToolParam) -> Self {
        self.params.push(param);
        self
    }

    fn to_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut param_def = Map::new();
            param_def.insert("type".to_string(), Value::from(param.kind.as_str()));
            if let Some(description) = &param.description {
                param_def.insert("description".to_string(), Value::from(description.as_str()));
            }
            properties.insert(param.name.clone(), Value::Object(param_def));
            if param.required {
                required.push(Value::from(param.name.as_str()));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), Value::from("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        Value::Object(schema)
    }
}

/// Tool wrapper matching the chat-completions function-calling schema.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Function declaration.
    pub function: ToolFunction,
}

impl ToolDefinition {
    /// Wraps a function definition as a tool.
    pub fn from_function(function: ToolFunction) -> Self {
        Self { function }
    }

    /// Serializes the tool declaration to JSON.
    pub fn to_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.function.name,
                "description": self.function.description,
                "parameters": self.function.to_schema(),
            }
        })
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Tool call emitted by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments exactly as the model produced them.
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parses the argument payload into a JSON object.
    ///
    /// Models occasionally emit Python-style single-quoted objects; those are
    /// accepted after swapping the quote characters.
    pub fn parsed_arguments(&self) -> Result<Map<String, Value>> {
        let raw = self.function.arguments.trim();
        let parsed = serde_json::from_str::<Value>(raw)
            .or_else(|first| serde_json::from_str::<Value>(&raw.replace('\'', "\"")).map_err(|_| first))
            .map_err(|err| LabError::ToolArguments {
                name: self.function.name.clone(),
                reason: err.to_string(),
            })?;

        match parsed {
            Value::Object(map) => Ok(map),
            other => Err(LabError::ToolArguments {
                name: self.function.name.clone(),
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

/// The local functions a model may call, keyed by their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTool {
    GetWeather,
    GetTemperature,
}

impl LocalTool {
    pub const ALL: [LocalTool; 2] = [LocalTool::GetWeather, LocalTool::GetTemperature];

    pub fn name(self) -> &'static str {
        match self {
            Self::GetWeather => "get_weather",
            Self::GetTemperature => "get_temperature",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn definition(self) -> ToolDefinition {
        let (description, param) = match self {
            Self::GetWeather => (
                "Returns description of the weather in the specified city",
                "The name of the city for which weather info is requested",
            ),
            Self::GetTemperature => (
                "Returns the current temperature for the specified city",
                "The name of the city for which temperature info is requested",
            ),
        };
        ToolDefinition::from_function(ToolFunction::new(self.name(), description).with_param(
            ToolParam::new("city", ToolParamType::String, true, Some(param.to_string())),
        ))
    }

    fn handler(self) -> fn(&str) -> String {
        match self {
            Self::GetWeather => get_weather,
            Self::GetTemperature => get_temperature,
        }
    }

    /// Runs the tool against already-parsed arguments.
    pub fn invoke(self, args: &Map<String, Value>) -> Result<String> {
        let city = args
            .get("city")
            .and_then(Value::as_str)
            .ok_or_else(|| LabError::ToolArguments {
                name: self.name().to_string(),
                reason: "missing string argument `city`".to_string(),
            })?;
        Ok((self.handler())(city))
    }
}

pub fn get_weather(city: &str) -> String {
    match city {
        "Seattle" => "Nice weather",
        "New York City" => "Good weather",
        _ => "Unavailable",
    }
    .to_string()
}

pub fn get_temperature(city: &str) -> String {
    let _span = info_span!("get_temperature", requested_city = city).entered();

    match city {
        "Seattle" => "75",
        "New York City" => "80",
        _ => "Unavailable",
    }
    .to_string()
}

/// Result of [`complete_with_tools`]: the final response and the transcript
/// that produced it.
#[derive(Debug)]
pub struct ToolRun {
    pub response: ChatCompletions,
    pub messages: Vec<ChatMessage>,
}

/// Requests a completion and, if the model asks for tool calls, answers each
/// one with the matching [`LocalTool`] and asks once more.
///
/// At most one follow-up is sent; it is returned even if it asks for tools
/// again.
pub async fn complete_with_tools<C: Completions>(
    client: &C,
    mut messages: Vec<ChatMessage>,
    tools: &[LocalTool],
) -> Result<ToolRun> {
    let definitions = tools.iter().map(|tool| tool.definition()).collect::<Vec<_>>();

    let request = ChatCompletionsRequest::new(messages.clone()).with_tools(definitions.clone());
    let response = client.complete(&request).await?;
    let choice = response.first_choice()?;

    let tool_calls = choice.message.tool_calls.clone();
    if choice.finish_reason != Some(FinishReason::ToolCalls) || tool_calls.is_empty() {
        return Ok(ToolRun { response, messages });
    }

    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

    for call in &tool_calls {
        let args = call.parsed_arguments()?;
        println!(
            "Calling function `{}` with arguments {}",
            call.function.name,
            Value::Object(args.clone())
        );

        let tool = LocalTool::from_name(&call.function.name)
            .filter(|tool| tools.contains(tool))
            .ok_or_else(|| LabError::UnknownTool(call.function.name.clone()))?;
        let output = tool.invoke(&args)?;
        println!("Function response = {output}");

        messages.push(ChatMessage::tool(output, call.id.clone()));
    }

    let follow_up = ChatCompletionsRequest::new(messages.clone()).with_tools(definitions);
    let response = client.complete(&follow_up).await?;
    Ok(ToolRun { response, messages })
}
