use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the lab clients and commands.
#[derive(Debug, Error)]
pub enum LabError {
    #[error("Missing environment variable '{name}'. Set it before running this sample.")]
    MissingEnv { name: &'static str },

    #[error("{0}")]
    Config(String),

    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} API error {status}: {body}")]
    Api {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{service} response did not contain {what}")]
    EmptyResponse {
        service: &'static str,
        what: &'static str,
    },

    #[error("invalid arguments for tool `{name}`: {reason}")]
    ToolArguments { name: String, reason: String },

    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("dataset {path} line {line}: {reason}")]
    Dataset {
        path: String,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LabError {
    pub(crate) fn request(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Request { service, source }
    }
}

pub type Result<T, E = LabError> = std::result::Result<T, E>;
