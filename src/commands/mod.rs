//! One module per lab subcommand.

use std::fmt::Display;
use std::sync::Arc;

use owo_colors::{OwoColorize, Stream};

use crate::config::{Environment, RequestOptions};
use crate::error::Result;
use crate::foundry::credential::DefaultAzureCredential;
use crate::foundry::http::client;
use crate::foundry::projects::{ProjectClient, ProjectEndpoints, ProjectScope};

pub mod agent_bing;
pub mod agent_travel;
pub mod chat;
pub mod config;
pub mod connections;
pub mod evaluate;
pub mod image;
pub mod promptflow;
pub mod trace_tools;

/// Required environment variables per lab, as reported by `config check`.
pub const LAB_REQUIREMENTS: &[(&str, &[&str])] = &[
    ("chat", &["MODEL_DEPLOYMENT", "MODEL_KEY"]),
    (
        "trace-tools",
        &[
            "AZURE_AI_CHAT_ENDPOINT",
            "AZURE_AI_CHAT_KEY",
            "AZURE_AI_CHAT_DEPLOYMENT",
        ],
    ),
    (
        "image",
        &[
            "AZURE_INFERENCE_ENDPOINT",
            "AZURE_INFERENCE_CREDENTIAL",
            "AZURE_INFERENCE_DEPLOYMENT",
        ],
    ),
    (
        "agent-bing",
        &[
            "AIPROJECT_CONNECTION_STRING",
            "BING_CONNECTION_NAME",
            "MODEL_DEPLOYMENT_NAME",
        ],
    ),
    (
        "agent-travel",
        &[
            "AIPROJECT_CONNECTION_STRING",
            "MODEL_DEPLOYMENT_NAME",
            "AISEARCH_INDEX_NAME",
        ],
    ),
    ("connections", &["AIPROJECT_CONNECTION_STRING"]),
    (
        "evaluate",
        &["AIPROJECT_CONNECTION_STRING", "EVALUATION_MODEL"],
    ),
    ("promptflow", &["ENDPOINT", "ENDPOINT_KEY"]),
];

/// Settings every lab runs with.
#[derive(Debug, Clone)]
pub struct LabContext {
    pub env: Environment,
    pub request: RequestOptions,
    pub profile: Option<String>,
}

impl LabContext {
    /// Project client from `AIPROJECT_CONNECTION_STRING`.
    ///
    /// `AIPROJECT_AGENTS_ENDPOINT` and `AIPROJECT_MANAGEMENT_ENDPOINT` replace
    /// the derived base URLs.
    pub fn project(&self) -> Result<ProjectClient> {
        let scope = self
            .env
            .require("AIPROJECT_CONNECTION_STRING")?
            .parse::<ProjectScope>()?;

        let mut endpoints = ProjectEndpoints::for_scope(&scope);
        if let Some(agents) = self.env.get("AIPROJECT_AGENTS_ENDPOINT") {
            endpoints.agents = agents;
        }
        if let Some(management) = self.env.get("AIPROJECT_MANAGEMENT_ENDPOINT") {
            endpoints.management = management;
        }

        let credential = Arc::new(DefaultAzureCredential::from_env(&self.env, client(false)?));
        Ok(ProjectClient::with_endpoints(scope, endpoints, credential)?
            .with_request_options(self.request))
    }
}

pub(crate) fn print_ok(message: impl Display) {
    println!(
        "{}",
        format!("✅ {message}").if_supports_color(Stream::Stdout, |text| text.green())
    );
}

pub(crate) fn print_fail(message: impl Display) {
    println!(
        "{}",
        format!("❌ {message}").if_supports_color(Stream::Stdout, |text| text.red())
    );
}

pub(crate) fn print_heading(message: impl Display) {
    println!(
        "{}",
        message
            .to_string()
            .if_supports_color(Stream::Stdout, |text| text.bold())
    );
}
