use std::time::Duration;

use clap::Args;
use serde_json::json;
use tracing::debug;

use crate::commands::{LabContext, print_fail};
use crate::error::{LabError, Result};
use crate::foundry::http::client;

const SERVICE: &str = "promptflow";

#[derive(Debug, Args, Clone)]
pub struct PromptflowArgs {
    /// Chat input sent to the flow
    #[arg(long, default_value = "where to stay in new york?")]
    chat_input: String,
    /// Accept a self-signed certificate on the scoring endpoint
    #[arg(long)]
    allow_self_signed: bool,
}

/// Calls a deployed prompt flow scoring endpoint once.
pub async fn run(args: PromptflowArgs, ctx: &LabContext) -> Result<()> {
    let url = ctx.env.require("ENDPOINT")?;
    let api_key = ctx.env.require("ENDPOINT_KEY")?;

    let body = json!({"chat_input": args.chat_input, "chat_history": []});
    let mut request = client(args.allow_self_signed)?
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .bearer_auth(&api_key)
        .json(&body);
    if let Some(timeout_secs) = ctx.request.timeout_secs {
        request = request.timeout(Duration::from_secs(timeout_secs));
    }

    debug!(endpoint = %url, api_key_present = true, "calling scoring endpoint");
    let response = request.send().await.map_err(LabError::request(SERVICE))?;
    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await.map_err(LabError::request(SERVICE))?;

    if status.is_success() {
        println!("{text}");
        return Ok(());
    }

    print_fail(format!(
        "The request failed with status code: {}",
        status.as_u16()
    ));
    for (name, value) in &headers {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{text}");

    Err(LabError::Api {
        service: SERVICE,
        status,
        body: text,
    })
}
