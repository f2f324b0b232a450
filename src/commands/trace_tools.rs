use clap::Args;
use tracing::{Instrument, info_span};

use crate::commands::LabContext;
use crate::error::Result;
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::inference::{ChatCompletionsClient, ChatMessage};
use crate::foundry::tools::{LocalTool, complete_with_tools};

#[derive(Debug, Args, Clone)]
pub struct TraceToolsArgs {
    /// Question sent as the user message
    #[arg(long, default_value = "What is the weather and temperature in Seattle?")]
    prompt: String,
}

/// Runs the weather/temperature tool-call round trip with span output on.
pub async fn run(args: TraceToolsArgs, ctx: &LabContext) -> Result<()> {
    let endpoint = ctx.env.require("AZURE_AI_CHAT_ENDPOINT")?;
    let key = ctx.env.require("AZURE_AI_CHAT_KEY")?;
    let model = ctx.env.require("AZURE_AI_CHAT_DEPLOYMENT")?;

    let client = ChatCompletionsClient::new(endpoint, AzureKeyCredential::new(key))?
        .with_model(model)
        .with_request_options(ctx.request);

    let messages = vec![
        ChatMessage::system("You are a helpful assistant."),
        ChatMessage::user(args.prompt),
    ];

    let run = complete_with_tools(&client, messages, &LocalTool::ALL)
        .instrument(info_span!("chat_completion_with_function_call"))
        .await?;

    let content = run.response.first_choice()?.message.content.clone();
    println!("Model response = {}", content.unwrap_or_default());
    Ok(())
}
