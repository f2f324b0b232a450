use clap::Args;
use tracing::debug;

use crate::commands::LabContext;
use crate::error::Result;
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::inference::{
    ChatCompletionsClient, ChatCompletionsRequest, ChatMessage, Completions, DEFAULT_API_VERSION,
};

#[derive(Debug, Args, Clone)]
pub struct ChatArgs {
    /// Question sent as the user message
    #[arg(long, default_value = "How many feet are in a mile?")]
    prompt: String,
    /// Service API version
    #[arg(long, default_value = DEFAULT_API_VERSION)]
    api_version: String,
}

pub async fn run(args: ChatArgs, ctx: &LabContext) -> Result<()> {
    // Endpoint is of the form https://<resource>.openai.azure.com/openai/deployments/<deployment>,
    // https://<resource>.services.ai.azure.com/models or a serverless endpoint.
    let endpoint = ctx.env.require("MODEL_DEPLOYMENT")?;
    let key = ctx.env.require("MODEL_KEY")?;
    debug!(endpoint = %endpoint, api_key_present = true, "chat configuration");

    let client = ChatCompletionsClient::new(endpoint, AzureKeyCredential::new(key))?
        .with_api_version(args.api_version)
        .with_request_options(ctx.request);

    let mut request = ChatCompletionsRequest::new(vec![
        ChatMessage::system("You are a helpful assistant."),
        ChatMessage::user(args.prompt),
    ])
    .with_max_tokens(1000)
    .with_temperature(1.0)
    .with_top_p(1.0);

    if let Some(model) = ctx.env.get("MODEL_DEPLOYMENT_NAME") {
        request = request.with_model(model);
    }

    let response = client.complete(&request).await?;
    let choice = response.first_choice()?;

    println!("{}", choice.message.content.as_deref().unwrap_or_default());
    println!("\nToken usage: {}", response.usage);
    Ok(())
}
