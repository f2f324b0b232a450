use clap::Args;

use crate::commands::LabContext;
use crate::error::Result;
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::image::fetch_data_url;
use crate::foundry::inference::{
    ChatCompletionsClient, ChatCompletionsRequest, ChatMessage, Completions, ContentItem,
};

const DEFAULT_IMAGE_URL: &str = "https://news.microsoft.com/source/wp-content/uploads/2024/04/The-Phi-3-small-language-models-with-big-potential-1-1900x1069.jpg";

#[derive(Debug, Args, Clone)]
pub struct ImageArgs {
    /// Image to analyse
    #[arg(long, default_value = DEFAULT_IMAGE_URL)]
    image_url: String,
    /// Format assumed when it cannot be detected from the bytes
    #[arg(long, default_value = "jpeg")]
    image_format: String,
    /// Question asked about the image
    #[arg(
        long,
        default_value = "Which conclusion can be extracted from the following chart?"
    )]
    prompt: String,
}

pub async fn run(args: ImageArgs, ctx: &LabContext) -> Result<()> {
    let endpoint = ctx.env.require("AZURE_INFERENCE_ENDPOINT")?;
    let key = ctx.env.require("AZURE_INFERENCE_CREDENTIAL")?;
    let model = ctx.env.require("AZURE_INFERENCE_DEPLOYMENT")?;

    let client = ChatCompletionsClient::new(endpoint, AzureKeyCredential::new(key))?
        .with_model(model)
        .with_api_version("2025-01-01-preview")
        .with_request_options(ctx.request);

    let data_url = fetch_data_url(&args.image_url, &args.image_format, ctx.request).await?;

    let request = ChatCompletionsRequest::new(vec![
        ChatMessage::system("You are a helpful assistant that can generate responses based on images."),
        ChatMessage::user_items(vec![
            ContentItem::text(args.prompt),
            ContentItem::image_url(data_url),
        ]),
    ])
    .with_temperature(1.0)
    .with_max_tokens(2048);

    let response = client.complete(&request).await?;
    let message = &response.first_choice()?.message;

    println!(
        "{}: {}",
        message.role,
        message.content.as_deref().unwrap_or_default()
    );
    println!("Model: {}", response.model);
    println!("Usage:");
    println!("\tPrompt tokens: {}", response.usage.prompt_tokens);
    println!("\tCompletion tokens: {}", response.usage.completion_tokens);
    println!("\tTotal tokens: {}", response.usage.total_tokens);
    Ok(())
}
