use clap::Args;

use crate::commands::{LabContext, print_heading};
use crate::error::Result;
use crate::foundry::projects::ConnectionType;

#[derive(Debug, Args, Clone)]
pub struct ConnectionsArgs {}

/// Prints the project's connections and the ids the evaluation lab needs.
pub async fn run(_args: ConnectionsArgs, ctx: &LabContext) -> Result<()> {
    let project = ctx.project()?;
    let connections = project.connections();

    let all = connections.list(None).await?;
    print_heading(format!(
        "====> Listing of all connections (found {}):",
        all.len()
    ));
    for connection in &all {
        println!("{connection}");
    }

    let openai = connections.list(Some(&ConnectionType::AzureOpenAi)).await?;
    print_heading(format!(
        "====> Listing of all Azure Open AI connections (found {}):",
        openai.len()
    ));
    for connection in &openai {
        println!("{connection}");
    }

    let services = connections
        .get_default(&ConnectionType::AiServices, true)
        .await?;
    print_heading("====> Get default Azure AI Services connection:");
    match services {
        Some(connection) => println!("{connection}"),
        None => println!("None"),
    }

    let mut search_id = None;
    let mut openai_id = None;
    for connection in &all {
        match connection.connection_type {
            ConnectionType::AzureAiSearch => search_id = Some(connection.id.as_str()),
            ConnectionType::AzureOpenAi => openai_id = Some(connection.id.as_str()),
            _ => {}
        }
    }

    print_heading("\n====> Connection IDs found:");
    match search_id {
        Some(id) => println!("Azure AI Search: {id}"),
        None => println!("Azure AI Search: Not found - Please create an Azure AI Search connection"),
    }
    match openai_id {
        Some(id) => println!("Azure OpenAI: {id}"),
        None => println!("Azure OpenAI: Not found - Please create an Azure OpenAI connection"),
    }
    Ok(())
}
