use clap::Args;
use tracing::{Instrument, info_span};

use crate::commands::LabContext;
use crate::error::{LabError, Result};
use crate::foundry::agents::{AgentOptions, BingGroundingTool, ROLE_AGENT, ROLE_USER, RunStatus};
use crate::telemetry;

#[derive(Debug, Args, Clone)]
pub struct AgentBingArgs {
    /// Question for the agent
    #[arg(long, default_value = "How does wikipedia explain Euler's Identity?")]
    prompt: String,
    /// Look up the project's Application Insights resource first
    #[arg(long)]
    telemetry: bool,
}

/// Creates a Bing-grounded agent, asks one question and prints the answer
/// with its URL citations.
pub async fn run(args: AgentBingArgs, ctx: &LabContext) -> Result<()> {
    let project = ctx.project()?;
    let connection_name = ctx.env.require("BING_CONNECTION_NAME")?;
    let model = ctx.env.require("MODEL_DEPLOYMENT_NAME")?;

    if args.telemetry {
        telemetry::enable_project_telemetry(&project).await?;
    }

    let bing_connection = project.connections().get(&connection_name, false).await?;
    println!("{}", bing_connection.id);
    let bing = BingGroundingTool::new(bing_connection.id);

    async {
        let agents = project.agents();
        let agent = agents
            .create_agent(&AgentOptions {
                model,
                name: "my-assistant".to_string(),
                instructions: "You are a helpful assistant".to_string(),
                tools: bing.definitions(),
                tool_resources: None,
            })
            .await?;
        println!("Created agent, ID: {}", agent.id);

        let outcome = async {
            let thread = agents.create_thread().await?;
            println!("Created thread, ID: {}", thread.id);

            let message = agents
                .create_message(&thread.id, ROLE_USER, &args.prompt)
                .await?;
            println!("Created message, ID: {}", message.id);

            let run = agents.create_and_process_run(&thread.id, &agent.id).await?;
            println!("Run finished with status: {}", run.status);
            if run.status == RunStatus::Failed {
                println!(
                    "Run failed: {}",
                    run.last_error.unwrap_or(serde_json::Value::Null)
                );
            }
            Ok::<_, LabError>(thread)
        }
        .await;

        let deleted = agents.delete_agent(&agent.id).await;
        let thread = outcome?;
        deleted?;
        println!("Deleted agent");

        let messages = agents.list_messages(&thread.id).await?;
        if let Some(response) = messages.last_message_by_role(ROLE_AGENT) {
            for text in response.text_messages() {
                println!("Agent response: {}", text.value);
            }
            for citation in response.url_citation_annotations() {
                println!(
                    "URL Citation: [{}]({})",
                    citation.title.as_deref().unwrap_or(&citation.url),
                    citation.url
                );
            }
        }
        Ok(())
    }
    .instrument(info_span!("agent_bing"))
    .await
}
