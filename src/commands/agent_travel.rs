use clap::Args;
use serde_json::Value;
use tracing::{Instrument, info_span};

use crate::commands::{LabContext, print_fail, print_ok};
use crate::error::{LabError, Result};
use crate::foundry::agents::{AgentOptions, AzureAiSearchTool, ROLE_AGENT, ROLE_USER, RunStatus};
use crate::foundry::projects::ConnectionType;
use crate::telemetry;

const AGENT_NAME: &str = "agent-travel";

const INSTRUCTIONS: &str = "You are a travel planning agent working on behalf of the travel agency. \
You help users find travel details. Use Azure AI Search to find travel destinations and information about company.";

#[derive(Debug, Args, Clone)]
pub struct AgentTravelArgs {
    /// Question for the agent
    #[arg(long, default_value = "Which travel destinations are you specialized in?")]
    prompt: String,
    /// Look up the project's Application Insights resource first
    #[arg(long)]
    telemetry: bool,
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Runs the travel agent over the project's search index, reusing an agent
/// with the same name when one exists.
pub async fn run(args: AgentTravelArgs, ctx: &LabContext) -> Result<()> {
    let project = match ctx.project() {
        Ok(project) => {
            print_ok("Successfully initialized project client");
            project
        }
        Err(err) => {
            print_fail(format!("Error initializing project client: {err}"));
            return Err(err);
        }
    };
    let model = ctx.env.require("MODEL_DEPLOYMENT_NAME")?;
    let index_name = ctx.env.require("AISEARCH_INDEX_NAME")?;

    if args.telemetry {
        telemetry::enable_project_telemetry(&project).await?;
    }

    let search_connection = project
        .connections()
        .list(Some(&ConnectionType::AzureAiSearch))
        .await?
        .into_iter()
        .next();
    let Some(search_connection) = search_connection else {
        print_fail("No Azure AI Search connection found in your project.");
        println!("Please create one or ask your admin to do so.");
        return Ok(());
    };
    println!(
        "Found existing Azure AI Search connection: {}",
        search_connection.id
    );

    let search_tool = AzureAiSearchTool::new(search_connection.id, index_name);

    async {
        let agents = project.agents();
        let existing = agents
            .list_agents()
            .await?
            .data
            .into_iter()
            .find(|agent| agent.name.as_deref() == Some(AGENT_NAME));

        let agent = match existing {
            Some(agent) => {
                println!("Found existing agent: {}", agent.id);
                agent
            }
            None => {
                let agent = agents
                    .create_agent(&AgentOptions {
                        model,
                        name: AGENT_NAME.to_string(),
                        instructions: INSTRUCTIONS.to_string(),
                        tools: search_tool.definitions(),
                        tool_resources: Some(search_tool.resources()),
                    })
                    .await?;
                println!("Created agent, ID: {}", agent.id);
                agent
            }
        };

        let outcome = async {
            let thread = agents.create_thread().await?;
            println!("Created thread, thread ID: {}", thread.id);

            let message = agents
                .create_message(&thread.id, ROLE_USER, &args.prompt)
                .await?;
            println!("Created message, message ID: {}", message.id);

            let run = agents.create_and_process_run(&thread.id, &agent.id).await?;
            println!("Run finished with status: {}", run.status);
            if run.status == RunStatus::Failed {
                // "Rate limit is exceeded." here means the deployment needs more quota.
                println!("Run failed: {}", run.last_error.unwrap_or(Value::Null));
            }

            let steps = agents.list_run_steps(&thread.id, &run.id).await?;
            for step in &steps.data {
                println!("Step {} status: {}", step.id, step.status);
                let tool_calls = &step.step_details.tool_calls;
                if !tool_calls.is_empty() {
                    println!("  Tool calls:");
                    for call in tool_calls {
                        println!("    Tool Call ID: {}", call.id.as_deref().unwrap_or("None"));
                        println!("    Type: {}", call.kind.as_deref().unwrap_or("None"));
                        if let Some(search) = &call.azure_ai_search {
                            println!("    azure_ai_search input: {}", plain(&search.input));
                            println!("    azure_ai_search output: {}", plain(&search.output));
                        }
                    }
                }
                println!();
            }
            Ok::<_, LabError>(thread)
        }
        .await;

        let deleted = agents.delete_agent(&agent.id).await;
        let thread = outcome?;
        deleted?;
        println!("Deleted agent");

        let messages = agents.list_messages(&thread.id).await?;
        let first_answer = messages
            .data
            .iter()
            .rev()
            .find(|message| message.role == ROLE_AGENT && !message.content.is_empty());
        if let Some(message) = first_answer {
            println!("\nAssistant says:");
            for text in message.text_messages() {
                println!("{}", text.value);
            }
        }
        Ok(())
    }
    .instrument(info_span!("agent_travel"))
    .await
}
