use std::io;
use std::process;

use ailab::commands::agent_bing::{self, AgentBingArgs};
use ailab::commands::agent_travel::{self, AgentTravelArgs};
use ailab::commands::chat::{self, ChatArgs};
use ailab::commands::config::{self, ConfigArgs};
use ailab::commands::connections::{self, ConnectionsArgs};
use ailab::commands::evaluate::{self, EvaluateArgs};
use ailab::commands::image::{self, ImageArgs};
use ailab::commands::promptflow::{self, PromptflowArgs};
use ailab::commands::trace_tools::{self, TraceToolsArgs};
use ailab::commands::LabContext;
use ailab::config::{Environment, RequestOptions, load_profile};
use ailab::{Result, telemetry};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("AILAB_GIT_SHA"),
    ", built ",
    env!("AILAB_BUILD_TS"),
    ")"
);

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  ailab chat\n  ailab trace-tools --prompt \"What is the temperature in New York City?\"\n  ailab image --image-url https://example.com/chart.png\n  ailab --profile lab agent-bing --telemetry\n  ailab evaluate --data assets/chat_eval_data.jsonl\n  ailab config check\n  ailab completion bash > ~/.local/share/bash-completion/completions/ailab";

#[derive(Debug, Parser)]
#[command(
    name = "ailab",
    version = VERSION,
    about = "Azure AI Foundry lab samples",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    /// Debug logging for this crate (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Config profile supplying defaults and environment values
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Do not read the .env file in the current directory
    #[arg(long, global = true)]
    no_dotenv: bool,
    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    /// Extra attempts for throttled or failed requests
    #[arg(long, global = true)]
    retries: Option<u32>,
    /// Base retry delay in milliseconds
    #[arg(long, global = true)]
    retry_delay: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Ask a deployed chat model one question")]
    Chat(ChatArgs),
    #[command(about = "Tool-call round trip with span output")]
    TraceTools(TraceToolsArgs),
    #[command(about = "Ask a vision model about an image")]
    Image(ImageArgs),
    #[command(about = "Agent grounded with Bing search")]
    AgentBing(AgentBingArgs),
    #[command(about = "Travel agent over an Azure AI Search index")]
    AgentTravel(AgentTravelArgs),
    #[command(about = "List the project's connections")]
    Connections(ConnectionsArgs),
    #[command(about = "Evaluate the product chat for groundedness and fluency")]
    Evaluate(EvaluateArgs),
    #[command(about = "Call a deployed prompt flow endpoint")]
    Promptflow(PromptflowArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "ailab", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "ailab", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "ailab", &mut io::stdout()),
    }
}

fn context(cli: &Cli) -> Result<LabContext> {
    let profile = cli.profile.as_deref().map(load_profile).transpose()?;
    Ok(LabContext {
        env: Environment::load(!cli.no_dotenv, profile.as_ref())?,
        request: RequestOptions::resolve(
            cli.timeout,
            cli.retries,
            cli.retry_delay,
            profile.as_ref(),
        ),
        profile: cli.profile.clone(),
    })
}

async fn dispatch(cli: Cli) -> Result<()> {
    if let Commands::Completion { shell } = cli.command {
        print_completion(shell);
        return Ok(());
    }

    let ctx = context(&cli)?;
    match cli.command {
        Commands::Chat(args) => chat::run(args, &ctx).await,
        Commands::TraceTools(args) => trace_tools::run(args, &ctx).await,
        Commands::Image(args) => image::run(args, &ctx).await,
        Commands::AgentBing(args) => agent_bing::run(args, &ctx).await,
        Commands::AgentTravel(args) => agent_travel::run(args, &ctx).await,
        Commands::Connections(args) => connections::run(args, &ctx).await,
        Commands::Evaluate(args) => evaluate::run(args, &ctx).await,
        Commands::Promptflow(args) => promptflow::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx),
        Commands::Completion { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init(
        cli.verbose,
        matches!(cli.command, Commands::TraceTools(_)),
    );

    if let Err(err) = dispatch(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}
