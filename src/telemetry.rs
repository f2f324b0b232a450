use std::io;

use tracing::{Level, info};
use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::prelude::*;

use crate::error::Result;
use crate::foundry::projects::ProjectClient;

/// Installs the global subscriber.
///
/// Log events go to stderr, filtered by `RUST_LOG` or, without it, `warn`
/// (`debug` for this crate when `verbose`). With `console_spans`, every closed
/// span of this crate is also printed to stdout together with its fields.
pub fn init(verbose: bool, console_spans: bool) {
    let default_filter = if verbose { "warn,ailab=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let logs = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(filter);

    let spans = console_spans.then(|| {
        fmt::layer()
            .with_writer(io::stdout)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter_fn(|meta| {
                meta.is_span()
                    && meta.target().starts_with(env!("CARGO_CRATE_NAME"))
                    && *meta.level() <= Level::INFO
            }))
    });

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(logs)
        .with(spans)
        .try_init();
}

/// Looks up the project's Application Insights resource and prints where its
/// traces can be viewed. Returns the connection string when one exists.
pub async fn enable_project_telemetry(project: &ProjectClient) -> Result<Option<String>> {
    let link = project.scope().tracing_link();
    let connection_string = project.telemetry_connection_string().await?;

    match &connection_string {
        None => {
            println!(
                "No application insights configured, telemetry will not be logged to project. Add application insights at:"
            );
            println!("{link}");
        }
        Some(_) => {
            info!("application insights connection string found");
            println!("Application insights is configured for this project, view traces at:");
            println!("{link}");
        }
    }

    Ok(connection_string)
}
