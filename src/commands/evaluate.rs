use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;
use tracing::{debug, info};

use crate::commands::{LabContext, print_heading};
use crate::error::{LabError, Result};
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::evaluation::{
    ColumnMapping, EvaluationResult, EvaluatorKind, Row, Target, evaluate, load_dataset,
};
use crate::foundry::inference::{
    ChatCompletionsClient, ChatCompletionsRequest, ChatMessage, Completions,
};
use crate::foundry::projects::{Connection, ConnectionType};
use crate::foundry::search::SearchClient;

const EVALUATOR_API_VERSION: &str = "2024-08-01-preview";
const DATASET_FILE: &str = "chat_eval_data.jsonl";

#[derive(Debug, Args, Clone)]
pub struct EvaluateArgs {
    /// JSON Lines dataset (defaults to $ASSET_PATH/chat_eval_data.jsonl)
    #[arg(long)]
    data: Option<PathBuf>,
    /// Where the full result is written
    #[arg(long, default_value = "./myevalresults.json")]
    output_path: PathBuf,
    /// Evaluator input mapping, e.g. query='${data.query}' (repeatable)
    #[arg(long = "column", value_name = "INPUT=REF")]
    columns: Vec<String>,
}

/// Product question answering: optional search grounding, then one chat turn.
struct ProductChat {
    chat: ChatCompletionsClient,
    search: Option<SearchClient>,
}

const PRODUCT_INSTRUCTIONS: &str = "You are an AI assistant helping customers with questions about \
outdoor products. Answer briefly and only from the product documents below. If the documents do not \
contain the answer, say that you do not know.";

impl Target for ProductChat {
    async fn call(&self, row: &Row) -> Result<Row> {
        let query = row
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let documents = match &self.search {
            Some(search) => search.search(&query, 5).await?,
            None => Vec::new(),
        };
        debug!(documents = documents.len(), "grounding documents retrieved");
        let context = serde_json::to_string(&documents)?;

        let request = ChatCompletionsRequest::new(vec![
            ChatMessage::system(format!("{PRODUCT_INSTRUCTIONS}\n\n# Documents\n{context}")),
            ChatMessage::user(query),
        ]);
        let response = self.chat.complete(&request).await?;
        let answer = response
            .first_choice()?
            .message
            .content
            .clone()
            .unwrap_or_default();

        let mut outputs = Row::new();
        outputs.insert("response".to_string(), Value::from(answer));
        outputs.insert("context".to_string(), Value::from(context));
        Ok(outputs)
    }
}

fn endpoint_and_key(connection: &Connection) -> Result<(String, AzureKeyCredential)> {
    let endpoint = connection.endpoint_url.clone().ok_or_else(|| {
        LabError::Config(format!("Connection '{}' has no endpoint.", connection.name))
    })?;
    let key = connection.key.clone().ok_or_else(|| {
        LabError::Credential(format!("Connection '{}' returned no key.", connection.name))
    })?;
    Ok((endpoint, AzureKeyCredential::new(key)))
}

fn mapping(columns: &[String]) -> Result<ColumnMapping> {
    let pairs = columns
        .iter()
        .map(|column| {
            column.split_once('=').ok_or_else(|| {
                LabError::Config(format!("Column mapping '{column}' must be INPUT=REF."))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    ColumnMapping::parse(pairs)
}

fn cell(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(text)) => text.replace('\n', " "),
        Some(Value::Null) | None => "NaN".to_string(),
        Some(other) => other.to_string(),
    };
    if text.chars().count() > 40 {
        format!("{}...", text.chars().take(37).collect::<String>())
    } else {
        text
    }
}

fn print_table(result: &EvaluationResult) {
    let Some(first) = result.rows.first() else {
        println!("Empty DataFrame");
        return;
    };
    let columns = first.keys().collect::<Vec<_>>();
    println!(
        "\t{}",
        columns
            .iter()
            .map(|column| column.as_str())
            .collect::<Vec<_>>()
            .join("\t")
    );
    for (index, row) in result.rows.iter().enumerate() {
        let cells = columns
            .iter()
            .map(|column| cell(row.get(column.as_str())))
            .collect::<Vec<_>>();
        println!("{index}\t{}", cells.join("\t"));
    }
}

fn write_result(path: &Path, result: &EvaluationResult) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(result)?)?;
    info!(path = %path.display(), "evaluation result written");
    Ok(())
}

/// Evaluates the product chat pipeline for groundedness and fluency.
pub async fn run(args: EvaluateArgs, ctx: &LabContext) -> Result<()> {
    let project = ctx.project()?;
    let evaluation_model = ctx.env.require("EVALUATION_MODEL")?;
    let chat_model = ctx
        .env
        .get("CHAT_MODEL")
        .unwrap_or_else(|| evaluation_model.clone());
    let mapping = mapping(&args.columns)?;

    let data_path = args.data.unwrap_or_else(|| {
        PathBuf::from(ctx.env.get("ASSET_PATH").unwrap_or_else(|| "assets".to_string()))
            .join(DATASET_FILE)
    });
    let data = load_dataset(&data_path)?;

    let connections = project.connections();
    let services = connections
        .get_default(&ConnectionType::AiServices, true)
        .await?
        .ok_or_else(|| {
            LabError::Config("No Azure AI Services connection found in the project.".to_string())
        })?;
    let (endpoint, key) = endpoint_and_key(&services)?;

    let judge = ChatCompletionsClient::azure_openai(&endpoint, &evaluation_model, key.clone())?
        .with_api_version(EVALUATOR_API_VERSION)
        .with_request_options(ctx.request);
    let chat = ChatCompletionsClient::azure_openai(&endpoint, &chat_model, key)?
        .with_api_version(EVALUATOR_API_VERSION)
        .with_request_options(ctx.request);

    let search = match ctx.env.get("AISEARCH_INDEX_NAME") {
        Some(index_name) => {
            match connections
                .get_default(&ConnectionType::AzureAiSearch, true)
                .await?
            {
                Some(connection) => {
                    let (search_endpoint, search_key) = endpoint_and_key(&connection)?;
                    Some(
                        SearchClient::new(search_endpoint, index_name, search_key)?
                            .with_request_options(ctx.request),
                    )
                }
                None => None,
            }
        }
        None => None,
    };
    if search.is_none() {
        debug!("no search index configured; answering without grounding documents");
    }

    let target = ProductChat { chat, search };
    let result = evaluate(
        &data,
        &target,
        &judge,
        &[EvaluatorKind::Groundedness, EvaluatorKind::Fluency],
        &mapping,
    )
    .await?;

    write_result(&args.output_path, &result)?;

    print_heading("-----Summarized Metrics-----");
    println!("{}", serde_json::to_string_pretty(&result.metrics)?);
    print_heading("-----Tabular Result-----");
    print_table(&result);
    println!(
        "View evaluation results in AI Studio: {}",
        result
            .studio_url
            .clone()
            .unwrap_or_else(|| project.scope().evaluation_link())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_columns_parse() {
        assert!(mapping(&[]).is_ok());
        assert!(mapping(&["query=${data.question}".to_string()]).is_ok());
        assert!(matches!(
            mapping(&["query".to_string()]),
            Err(LabError::Config(_))
        ));
        assert!(mapping(&["query=${run.x}".to_string()]).is_err());
    }

    #[test]
    fn cells_are_flattened_and_truncated() {
        assert_eq!(cell(None), "NaN");
        assert_eq!(cell(Some(&Value::from(4.0))), "4.0");
        assert_eq!(cell(Some(&Value::from("a\nb"))), "a b");
        let long = "x".repeat(50);
        assert_eq!(cell(Some(&Value::from(long))).len(), 40);
    }
}
