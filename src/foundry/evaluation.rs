//! Local evaluation of a chat target against a JSON Lines dataset, scored by
//! LLM-judge evaluators.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{Instrument, debug, info, info_span};

use crate::error::{LabError, Result};
use crate::foundry::inference::{ChatCompletionsRequest, ChatMessage, Completions};

pub type Row = Map<String, Value>;

/// Reads one JSON object per non-blank line.
pub fn load_dataset(path: &Path) -> Result<Vec<Row>> {
    let raw = fs::read_to_string(path).map_err(|err| LabError::Dataset {
        path: path.display().to_string(),
        line: 0,
        reason: err.to_string(),
    })?;

    let mut rows = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str::<Row>(line).map_err(|err| LabError::Dataset {
            path: path.display().to_string(),
            line: index + 1,
            reason: err.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// A `${data.<field>}` or `${target.<field>}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Data(String),
    Target(String),
}

impl FromStr for ColumnRef {
    type Err = LabError;

    fn from_str(raw: &str) -> Result<Self> {
        let inner = raw
            .trim()
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| {
                LabError::Config(format!(
                    "Column reference '{raw}' must look like ${{data.x}} or ${{target.x}}."
                ))
            })?;

        match inner.split_once('.') {
            Some(("data", field)) if !field.is_empty() => Ok(Self::Data(field.to_string())),
            Some(("target", field)) if !field.is_empty() => Ok(Self::Target(field.to_string())),
            _ => Err(LabError::Config(format!(
                "Column reference '{raw}' must point at data or target."
            ))),
        }
    }
}

impl ColumnRef {
    fn resolve<'a>(&self, data: &'a Row, outputs: &'a Row) -> Option<&'a Value> {
        match self {
            Self::Data(field) => data.get(field),
            Self::Target(field) => outputs.get(field),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(field) => write!(f, "${{data.{field}}}"),
            Self::Target(field) => write!(f, "${{target.{field}}}"),
        }
    }
}

/// Maps evaluator inputs to dataset or target columns.
#[derive(Debug, Clone)]
pub struct ColumnMapping(BTreeMap<String, ColumnRef>);

impl ColumnMapping {
    /// Parses `(input, reference)` pairs over the default mapping, so only
    /// the inputs named here change.
    pub fn parse<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut mapping = Self::default();
        for (input, reference) in pairs {
            mapping
                .0
                .insert(input.to_string(), reference.parse::<ColumnRef>()?);
        }
        Ok(mapping)
    }

    fn input(&self, name: &str, data: &Row, outputs: &Row) -> Result<String> {
        let reference = self.0.get(name).ok_or_else(|| {
            LabError::Config(format!("Evaluator input '{name}' has no column mapping."))
        })?;
        reference
            .resolve(data, outputs)
            .map(value_text)
            .ok_or_else(|| {
                LabError::Config(format!(
                    "Column reference '{reference}' for input '{name}' matches no column."
                ))
            })
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("query".to_string(), ColumnRef::Data("query".to_string())),
            ("response".to_string(), ColumnRef::Target("response".to_string())),
            ("context".to_string(), ColumnRef::Target("context".to_string())),
        ]))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The function under evaluation.
pub trait Target {
    fn call(&self, row: &Row) -> impl Future<Output = Result<Row>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    Groundedness,
    Fluency,
}

impl EvaluatorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Groundedness => "groundedness",
            Self::Fluency => "fluency",
        }
    }

    fn inputs(self) -> &'static [&'static str] {
        match self {
            Self::Groundedness => &["query", "response", "context"],
            Self::Fluency => &["response"],
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Self::Groundedness => GROUNDEDNESS_PROMPT,
            Self::Fluency => FLUENCY_PROMPT,
        }
    }

    fn messages(self, inputs: &[(&str, String)]) -> Vec<ChatMessage> {
        let body = inputs
            .iter()
            .map(|(name, value)| format!("{}: {value}", name.to_uppercase()))
            .collect::<Vec<_>>()
            .join("\n\n");
        vec![
            ChatMessage::system(format!("{}\n\n{OUTPUT_FORMAT}", self.instructions())),
            ChatMessage::user(body),
        ]
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const GROUNDEDNESS_PROMPT: &str = "You are an AI assistant that judges answers. You will be given a \
QUERY, a RESPONSE and the CONTEXT the response should be based on. Rate how well the RESPONSE is \
grounded in the CONTEXT on a scale from 1 to 5: 1 means the response is unrelated to or contradicts \
the context, 3 means it is partly supported, 5 means every claim is supported by the context.";

const FLUENCY_PROMPT: &str = "You are an AI assistant that judges writing quality. You will be given a \
RESPONSE. Rate its fluency on a scale from 1 to 5: 1 means it is barely readable, 3 means it is \
understandable with noticeable errors, 5 means it is fluent, well structured and free of errors.";

const OUTPUT_FORMAT: &str = "Answer in exactly this format: \
<S0>your step-by-step reasoning</S0><S1>a one sentence explanation</S1><S2>the integer score</S2>";

/// Score and explanation extracted from a judge answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub score: Option<f64>,
    pub reason: String,
}

fn tagged<'a>(answer: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = answer.find(&open)? + open.len();
    let end = answer[start..].find(&close)? + start;
    Some(answer[start..end].trim())
}

/// Reads the `<S2>` score (1 to 5). Otherwise takes the first digit 1-5
/// after the reasoning, i.e. past `</S1>` or `</S0>` when present.
pub fn parse_judgement(answer: &str) -> Judgement {
    let score = tagged(answer, "S2")
        .and_then(|raw| raw.parse::<f64>().ok())
        .or_else(|| {
            let tail = ["</S1>", "</S0>"]
                .iter()
                .find_map(|close| answer.find(close).map(|at| &answer[at + close.len()..]))
                .unwrap_or(answer);
            tail.chars()
                .find(|c| ('1'..='5').contains(c))
                .and_then(|c| c.to_digit(10))
                .map(f64::from)
        })
        .filter(|score| (1.0..=5.0).contains(score));
    let reason = tagged(answer, "S1").unwrap_or_default().to_string();
    Judgement { score, reason }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub rows: Vec<Row>,
    pub metrics: BTreeMap<String, f64>,
    pub studio_url: Option<String>,
}

async fn judge<C: Completions>(
    judge: &C,
    evaluator: EvaluatorKind,
    mapping: &ColumnMapping,
    data: &Row,
    outputs: &Row,
) -> Result<Judgement> {
    let inputs = evaluator
        .inputs()
        .iter()
        .map(|name| Ok((*name, mapping.input(name, data, outputs)?)))
        .collect::<Result<Vec<_>>>()?;
    let request = ChatCompletionsRequest::new(evaluator.messages(&inputs))
        .with_temperature(0.0)
        .with_max_tokens(800);
    let response = judge.complete(&request).await?;
    let answer = response
        .first_choice()?
        .message
        .content
        .clone()
        .unwrap_or_default();
    Ok(parse_judgement(&answer))
}

/// Runs `target` on every row, scores each output with every evaluator and
/// averages the scores per metric.
pub async fn evaluate<T: Target, C: Completions>(
    data: &[Row],
    target: &T,
    judge_model: &C,
    evaluators: &[EvaluatorKind],
    mapping: &ColumnMapping,
) -> Result<EvaluationResult> {
    let mut rows = Vec::with_capacity(data.len());
    let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for (index, input) in data.iter().enumerate() {
        let span = info_span!("evaluate_row", index);
        let row = async {
            let outputs = target.call(input).await?;
            let mut row = Row::new();
            for (key, value) in input {
                row.insert(format!("inputs.{key}"), value.clone());
            }
            for (key, value) in &outputs {
                row.insert(format!("outputs.{key}"), value.clone());
            }

            for evaluator in evaluators {
                let metric = format!("{0}.{0}", evaluator.name());
                let judgement = judge(judge_model, *evaluator, mapping, input, &outputs).await?;
                debug!(%evaluator, score = ?judgement.score, "row scored");

                if let Some(score) = judgement.score {
                    let entry = totals.entry(metric.clone()).or_insert((0.0, 0));
                    entry.0 += score;
                    entry.1 += 1;
                }
                row.insert(
                    format!("outputs.{metric}"),
                    judgement.score.map_or(Value::Null, Value::from),
                );
                row.insert(
                    format!("outputs.{metric}_reason"),
                    Value::from(judgement.reason),
                );
            }
            Ok::<_, LabError>(row)
        }
        .instrument(span)
        .await?;
        rows.push(row);
    }

    let metrics = totals
        .into_iter()
        .map(|(metric, (sum, count))| (metric, sum / count as f64))
        .collect();
    info!(rows = rows.len(), "evaluation finished");

    Ok(EvaluationResult {
        rows,
        metrics,
        studio_url: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundry::inference::ChatCompletions;
    use serde_json::json;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct EchoTarget;

    impl Target for EchoTarget {
        async fn call(&self, row: &Row) -> Result<Row> {
            let query = row["query"].as_str().unwrap_or_default();
            let mut out = Row::new();
            out.insert("response".to_string(), json!(format!("answer to {query}")));
            out.insert("context".to_string(), json!("[{\"title\":\"tent\"}]"));
            Ok(out)
        }
    }

    struct ScriptedJudge {
        answers: RefCell<Vec<&'static str>>,
        prompts: RefCell<Vec<String>>,
    }

    impl Completions for ScriptedJudge {
        async fn complete(&self, request: &ChatCompletionsRequest) -> Result<ChatCompletions> {
            self.prompts
                .borrow_mut()
                .push(serde_json::to_string(&request.messages).unwrap());
            let answer = self.answers.borrow_mut().remove(0);
            Ok(serde_json::from_value(json!({
                "choices": [{"message": {"role": "assistant", "content": answer}, "finish_reason": "stop"}]
            }))
            .unwrap())
        }
    }

    fn temp_file(label: &str, contents: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ailab-eval-{label}-{nanos}.jsonl"));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn dataset_skips_blank_lines() {
        let path = temp_file("ok", "{\"query\":\"a\"}\n\n{\"query\":\"b\"}\n");
        let rows = load_dataset(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["query"], "b");
    }

    #[test]
    fn dataset_error_names_line() {
        let path = temp_file("bad", "{\"query\":\"a\"}\nnot json\n");
        let err = load_dataset(&path).unwrap_err();
        assert!(matches!(err, LabError::Dataset { line: 2, .. }));
    }

    #[test]
    fn column_references_parse() {
        assert_eq!(
            "${data.query}".parse::<ColumnRef>().unwrap(),
            ColumnRef::Data("query".to_string())
        );
        assert_eq!(
            "${target.context}".parse::<ColumnRef>().unwrap(),
            ColumnRef::Target("context".to_string())
        );
        assert!("${run.x}".parse::<ColumnRef>().is_err());
        assert!("data.query".parse::<ColumnRef>().is_err());
        assert!("${data.}".parse::<ColumnRef>().is_err());
    }

    #[test]
    fn judgement_prefers_tagged_score() {
        let judgement =
            parse_judgement("<S0>thinking 2 steps</S0><S1>Mostly supported.</S1><S2>4</S2>");
        assert_eq!(judgement.score, Some(4.0));
        assert_eq!(judgement.reason, "Mostly supported.");
    }

    #[test]
    fn judgement_falls_back_to_first_digit() {
        assert_eq!(parse_judgement("Score: 3 out of 5").score, Some(3.0));
        assert_eq!(parse_judgement("<S2>9</S2>").score, None);
        assert_eq!(parse_judgement("no score here").score, None);
    }

    #[test]
    fn fallback_ignores_digits_in_reasoning() {
        let judgement = parse_judgement("<S0>checked 2 docs</S0><S1>All claims hold.</S1> 5");
        assert_eq!(judgement.score, Some(5.0));
        assert_eq!(parse_judgement("<S0>checked 2 docs</S0> score 4").score, Some(4.0));
        assert_eq!(parse_judgement("<S0>checked 2 docs</S0><S1>none</S1>").score, None);
    }

    #[test]
    fn custom_columns_override_defaults() {
        let mapping = ColumnMapping::parse([("query", "${data.question}")]).unwrap();
        let data = serde_json::from_value::<Row>(json!({"question": "q?"})).unwrap();
        let outputs =
            serde_json::from_value::<Row>(json!({"response": "r", "context": "c"})).unwrap();

        assert_eq!(mapping.input("query", &data, &outputs).unwrap(), "q?");
        assert_eq!(mapping.input("response", &data, &outputs).unwrap(), "r");
        assert_eq!(mapping.input("context", &data, &outputs).unwrap(), "c");
    }

    #[tokio::test]
    async fn unresolved_reference_is_a_config_error() {
        let data = vec![serde_json::from_value::<Row>(json!({"query": "tents?"})).unwrap()];
        let judge = ScriptedJudge {
            answers: RefCell::new(vec!["<S2>5</S2>"]),
            prompts: RefCell::new(Vec::new()),
        };
        let mapping = ColumnMapping::parse([("query", "${data.qurey}")]).unwrap();

        let err = evaluate(
            &data,
            &EchoTarget,
            &judge,
            &[EvaluatorKind::Groundedness],
            &mapping,
        )
        .await
        .unwrap_err();

        match err {
            LabError::Config(message) => assert!(message.contains("${data.qurey}")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(judge.prompts.borrow().is_empty());
    }

    #[tokio::test]
    async fn evaluate_builds_rows_and_means() {
        let data = vec![
            serde_json::from_value::<Row>(json!({"query": "tents?"})).unwrap(),
            serde_json::from_value::<Row>(json!({"query": "boots?"})).unwrap(),
        ];
        let judge = ScriptedJudge {
            answers: RefCell::new(vec![
                "<S1>ok</S1><S2>5</S2>",
                "<S1>fine</S1><S2>4</S2>",
                "<S1>weak</S1><S2>3</S2>",
                "unparseable",
            ]),
            prompts: RefCell::new(Vec::new()),
        };

        let result = evaluate(
            &data,
            &EchoTarget,
            &judge,
            &[EvaluatorKind::Groundedness, EvaluatorKind::Fluency],
            &ColumnMapping::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.rows.len(), 2);
        let first = &result.rows[0];
        assert_eq!(first["inputs.query"], "tents?");
        assert_eq!(first["outputs.response"], "answer to tents?");
        assert_eq!(first["outputs.groundedness.groundedness"], json!(5.0));
        assert_eq!(first["outputs.fluency.fluency_reason"], "fine");
        assert_eq!(result.rows[1]["outputs.fluency.fluency"], Value::Null);

        assert_eq!(result.metrics["groundedness.groundedness"], 4.0);
        assert_eq!(result.metrics["fluency.fluency"], 4.0);

        let prompts = judge.prompts.borrow();
        assert!(prompts[0].contains("CONTEXT: [{\\\"title\\\":\\\"tent\\\"}]"));
        assert!(prompts[0].contains("QUERY: tents?"));
        assert!(!prompts[1].contains("QUERY:"));
    }
}
