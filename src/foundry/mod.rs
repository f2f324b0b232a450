//! Thin REST clients for the AI platform services the labs call.
//!
//! Each submodule wraps one service surface with typed requests and
//! responses, and the few pieces of local logic (tool dispatch, evaluation)
//! sit on top of them.

/// Agents, threads, messages and runs.
pub mod agents;
/// API keys and the Entra ID token chain.
pub mod credential;
/// Dataset evaluation with LLM-judge evaluators.
pub mod evaluation;
pub(crate) mod http;
/// Image download and `data:` URL encoding.
pub mod image;
/// Chat completions client and wire types.
pub mod inference;
/// Project scope, connections and telemetry lookup.
pub mod projects;
/// Azure AI Search document queries.
pub mod search;
/// Tool schemas, local tools and the tool-call loop.
pub mod tools;
