use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ailab::LabError;
use ailab::config::{Environment, RequestOptions};
use ailab::foundry::agents::{AgentOptions, BingGroundingTool, ROLE_AGENT, RunStatus};
use ailab::foundry::credential::{AzureKeyCredential, DefaultAzureCredential};
use ailab::foundry::inference::{
    ChatCompletionsClient, ChatCompletionsRequest, ChatMessage, Completions,
};
use ailab::foundry::projects::{ConnectionType, ProjectClient, ProjectEndpoints, ProjectScope};
use ailab::foundry::search::SearchClient;
use ailab::foundry::tools::{LocalTool, complete_with_tools};
use mockito::{Matcher, Server};
use serde_json::json;

const WORKSPACE: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/proj";

fn project_for(server_url: &str) -> ProjectClient {
    let scope: ProjectScope = "eastus.api.azureml.ms;sub;rg;proj".parse().unwrap();
    let endpoints = ProjectEndpoints {
        agents: format!("{server_url}/agents"),
        management: server_url.to_string(),
    };
    ProjectClient::with_endpoints(
        scope,
        endpoints,
        Arc::new(DefaultAzureCredential::from_token("test-token")),
    )
    .unwrap()
    .with_request_options(RequestOptions {
        timeout_secs: Some(5),
        retries: 0,
        retry_delay_ms: 1,
    })
}

#[tokio::test]
async fn chat_completion_sends_key_and_api_version() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/chat/completions")
        .match_query(Matcher::UrlEncoded(
            "api-version".into(),
            "2024-05-01-preview".into(),
        ))
        .match_header("api-key", "model-key")
        .match_body(Matcher::PartialJson(json!({
            "messages": [
                {"role": "system", "content": "You are a helpful assistant."},
                {"role": "user", "content": "How many feet are in a mile?"}
            ],
            "max_tokens": 1000
        })))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "cmpl-1",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "There are 5,280 feet in a mile."},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 23, "completion_tokens": 9, "total_tokens": 32}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = ChatCompletionsClient::new(
        format!("{}/models", server.url()),
        AzureKeyCredential::new("model-key"),
    )
    .unwrap();
    let request = ChatCompletionsRequest::new(vec![
        ChatMessage::system("You are a helpful assistant."),
        ChatMessage::user("How many feet are in a mile?"),
    ])
    .with_max_tokens(1000);

    let response = client.complete(&request).await.unwrap();
    mock.assert_async().await;
    assert_eq!(
        response.first_choice().unwrap().message.content.as_deref(),
        Some("There are 5,280 feet in a mile.")
    );
    assert_eq!(
        response.usage.to_string(),
        "prompt_tokens=23 completion_tokens=9 total_tokens=32"
    );
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body("{\"error\":{\"code\":\"401\",\"message\":\"Access denied\"}}")
        .create_async()
        .await;

    let client = ChatCompletionsClient::new(server.url(), AzureKeyCredential::new("bad")).unwrap();
    let err = client
        .complete(&ChatCompletionsRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();

    match err {
        LabError::Api { status, body, .. } => {
            assert_eq!(status.as_u16(), 401);
            assert!(body.contains("Access denied"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn throttled_requests_are_retried() {
    let mut server = Server::new_async().await;
    let throttled = server
        .mock("POST", "/chat/completions")
        .match_query(Matcher::Any)
        .with_status(429)
        .expect(2)
        .create_async()
        .await;

    let client = ChatCompletionsClient::new(server.url(), AzureKeyCredential::new("k"))
        .unwrap()
        .with_request_options(RequestOptions {
            timeout_secs: Some(5),
            retries: 1,
            retry_delay_ms: 1,
        });
    let err = client
        .complete(&ChatCompletionsRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();

    throttled.assert_async().await;
    assert!(matches!(err, LabError::Api { .. }));
}

#[tokio::test]
async fn tool_round_trip_against_the_service() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/chat/completions")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex(r#"Seattle\?"\}\],"tools""#.to_string()))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "get_weather", "arguments": "{\"city\":\"Seattle\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let follow_up = server
        .mock("POST", "/chat/completions")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex(
            r#"\{"role":"tool","content":"Nice weather","tool_call_id":"call_1"\}"#.to_string(),
        ))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "It is nice in Seattle."},
                    "finish_reason": "stop"
                }]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let client = ChatCompletionsClient::new(server.url(), AzureKeyCredential::new("k"))
        .unwrap()
        .with_model("gpt-4o");
    let run = complete_with_tools(
        &client,
        vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("What is the weather and temperature in Seattle?"),
        ],
        &LocalTool::ALL,
    )
    .await
    .unwrap();

    first.assert_async().await;
    follow_up.assert_async().await;
    assert_eq!(run.messages.len(), 4);
    assert_eq!(
        run.response.first_choice().unwrap().message.content.as_deref(),
        Some("It is nice in Seattle.")
    );
}

#[tokio::test]
async fn connections_are_listed_filtered_and_read_with_secrets() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", format!("{WORKSPACE}/connections").as_str())
        .match_query(Matcher::UrlEncoded(
            "api-version".into(),
            "2024-07-01-preview".into(),
        ))
        .match_header("authorization", "Bearer test-token")
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "value": [
                    {"id": "/c/aoai", "name": "aoai", "properties": {"category": "AzureOpenAI", "target": "https://aoai.openai.azure.com", "authType": "ApiKey"}},
                    {"id": "/c/services", "name": "services", "properties": {"category": "AIServices", "target": "https://svc.cognitiveservices.azure.com", "authType": "ApiKey"}},
                    {"id": "/c/search", "name": "search", "properties": {"category": "CognitiveSearch", "target": "https://search.windows.net", "authType": "ApiKey"}}
                ]
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    let secrets = server
        .mock("POST", format!("{WORKSPACE}/connections/services/listsecrets").as_str())
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "/c/services",
                "name": "services",
                "properties": {
                    "category": "AIServices",
                    "target": "https://svc.cognitiveservices.azure.com",
                    "authType": "ApiKey",
                    "credentials": {"key": "super-secret"}
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let project = project_for(&server.url());
    let connections = project.connections();

    let search = connections
        .list(Some(&ConnectionType::AzureAiSearch))
        .await
        .unwrap();
    assert_eq!(search.len(), 1);
    assert_eq!(search[0].id, "/c/search");

    let services = connections
        .get_default(&ConnectionType::AiServices, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(services.key.as_deref(), Some("super-secret"));
    assert!(!services.to_string().contains("super-secret"));

    list.assert_async().await;
    secrets.assert_async().await;
}

#[tokio::test]
async fn agent_run_is_polled_until_it_completes() {
    let mut server = Server::new_async().await;
    let runs_path = "/agents/threads/thread_1/runs";

    let create_agent = server
        .mock("POST", "/agents/assistants")
        .match_query(Matcher::UrlEncoded(
            "api-version".into(),
            "2024-12-01-preview".into(),
        ))
        .match_header("x-ms-enable-preview", "true")
        .match_body(Matcher::Regex(r#""type":"bing_grounding""#.to_string()))
        .with_body(json!({"id": "asst_1", "name": "my-assistant"}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", runs_path)
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({"assistant_id": "asst_1"})))
        .with_body(json!({"id": "run_1", "status": "queued"}).to_string())
        .create_async()
        .await;
    let poll = server
        .mock("GET", format!("{runs_path}/run_1").as_str())
        .match_query(Matcher::Any)
        .with_body(json!({"id": "run_1", "status": "completed"}).to_string())
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/agents/threads/thread_1/messages")
        .match_query(Matcher::Any)
        .with_body(
            json!({
                "data": [{
                    "id": "msg_2",
                    "role": "assistant",
                    "content": [{"type": "text", "text": {"value": "e^(iπ) + 1 = 0", "annotations": []}}]
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let project = project_for(&server.url());
    let agents = project
        .agents()
        .with_poll_interval(Duration::from_millis(1));

    let agent = agents
        .create_agent(&AgentOptions {
            model: "gpt-4o".to_string(),
            name: "my-assistant".to_string(),
            instructions: "You are a helpful assistant".to_string(),
            tools: BingGroundingTool::new("/c/bing").definitions(),
            tool_resources: None,
        })
        .await
        .unwrap();
    let run = agents
        .create_and_process_run("thread_1", &agent.id)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let messages = agents.list_messages("thread_1").await.unwrap();
    let answer = messages.last_message_by_role(ROLE_AGENT).unwrap();
    assert_eq!(answer.text_messages().next().unwrap().value, "e^(iπ) + 1 = 0");

    create_agent.assert_async().await;
    poll.assert_async().await;
}

#[tokio::test]
async fn run_needing_tool_outputs_is_cancelled() {
    let mut server = Server::new_async().await;
    let runs_path = "/agents/threads/thread_1/runs";

    server
        .mock("POST", runs_path)
        .match_query(Matcher::Any)
        .with_body(json!({"id": "run_1", "status": "in_progress"}).to_string())
        .create_async()
        .await;
    let poll = server
        .mock("GET", format!("{runs_path}/run_1").as_str())
        .match_query(Matcher::Any)
        .with_body(json!({"id": "run_1", "status": "requires_action"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let cancel = server
        .mock("POST", format!("{runs_path}/run_1/cancel").as_str())
        .match_query(Matcher::Any)
        .with_body(json!({"id": "run_1", "status": "cancelled"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let project = project_for(&server.url());
    let run = project
        .agents()
        .with_poll_interval(Duration::from_millis(1))
        .create_and_process_run("thread_1", "asst_1")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    poll.assert_async().await;
    cancel.assert_async().await;
}

#[tokio::test]
async fn client_secret_tokens_are_cached_per_scope() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/tenant-1/oauth2/v2.0/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "app-1".into()),
            Matcher::UrlEncoded("scope".into(), "https://ml.azure.com/.default".into()),
        ]))
        .with_body(json!({"access_token": "from-secret", "expires_in": 3600}).to_string())
        .expect(1)
        .create_async()
        .await;

    let env = Environment::from_layers(vec![HashMap::from([
        ("AZURE_TENANT_ID".to_string(), "tenant-1".to_string()),
        ("AZURE_CLIENT_ID".to_string(), "app-1".to_string()),
        ("AZURE_CLIENT_SECRET".to_string(), "shh".to_string()),
        ("AZURE_AUTHORITY_HOST".to_string(), server.url()),
    ])]);
    let credential = DefaultAzureCredential::from_env(&env, reqwest::Client::new());

    let first = credential
        .get_token("https://ml.azure.com/.default")
        .await
        .unwrap();
    let second = credential
        .get_token("https://ml.azure.com/.default")
        .await
        .unwrap();

    assert_eq!(first.token, "from-secret");
    assert_eq!(second.token, "from-secret");
    token.assert_async().await;
}

#[tokio::test]
async fn search_strips_metadata_fields() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/indexes/products/docs/search")
        .match_query(Matcher::UrlEncoded("api-version".into(), "2023-11-01".into()))
        .match_header("api-key", "search-key")
        .match_body(Matcher::PartialJson(json!({"search": "tents", "top": 5})))
        .with_body(
            json!({
                "value": [{"@search.score": 1.2, "id": "1", "title": "Alpine Explorer Tent"}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let search = SearchClient::new(server.url(), "products", AzureKeyCredential::new("search-key"))
        .unwrap();
    let documents = search.search("tents", 5).await.unwrap();

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["title"], "Alpine Explorer Tent");
    assert!(!documents[0].contains_key("@search.score"));
}
