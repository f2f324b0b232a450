//! Client for an AI project addressed by its connection string.
//!
//! A project exposes two REST surfaces: the agents service on the project's
//! regional host, and the workspace resource (connections, application
//! insights) on Azure Resource Manager. Both take Entra ID bearer tokens, for
//! different scopes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span};

use crate::config::RequestOptions;
use crate::error::{LabError, Result};
use crate::foundry::agents::Agents;
use crate::foundry::credential::DefaultAzureCredential;
use crate::foundry::http::{client, send_with_retry};

pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const AGENTS_API_VERSION: &str = "2024-12-01-preview";
pub const CONNECTIONS_API_VERSION: &str = "2024-07-01-preview";
const APP_INSIGHTS_API_VERSION: &str = "2015-05-01";

const AGENTS_SCOPE: &str = "https://ml.azure.com/.default";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// The four parts of `<host>;<subscription_id>;<resource_group>;<project_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope {
    pub host: String,
    pub subscription_id: String,
    pub resource_group_name: String,
    pub project_name: String,
}

impl FromStr for ProjectScope {
    type Err = LabError;

    fn from_str(raw: &str) -> Result<Self> {
        let parts = raw.trim().split(';').map(str::trim).collect::<Vec<_>>();
        match parts.as_slice() {
            [host, subscription, group, project]
                if [host, subscription, group, project]
                    .iter()
                    .all(|part| !part.is_empty()) =>
            {
                Ok(Self {
                    host: host.to_string(),
                    subscription_id: subscription.to_string(),
                    resource_group_name: group.to_string(),
                    project_name: project.to_string(),
                })
            }
            _ => Err(LabError::Config(format!(
                "Invalid project connection string: expected \
                 '<host>;<subscription_id>;<resource_group>;<project_name>', got {} part(s).",
                parts.len()
            ))),
        }
    }
}

impl ProjectScope {
    /// ARM resource path of the project workspace.
    pub fn resource_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.subscription_id, self.resource_group_name, self.project_name
        )
    }

    pub fn tracing_link(&self) -> String {
        format!("https://ai.azure.com/tracing?wsid={}", self.resource_path())
    }

    pub fn evaluation_link(&self) -> String {
        format!("https://ai.azure.com/build/evaluation?wsid={}", self.resource_path())
    }
}

/// Base URLs for the two project surfaces.
#[derive(Debug, Clone)]
pub struct ProjectEndpoints {
    pub agents: String,
    pub management: String,
}

impl ProjectEndpoints {
    pub fn for_scope(scope: &ProjectScope) -> Self {
        Self {
            agents: format!("https://{}/agents/v1.0{}", scope.host, scope.resource_path()),
            management: MANAGEMENT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ProjectApi {
    Agents,
    Management,
}

impl ProjectApi {
    fn service(self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Management => "management",
        }
    }

    fn token_scope(self) -> &'static str {
        match self {
            Self::Agents => AGENTS_SCOPE,
            Self::Management => MANAGEMENT_SCOPE,
        }
    }

    fn api_version(self) -> &'static str {
        match self {
            Self::Agents => AGENTS_API_VERSION,
            Self::Management => CONNECTIONS_API_VERSION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectClient {
    scope: ProjectScope,
    endpoints: ProjectEndpoints,
    credential: Arc<DefaultAzureCredential>,
    options: RequestOptions,
    http: reqwest::Client,
}

impl ProjectClient {
    pub fn from_connection_string(
        connection_string: &str,
        credential: Arc<DefaultAzureCredential>,
    ) -> Result<Self> {
        let scope = connection_string.parse::<ProjectScope>()?;
        let endpoints = ProjectEndpoints::for_scope(&scope);
        Self::with_endpoints(scope, endpoints, credential)
    }

    pub fn with_endpoints(
        scope: ProjectScope,
        endpoints: ProjectEndpoints,
        credential: Arc<DefaultAzureCredential>,
    ) -> Result<Self> {
        Ok(Self {
            scope,
            endpoints,
            credential,
            options: RequestOptions::default(),
            http: client(false)?,
        })
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    pub fn agents(&self) -> Agents<'_> {
        Agents::new(self)
    }

    pub fn connections(&self) -> Connections<'_> {
        Connections { project: self }
    }

    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        api: ProjectApi,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        self.send_versioned(api, method, path, api.api_version(), body, false)
            .await
    }

    /// Sends one project request. `preview` adds the agents preview header.
    pub(crate) async fn send_versioned<T: DeserializeOwned>(
        &self,
        api: ProjectApi,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<Value>,
        preview: bool,
    ) -> Result<T> {
        let base = match api {
            ProjectApi::Agents => &self.endpoints.agents,
            ProjectApi::Management => &self.endpoints.management,
        };
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let token = self.credential.get_token(api.token_scope()).await?;
        let service = api.service();

        let span = info_span!("project_request", service, %method, path);
        async {
            let response = send_with_retry(service, self.options, || {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .query(&[("api-version", api_version)])
                    .bearer_auth(&token.token);
                if preview {
                    request = request.header("x-ms-enable-preview", "true");
                }
                if let Some(body) = &body {
                    request = request.json(body);
                }
                request
            })
            .await?;
            debug!(status = %response.status(), "project request succeeded");
            response.json::<T>().await.map_err(LabError::request(service))
        }
        .instrument(span)
        .await
    }

    /// Application Insights connection string attached to the project, if any.
    pub async fn telemetry_connection_string(&self) -> Result<Option<String>> {
        let workspace: Value = self
            .send(
                ProjectApi::Management,
                Method::GET,
                &self.scope.resource_path(),
                None,
            )
            .await?;

        let Some(insights_id) = workspace["properties"]["applicationInsights"]
            .as_str()
            .filter(|id| !id.is_empty())
        else {
            return Ok(None);
        };

        let component: Value = self
            .send_versioned(
                ProjectApi::Management,
                Method::GET,
                insights_id,
                APP_INSIGHTS_API_VERSION,
                None,
                false,
            )
            .await?;

        Ok(component["properties"]["ConnectionString"]
            .as_str()
            .map(str::to_string))
    }
}

/// Connection categories as the service spells them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ConnectionType {
    AzureOpenAi,
    AiServices,
    AzureAiSearch,
    Serverless,
    ApiKey,
    BingSearch,
    Other(String),
}

impl From<String> for ConnectionType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "AzureOpenAI" => Self::AzureOpenAi,
            "AIServices" => Self::AiServices,
            "CognitiveSearch" => Self::AzureAiSearch,
            "Serverless" => Self::Serverless,
            "ApiKey" => Self::ApiKey,
            "BingLLMSearch" => Self::BingSearch,
            _ => Self::Other(raw),
        }
    }
}

impl ConnectionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AzureOpenAi => "AzureOpenAI",
            Self::AiServices => "AIServices",
            Self::AzureAiSearch => "CognitiveSearch",
            Self::Serverless => "Serverless",
            Self::ApiKey => "ApiKey",
            Self::BingSearch => "BingLLMSearch",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ConnectionResource {
    id: String,
    name: String,
    properties: ConnectionResourceProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionResourceProperties {
    category: ConnectionType,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    credentials: Option<ConnectionCredentials>,
}

#[derive(Debug, Deserialize)]
struct ConnectionCredentials {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionListResponse {
    #[serde(default)]
    value: Vec<ConnectionResource>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub connection_type: ConnectionType,
    pub endpoint_url: Option<String>,
    pub authentication_type: Option<String>,
    pub key: Option<String>,
}

impl From<ConnectionResource> for Connection {
    fn from(resource: ConnectionResource) -> Self {
        let properties = resource.properties;
        Self {
            id: resource.id,
            name: resource.name,
            connection_type: properties.category,
            endpoint_url: properties.target,
            authentication_type: properties.auth_type,
            key: properties.credentials.and_then(|credentials| credentials.key),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection_type", &self.connection_type)
            .field("endpoint_url", &self.endpoint_url)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, " \"name\": \"{}\",", self.name)?;
        writeln!(f, " \"id\": \"{}\",", self.id)?;
        writeln!(
            f,
            " \"authentication_type\": \"{}\",",
            self.authentication_type.as_deref().unwrap_or("None")
        )?;
        writeln!(f, " \"connection_type\": \"{}\",", self.connection_type)?;
        writeln!(
            f,
            " \"endpoint_url\": \"{}\",",
            self.endpoint_url.as_deref().unwrap_or("None")
        )?;
        writeln!(
            f,
            " \"key\": \"{}\"",
            if self.key.is_some() { "REDACTED" } else { "None" }
        )?;
        write!(f, "}}")
    }
}

pub struct Connections<'a> {
    project: &'a ProjectClient,
}

impl Connections<'_> {
    fn path(&self) -> String {
        format!("{}/connections", self.project.scope.resource_path())
    }

    /// Lists connections, optionally only those of one category.
    pub async fn list(&self, connection_type: Option<&ConnectionType>) -> Result<Vec<Connection>> {
        let response: ConnectionListResponse = self
            .project
            .send(ProjectApi::Management, Method::GET, &self.path(), None)
            .await?;

        Ok(response
            .value
            .into_iter()
            .map(Connection::from)
            .filter(|connection| {
                connection_type.is_none_or(|wanted| &connection.connection_type == wanted)
            })
            .collect())
    }

    pub async fn get(&self, name: &str, include_credentials: bool) -> Result<Connection> {
        let path = format!("{}/{name}", self.path());
        let resource: ConnectionResource = if include_credentials {
            self.project
                .send(
                    ProjectApi::Management,
                    Method::POST,
                    &format!("{path}/listsecrets"),
                    Some(json!({"ignored": "ignore"})),
                )
                .await?
        } else {
            self.project
                .send(ProjectApi::Management, Method::GET, &path, None)
                .await?
        };
        Ok(resource.into())
    }

    /// First connection of the given category.
    pub async fn get_default(
        &self,
        connection_type: &ConnectionType,
        include_credentials: bool,
    ) -> Result<Option<Connection>> {
        let Some(first) = self.list(Some(connection_type)).await?.into_iter().next() else {
            return Ok(None);
        };
        if include_credentials {
            return self.get(&first.name, true).await.map(Some);
        }
        Ok(Some(first))
    }
}
