//! Credentials for the key-based inference endpoints and the Entra ID token
//! chain used by the project, agents and connections APIs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{Instrument, debug, info_span};

use crate::config::Environment;
use crate::error::{LabError, Result};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Key credential sent in the `api-key` header.
#[derive(Clone)]
pub struct AzureKeyCredential(String);

impl AzureKeyCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("api-key", &self.0)
    }
}

impl fmt::Debug for AzureKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AzureKeyCredential(<redacted>)")
    }
}

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: SystemTime,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        self.expires_on
            .duration_since(SystemTime::now())
            .is_ok_and(|left| left > REFRESH_MARGIN)
    }
}

#[derive(Clone)]
enum TokenSource {
    Static(String),
    ClientSecret {
        authority: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    AzureCli,
}

impl TokenSource {
    fn name(&self) -> &'static str {
        match self {
            Self::Static(_) => "AZURE_ACCESS_TOKEN",
            Self::ClientSecret { .. } => "client secret",
            Self::AzureCli => "Azure CLI",
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(rename = "expires_on")]
    expires_on: Option<u64>,
}

/// Tries, in order: a static bearer token, a service principal secret, and
/// the Azure CLI login. Tokens are cached per scope.
pub struct DefaultAzureCredential {
    sources: Vec<TokenSource>,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl DefaultAzureCredential {
    pub fn from_env(env: &Environment, http: reqwest::Client) -> Self {
        let mut sources = Vec::new();

        if let Some(token) = env.get("AZURE_ACCESS_TOKEN") {
            sources.push(TokenSource::Static(token));
        }
        if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
            env.get("AZURE_TENANT_ID"),
            env.get("AZURE_CLIENT_ID"),
            env.get("AZURE_CLIENT_SECRET"),
        ) {
            sources.push(TokenSource::ClientSecret {
                authority: env
                    .get("AZURE_AUTHORITY_HOST")
                    .unwrap_or_else(|| DEFAULT_AUTHORITY.to_string()),
                tenant_id,
                client_id,
                client_secret,
            });
        }
        sources.push(TokenSource::AzureCli);

        Self {
            sources,
            http,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Credential that always hands out `token`.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            sources: vec![TokenSource::Static(token.into())],
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cached(scope) {
            return Ok(token);
        }

        let mut failures = Vec::new();
        for source in &self.sources {
            let span = info_span!("get_token", source = source.name(), scope);
            match self.fetch(source, scope).instrument(span).await {
                Ok(token) => {
                    self.store(scope, token.clone());
                    return Ok(token);
                }
                Err(err) => {
                    debug!(source = source.name(), error = %err, "credential source failed");
                    failures.push(format!("{}: {err}", source.name()));
                }
            }
        }

        Err(LabError::Credential(failures.join("; ")))
    }

    fn cached(&self, scope: &str) -> Option<AccessToken> {
        let cache = self.cache.lock().unwrap_or_else(|poison| poison.into_inner());
        cache.get(scope).filter(|token| token.is_fresh()).cloned()
    }

    fn store(&self, scope: &str, token: AccessToken) {
        let mut cache = self.cache.lock().unwrap_or_else(|poison| poison.into_inner());
        cache.insert(scope.to_string(), token);
    }

    async fn fetch(&self, source: &TokenSource, scope: &str) -> Result<AccessToken> {
        match source {
            TokenSource::Static(token) => Ok(AccessToken {
                token: token.clone(),
                expires_on: SystemTime::now() + Duration::from_secs(3600),
            }),
            TokenSource::ClientSecret {
                authority,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let url = format!(
                    "{}/{tenant_id}/oauth2/v2.0/token",
                    authority.trim_end_matches('/')
                );
                let response = self
                    .http
                    .post(&url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", scope),
                    ])
                    .send()
                    .await
                    .map_err(LabError::request("identity"))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(LabError::Api {
                        service: "identity",
                        status,
                        body,
                    });
                }

                let body: TokenResponse =
                    response.json().await.map_err(LabError::request("identity"))?;
                Ok(AccessToken {
                    token: body.access_token,
                    expires_on: SystemTime::now() + Duration::from_secs(body.expires_in),
                })
            }
            TokenSource::AzureCli => {
                let output = Command::new("az")
                    .args(["account", "get-access-token", "--scope", scope])
                    .args(["--output", "json"])
                    .output()
                    .await
                    .map_err(|err| LabError::Credential(format!("cannot run az: {err}")))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(LabError::Credential(stderr.trim().to_string()));
                }

                parse_cli_token(&output.stdout)
            }
        }
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken> {
    let token: CliToken = serde_json::from_slice(stdout)?;
    let expires_on = token
        .expires_on
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or_else(|| SystemTime::now() + Duration::from_secs(3600));
    Ok(AccessToken {
        token: token.access_token,
        expires_on,
    })
}

impl fmt::Debug for DefaultAzureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultAzureCredential")
            .field(
                "sources",
                &self.sources.iter().map(TokenSource::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_and_cached() {
        let credential = DefaultAzureCredential::from_token("abc");
        let first = credential.get_token("https://ml.azure.com/.default").await.unwrap();
        assert_eq!(first.token, "abc");
        assert!(credential.cached("https://ml.azure.com/.default").is_some());
        assert!(credential.cached("https://management.azure.com/.default").is_none());
    }

    #[test]
    fn cli_token_uses_epoch_expiry() {
        let raw = br#"{"accessToken":"t0k","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1893456000,"tokenType":"Bearer"}"#;
        let token = parse_cli_token(raw).unwrap();
        assert_eq!(token.token, "t0k");
        assert_eq!(token.expires_on, UNIX_EPOCH + Duration::from_secs(1_893_456_000));
    }

    #[test]
    fn nearly_expired_tokens_are_not_fresh() {
        let token = AccessToken {
            token: "x".to_string(),
            expires_on: SystemTime::now() + Duration::from_secs(60),
        };
        assert!(!token.is_fresh());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let key = AzureKeyCredential::new("super-secret");
        assert!(!format!("{key:?}").contains("super-secret"));
    }
}
