use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::RequestOptions;
use crate::error::{LabError, Result};
use crate::foundry::credential::AzureKeyCredential;
use crate::foundry::http::{client, send_with_retry};

pub const SEARCH_API_VERSION: &str = "2023-11-01";

const SERVICE: &str = "search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Map<String, Value>>,
}

/// Key-authenticated query client for one Azure AI Search index.
#[derive(Debug, Clone)]
pub struct SearchClient {
    endpoint: String,
    index_name: String,
    credential: AzureKeyCredential,
    options: RequestOptions,
    http: reqwest::Client,
}

impl SearchClient {
    pub fn new(
        endpoint: impl Into<String>,
        index_name: impl Into<String>,
        credential: AzureKeyCredential,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            credential,
            options: RequestOptions::default(),
            http: client(false)?,
        })
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Full-text search returning at most `top` documents. Search metadata
    /// fields (`@search.*`) are stripped.
    pub async fn search(&self, query: &str, top: u32) -> Result<Vec<Map<String, Value>>> {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={SEARCH_API_VERSION}",
            self.endpoint, self.index_name
        );
        let body = json!({"search": query, "top": top});

        let response = send_with_retry(SERVICE, self.options, || {
            self.credential.apply(self.http.post(&url)).json(&body)
        })
        .await?;
        let results: SearchResponse = response.json().await.map_err(LabError::request(SERVICE))?;

        Ok(results
            .value
            .into_iter()
            .map(|mut document| {
                document.retain(|key, _| !key.starts_with("@search."));
                document
            })
            .collect())
    }
}
