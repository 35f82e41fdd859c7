//! `web_search`: Google results through the Serper API.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{str_param, Capability, CapabilitySchema, ParamKind, ParamSpec};
use crate::error::CapabilityError;

pub const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";
pub const DEFAULT_API_KEY_ENV: &str = "SERPER_API_KEY";
const NAME: &str = "web_search";
const DEFAULT_RESULTS: u64 = 5;
const MAX_RESULTS: u64 = 20;

pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key_env: String,
}

impl WebSearch {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key_env: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }

    fn api_key(&self) -> Result<String, CapabilityError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CapabilityError::Unavailable {
                capability: NAME.to_string(),
                reason: format!("{} is not set", self.api_key_env),
            })
    }
}

#[async_trait]
impl Capability for WebSearch {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new(NAME, "Search the internet and return the top results.")
            .param(ParamSpec::required("query", ParamKind::String, "search query"))
            .param(ParamSpec::optional(
                "num_results",
                ParamKind::Integer,
                "number of results, default 5",
            ))
    }

    async fn invoke(&self, input: &Map<String, Value>) -> Result<String, CapabilityError> {
        let query = str_param(NAME, input, "query")?;
        let num = input
            .get("num_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS);
        let key = self.api_key()?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", key)
            .json(&json!({ "q": query, "num": num }))
            .send()
            .await
            .map_err(|e| CapabilityError::failed(NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::failed(
                NAME,
                format!("search API returned {}", status),
            ));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::failed(NAME, e))?;

        Ok(format_results(&body, num as usize))
    }
}

/// Render the organic results of a Serper response as plain text.
pub fn format_results(body: &Value, limit: usize) -> String {
    let organic = body
        .get("organic")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if organic.is_empty() {
        return "No results found.".to_string();
    }

    organic
        .iter()
        .take(limit)
        .map(|item| {
            let field = |k: &str| item.get(k).and_then(Value::as_str).unwrap_or("");
            format!(
                "Title: {}\nLink: {}\nSnippet: {}",
                field("title"),
                field("link"),
                field("snippet")
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}
