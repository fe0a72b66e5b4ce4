//! Retrieval of the governed resource after a permit decision.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::error::PolicyError;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Raw bytes and declared content type, returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResource {
    pub content_type: String,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, PolicyError>;
}

/// The resource a policy governs: `permission[0].target`.
pub fn resource_target(policy: &Value) -> Result<Url, PolicyError> {
    let permission = match policy.get("permission") {
        Some(Value::Array(rules)) => rules.first(),
        Some(rule @ Value::Object(_)) => Some(rule),
        _ => None,
    }
    .ok_or_else(|| PolicyError::UpstreamFetch("Policy has no permission to fetch".into()))?;

    let target = match permission.get("target") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Object(node)) => node
            .get("@id")
            .or_else(|| node.get("uid"))
            .and_then(Value::as_str),
        _ => None,
    }
    .ok_or_else(|| PolicyError::UpstreamFetch("Permission has no target".into()))?;

    Url::parse(target)
        .map_err(|e| PolicyError::UpstreamFetch(format!("Target '{target}' is not a URL: {e}")))
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedResource, PolicyError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PolicyError::UpstreamFetch(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PolicyError::UpstreamFetch(format!(
                "{url} returned {status}"
            )));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|e| PolicyError::UpstreamFetch(format!("{url}: {e}")))?;

        Ok(FetchedResource {
            content_type,
            body: body.to_vec(),
        })
    }
}
