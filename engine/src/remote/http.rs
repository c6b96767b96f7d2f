//! HTTP implementation of [`Remote`] over `reqwest`.

use super::{ListFilter, Remote};
use crate::config::EngineConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::model::{EntityKind, ServerId};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Error body the server sends with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

/// Talks to the farm server's REST API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> RemoteResult<Self> {
        Self::build(base_url.into(), None, None)
    }

    pub fn from_config(config: &EngineConfig) -> RemoteResult<Self> {
        Self::build(
            config.api_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    fn build(base_url: String, token: Option<String>, timeout: Option<Duration>) -> RemoteResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.path())
    }

    fn record_url(&self, kind: EntityKind, server_id: &ServerId) -> String {
        format!("{}/{}/{}", self.base_url, kind.path(), server_id)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<reqwest::Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(api_error(status, &text))
    }

    async fn send_json(&self, request: RequestBuilder) -> RemoteResult<Value> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

fn api_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    RemoteError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> RemoteResult<Vec<Value>> {
        let request = self
            .client
            .get(self.collection_url(kind))
            .query(&filter.params(kind));
        match self.send_json(request).await? {
            Value::Array(records) => {
                debug!(%kind, count = records.len(), "listed");
                Ok(records)
            }
            other => Err(RemoteError::Decode(format!(
                "expected a list of {kind} records, got {}",
                json_type(&other)
            ))),
        }
    }

    async fn create(&self, kind: EntityKind, body: Value) -> RemoteResult<Value> {
        let request = self.client.post(self.collection_url(kind)).json(&body);
        self.send_json(request).await
    }

    async fn update(&self, kind: EntityKind, server_id: &ServerId, body: Value) -> RemoteResult<Value> {
        let request = self.client.put(self.record_url(kind, server_id)).json(&body);
        self.send_json(request).await
    }

    async fn delete(&self, kind: EntityKind, server_id: &ServerId) -> RemoteResult<()> {
        let request = self.client.delete(self.record_url(kind, server_id));
        self.send(request).await.map(|_| ())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_collection_paths() {
        let remote = HttpRemote::new("http://localhost:5000/api/").unwrap();
        assert_eq!(remote.base_url(), "http://localhost:5000/api");
        assert_eq!(
            remote.collection_url(EntityKind::LandPlot),
            "http://localhost:5000/api/land"
        );
        assert_eq!(
            remote.record_url(EntityKind::Report, &ServerId::from("r1")),
            "http://localhost:5000/api/reports/r1"
        );
    }

    #[test]
    fn api_error_prefers_server_message() {
        let err = api_error(StatusCode::CONFLICT, r#"{"error":"Report already exists"}"#);
        assert_eq!(
            err,
            RemoteError::Api {
                status: 409,
                message: "Report already exists".into()
            }
        );

        let err = api_error(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(
            err,
            RemoteError::Api {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let remote = HttpRemote::build(
            "http://127.0.0.1:9".into(),
            None,
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = remote
            .list(EntityKind::Animal, &ListFilter::default())
            .await
            .unwrap_err();
        assert!(err.is_network(), "{err:?}");
    }
}
