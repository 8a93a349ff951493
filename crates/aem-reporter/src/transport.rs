use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::ReporterConfig;
use crate::error::TransportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A request against a graph path relative to the transport's base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphRequest {
    pub path: String,
    pub method: HttpMethod,
    pub parameters: Value,
}

impl GraphRequest {
    pub fn get(path: impl Into<String>, parameters: Value) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Get,
            parameters,
        }
    }

    pub fn post(path: impl Into<String>, parameters: Value) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Post,
            parameters,
        }
    }
}

/// Sends graph requests. The reporter owns one and calls it from spawned
/// tasks, so implementations must be shareable across threads.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Run the request to completion, returning the decoded JSON body.
    async fn start(&self, request: GraphRequest) -> Result<Value, TransportError>;
}

/// [`GraphTransport`] over HTTPS.
///
/// GET parameters are sent as a query string (non-string values JSON
/// encoded); POST parameters as a JSON body.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ReporterConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.get_request_timeout())
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.get_graph_base_url().trim_end_matches('/').to_string(),
            access_token: config.get_access_token().map(str::to_string),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl GraphTransport for HttpTransport {
    async fn start(&self, request: GraphRequest) -> Result<Value, TransportError> {
        let url = self.url(&request.path);
        debug!(%url, method = ?request.method, "sending graph request");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url).query(&query_pairs(&request.parameters)),
            HttpMethod::Post => self.client.post(&url).json(&request.parameters),
        };
        if let Some(token) = &self.access_token {
            builder = builder.query(&[("access_token", token)]);
        }

        let response = builder.send().await.map_err(|e| TransportError::Request {
            path: request.path.clone(),
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                path: request.path,
                status: status.as_u16(),
            });
        }
        response.json::<Value>().await.map_err(|e| TransportError::Decode {
            path: request.path,
            message: e.to_string(),
        })
    }
}

fn query_pairs(parameters: &Value) -> Vec<(String, String)> {
    let Some(object) = parameters.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
