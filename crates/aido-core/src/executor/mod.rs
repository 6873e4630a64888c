//! Operation executor
//!
//! Turns one queued operation into one REST call and classifies the result.
//! The executor never touches the queue.

use std::future::Future;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::auth::AuthToken;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{Fields, Mutation, QueuedOperation, ResourceId, ResourceType};
use crate::util::compact_text;

/// Resolved REST request for an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RestCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl RestCall {
    /// Map `(kind, resource type, payload)` to a request.
    ///
    /// | resource | create                          | update                | delete                 |
    /// |----------|---------------------------------|-----------------------|------------------------|
    /// | task     | `POST /api/tasks`               | `PATCH /api/tasks/{id}`    | `DELETE /api/tasks/{id}`    |
    /// | tag      | `POST /api/tags`                | `PATCH /api/tags/{id}`     | `DELETE /api/tags/{id}`     |
    /// | subtask  | `POST /api/tasks/{task_id}/subtasks` | `PATCH /api/subtasks/{id}` | `DELETE /api/subtasks/{id}` |
    pub fn for_operation(operation: &QueuedOperation) -> Result<Self> {
        let collection = match operation.resource_type {
            ResourceType::Task => "/api/tasks",
            ResourceType::Tag => "/api/tags",
            ResourceType::Subtask => "/api/subtasks",
        };

        let call = match &operation.mutation {
            Mutation::Create { fields } => {
                let path = if operation.resource_type == ResourceType::Subtask {
                    let task_id = fields
                        .get("task_id")
                        .and_then(ResourceId::from_value)
                        .ok_or_else(|| {
                            Error::InvalidInput("subtask create requires a task_id".to_string())
                        })?;
                    format!("/api/tasks/{}/subtasks", encode_segment(&task_id))
                } else {
                    collection.to_string()
                };
                Self {
                    method: Method::POST,
                    path,
                    body: Some(Value::Object(fields.clone())),
                }
            }
            Mutation::Update { id, updates } => Self {
                method: Method::PATCH,
                path: format!("{collection}/{}", encode_segment(id)),
                body: Some(Value::Object(updates.clone())),
            },
            Mutation::Delete { id } => Self {
                method: Method::DELETE,
                path: format!("{collection}/{}", encode_segment(id)),
                body: None,
            },
        };

        Ok(call)
    }
}

fn encode_segment(id: &ResourceId) -> String {
    urlencoding::encode(id.as_str()).into_owned()
}

/// Classified result of a single execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// HTTP 2xx
    Success,
    /// HTTP 409; carries the server's current state when the body had one
    Conflict { server_state: Option<Fields> },
    /// Any other status, transport error or timeout
    Failure { reason: String },
}

/// Performs queued operations against the remote API.
pub trait OperationExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        operation: &QueuedOperation,
        token: &AuthToken,
    ) -> impl Future<Output = ExecutionOutcome> + Send;
}

/// `reqwest`-backed executor with a per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    config: ClientConfig,
}

impl HttpExecutor {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }
}

impl OperationExecutor for HttpExecutor {
    async fn execute(&self, operation: &QueuedOperation, token: &AuthToken) -> ExecutionOutcome {
        let call = match RestCall::for_operation(operation) {
            Ok(call) => call,
            Err(error) => {
                return ExecutionOutcome::Failure {
                    reason: error.to_string(),
                }
            }
        };

        tracing::debug!("{} {} for {}", call.method, call.path, operation.id);

        let mut request = self
            .client
            .request(call.method, self.config.url(&call.path))
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(version) = &operation.expected_version {
            request = request.header(reqwest::header::IF_MATCH, version.as_str());
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                let reason = if error.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {error}")
                };
                return ExecutionOutcome::Failure { reason };
            }
        };

        let status = response.status();
        if status.is_success() {
            return ExecutionOutcome::Success;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                if status == StatusCode::CONFLICT {
                    tracing::warn!("Failed to read conflict response body: {}", error);
                }
                String::new()
            }
        };

        if status == StatusCode::CONFLICT {
            return ExecutionOutcome::Conflict {
                server_state: parse_server_state(&body),
            };
        }

        let reason = if body.trim().is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), compact_text(&body))
        };
        ExecutionOutcome::Failure { reason }
    }
}

/// Server state from a 409 body: the JSON object itself, or `None`.
fn parse_server_state(body: &str) -> Option<Fields> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => Some(fields),
        Ok(_) => None,
        Err(error) => {
            tracing::warn!("Conflict response body is not JSON: {}", error);
            None
        }
    }
}
