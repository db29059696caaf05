//! Action executors.
//!
//! One executor per action kind, all speaking the portal's JSON envelope and
//! all following the same shape: query pending items, fetch the detail,
//! fill the form, submit it. Dispatch is a closed enum — unknown discriminants
//! never get past configuration parsing, and the retired work-log kind is
//! explicitly fatal.

pub mod attendance;
pub mod collection;
pub mod dormitory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::UserConfig;
use crate::session::SessionHandle;
use crate::task::StatusCode;

pub use attendance::AttendanceExecutor;
pub use collection::MessagePostExecutor;
pub use dormitory::DormCheckExecutor;

/// Closed set of action discriminants accepted in user configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum ActionKind {
    /// Information-collection / message form posting.
    MessagePost,
    /// Daily attendance sign-in.
    Attendance,
    /// Dormitory check reporting.
    DormCheck,
    /// Retired work-log module; kept for config compatibility, always fatal.
    WorkLog,
}

impl TryFrom<u8> for ActionKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ActionKind::MessagePost),
            1 => Ok(ActionKind::Attendance),
            2 => Ok(ActionKind::DormCheck),
            3 => Ok(ActionKind::WorkLog),
            other => Err(format!("unknown action type {other}")),
        }
    }
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::MessagePost => "message post",
            ActionKind::Attendance => "attendance sign-in",
            ActionKind::DormCheck => "dormitory check",
            ActionKind::WorkLog => "work log",
        }
    }
}

/// Domain failure raised by an action executor, carrying its own status code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActionError {
    pub code: StatusCode,
    pub message: String,
}

impl ActionError {
    /// Generic failure; the task stays pending and is retried.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::RETRY_PENDING,
            message: message.into(),
        }
    }

    /// The portal has no pending item for this task.
    pub fn nothing_to_do(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::NOTHING_TO_DO,
            message: message.into(),
        }
    }

    /// The task cannot be completed under current conditions.
    pub fn impossible(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::IMPOSSIBLE,
            message: message.into(),
        }
    }

    /// The portal reports the task as already completed.
    pub fn already_done(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::ALREADY_DONE,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        ActionError::retryable(format!("portal request failed: {err}"))
    }
}

impl From<url::ParseError> for ActionError {
    fn from(err: url::ParseError) -> Self {
        ActionError::retryable(format!("portal endpoint url invalid: {err}"))
    }
}

/// Polymorphic executor interface: one implementation per action kind.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, session: &SessionHandle, user: &UserConfig)
    -> Result<String, ActionError>;
}

impl std::fmt::Debug for dyn ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("name", &self.name())
            .finish()
    }
}

/// Registry of executors keyed by action kind.
///
/// The default set wires the three live executors; tests and embedders can
/// swap any of them out.
#[derive(Clone)]
pub struct ExecutorSet {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
}

impl Default for ExecutorSet {
    fn default() -> Self {
        let mut executors: HashMap<ActionKind, Arc<dyn ActionExecutor>> = HashMap::new();
        executors.insert(ActionKind::MessagePost, Arc::new(MessagePostExecutor));
        executors.insert(ActionKind::Attendance, Arc::new(AttendanceExecutor));
        executors.insert(ActionKind::DormCheck, Arc::new(DormCheckExecutor));
        Self { executors }
    }
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the executor for a kind.
    pub fn with_executor(mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Resolve the executor for a kind. The work-log kind is disabled and
    /// always fails with a domain error.
    pub fn dispatch(&self, kind: ActionKind) -> Result<Arc<dyn ActionExecutor>, ActionError> {
        if kind == ActionKind::WorkLog {
            return Err(ActionError::impossible(
                "the work log module is no longer supported",
            ));
        }
        self.executors.get(&kind).cloned().ok_or_else(|| {
            ActionError::impossible(format!("no executor registered for {}", kind.label()))
        })
    }
}

/// POST a JSON payload to a portal endpoint and unwrap the standard
/// `{"code": 0, "message": ..., "datas": ...}` envelope.
pub(crate) async fn post_json(
    session: &SessionHandle,
    path: &str,
    payload: Value,
) -> Result<Value, ActionError> {
    let url = session.endpoint(path)?;
    let response = session.client().post(url).json(&payload).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ActionError::retryable(format!(
            "portal endpoint {path} returned HTTP {status}"
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|err| ActionError::retryable(format!("portal endpoint {path}: {err}")))?;

    let ok = match body.get("code") {
        Some(Value::String(code)) => code == "0",
        Some(Value::Number(code)) => code.as_i64() == Some(0),
        _ => false,
    };
    if !ok {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown portal error");
        return Err(ActionError::retryable(format!(
            "portal endpoint {path} rejected the request: {message}"
        )));
    }

    Ok(body.get("datas").cloned().unwrap_or(Value::Null))
}
