//! Structural type validation seam.
//!
//! The crate never checks bodies against type declarations itself. A
//! [`TypeValidator`] is injected by the caller; production and test setups
//! differ only in the implementation they hand in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which side of a resource a body belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemContext {
    Request,
    Response,
}

impl fmt::Display for ProblemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemContext::Request => f.write_str("request"),
            ProblemContext::Response => f.write_str("response"),
        }
    }
}

/// One structural mismatch reported by a type validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Location inside the body, e.g. `<root>.author`.
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Problem {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_shapes(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.message)?;
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {expected}, got {actual})")?;
        }
        Ok(())
    }
}

/// Checks a body against a named structural type.
#[async_trait]
pub trait TypeValidator: Send + Sync {
    /// Returns `Ok(None)` when the body conforms. An `Err` means the check
    /// itself could not run.
    async fn validate(
        &self,
        body: &Value,
        type_name: &str,
        context: ProblemContext,
    ) -> anyhow::Result<Option<Vec<Problem>>>;
}

/// Produces the type validator for a load, only when a body needs checking.
#[async_trait]
pub trait GetTypeValidator: Send + Sync {
    async fn get_type_validator(&self) -> anyhow::Result<Arc<dyn TypeValidator>>;
}

#[async_trait]
impl<V: TypeValidator + 'static> GetTypeValidator for Arc<V> {
    async fn get_type_validator(&self) -> anyhow::Result<Arc<dyn TypeValidator>> {
        Ok(Arc::clone(self) as Arc<dyn TypeValidator>)
    }
}

/// Accepts every body. Used when no entry declares a type, or when type
/// checks are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTypeChecks;

#[async_trait]
impl TypeValidator for NoTypeChecks {
    async fn validate(
        &self,
        _body: &Value,
        type_name: &str,
        context: ProblemContext,
    ) -> anyhow::Result<Option<Vec<Problem>>> {
        debug!(type_name, %context, "Skipping structural type check");
        Ok(None)
    }
}
