//! Errors raised while loading a configuration file.

use crate::body::BodyError;
use crate::config::Diagnostic;
use crate::resource::ResourceError;
use crate::types::{Problem, ProblemContext};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Body type problems for one side of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeFailure {
    pub entry: String,
    pub context: ProblemContext,
    pub type_name: String,
    pub problems: Vec<Problem>,
}

impl fmt::Display for TypeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry {:?}: {} body does not match type {}",
            self.entry, self.context, self.type_name
        )?;
        for problem in &self.problems {
            write!(f, "\n    {problem}")?;
        }
        Ok(())
    }
}

fn render_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A configuration file could not be turned into resources.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read config file {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    #[error("config file {} is invalid:\n{}", .path.display(), render_lines(.diagnostics))]
    SchemaInvalid {
        path: PathBuf,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("config file {} does not define any resources", .path.display())]
    EmptyConfig { path: PathBuf },

    #[error("config file {}: entry {entry:?}: {context} body could not be resolved: {source}", .path.display())]
    BodyResolution {
        path: PathBuf,
        entry: String,
        context: ProblemContext,
        #[source]
        source: BodyError,
    },

    #[error("config file {} has bodies that do not match their types:\n{}", .path.display(), render_lines(.failures))]
    TypeValidation {
        path: PathBuf,
        failures: Vec<TypeFailure>,
    },

    #[error("config file {}: type validator failed: {message}", .path.display())]
    TypeValidatorFailed {
        path: PathBuf,
        entry: Option<String>,
        message: String,
    },

    #[error("config file {}: entry {entry:?}: {source}", .path.display())]
    InvalidResource {
        path: PathBuf,
        entry: String,
        #[source]
        source: ResourceError,
    },

    #[error("config file {}: could not transform resources: {message}", .path.display())]
    Transform { path: PathBuf, message: String },
}

/// Discriminant of a [`LoadError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
    Read,
    SchemaInvalid,
    EmptyConfig,
    BodyResolution,
    TypeValidation,
    TypeValidatorFailed,
    InvalidResource,
    Transform,
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::Read { .. } => LoadErrorKind::Read,
            LoadError::SchemaInvalid { .. } => LoadErrorKind::SchemaInvalid,
            LoadError::EmptyConfig { .. } => LoadErrorKind::EmptyConfig,
            LoadError::BodyResolution { .. } => LoadErrorKind::BodyResolution,
            LoadError::TypeValidation { .. } => LoadErrorKind::TypeValidation,
            LoadError::TypeValidatorFailed { .. } => LoadErrorKind::TypeValidatorFailed,
            LoadError::InvalidResource { .. } => LoadErrorKind::InvalidResource,
            LoadError::Transform { .. } => LoadErrorKind::Transform,
        }
    }

    /// The configuration file the error belongs to.
    pub fn config_path(&self) -> &Path {
        match self {
            LoadError::Read { path, .. }
            | LoadError::SchemaInvalid { path, .. }
            | LoadError::EmptyConfig { path }
            | LoadError::BodyResolution { path, .. }
            | LoadError::TypeValidation { path, .. }
            | LoadError::TypeValidatorFailed { path, .. }
            | LoadError::InvalidResource { path, .. }
            | LoadError::Transform { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate_raw_config, Mode};
    use serde_json::json;

    #[test]
    fn test_schema_invalid_lists_every_diagnostic() {
        let diagnostics = validate_raw_config(&json!([{"name": "Books"}]), Mode::Test).unwrap_err();
        let err = LoadError::SchemaInvalid {
            path: PathBuf::from("/srv/config.yml"),
            diagnostics,
        };

        assert_eq!(err.kind(), LoadErrorKind::SchemaInvalid);
        assert_eq!(
            err.to_string(),
            "config file /srv/config.yml is invalid:\n  \
             entry \"Books\" ([0]) request: request is required\n  \
             entry \"Books\" ([0]) response: response is required"
        );
    }

    #[test]
    fn test_type_validation_message() {
        let err = LoadError::TypeValidation {
            path: PathBuf::from("config.yml"),
            failures: vec![TypeFailure {
                entry: "Books".to_string(),
                context: ProblemContext::Response,
                type_name: "Book".to_string(),
                problems: vec![Problem::new("<root>.title", "is missing")],
            }],
        };

        assert_eq!(err.config_path(), Path::new("config.yml"));
        assert_eq!(
            err.to_string(),
            "config file config.yml has bodies that do not match their types:\n  \
             entry \"Books\": response body does not match type Book\n    <root>.title is missing"
        );
    }
}
