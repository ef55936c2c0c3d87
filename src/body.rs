//! Body resolution.
//!
//! A body can be given inline or by a fixture file path, and serve mode adds
//! a second, serve-only pair of the same. The first source present wins:
//! `body`, `bodyPath`, `serveBody`, `serveBodyPath`.

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// The body sources declared on one side of a config entry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyConfig<'a> {
    pub body: Option<&'a Value>,
    pub body_path: Option<&'a str>,
    pub serve_body: Option<&'a Value>,
    pub serve_body_path: Option<&'a str>,
}

/// Failure to load a referenced body file.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("could not read body file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("body file {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl BodyError {
    pub fn path(&self) -> &Path {
        match self {
            BodyError::Read { path, .. } | BodyError::Parse { path, .. } => path,
        }
    }
}

/// Resolves bodies for entries of one configuration file.
#[derive(Debug, Clone)]
pub struct BodyResolver {
    config_dir: PathBuf,
}

impl BodyResolver {
    /// `config_path` is the configuration file; fixture paths are relative to
    /// its directory.
    pub fn new(config_path: &Path) -> Self {
        Self {
            config_dir: config_dir(config_path),
        }
    }

    pub fn fixture_path(&self, relative: &str) -> PathBuf {
        normalize(&self.config_dir.join(relative))
    }

    /// Pick the effective body. Missing or unparseable files are errors, never
    /// "no body".
    pub async fn resolve(&self, config: &BodyConfig<'_>) -> Result<Option<Value>, BodyError> {
        if let Some(body) = config.body {
            return Ok(Some(body.clone()));
        }
        if let Some(path) = config.body_path {
            return self.read_json(path).await.map(Some);
        }
        if let Some(body) = config.serve_body {
            return Ok(Some(body.clone()));
        }
        if let Some(path) = config.serve_body_path {
            return self.read_json(path).await.map(Some);
        }
        Ok(None)
    }

    async fn read_json(&self, relative: &str) -> Result<Value, BodyError> {
        let path = self.fixture_path(relative);
        debug!(path = %path.display(), "Reading body fixture");

        let content = tokio::fs::read(&path).await.map_err(|source| BodyError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| BodyError::Parse { path, source })
    }
}

/// Resolve a fixture path referenced from a configuration file.
pub fn fixture_path(config_path: &Path, relative: &str) -> PathBuf {
    normalize(&config_dir(config_path).join(relative))
}

fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Lexically drop `.` segments and fold `..` into the preceding segment.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
