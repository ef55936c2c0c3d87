//! Configuration loading.
//!
//! Reads a YAML configuration file, validates it for a mode, maps every
//! entry into resources and reports the fixture files it references. Files
//! are independent: loading several at once never lets one file's failure
//! leak into another's result.

use crate::body::{fixture_path, BodyResolver};
use crate::config::{validate_raw_config, Diagnostic, DiagnosticKind, Mode, ValidatedConfig};
use crate::error::{LoadError, TypeFailure};
use crate::mapper::{ConfigMapper, MapError};
use crate::metrics::MetricsReporter;
use crate::resource::Resource;
use crate::types::{GetTypeValidator, NoTypeChecks, TypeValidator};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resources compiled from one configuration file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub resources: Vec<Resource>,
    /// Absolute paths of every fixture file the configuration references.
    pub fixture_paths: Vec<PathBuf>,
}

/// Post-processes the resources of one file before they are returned.
#[async_trait]
pub trait TransformResources: Send + Sync {
    async fn transform(
        &self,
        resources: Vec<Resource>,
        config_path: &Path,
    ) -> anyhow::Result<Vec<Resource>>;
}

/// Returns resources unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransform;

#[async_trait]
impl TransformResources for NoTransform {
    async fn transform(
        &self,
        resources: Vec<Resource>,
        _config_path: &Path,
    ) -> anyhow::Result<Vec<Resource>> {
        Ok(resources)
    }
}

/// Read a configuration file into a generic tree.
pub async fn read_config_tree(path: &Path) -> Result<Value, LoadError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str(&content).map_err(|e| LoadError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load one configuration file.
pub async fn load_config(
    config_path: &Path,
    get_type_validator: &dyn GetTypeValidator,
    transform: &dyn TransformResources,
    is_test_mode: bool,
) -> Result<LoadedConfig, LoadError> {
    ConfigLoader::new(Mode::from_test_flag(is_test_mode))
        .load(config_path, get_type_validator, transform)
        .await
}

/// Loads configuration files for one mode.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    mode: Mode,
    metrics: MetricsReporter,
}

impl ConfigLoader {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            metrics: MetricsReporter::new(),
        }
    }

    /// Share a reporter with other operations so timings line up.
    pub fn with_metrics(self, metrics: MetricsReporter) -> Self {
        Self { metrics, ..self }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Load one file, reporting its timing.
    pub async fn load(
        &self,
        config_path: &Path,
        get_type_validator: &dyn GetTypeValidator,
        transform: &dyn TransformResources,
    ) -> Result<LoadedConfig, LoadError> {
        let report = self
            .metrics
            .report(format!("Loading config {}", config_path.display()));

        let result = self
            .load_inner(config_path, get_type_validator, transform)
            .await;

        match &result {
            Ok(loaded) => {
                report.success();
                info!(
                    path = %config_path.display(),
                    mode = %self.mode,
                    resources = loaded.resources.len(),
                    fixtures = loaded.fixture_paths.len(),
                    "Loaded configuration"
                );
            }
            Err(e) => {
                report.fail();
                warn!(path = %config_path.display(), error = %e, "Configuration failed to load");
            }
        }
        result
    }

    /// Load several files concurrently. Results come back in input order,
    /// one per file.
    pub async fn load_all(
        &self,
        config_paths: &[PathBuf],
        get_type_validator: &dyn GetTypeValidator,
        transform: &dyn TransformResources,
    ) -> Vec<Result<LoadedConfig, LoadError>> {
        join_all(
            config_paths
                .iter()
                .map(|path| self.load(path, get_type_validator, transform)),
        )
        .await
    }

    async fn load_inner(
        &self,
        config_path: &Path,
        get_type_validator: &dyn GetTypeValidator,
        transform: &dyn TransformResources,
    ) -> Result<LoadedConfig, LoadError> {
        let path = std::path::absolute(config_path).map_err(|e| LoadError::Read {
            path: config_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let tree = read_config_tree(&path).await?;

        let entries = validate_raw_config(&tree, self.mode).map_err(|diagnostics| {
            LoadError::SchemaInvalid {
                path: path.clone(),
                diagnostics,
            }
        })?;

        if entries.is_empty() {
            return Err(LoadError::EmptyConfig { path });
        }
        debug!(path = %path.display(), entries = entries.len(), "Validated configuration");

        let types = self
            .type_validator_for(&entries, &path, get_type_validator)
            .await?;
        let resolver = BodyResolver::new(&path);
        let resources = map_entries(&entries, &resolver, types.as_ref(), &path).await?;

        let resources = transform
            .transform(resources, &path)
            .await
            .map_err(|e| LoadError::Transform {
                path: path.clone(),
                message: format!("{e:#}"),
            })?;

        let mut fixture_paths: Vec<PathBuf> = Vec::new();
        for relative in entries.iter().flat_map(ValidatedConfig::fixture_paths) {
            let fixture = fixture_path(&path, relative);
            if !fixture_paths.contains(&fixture) {
                fixture_paths.push(fixture);
            }
        }

        Ok(LoadedConfig {
            resources,
            fixture_paths,
        })
    }

    /// The validator is only requested when some entry declares a type.
    async fn type_validator_for(
        &self,
        entries: &[ValidatedConfig],
        path: &Path,
        get_type_validator: &dyn GetTypeValidator,
    ) -> Result<Arc<dyn TypeValidator>, LoadError> {
        if !entries.iter().any(ValidatedConfig::declares_type) {
            return Ok(Arc::new(NoTypeChecks));
        }

        get_type_validator
            .get_type_validator()
            .await
            .map_err(|e| LoadError::TypeValidatorFailed {
                path: path.to_path_buf(),
                entry: None,
                message: format!("{e:#}"),
            })
    }
}

/// Map entries concurrently. Type problems are collected across entries;
/// any other failure is reported for the first failing entry in file order.
async fn map_entries(
    entries: &[ValidatedConfig],
    resolver: &BodyResolver,
    types: &dyn TypeValidator,
    path: &Path,
) -> Result<Vec<Resource>, LoadError> {
    let mapper = ConfigMapper::new(resolver, types);
    let results = join_all(entries.iter().map(|entry| mapper.map_entry(entry))).await;

    let mut resources = Vec::new();
    let mut failures = Vec::new();

    for (index, (entry, result)) in entries.iter().zip(results).enumerate() {
        let entry_name = entry.name().to_string();
        match result {
            Ok(mapped) => resources.extend(mapped),
            Err(MapError::Types(mismatches)) => {
                failures.extend(mismatches.into_iter().map(|m| TypeFailure {
                    entry: entry_name.clone(),
                    context: m.context,
                    type_name: m.type_name,
                    problems: m.problems,
                }))
            }
            Err(MapError::Body { context, source }) => {
                return Err(LoadError::BodyResolution {
                    path: path.to_path_buf(),
                    entry: entry_name,
                    context,
                    source,
                })
            }
            Err(e @ MapError::Validator { .. }) => {
                return Err(LoadError::TypeValidatorFailed {
                    path: path.to_path_buf(),
                    entry: Some(entry_name),
                    message: e.to_string(),
                })
            }
            Err(MapError::NoEndpoints) => {
                return Err(LoadError::SchemaInvalid {
                    path: path.to_path_buf(),
                    diagnostics: vec![Diagnostic {
                        kind: DiagnosticKind::MissingField,
                        entry_index: Some(index),
                        entry_name: Some(entry_name),
                        field: "request.endpoints".to_string(),
                        message: "entry has no endpoints".to_string(),
                    }],
                })
            }
            Err(MapError::Resource(source)) => {
                return Err(LoadError::InvalidResource {
                    path: path.to_path_buf(),
                    entry: entry_name,
                    source,
                })
            }
        }
    }

    if failures.is_empty() {
        Ok(resources)
    } else {
        Err(LoadError::TypeValidation {
            path: path.to_path_buf(),
            failures,
        })
    }
}
