//! Configuration validation.
//!
//! A configuration file is a list of entries, each with a `name`, a
//! `request` block and a `response` block. The rules differ between test
//! and serve mode, so validation produces a [`ValidatedConfig`] variant per
//! mode. Every rule violation in a file is collected before failing.
//!
//! Shape rules (required fields, types, allowed keys, methods, endpoint and
//! status code formats) live in a JSON Schema per mode. Rules that relate
//! two fields, and duplicate names, are checked alongside it.
//!
//! # Example
//!
//! ```yaml
//! - name: Books
//!   request:
//!     method: GET
//!     endpoints:
//!       - /api/books/123
//!       - /api/books/456
//!   response:
//!     code: 200
//!     headers:
//!       content-type: application/json
//!     type: Book
//!     serveBody:
//!       title: "1984"
//! ```

use crate::body::BodyConfig;
use crate::resource::Method;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Whether a configuration describes live tests or a mock server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Test,
    Serve,
}

impl Mode {
    pub fn from_test_flag(is_test_mode: bool) -> Self {
        if is_test_mode {
            Mode::Test
        } else {
            Mode::Serve
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Test => f.write_str("test"),
            Mode::Serve => f.write_str("serve"),
        }
    }
}

/// Keys only serve mode accepts. Test mode reports them as not allowed
/// rather than unknown.
const SERVE_ONLY_KEYS: &[&str] = &["serveEndpoint", "serveBody", "serveBodyPath"];

/// The rule a diagnostic reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    NotAList,
    NotAMapping,
    MissingField,
    WrongType,
    UnknownField,
    NotAllowedInMode,
    ConflictingFields,
    UnsupportedMethod,
    InvalidEndpoint,
    InvalidStatusCode,
    DuplicateName,
    /// The built-in schema could not be compiled.
    SchemaUnavailable,
}

/// A single rule violation found during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Position of the entry in the file, if the problem is inside one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_name: Option<String>,
    /// Field path inside the entry, e.g. `request.endpoints[1]`.
    pub field: String,
    pub message: String,
}

impl Diagnostic {
    fn file(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entry_index: None,
            entry_name: None,
            field: String::new(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.entry_index, &self.entry_name) {
            (Some(index), Some(name)) => write!(f, "entry {name:?} ([{index}])")?,
            (Some(index), None) => write!(f, "entry [{index}]")?,
            (None, _) => f.write_str("config")?,
        }
        if !self.field.is_empty() {
            write!(f, " {}", self.field)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// `endpoints` may be written as a single string or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(endpoint) => vec![endpoint],
            OneOrMany::Many(endpoints) => endpoints,
        }
    }
}

fn endpoint_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(deserializer).map(Vec::from)
}

fn optional_endpoint_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Option::<OneOrMany>::deserialize(deserializer).map(|value| value.map(Vec::from))
}

/// Request block of a test-mode entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestRequestConfig {
    pub method: Method,
    #[serde(deserialize_with = "endpoint_list")]
    pub endpoints: Vec<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
}

impl TestRequestConfig {
    pub fn body_config(&self) -> BodyConfig<'_> {
        BodyConfig {
            body: self.body.as_ref(),
            body_path: self.body_path.as_deref(),
            ..Default::default()
        }
    }
}

/// Request block of a serve-mode entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServeRequestConfig {
    pub method: Method,
    #[serde(
        default,
        deserialize_with = "optional_endpoint_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub endpoints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_endpoint: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_body_path: Option<String>,
}

impl ServeRequestConfig {
    /// `serveEndpoint` replaces the `endpoints` list when both are given.
    pub fn endpoints_to_use(&self) -> Vec<&str> {
        match (&self.serve_endpoint, &self.endpoints) {
            (Some(serve_endpoint), _) => vec![serve_endpoint.as_str()],
            (None, Some(endpoints)) => endpoints.iter().map(String::as_str).collect(),
            (None, None) => Vec::new(),
        }
    }

    pub fn body_config(&self) -> BodyConfig<'_> {
        BodyConfig {
            body: self.body.as_ref(),
            body_path: self.body_path.as_deref(),
            serve_body: self.serve_body.as_ref(),
            serve_body_path: self.serve_body_path.as_deref(),
        }
    }
}

/// Response block of a test-mode entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestResponseConfig {
    pub code: u16,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
}

impl TestResponseConfig {
    pub fn body_config(&self) -> BodyConfig<'_> {
        BodyConfig {
            body: self.body.as_ref(),
            body_path: self.body_path.as_deref(),
            ..Default::default()
        }
    }
}

/// Response block of a serve-mode entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServeResponseConfig {
    pub code: u16,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve_body_path: Option<String>,
}

impl ServeResponseConfig {
    pub fn body_config(&self) -> BodyConfig<'_> {
        BodyConfig {
            body: self.body.as_ref(),
            body_path: self.body_path.as_deref(),
            serve_body: self.serve_body.as_ref(),
            serve_body_path: self.serve_body_path.as_deref(),
        }
    }
}

/// A named entry with its request and response blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigEntry<Req, Resp> {
    pub name: String,
    pub request: Req,
    pub response: Resp,
}

pub type TestConfigEntry = ConfigEntry<TestRequestConfig, TestResponseConfig>;
pub type ServeConfigEntry = ConfigEntry<ServeRequestConfig, ServeResponseConfig>;

/// A schema-checked configuration entry for one mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ValidatedConfig {
    Test(TestConfigEntry),
    Serve(ServeConfigEntry),
}

impl ValidatedConfig {
    pub fn name(&self) -> &str {
        match self {
            ValidatedConfig::Test(entry) => &entry.name,
            ValidatedConfig::Serve(entry) => &entry.name,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ValidatedConfig::Test(_) => Mode::Test,
            ValidatedConfig::Serve(_) => Mode::Serve,
        }
    }

    pub fn request_type(&self) -> Option<&str> {
        match self {
            ValidatedConfig::Test(entry) => entry.request.type_name.as_deref(),
            ValidatedConfig::Serve(entry) => entry.request.type_name.as_deref(),
        }
    }

    pub fn response_type(&self) -> Option<&str> {
        match self {
            ValidatedConfig::Test(entry) => entry.response.type_name.as_deref(),
            ValidatedConfig::Serve(entry) => entry.response.type_name.as_deref(),
        }
    }

    pub fn declares_type(&self) -> bool {
        self.request_type().is_some() || self.response_type().is_some()
    }

    /// Fixture file paths referenced by this entry, as written in the file.
    pub fn fixture_paths(&self) -> Vec<&str> {
        let paths = match self {
            ValidatedConfig::Test(entry) => {
                vec![entry.request.body_path.as_deref(), entry.response.body_path.as_deref()]
            }
            ValidatedConfig::Serve(entry) => vec![
                entry.request.body_path.as_deref(),
                entry.request.serve_body_path.as_deref(),
                entry.response.body_path.as_deref(),
                entry.response.serve_body_path.as_deref(),
            ],
        };
        paths.into_iter().flatten().collect()
    }
}

/// Type names declared anywhere in the given entries, sorted and unique.
pub fn referenced_types(entries: &[ValidatedConfig]) -> Vec<&str> {
    entries
        .iter()
        .flat_map(|entry| [entry.request_type(), entry.response_type()])
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// JSON Schema for a whole configuration file in the given mode.
pub fn config_schema(mode: Mode) -> Value {
    let endpoint = json!({ "type": "string", "pattern": "^/" });
    let headers = json!({ "type": "object", "additionalProperties": { "type": "string" } });
    let methods: Vec<&str> = Method::CONFIG_SUPPORTED.iter().map(Method::as_str).collect();

    let mut request = json!({
        "method": { "type": "string", "enum": methods },
        "endpoints": {
            "type": ["string", "array"],
            "pattern": "^/",
            "items": endpoint,
            "minItems": 1
        },
        "type": { "type": "string" },
        "body": {},
        "bodyPath": { "type": "string" },
        "headers": headers
    });
    let mut response = json!({
        "code": { "type": "integer", "minimum": 100, "maximum": 599 },
        "type": { "type": "string" },
        "body": {},
        "bodyPath": { "type": "string" },
        "headers": headers
    });

    let request_required = match mode {
        Mode::Test => json!(["method", "endpoints"]),
        Mode::Serve => {
            request["serveEndpoint"] = endpoint;
            request["serveBody"] = json!({});
            request["serveBodyPath"] = json!({ "type": "string" });
            response["serveBody"] = json!({});
            response["serveBodyPath"] = json!({ "type": "string" });
            json!(["method"])
        }
    };

    json!({
        "type": "array",
        "items": {
            "type": "object",
            "additionalProperties": false,
            "required": ["name", "request", "response"],
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "request": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": request_required,
                    "properties": request
                },
                "response": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["code"],
                    "properties": response
                }
            }
        }
    })
}

/// Validate a parsed configuration tree for the given mode.
///
/// An empty document (`null`) is a valid file with no entries; deciding
/// whether that is acceptable is left to the caller. Keys set to `null` in
/// an entry or its blocks count as absent.
pub fn validate_raw_config(
    tree: &Value,
    mode: Mode,
) -> Result<Vec<ValidatedConfig>, Vec<Diagnostic>> {
    if tree.is_null() {
        return Ok(Vec::new());
    }

    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&config_schema(mode))
        .map_err(|e| {
            vec![Diagnostic::file(
                DiagnosticKind::SchemaUnavailable,
                format!("configuration schema could not be compiled: {e}"),
            )]
        })?;

    let tree = match tree {
        Value::Array(entries) => Value::Array(entries.iter().map(without_null_keys).collect()),
        other => other.clone(),
    };
    let entries = tree.as_array().map(Vec::as_slice).unwrap_or_default();

    let mut diagnostics: Vec<Diagnostic> = validator
        .iter_errors(&tree)
        .flat_map(|error| schema_diagnostics(&error, mode, entries))
        .collect();

    for (index, entry) in entries.iter().enumerate() {
        if let Some(entry) = entry.as_object() {
            relation_rules(index, entry, mode, &mut diagnostics);
        }
    }
    duplicate_names(entries, &mut diagnostics);

    if !diagnostics.is_empty() {
        diagnostics.sort_by(|a, b| {
            a.entry_index
                .cmp(&b.entry_index)
                .then_with(|| a.field.cmp(&b.field))
        });
        return Err(diagnostics);
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| deserialize_entry(index, entry, mode))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|diagnostic| vec![diagnostic])
}

/// Drop `null` keys from an entry and from its request and response blocks.
/// Bodies are left untouched.
fn without_null_keys(entry: &Value) -> Value {
    fn strip(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let mut entry = strip(entry);
    if let Value::Object(map) = &mut entry {
        for key in ["request", "response"] {
            if let Some(block) = map.get_mut(key) {
                *block = strip(block);
            }
        }
    }
    entry
}

fn entry_name(entries: &[Value], index: Option<usize>) -> Option<String> {
    entries
        .get(index?)?
        .get("name")?
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Split a JSON pointer such as `/0/request/endpoints/1` into the entry
/// index and a field path such as `request.endpoints[1]`.
fn split_pointer(pointer: &str) -> (Option<usize>, String) {
    let mut segments = pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"));

    let index = segments.next().and_then(|segment| segment.parse().ok());
    let mut field = String::new();
    for segment in segments {
        if segment.parse::<usize>().is_ok() {
            field.push_str(&format!("[{segment}]"));
        } else {
            field = join_field(&field, &segment);
        }
    }
    (index, field)
}

fn join_field(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Translate one schema violation into diagnostics.
fn schema_diagnostics(
    error: &ValidationError<'_>,
    mode: Mode,
    entries: &[Value],
) -> Vec<Diagnostic> {
    let (index, field) = split_pointer(&error.instance_path.to_string());
    let Some(index) = index else {
        return vec![Diagnostic::file(
            DiagnosticKind::NotAList,
            "configuration must be a list of resources",
        )];
    };

    let diagnostic = |kind: DiagnosticKind, field: String, message: String| Diagnostic {
        kind,
        entry_index: Some(index),
        entry_name: entry_name(entries, Some(index)),
        field,
        message,
    };

    match &error.kind {
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
            .iter()
            .map(|key| {
                if mode == Mode::Test && SERVE_ONLY_KEYS.contains(&key.as_str()) {
                    diagnostic(
                        DiagnosticKind::NotAllowedInMode,
                        join_field(&field, key),
                        format!("{key} is not allowed in test mode"),
                    )
                } else {
                    diagnostic(
                        DiagnosticKind::UnknownField,
                        join_field(&field, key),
                        format!("unknown field {key}"),
                    )
                }
            })
            .collect(),
        ValidationErrorKind::Required { property } => {
            let key = property
                .as_str()
                .map_or_else(|| property.to_string(), str::to_string);
            vec![diagnostic(
                DiagnosticKind::MissingField,
                join_field(&field, &key),
                format!("{key} is required"),
            )]
        }
        ValidationErrorKind::Type { .. } if field.is_empty() => vec![diagnostic(
            DiagnosticKind::NotAMapping,
            field,
            "entry must be a mapping with name, request and response".to_string(),
        )],
        // A method of the wrong type is already reported as such.
        ValidationErrorKind::Enum { .. } if !error.instance.is_string() => Vec::new(),
        ValidationErrorKind::Enum { .. } => {
            let supported: Vec<&str> =
                Method::CONFIG_SUPPORTED.iter().map(Method::as_str).collect();
            vec![diagnostic(
                DiagnosticKind::UnsupportedMethod,
                field,
                format!(
                    "method {} is not supported, use one of {}",
                    error.instance.as_str().unwrap_or_default(),
                    supported.join(", ")
                ),
            )]
        }
        ValidationErrorKind::Pattern { .. } => vec![diagnostic(
            DiagnosticKind::InvalidEndpoint,
            field,
            format!("endpoint {} must start with /", error.instance),
        )],
        ValidationErrorKind::Minimum { .. } | ValidationErrorKind::Maximum { .. } => {
            vec![diagnostic(
                DiagnosticKind::InvalidStatusCode,
                field,
                format!("invalid status code: {}", error.instance),
            )]
        }
        ValidationErrorKind::MinItems { .. } | ValidationErrorKind::MinLength { .. } => {
            vec![diagnostic(DiagnosticKind::MissingField, field, error.to_string())]
        }
        _ => vec![diagnostic(DiagnosticKind::WrongType, field, error.to_string())],
    }
}

/// Present and not null.
fn is_set(block: &Map<String, Value>, key: &str) -> bool {
    block.get(key).is_some_and(|v| !v.is_null())
}

/// Rules that relate two fields of one block.
fn relation_rules(
    index: usize,
    entry: &Map<String, Value>,
    mode: Mode,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let mut report = |kind: DiagnosticKind, field: String, message: String| {
        diagnostics.push(Diagnostic {
            kind,
            entry_index: Some(index),
            entry_name: name.clone(),
            field,
            message,
        })
    };

    let mut pairs = vec![("body", "bodyPath")];
    if mode == Mode::Serve {
        pairs.push(("serveBody", "serveBodyPath"));
    }

    for side in ["request", "response"] {
        let Some(block) = entry.get(side).and_then(Value::as_object) else {
            continue;
        };
        for (first, second) in &pairs {
            if is_set(block, first) && is_set(block, second) {
                report(
                    DiagnosticKind::ConflictingFields,
                    format!("{side}.{second}"),
                    format!("{first} and {second} cannot both be set"),
                );
            }
        }
    }

    if mode == Mode::Serve {
        if let Some(request) = entry.get("request").and_then(Value::as_object) {
            if !is_set(request, "endpoints") && !is_set(request, "serveEndpoint") {
                report(
                    DiagnosticKind::MissingField,
                    "request.endpoints".to_string(),
                    "either endpoints or serveEndpoint is required".to_string(),
                );
            }
        }
    }
}

fn duplicate_names(entries: &[Value], diagnostics: &mut Vec<Diagnostic>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        match seen.get(name) {
            Some(first) => diagnostics.push(Diagnostic {
                kind: DiagnosticKind::DuplicateName,
                entry_index: Some(index),
                entry_name: Some(name.to_string()),
                field: "name".to_string(),
                message: format!("name is already used by entry [{first}]"),
            }),
            None => {
                seen.insert(name, index);
            }
        }
    }
}

fn deserialize_entry(
    index: usize,
    entry: &Value,
    mode: Mode,
) -> Result<ValidatedConfig, Diagnostic> {
    let parsed = match mode {
        Mode::Test => serde_json::from_value(entry.clone()).map(ValidatedConfig::Test),
        Mode::Serve => serde_json::from_value(entry.clone()).map(ValidatedConfig::Serve),
    };
    parsed.map_err(|e| Diagnostic {
        kind: DiagnosticKind::WrongType,
        entry_index: Some(index),
        entry_name: entry_name(std::slice::from_ref(entry), Some(0)),
        field: String::new(),
        message: e.to_string(),
    })
}
