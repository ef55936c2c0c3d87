//! Expansion of validated entries into resources.
//!
//! One entry becomes one resource per endpoint, named `"<name> [<index>]"`.
//! Request and response bodies are resolved independently and, when a type
//! is declared, checked by the injected [`TypeValidator`].

use crate::body::{BodyConfig, BodyError, BodyResolver};
use crate::config::ValidatedConfig;
use crate::matcher::Headers;
use crate::resource::{Method, Request, RequestInput, Resource, ResourceError, Response};
use crate::types::{Problem, ProblemContext, TypeValidator};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Why an entry could not be turned into resources.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("{context} body could not be resolved: {source}")]
    Body {
        context: ProblemContext,
        #[source]
        source: BodyError,
    },

    #[error("{}", describe_mismatches(.0))]
    Types(Vec<TypeMismatch>),

    #[error("type validator failed on {context} body of type {type_name}: {message}")]
    Validator {
        context: ProblemContext,
        type_name: String,
        message: String,
    },

    #[error("entry has no endpoints")]
    NoEndpoints,

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// A body that does not match its declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub context: ProblemContext,
    pub type_name: String,
    pub problems: Vec<Problem>,
}

fn describe_mismatches(mismatches: &[TypeMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| format!("{} body does not match type {}", m.context, m.type_name))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The request side of an entry, independent of mode.
struct RequestParts<'a> {
    method: Method,
    endpoints: Vec<&'a str>,
    type_name: Option<&'a str>,
    headers: &'a BTreeMap<String, String>,
    bodies: BodyConfig<'a>,
}

/// The response side of an entry, independent of mode.
struct ResponseParts<'a> {
    code: u16,
    type_name: Option<&'a str>,
    headers: &'a BTreeMap<String, String>,
    bodies: BodyConfig<'a>,
}

fn request_parts(entry: &ValidatedConfig) -> RequestParts<'_> {
    match entry {
        ValidatedConfig::Test(entry) => RequestParts {
            method: entry.request.method,
            endpoints: entry.request.endpoints.iter().map(String::as_str).collect(),
            type_name: entry.request.type_name.as_deref(),
            headers: &entry.request.headers,
            bodies: entry.request.body_config(),
        },
        ValidatedConfig::Serve(entry) => RequestParts {
            method: entry.request.method,
            endpoints: entry.request.endpoints_to_use(),
            type_name: entry.request.type_name.as_deref(),
            headers: &entry.request.headers,
            bodies: entry.request.body_config(),
        },
    }
}

fn response_parts(entry: &ValidatedConfig) -> ResponseParts<'_> {
    match entry {
        ValidatedConfig::Test(entry) => ResponseParts {
            code: entry.response.code,
            type_name: entry.response.type_name.as_deref(),
            headers: &entry.response.headers,
            bodies: entry.response.body_config(),
        },
        ValidatedConfig::Serve(entry) => ResponseParts {
            code: entry.response.code,
            type_name: entry.response.type_name.as_deref(),
            headers: &entry.response.headers,
            bodies: entry.response.body_config(),
        },
    }
}

/// Maps validated entries of one configuration file.
pub struct ConfigMapper<'a> {
    resolver: &'a BodyResolver,
    types: &'a dyn TypeValidator,
}

impl<'a> ConfigMapper<'a> {
    pub fn new(resolver: &'a BodyResolver, types: &'a dyn TypeValidator) -> Self {
        Self { resolver, types }
    }

    /// Expand an entry into its resources. Nothing is returned unless every
    /// request and the response were built.
    ///
    /// Both sides are always resolved. When both fail type checks, the
    /// mismatches are merged, request first. Any other failure wins over a
    /// type mismatch.
    pub async fn map_entry(&self, entry: &ValidatedConfig) -> Result<Vec<Resource>, MapError> {
        let (requests, response) = match (
            self.map_request(entry).await,
            self.map_response(entry).await,
        ) {
            (Ok(requests), Ok(response)) => (requests, response),
            (Err(MapError::Types(mut mismatches)), Err(MapError::Types(more))) => {
                mismatches.extend(more);
                return Err(MapError::Types(mismatches));
            }
            (Err(MapError::Types(_)), Err(e)) => return Err(e),
            (Err(e), _) | (_, Err(e)) => return Err(e),
        };

        debug!(
            entry = entry.name(),
            resources = requests.len(),
            "Mapped config entry"
        );

        Ok(requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                Resource::new(format!("{} [{index}]", entry.name()), request, response.clone())
            })
            .collect())
    }

    /// One request per endpoint, in configuration order.
    pub async fn map_request(&self, entry: &ValidatedConfig) -> Result<Vec<Request>, MapError> {
        let parts = request_parts(entry);
        if parts.endpoints.is_empty() {
            return Err(MapError::NoEndpoints);
        }

        let body = self
            .resolve_body(&parts.bodies, parts.type_name, ProblemContext::Request)
            .await?;
        let headers = Headers::new(parts.headers.clone());

        parts
            .endpoints
            .into_iter()
            .map(|endpoint| {
                Request::new(RequestInput {
                    method: parts.method,
                    endpoint: endpoint.to_string(),
                    body: body.clone(),
                    type_name: parts.type_name.map(str::to_string),
                    headers: headers.clone(),
                })
                .map_err(MapError::from)
            })
            .collect()
    }

    pub async fn map_response(&self, entry: &ValidatedConfig) -> Result<Response, MapError> {
        let parts = response_parts(entry);
        let body = self
            .resolve_body(&parts.bodies, parts.type_name, ProblemContext::Response)
            .await?;

        Ok(Response::new(
            parts.code,
            body,
            parts.type_name.map(str::to_string),
            Headers::new(parts.headers.clone()),
        ))
    }

    async fn resolve_body(
        &self,
        bodies: &BodyConfig<'_>,
        type_name: Option<&str>,
        context: ProblemContext,
    ) -> Result<Option<Value>, MapError> {
        let body = self
            .resolver
            .resolve(bodies)
            .await
            .map_err(|source| MapError::Body { context, source })?;

        if let (Some(body), Some(type_name)) = (&body, type_name) {
            let problems = self
                .types
                .validate(body, type_name, context)
                .await
                .map_err(|e| MapError::Validator {
                    context,
                    type_name: type_name.to_string(),
                    message: format!("{e:#}"),
                })?;

            if let Some(problems) = problems.filter(|p| !p.is_empty()) {
                return Err(MapError::Types(vec![TypeMismatch {
                    context,
                    type_name: type_name.to_string(),
                    problems,
                }]));
            }
        }

        Ok(body)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{validate_raw_config, Mode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    /// Rejects any body that is not an object with a string `title`, and
    /// records every call.
    #[derive(Default)]
    pub(crate) struct TitleValidator {
        pub(crate) calls: Mutex<Vec<(String, ProblemContext)>>,
    }

    #[async_trait]
    impl TypeValidator for TitleValidator {
        async fn validate(
            &self,
            body: &Value,
            type_name: &str,
            context: ProblemContext,
        ) -> anyhow::Result<Option<Vec<Problem>>> {
            self.calls
                .lock()
                .unwrap()
                .push((type_name.to_string(), context));
            if body.get("title").is_some_and(Value::is_string) {
                Ok(None)
            } else {
                Ok(Some(vec![Problem::new("<root>.title", "is missing")]))
            }
        }
    }

    struct BrokenValidator;

    #[async_trait]
    impl TypeValidator for BrokenValidator {
        async fn validate(
            &self,
            _body: &Value,
            _type_name: &str,
            _context: ProblemContext,
        ) -> anyhow::Result<Option<Vec<Problem>>> {
            anyhow::bail!("type declarations could not be compiled")
        }
    }

    fn entries(yaml: &str, mode: Mode) -> Vec<ValidatedConfig> {
        validate_raw_config(&serde_yaml::from_str(yaml).unwrap(), mode).unwrap()
    }

    fn resolver() -> BodyResolver {
        BodyResolver::new(Path::new("/nonexistent/config.yml"))
    }

    #[tokio::test]
    async fn test_endpoints_expand_in_order() {
        let yaml = r#"
- name: Books
  request:
    method: GET
    endpoints: [/api/books/1, /api/books/2, /api/books/3?full=true]
  response:
    code: 200
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let validator = TitleValidator::default();
        let mapper = ConfigMapper::new(&resolver, &validator);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        let names: Vec<&str> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Books [0]", "Books [1]", "Books [2]"]);

        let endpoints: Vec<&str> = resources.iter().map(|r| r.request.endpoint()).collect();
        assert_eq!(endpoints, vec!["/api/books/1", "/api/books/2", "/api/books/3?full=true"]);
        assert_eq!(resources[2].request.path_name(), "/api/books/3");
        assert!(resources.iter().all(|r| r.response.code == 200));
    }

    #[tokio::test]
    async fn test_single_endpoint_still_indexed() {
        let yaml = r#"
- name: Create
  request:
    method: POST
    endpoints: /api/books
  response:
    code: 201
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &crate::types::NoTypeChecks);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "Create [0]");
        assert_eq!(resources[0].request.method(), Method::Post);
    }

    #[tokio::test]
    async fn test_serve_endpoint_yields_one_resource() {
        let yaml = r#"
- name: Books
  request:
    method: GET
    serveEndpoint: /api/books/*
  response:
    code: 200
"#;
        let entries = entries(yaml, Mode::Serve);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &crate::types::NoTypeChecks);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].request.endpoint(), "/api/books/*");
        assert_eq!(resources[0].request.path_name(), "/api/books/*");
    }

    #[tokio::test]
    async fn test_body_and_headers_carried_to_every_request() {
        let yaml = r#"
- name: Search
  request:
    method: POST
    endpoints: [/api/search, /api/search/v2]
    headers:
      Content-Type: application/json
    body:
      query: orwell
  response:
    code: 200
    serveBody: [1, 2]
"#;
        let entries = entries(yaml, Mode::Serve);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &crate::types::NoTypeChecks);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        for resource in &resources {
            assert_eq!(resource.request.body(), Some(&json!({"query": "orwell"})));
            assert_eq!(resource.request.headers().get("content-type"), Some("application/json"));
            assert_eq!(resource.response.body, Some(json!([1, 2])));
        }
    }

    #[tokio::test]
    async fn test_type_checked_only_when_body_and_type_present() {
        let yaml = r#"
- name: Books
  request:
    method: GET
    endpoints: /api/books
    type: Query
  response:
    code: 200
    type: Book
    body:
      title: "1984"
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let validator = TitleValidator::default();
        let mapper = ConfigMapper::new(&resolver, &validator);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        assert_eq!(resources[0].response.type_name.as_deref(), Some("Book"));
        assert_eq!(resources[0].request.type_name(), Some("Query"));

        let calls = validator.calls.lock().unwrap();
        assert_eq!(*calls, vec![("Book".to_string(), ProblemContext::Response)]);
    }

    #[tokio::test]
    async fn test_type_problems_fail_the_entry() {
        let yaml = r#"
- name: Books
  request:
    method: GET
    endpoints: /api/books
  response:
    code: 200
    type: Book
    body:
      author: Orwell
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let validator = TitleValidator::default();
        let mapper = ConfigMapper::new(&resolver, &validator);

        match mapper.map_entry(&entries[0]).await {
            Err(MapError::Types(mismatches)) => {
                assert_eq!(
                    mismatches,
                    vec![TypeMismatch {
                        context: ProblemContext::Response,
                        type_name: "Book".to_string(),
                        problems: vec![Problem::new("<root>.title", "is missing")],
                    }]
                );
            }
            other => panic!("Expected type problems, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_and_response_type_problems_are_merged() {
        let yaml = r#"
- name: Books
  request:
    method: POST
    endpoints: /api/books
    type: NewBook
    body:
      author: Orwell
  response:
    code: 201
    type: Book
    body:
      title: 1984
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let validator = TitleValidator::default();
        let mapper = ConfigMapper::new(&resolver, &validator);

        let err = mapper.map_entry(&entries[0]).await.unwrap_err();
        let MapError::Types(mismatches) = &err else {
            panic!("Expected type problems, got {err:?}");
        };
        let sides: Vec<(ProblemContext, &str)> = mismatches
            .iter()
            .map(|m| (m.context, m.type_name.as_str()))
            .collect();
        assert_eq!(
            sides,
            vec![
                (ProblemContext::Request, "NewBook"),
                (ProblemContext::Response, "Book")
            ]
        );
        assert_eq!(
            err.to_string(),
            "request body does not match type NewBook; response body does not match type Book"
        );
    }

    #[tokio::test]
    async fn test_other_failures_win_over_type_problems() {
        let yaml = r#"
- name: Books
  request:
    method: POST
    endpoints: /api/books
    type: NewBook
    body:
      author: Orwell
  response:
    code: 200
    bodyPath: ./missing.json
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let validator = TitleValidator::default();
        let mapper = ConfigMapper::new(&resolver, &validator);

        let err = mapper.map_entry(&entries[0]).await.unwrap_err();
        assert!(matches!(
            err,
            MapError::Body {
                context: ProblemContext::Response,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_validator_failure_is_reported() {
        let yaml = r#"
- name: Books
  request:
    method: POST
    endpoints: /api/books
    type: Book
    body: {}
  response:
    code: 200
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &BrokenValidator);

        let err = mapper.map_entry(&entries[0]).await.unwrap_err();
        assert!(matches!(
            err,
            MapError::Validator {
                context: ProblemContext::Request,
                ..
            }
        ));
        assert!(err.to_string().contains("could not be compiled"));
    }

    #[tokio::test]
    async fn test_missing_body_file_fails_the_entry() {
        let yaml = r#"
- name: Books
  request:
    method: GET
    endpoints: /api/books
  response:
    code: 200
    bodyPath: ./missing.json
"#;
        let entries = entries(yaml, Mode::Test);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &crate::types::NoTypeChecks);

        let err = mapper.map_entry(&entries[0]).await.unwrap_err();
        assert!(matches!(
            err,
            MapError::Body {
                context: ProblemContext::Response,
                source: BodyError::Read { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_unparseable_pattern_is_served_literally() {
        let yaml = r#"
- name: Items
  request:
    method: GET
    serveEndpoint: /api/[books
  response:
    code: 200
"#;
        let entries = entries(yaml, Mode::Serve);
        let resolver = resolver();
        let mapper = ConfigMapper::new(&resolver, &crate::types::NoTypeChecks);

        let resources = mapper.map_entry(&entries[0]).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert!(resources[0].request.matches_path("/api/[books"));
        assert!(!resources[0].request.matches_path("/api/b"));
    }
}
