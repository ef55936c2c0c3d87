//! Immutable resource model.
//!
//! A [`Resource`] pairs one expected [`Request`] with the [`Response`] that
//! answers it. Values are never changed after construction; the `with_*`
//! helpers return new values and leave the original untouched.

use crate::matcher::{Headers, Query};
use globset::{Glob, GlobMatcher};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// HTTP methods a resource can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    /// Every method the resource model understands.
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
        Method::Head,
        Method::Options,
    ];

    /// Methods accepted by the test and serve configuration schemas.
    pub const CONFIG_SUPPORTED: [Method; 2] = [Method::Get, Method::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether configuration files may declare this method.
    pub fn is_config_supported(&self) -> bool {
        Self::CONFIG_SUPPORTED.contains(self)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| ResourceError::UnsupportedMethod(s.to_string()))
    }
}

/// Errors raised while constructing resource values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("no pathname for endpoint {endpoint}")]
    NoPathName { endpoint: String },

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

/// Everything needed to build a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInput {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub type_name: Option<String>,
    pub headers: Headers,
}

/// An expected request. The path and query are derived from the endpoint
/// once, when the value is built.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    endpoint: String,
    path_name: String,
    path_matcher: Option<GlobMatcher>,
    query: Query,
    body: Option<Value>,
    type_name: Option<String>,
    headers: Headers,
}

/// A request received by a mock server, in the shape the matchers need.
#[derive(Debug, Clone, Copy)]
pub struct IncomingRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a [(String, String)],
}

impl Request {
    /// Build a request, deriving its path name and query from the endpoint.
    pub fn new(input: RequestInput) -> Result<Self, ResourceError> {
        let (path_name, query_string) = split_endpoint(&input.endpoint);
        if path_name.is_empty() {
            return Err(ResourceError::NoPathName {
                endpoint: input.endpoint,
            });
        }

        // A path name that is not a valid glob is matched literally.
        let path_matcher = Glob::new(path_name)
            .ok()
            .map(|glob| glob.compile_matcher());

        Ok(Self {
            method: input.method,
            path_name: path_name.to_string(),
            query: Query::parse(query_string),
            path_matcher,
            endpoint: input.endpoint,
            body: input.body,
            type_name: input.type_name,
            headers: input.headers,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The fields this request was built from.
    pub fn to_input(&self) -> RequestInput {
        RequestInput {
            method: self.method,
            endpoint: self.endpoint.clone(),
            body: self.body.clone(),
            type_name: self.type_name.clone(),
            headers: self.headers.clone(),
        }
    }

    /// Whether the incoming path is routed to this request. Path names are
    /// glob patterns, so `/api/books/*` answers `/api/books/123`.
    pub fn matches_path(&self, path: &str) -> bool {
        path == self.path_name
            || self
                .path_matcher
                .as_ref()
                .is_some_and(|matcher| matcher.is_match(path))
    }

    /// Method, path, query and headers must all line up.
    pub fn matches(&self, incoming: &IncomingRequest<'_>) -> bool {
        self.method == incoming.method
            && self.matches_path(incoming.path)
            && self.query.matches_query_string(incoming.query)
            && self
                .headers
                .matches(incoming.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Absolute URL for this request against a live service.
    pub fn format_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.endpoint)
    }

    /// Same request at a different endpoint. The path and query are derived
    /// again, so this can fail the same way [`Request::new`] can.
    pub fn with_endpoint(&self, endpoint: impl Into<String>) -> Result<Self, ResourceError> {
        Self::new(RequestInput {
            endpoint: endpoint.into(),
            ..self.to_input()
        })
    }

    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    pub fn with_body(&self, body: Option<Value>) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    pub fn with_type(&self, type_name: Option<String>) -> Self {
        Self {
            type_name,
            ..self.clone()
        }
    }

    pub fn with_headers(&self, headers: Headers) -> Self {
        Self {
            headers,
            ..self.clone()
        }
    }
}

// The compiled path matcher is derived from `path_name`, so it is left out.
impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.endpoint == other.endpoint
            && self.body == other.body
            && self.type_name == other.type_name
            && self.headers == other.headers
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Request", 5)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("endpoint", &self.endpoint)?;
        state.serialize_field("body", &self.body)?;
        state.serialize_field("type", &self.type_name)?;
        state.serialize_field("headers", &self.headers)?;
        state.end()
    }
}

/// Splits an endpoint into its path name and raw query string. A fragment,
/// if any, is dropped.
fn split_endpoint(endpoint: &str) -> (&str, Option<&str>) {
    let without_fragment = endpoint.split_once('#').map_or(endpoint, |(e, _)| e);
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    }
}

/// An expected (or canned) response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub code: u16,
    pub body: Option<Value>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub headers: Headers,
}

impl Response {
    pub fn new(
        code: u16,
        body: Option<Value>,
        type_name: Option<String>,
        headers: Headers,
    ) -> Self {
        Self {
            code,
            body,
            type_name,
            headers,
        }
    }

    pub fn with_code(&self, code: u16) -> Self {
        Self {
            code,
            ..self.clone()
        }
    }

    pub fn with_body(&self, body: Option<Value>) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    pub fn with_type(&self, type_name: Option<String>) -> Self {
        Self {
            type_name,
            ..self.clone()
        }
    }

    pub fn with_headers(&self, headers: Headers) -> Self {
        Self {
            headers,
            ..self.clone()
        }
    }
}

/// A named request/response pair produced by the config pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub name: String,
    pub request: Request,
    pub response: Response,
}

impl Resource {
    pub fn new(name: impl Into<String>, request: Request, response: Response) -> Self {
        Self {
            name: name.into(),
            request,
            response,
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_request(&self, request: Request) -> Self {
        Self {
            request,
            ..self.clone()
        }
    }

    pub fn with_response(&self, response: Response) -> Self {
        Self {
            response,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(endpoint: &str) -> Request {
        Request::new(RequestInput {
            method: Method::Get,
            endpoint: endpoint.to_string(),
            body: None,
            type_name: None,
            headers: Headers::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
        assert_eq!(
            "TRACE".parse::<Method>(),
            Err(ResourceError::UnsupportedMethod("TRACE".to_string()))
        );
        assert!(Method::Post.is_config_supported());
        assert!(!Method::Delete.is_config_supported());
    }

    #[test]
    fn test_path_name_and_query_derived_from_endpoint() {
        let req = request("/api/books?author=orwell#top");
        assert_eq!(req.path_name(), "/api/books");
        assert!(req.query().expectation().is_some());

        let req = request("/api/books");
        assert_eq!(req.path_name(), "/api/books");
        assert!(req.query().expectation().is_none());
    }

    #[test]
    fn test_endpoint_without_path_is_rejected() {
        let err = Request::new(RequestInput {
            method: Method::Get,
            endpoint: "?page=1".to_string(),
            body: None,
            type_name: None,
            headers: Headers::default(),
        })
        .unwrap_err();
        assert_eq!(
            err,
            ResourceError::NoPathName {
                endpoint: "?page=1".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_glob_matches_literally() {
        let req = request_result("/api/items[0").unwrap();
        assert_eq!(req.path_name(), "/api/items[0");
        assert!(req.matches_path("/api/items[0"));
        assert!(!req.matches_path("/api/items0"));

        let req = request_result("/api/{tag").unwrap();
        assert!(req.matches_path("/api/{tag"));
        assert!(!req.matches_path("/api/tag"));
    }

    fn request_result(endpoint: &str) -> Result<Request, ResourceError> {
        Request::new(RequestInput {
            method: Method::Get,
            endpoint: endpoint.to_string(),
            body: None,
            type_name: None,
            headers: Headers::default(),
        })
    }

    #[test]
    fn test_wildcard_path_matching() {
        let req = request("/api/books/*");
        assert!(req.matches_path("/api/books/123"));
        assert!(!req.matches_path("/api/authors/1"));
    }

    #[test]
    fn test_with_endpoint_builds_new_request() {
        let original = request("/api/books?page=1");
        let moved = original.with_endpoint("/api/authors").unwrap();

        assert_eq!(original.endpoint(), "/api/books?page=1");
        assert_eq!(moved.path_name(), "/api/authors");
        assert!(moved.query().expectation().is_none());
    }

    #[test]
    fn test_request_matches_incoming() {
        let req = request("/api/books?page=1").with_headers(Headers::from_iter([(
            "Accept",
            "application/json",
        )]));
        let headers = vec![("accept".to_string(), "application/json".to_string())];

        let incoming = IncomingRequest {
            method: Method::Get,
            path: "/api/books",
            query: Some("page=1"),
            headers: &headers,
        };
        assert!(req.matches(&incoming));

        let wrong_method = IncomingRequest {
            method: Method::Post,
            ..incoming
        };
        assert!(!req.matches(&wrong_method));

        let wrong_query = IncomingRequest {
            query: Some("page=2"),
            ..incoming
        };
        assert!(!req.matches(&wrong_query));
    }

    #[test]
    fn test_format_url() {
        let req = request("/api/books?page=1");
        assert_eq!(
            req.format_url("http://localhost:4000/"),
            "http://localhost:4000/api/books?page=1"
        );
    }

    #[test]
    fn test_response_helpers_leave_original_untouched() {
        let response = Response::new(200, Some(json!("hello")), None, Headers::default());
        let changed = response.with_code(404).with_body(None);

        assert_eq!(response.code, 200);
        assert_eq!(response.body, Some(json!("hello")));
        assert_eq!(changed.code, 404);
        assert_eq!(changed.body, None);
    }

    #[test]
    fn test_resource_serializes_request_fields() {
        let resource = Resource::new(
            "Books [0]",
            request("/api/books").with_type(Some("Book".to_string())),
            Response::new(200, None, None, Headers::default()),
        );
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["name"], "Books [0]");
        assert_eq!(json["request"]["method"], "GET");
        assert_eq!(json["request"]["type"], "Book");
        assert_eq!(json["response"]["code"], 200);
    }
}
