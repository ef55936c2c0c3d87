//! Contract Mock
//!
//! Compiles declarative resource configurations into matchable
//! request/response pairs, for contract testing a service against its
//! consumers and for serving a mock of it.
//!
//! # Features
//!
//! - **Two Modes**: Test mode for contract checks, serve mode for mocking
//! - **Endpoint Expansion**: One entry with several endpoints becomes one resource per endpoint
//! - **Body Fixtures**: Inline bodies or JSON files relative to the config file
//! - **Type Checks**: Bodies are checked against named types by an injected validator
//! - **Request Matching**: Match by method, path glob, query and headers
//!
//! # Example Configuration
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
//!       ISBN: "9780141187761"
//!       author: George Orwell
//!       title: 1984 Nineteen Eighty-Four
//! ```

pub mod body;
pub mod config;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod matcher;
pub mod metrics;
pub mod resource;
pub mod types;

pub use config::{validate_raw_config, Diagnostic, DiagnosticKind, Mode, ValidatedConfig};
pub use error::{LoadError, LoadErrorKind, TypeFailure};
pub use loader::{load_config, ConfigLoader, LoadedConfig, NoTransform, TransformResources};
pub use matcher::{find_resource, Headers, Query};
pub use resource::{IncomingRequest, Method, Request, Resource, Response};
pub use types::{GetTypeValidator, NoTypeChecks, Problem, ProblemContext, TypeValidator};
