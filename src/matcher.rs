//! Request matching logic.
//!
//! Matches incoming query strings and headers against the expectations
//! carried by configured resources. Every predicate here is a pure function
//! of its inputs and may be called from any number of handlers at once.

use crate::resource::{IncomingRequest, Resource};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A decoded query string. Repeated keys keep every value in order.
pub type ParsedQuery = BTreeMap<String, Vec<String>>;

/// Parse a query string into key to values pairs.
pub fn parse_query_string(query: &str) -> ParsedQuery {
    let mut params = ParsedQuery::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Compare an expected query against a received one.
///
/// Every expected key must be present, and its received values must equal
/// the expected values regardless of order. Keys the expectation does not
/// mention are ignored.
pub fn compare_query(expected: &ParsedQuery, received: &ParsedQuery) -> bool {
    expected.iter().all(|(key, values)| {
        received
            .get(key)
            .is_some_and(|received_values| same_values(values, received_values))
    })
}

fn same_values(expected: &[String], received: &[String]) -> bool {
    let mut expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    let mut received: Vec<&str> = received.iter().map(String::as_str).collect();
    expected.sort_unstable();
    received.sort_unstable();
    expected == received
}

/// Query expectation of a configured request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    expected: Option<ParsedQuery>,
}

impl Query {
    /// `None` means the endpoint had no query string, which matches anything.
    pub fn parse(query_string: Option<&str>) -> Self {
        Self {
            expected: query_string.map(parse_query_string),
        }
    }

    pub fn expectation(&self) -> Option<&ParsedQuery> {
        self.expected.as_ref()
    }

    pub fn matches(&self, received: &ParsedQuery) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => compare_query(expected, received),
        }
    }

    pub fn matches_query_string(&self, received: Option<&str>) -> bool {
        match &self.expected {
            None => true,
            Some(expected) => compare_query(expected, &parse_query_string(received.unwrap_or(""))),
        }
    }
}

/// Expected headers, compared case-insensitively by name.
///
/// An expected value containing a comma is a list of tokens that must all be
/// present among the received values for that header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Look up an expected value by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| k.to_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }

    /// All expectations, with names as configured.
    pub fn get_all(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check received headers against every expectation. A header sent more
    /// than once appears as several pairs with the same name.
    pub fn matches<I, K, V>(&self, received: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if self.entries.is_empty() {
            return true;
        }

        let mut received_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in received {
            received_by_name
                .entry(name.as_ref().to_lowercase())
                .or_default()
                .push(value.as_ref().to_string());
        }

        self.entries.iter().all(|(name, expected)| {
            let Some(received) = received_by_name.get(&name.to_lowercase()) else {
                return false;
            };

            if expected.contains(',') {
                expected
                    .split(',')
                    .map(str::trim)
                    .all(|token| received.iter().any(|r| r == token))
            } else {
                received.iter().any(|r| r == expected)
            }
        })
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self::new(entries)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Find the first resource, in configuration order, that answers a request.
pub fn find_resource<'a>(
    resources: &'a [Resource],
    incoming: &IncomingRequest<'_>,
) -> Option<&'a Resource> {
    resources
        .iter()
        .find(|resource| resource.request.matches(incoming))
}
