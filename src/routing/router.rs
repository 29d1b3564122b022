//! Route lookup.
//!
//! # Responsibilities
//! - Store the service's routes in declaration order
//! - Look up the route for (method, path)
//! - Return the matched operation or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan (acceptable for typical route counts)

use std::collections::BTreeMap;

use axum::http::Method;

use super::PathPattern;

/// One (method, pattern) → operation binding.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    pub operation: &'static str,
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub operation: &'static str,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route; earlier routes win on overlap.
    pub fn route(mut self, method: Method, pattern: &str, operation: &'static str) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(pattern),
            operation,
        });
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route.pattern.matches(path).map(|params| RouteMatch {
                    operation: route.operation,
                    params,
                })
            })
    }
}
