//! Static route table for the gateway.
//!
//! # Responsibilities
//! - Compile `(method, path pattern) → rpc method` entries at startup
//! - Reject ambiguous patterns and unknown RPC methods before serving
//! - Resolve a request to an entry plus bound path parameters
//!
//! # Design Decisions
//! - Patterns are `/`-separated literals and `{name}` parameters
//! - Two entries are ambiguous when some concrete path matches both
//! - Immutable after construction, shared without locks
//! - O(n) scan; route tables are small

use std::collections::HashSet;

use axum::http::Method;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::config::RouteConfig;
use crate::rpc::MethodTable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("route {route}: invalid HTTP method {method:?}")]
    Method { route: String, method: String },

    #[error("route {route}: {reason}")]
    Pattern { route: String, reason: String },

    #[error("route {route}: body binding must be \"*\" or absent, got {body:?}")]
    Body { route: String, body: String },

    #[error("route {route}: unknown RPC method {rpc}")]
    UnknownMethod { route: String, rpc: String },

    #[error("route {route}: no field mapping for RPC method {rpc}")]
    NoBinding { route: String, rpc: String },

    #[error("routes {first} and {second} match the same requests")]
    Ambiguous { first: String, second: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled path pattern such as `/v1/echo/{value}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| format!("pattern {raw:?} must start with '/'"))?;

        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for part in rest.split('/') {
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let valid = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid {
                    return Err(format!("invalid parameter name {name:?} in {raw:?}"));
                }
                if !seen.insert(name.to_string()) {
                    return Err(format!("parameter {name:?} repeated in {raw:?}"));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains(['{', '}']) {
                return Err(format!("malformed segment {part:?} in {raw:?}"));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match a request path, returning the decoded parameters.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.push((name.clone(), decode_segment(part))),
            }
        }
        Some(params)
    }

    /// Whether some concrete path matches both patterns.
    pub fn overlaps(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

/// How the request body feeds the RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyBinding {
    /// Body is ignored.
    None,
    /// The whole JSON object maps onto the request message.
    Whole,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub pattern: PathPattern,
    /// "/package.Service/Method"
    pub rpc: String,
    pub body: BodyBinding,
}

impl RouteEntry {
    /// "GET /v1/echo/{value}"
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.pattern.as_str())
    }
}

/// A resolved request.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Compile routes against the served methods.
    ///
    /// `has_binding` reports whether the gateway can translate a method.
    pub fn build(
        routes: &[RouteConfig],
        methods: &MethodTable,
        has_binding: impl Fn(&str) -> bool,
    ) -> Result<Self, RouteError> {
        let mut entries: Vec<RouteEntry> = Vec::with_capacity(routes.len());

        for route in routes {
            let label = format!("{} {}", route.method, route.path);
            let method = route
                .method
                .to_ascii_uppercase()
                .parse::<Method>()
                .map_err(|_| RouteError::Method {
                    route: label.clone(),
                    method: route.method.clone(),
                })?;
            let pattern = PathPattern::parse(&route.path).map_err(|reason| RouteError::Pattern {
                route: label.clone(),
                reason,
            })?;
            let body = match route.body.as_deref() {
                None => BodyBinding::None,
                Some("*") => BodyBinding::Whole,
                Some(other) => {
                    return Err(RouteError::Body {
                        route: label,
                        body: other.to_string(),
                    })
                }
            };

            let rpc = normalize_rpc(&route.rpc);
            if methods.get(&rpc).is_none() {
                return Err(RouteError::UnknownMethod { route: label, rpc });
            }
            if !has_binding(&rpc) {
                return Err(RouteError::NoBinding { route: label, rpc });
            }

            let entry = RouteEntry {
                method,
                pattern,
                rpc,
                body,
            };
            if let Some(existing) = entries
                .iter()
                .find(|e| e.method == entry.method && e.pattern.overlaps(&entry.pattern))
            {
                return Err(RouteError::Ambiguous {
                    first: existing.label(),
                    second: entry.label(),
                });
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.entries
            .iter()
            .filter(|e| &e.method == method)
            .find_map(|entry| {
                entry
                    .pattern
                    .matches(path)
                    .map(|params| RouteMatch { entry, params })
            })
    }

    /// Methods of every entry whose pattern matches `path`.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for entry in &self.entries {
            if !methods.contains(&entry.method) && entry.pattern.matches(path).is_some() {
                methods.push(entry.method.clone());
            }
        }
        methods
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

/// Accept both "pkg.Svc/Method" and "/pkg.Svc/Method".
fn normalize_rpc(rpc: &str) -> String {
    if rpc.starts_with('/') {
        rpc.to_string()
    } else {
        format!("/{rpc}")
    }
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::rpc::standard_methods;

    fn route(method: &str, path: &str) -> RouteConfig {
        RouteConfig {
            method: method.into(),
            path: path.into(),
            rpc: "echo.EchoService/Echo".into(),
            body: None,
        }
    }

    fn build(routes: &[RouteConfig]) -> Result<RouteTable, RouteError> {
        let methods = standard_methods(false).unwrap();
        RouteTable::build(routes, &methods, |_| true)
    }

    #[test]
    fn default_routes_compile_and_resolve() {
        let table = build(&GatewayConfig::default().routes).unwrap();

        let post = table.resolve(&Method::POST, "/v1/echo").unwrap();
        assert_eq!(post.entry.rpc, "/echo.EchoService/Echo");
        assert_eq!(post.entry.body, BodyBinding::Whole);
        assert!(post.params.is_empty());

        let get = table.resolve(&Method::GET, "/v1/echo/ping").unwrap();
        assert_eq!(get.params, vec![("value".to_string(), "ping".to_string())]);

        assert!(table.resolve(&Method::GET, "/v1/echo").is_none());
        assert!(table.resolve(&Method::DELETE, "/v1/echo/ping").is_none());
    }

    #[test]
    fn params_are_percent_decoded() {
        let pattern = PathPattern::parse("/v1/echo/{value}").unwrap();
        let params = pattern.matches("/v1/echo/hello%20world").unwrap();
        assert_eq!(params[0].1, "hello world");
        assert!(pattern.matches("/v1/echo/").is_none());
        assert!(pattern.matches("/v1/echo/a/b").is_none());
    }

    #[test]
    fn allowed_methods_for_known_paths() {
        let table = build(&GatewayConfig::default().routes).unwrap();
        assert_eq!(table.allowed_methods("/v1/echo"), vec![Method::POST]);
        assert_eq!(table.allowed_methods("/v1/echo/x"), vec![Method::GET]);
        assert!(table.allowed_methods("/v2/echo").is_empty());
    }

    #[test]
    fn malformed_escapes_bind_verbatim() {
        let pattern = PathPattern::parse("/v1/echo/{value}").unwrap();
        assert_eq!(pattern.matches("/v1/echo/%+a").unwrap()[0].1, "%+a");
        assert_eq!(pattern.matches("/v1/echo/100%").unwrap()[0].1, "100%");
        assert_eq!(pattern.matches("/v1/echo/%E2%9C%93").unwrap()[0].1, "✓");
    }

    #[test]
    fn identical_routes_are_ambiguous() {
        let err = build(&[route("GET", "/v1/echo/{value}"), route("GET", "/v1/echo/{other}")])
            .unwrap_err();
        assert!(matches!(err, RouteError::Ambiguous { .. }));
    }

    #[test]
    fn literal_and_param_overlap() {
        let err = build(&[route("GET", "/v1/echo/{value}"), route("GET", "/v1/echo/fixed")])
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::Ambiguous {
                first: "GET /v1/echo/{value}".into(),
                second: "GET /v1/echo/fixed".into(),
            }
        );
    }

    #[test]
    fn distinct_routes_coexist() {
        let table = build(&[
            route("GET", "/v1/echo/{value}"),
            route("POST", "/v1/echo/{value}"),
            route("GET", "/v1/other/{value}"),
            route("GET", "/v1/echo/{value}/more"),
        ])
        .unwrap();
        assert_eq!(table.entries().len(), 4);
    }

    #[test]
    fn unknown_rpc_method_rejected() {
        let mut bad = route("GET", "/v1/hello");
        bad.rpc = "echo.EchoService/Hello".into();
        assert_eq!(
            build(&[bad]).unwrap_err(),
            RouteError::UnknownMethod {
                route: "GET /v1/hello".into(),
                rpc: "/echo.EchoService/Hello".into(),
            }
        );
    }

    #[test]
    fn untranslatable_method_rejected() {
        let methods = standard_methods(false).unwrap();
        let err = RouteTable::build(&[route("GET", "/v1/x")], &methods, |_| false).unwrap_err();
        assert!(matches!(err, RouteError::NoBinding { .. }));
    }

    #[test]
    fn malformed_patterns_rejected() {
        assert!(PathPattern::parse("v1/echo").is_err());
        assert!(PathPattern::parse("/v1/{}").is_err());
        assert!(PathPattern::parse("/v1/{a}/{a}").is_err());
        assert!(PathPattern::parse("/v1/x{a}").is_err());
    }
}
