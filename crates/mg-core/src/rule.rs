//! Rule algebra over HTTP requests and TCP contexts.
//!
//! One composable tree with tagged leaf variants: an HTTP predicate applied
//! to a TCP context evaluates to false (and vice versa), never panics.
//! Combinators short-circuit left to right in registration order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use hyper::{Body, Request};
use regex::Regex;

use crate::minecraft;
use crate::tcp::{ConnProtocol, TcpContext};

/// Synchronous predicate over an HTTP request.
pub type HttpPredicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

/// Asynchronous predicate over a TCP dispatch context. Implementations may
/// peek the stream (non-consuming) but must not otherwise mutate it.
#[async_trait]
pub trait TcpRuleMatch: Send + Sync {
    async fn matches(&self, ctx: &TcpContext) -> bool;
}

/// A composable routing predicate.
#[derive(Clone)]
pub enum Rule {
    /// Matches everything, in both variants.
    Any,
    /// Conjunction; empty means true.
    All(Vec<Rule>),
    /// Disjunction; empty means false.
    Either(Vec<Rule>),
    /// Negation.
    Negate(Box<Rule>),
    /// HTTP-variant leaf.
    Http(HttpPredicate),
    /// TCP-variant leaf.
    Tcp(Arc<dyn TcpRuleMatch>),
}

impl Rule {
    /// Evaluate against an HTTP request. TCP leaves are foreign here and
    /// evaluate to false.
    pub fn matches_http(&self, req: &Request<Body>) -> bool {
        match self {
            Rule::Any => true,
            Rule::All(rules) => rules.iter().all(|r| r.matches_http(req)),
            Rule::Either(rules) => rules.iter().any(|r| r.matches_http(req)),
            Rule::Negate(rule) => !rule.matches_http(req),
            Rule::Http(pred) => pred(req),
            Rule::Tcp(_) => false,
        }
    }

    /// Evaluate against a TCP context. HTTP leaves are foreign here and
    /// evaluate to false.
    pub fn matches_tcp<'a>(&'a self, ctx: &'a TcpContext) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self {
                Rule::Any => true,
                Rule::All(rules) => {
                    for rule in rules {
                        if !rule.matches_tcp(ctx).await {
                            return false;
                        }
                    }
                    true
                }
                Rule::Either(rules) => {
                    for rule in rules {
                        if rule.matches_tcp(ctx).await {
                            return true;
                        }
                    }
                    false
                }
                Rule::Negate(rule) => !rule.matches_tcp(ctx).await,
                Rule::Http(_) => false,
                Rule::Tcp(matcher) => matcher.matches(ctx).await,
            }
        })
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Any => f.write_str("Any"),
            Rule::All(rules) => f.debug_tuple("All").field(rules).finish(),
            Rule::Either(rules) => f.debug_tuple("Either").field(rules).finish(),
            Rule::Negate(rule) => f.debug_tuple("Negate").field(rule).finish(),
            Rule::Http(_) => f.write_str("Http(..)"),
            Rule::Tcp(_) => f.write_str("Tcp(..)"),
        }
    }
}

/// Matches every input.
pub fn any() -> Rule {
    Rule::Any
}

/// All rules must match.
pub fn and(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::All(rules.into_iter().collect())
}

/// At least one rule must match.
pub fn or(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Either(rules.into_iter().collect())
}

/// Inverts a rule.
pub fn not(rule: Rule) -> Rule {
    Rule::Negate(Box::new(rule))
}

/// HTTP: exact host match against the request's authority or Host header.
pub fn host(host: impl Into<String>) -> Rule {
    let host = host.into();
    Rule::Http(Arc::new(move |req| {
        crate::http::request_host(req) == Some(host.as_str())
    }))
}

/// HTTP: request path starts with `prefix`.
pub fn path_prefix(prefix: impl Into<String>) -> Rule {
    let prefix = prefix.into();
    Rule::Http(Arc::new(move |req| req.uri().path().starts_with(&prefix)))
}

/// HTTP: exact path match.
pub fn path(path: impl Into<String>) -> Rule {
    let path = path.into();
    Rule::Http(Arc::new(move |req| req.uri().path() == path))
}

/// HTTP: request path matches the pattern. An invalid pattern is absorbed
/// into a predicate that never matches.
pub fn path_regexp(pattern: &str) -> Rule {
    match Regex::new(pattern) {
        Ok(re) => Rule::Http(Arc::new(move |req| re.is_match(req.uri().path()))),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid path regexp, rule will never match");
            Rule::Http(Arc::new(|_| false))
        }
    }
}

/// HTTP: exact method match.
pub fn method(method: impl Into<String>) -> Rule {
    let method = method.into();
    Rule::Http(Arc::new(move |req| req.method().as_str() == method))
}

struct HostSni {
    name: String,
}

#[async_trait]
impl TcpRuleMatch for HostSni {
    async fn matches(&self, ctx: &TcpContext) -> bool {
        ctx.protocol() == ConnProtocol::Tls && ctx.sni() == self.name
    }
}

/// TCP: the stream is TLS and its SNI equals `name`.
pub fn host_sni(name: impl Into<String>) -> Rule {
    Rule::Tcp(Arc::new(HostSni { name: name.into() }))
}

/// TCP: Minecraft handshake requests one of `hosts`.
pub fn host_minecraft<I, S>(hosts: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rule::Tcp(Arc::new(minecraft::HostMinecraft {
        hosts: hosts.into_iter().map(Into::into).collect(),
    }))
}

/// TCP: Minecraft LoginStart username is one of `players` (permissive until
/// a LoginStart arrives).
pub fn player_minecraft<I, S>(players: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rule::Tcp(Arc::new(minecraft::PlayerMinecraft {
        players: players.into_iter().map(Into::into).collect(),
        negate: false,
    }))
}

/// TCP: negation of [`player_minecraft`] for the LoginStart case.
pub fn not_player_minecraft<I, S>(players: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rule::Tcp(Arc::new(minecraft::PlayerMinecraft {
        players: players.into_iter().map(Into::into).collect(),
        negate: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, uri: &str, host_header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(h) = host_header {
            builder = builder.header(hyper::header::HOST, h);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn http_predicates_match_request_fields() {
        let req = request("GET", "/api/v1/users?id=3", Some("example.test"));

        assert!(host("example.test").matches_http(&req));
        assert!(!host("other.test").matches_http(&req));
        assert!(path_prefix("/api").matches_http(&req));
        assert!(path("/api/v1/users").matches_http(&req));
        assert!(!path("/api").matches_http(&req));
        assert!(method("GET").matches_http(&req));
        assert!(!method("POST").matches_http(&req));
        assert!(path_regexp("^/api/v[0-9]+/").matches_http(&req));
    }

    #[test]
    fn invalid_regexp_becomes_never_match() {
        let rule = path_regexp("([unclosed");
        let req = request("GET", "/anything", None);
        assert!(!rule.matches_http(&req));
    }

    #[test]
    fn combinator_laws() {
        let req = request("GET", "/a/b", None);
        let t = path_prefix("/a");
        let f = path_prefix("/z");

        // Or(a,b) == a || b; And likewise; Not inverts; Any always true.
        assert!(or([t.clone(), f.clone()]).matches_http(&req));
        assert!(or([f.clone(), t.clone()]).matches_http(&req));
        assert!(!or([f.clone(), f.clone()]).matches_http(&req));
        assert!(and([t.clone(), t.clone()]).matches_http(&req));
        assert!(!and([t.clone(), f.clone()]).matches_http(&req));
        assert!(not(f.clone()).matches_http(&req));
        assert!(!not(t.clone()).matches_http(&req));
        assert!(any().matches_http(&req));

        // Empty conjunction is true, empty disjunction false.
        assert!(and([]).matches_http(&req));
        assert!(!or([]).matches_http(&req));
    }

    #[test]
    fn tcp_leaf_is_false_for_http_input() {
        let req = request("GET", "/", None);
        assert!(!host_sni("mc.example").matches_http(&req));
        assert!(!host_minecraft(["mc.example"]).matches_http(&req));
        // ...even under combinators.
        assert!(!and([any(), host_sni("mc.example")]).matches_http(&req));
        assert!(or([any(), host_sni("mc.example")]).matches_http(&req));
    }
}
