//! Declarative configuration for muxgate.
//!
//! The YAML model mirrors what the reconciler consumes: entrypoints by id,
//! HTTP routes and services by id. [`diff`] computes the register/deregister
//! deltas between two configurations; [`rule_expr`] compiles the rule
//! strings found in route definitions into engine rules.

pub mod diff;
pub mod model;
pub mod rule_expr;

pub use model::{
    load_config, parse_listen_addr, Config, HttpConfig, LoadBalancerConfig, LoadBalancerTarget,
    RouteConfig, RouteTls, ServiceConfig,
};
pub use rule_expr::{parse_middleware, parse_middlewares, parse_rule, ParseError};
