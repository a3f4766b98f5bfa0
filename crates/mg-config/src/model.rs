//! Serde model of the muxgate YAML configuration.
//!
//! ```yaml
//! entrypoints:
//!   web: ":80"
//!   web-secure: ":443"
//! http:
//!   routes:
//!     files:
//!       rule: PathPrefix(`/files`)
//!       service: file-server
//!       middlewares:
//!         - StripPrefix(`/files`)
//!       entrypoints: [web]
//!   services:
//!     file-server:
//!       reverse-proxy: "http://127.0.0.1:9000"
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub entrypoints: BTreeMap<String, String>,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub rule: String,
    pub service: String,
    #[serde(default)]
    pub middlewares: Vec<String>,
    #[serde(default)]
    pub entrypoints: Vec<String>,
    #[serde(default)]
    pub tls: Option<RouteTls>,
}

/// Certificate material terminating TLS for the route's entrypoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTls {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "reverse-proxy", default)]
    pub reverse_proxy: Option<String>,
    #[serde(rename = "load-balancer", default)]
    pub load_balancer: Option<LoadBalancerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub services: Vec<LoadBalancerTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerTarget {
    #[serde(rename = "reverse-proxy")]
    pub reverse_proxy: String,
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<Config, crate::rule_expr::ParseError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| crate::rule_expr::ParseError::Config(format!("{}: {e}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|e| crate::rule_expr::ParseError::Config(format!("{}: {e}", path.display())))
}

/// Parse a listen address; a bare `:port` binds all interfaces.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, crate::rule_expr::ParseError> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| crate::rule_expr::ParseError::Config(format!("bad address {addr:?}: {e}")))
}
