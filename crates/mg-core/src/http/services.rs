//! Built-in terminal HTTP services.

use std::path::{Path, PathBuf};

use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use hyper::http::uri::{Authority, Scheme, Uri};
use hyper::{Body, Client, HeaderMap, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use rand::Rng;

use super::handler::{handler_fn, request_host, request_uri, SharedHandler};
use super::middlewares::{redirect_response, FORWARDED, X_FORWARDED_PROTO};

/// 301 to `https://{host}{request-uri}`.
pub fn upgrade_to_secure() -> SharedHandler {
    handler_fn(|req| async move {
        let host = request_host(&req).unwrap_or_default();
        let target = format!("https://{}{}", host, request_uri(&req));
        redirect_response(&target)
    })
}

/// 301 to a fixed URL.
pub fn redirect(url: impl Into<String>) -> SharedHandler {
    let url = url.into();
    handler_fn(move |_req| {
        let url = url.clone();
        async move { redirect_response(&url) }
    })
}

/// 301 to `{proto}://{host}{path}`, deriving the protocol from
/// `X-Forwarded-Proto`, then the `Forwarded` header, then `http`.
pub fn path_redirect(path: impl Into<String>) -> SharedHandler {
    let path = path.into();
    handler_fn(move |req| {
        let path = path.clone();
        async move {
            let proto = forwarded_protocol(req.headers());
            let host = request_host(&req).unwrap_or_default();
            redirect_response(&format!("{proto}://{host}{path}"))
        }
    })
}

fn forwarded_protocol(headers: &HeaderMap) -> &'static str {
    let proto = headers
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if proto.is_empty() {
        let forwarded = headers
            .get(FORWARDED)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if forwarded.to_ascii_lowercase().contains("proto=https") {
            return "https";
        }
    }
    if proto.eq_ignore_ascii_case("https") {
        "https"
    } else {
        "http"
    }
}

/// Uniform-random choice among handlers, per request.
pub fn http_load_balancer(targets: Vec<SharedHandler>) -> SharedHandler {
    handler_fn(move |req| {
        let target = if targets.is_empty() {
            None
        } else {
            let idx = rand::thread_rng().gen_range(0..targets.len());
            Some(targets[idx].clone())
        };
        async move {
            match target {
                Some(t) => t.serve(req).await,
                None => status_response(StatusCode::BAD_GATEWAY),
            }
        }
    })
}

/// Headers that must not travel beyond a single hop (RFC 7230 §6.1), plus
/// anything named by the Connection header itself.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    // Upgrade is hop-by-hop too; this proxy does not forward upgrades.
    headers.remove("upgrade");
}

/// Go's singleJoiningSlash: join base and request paths with exactly one
/// separating slash.
fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Single-host reverse proxy: rewrites the request URL onto `target`,
/// forwards method, headers (hop-by-hop stripped) and body, and streams the
/// upstream response back. An upstream dial failure is a 502.
pub fn http_reverse_proxy(target: impl AsRef<str>) -> SharedHandler {
    let target = target.as_ref();
    let parsed: Option<(Scheme, Authority, String)> = target
        .parse::<Uri>()
        .ok()
        .and_then(|uri| {
            let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);
            let authority = uri.authority().cloned()?;
            let base_path = match uri.path() {
                "" | "/" => String::new(),
                p => p.to_string(),
            };
            Some((scheme, authority, base_path))
        });
    if parsed.is_none() {
        tracing::warn!(upstream = %target, "invalid reverse proxy target, service will answer 502");
    }

    let client: Client<HttpConnector, Body> = Client::new();

    handler_fn(move |req| {
        let parsed = parsed.clone();
        let client = client.clone();
        async move {
            let Some((scheme, authority, base_path)) = parsed else {
                return status_response(StatusCode::BAD_GATEWAY);
            };

            let (mut parts, body) = req.into_parts();

            let path = if base_path.is_empty() {
                parts.uri.path().to_string()
            } else {
                single_joining_slash(&base_path, parts.uri.path())
            };
            let pq = match parts.uri.query() {
                Some(q) => format!("{path}?{q}"),
                None => path,
            };
            let Ok(uri) = format!("{scheme}://{authority}{pq}").parse::<Uri>() else {
                return status_response(StatusCode::BAD_GATEWAY);
            };
            parts.uri = uri;
            strip_hop_by_hop(&mut parts.headers);

            match client.request(Request::from_parts(parts, body)).await {
                Ok(mut resp) => {
                    strip_hop_by_hop(resp.headers_mut());
                    resp
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reverse proxy upstream request failed");
                    status_response(StatusCode::BAD_GATEWAY)
                }
            }
        }
    })
}

/// Serves a directory with index and single-range semantics.
pub fn file_server(dir: impl Into<PathBuf>) -> SharedHandler {
    let root = dir.into();
    handler_fn(move |req| {
        let root = root.clone();
        async move { serve_file(&root, req).await }
    })
}

async fn serve_file(root: &Path, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, "GET, HEAD")
            .body(Body::empty())
            .unwrap_or_default();
    }

    let Some(relative) = sanitize_path(req.uri().path()) else {
        return status_response(StatusCode::NOT_FOUND);
    };
    let mut full = root.join(relative);

    let mut meta = match tokio::fs::metadata(&full).await {
        Ok(m) => m,
        Err(_) => return status_response(StatusCode::NOT_FOUND),
    };
    if meta.is_dir() {
        full = full.join("index.html");
        meta = match tokio::fs::metadata(&full).await {
            Ok(m) if m.is_file() => m,
            _ => return status_response(StatusCode::NOT_FOUND),
        };
    }

    let len = meta.len();
    let mime = mime_guess::from_path(&full).first_or_octet_stream();
    let head_only = req.method() == Method::HEAD;

    let range = req
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, len));

    let (status, start, end) = match range {
        None => (StatusCode::OK, 0, len),
        Some(Some((start, end))) => (StatusCode::PARTIAL_CONTENT, start, end + 1),
        Some(None) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(CONTENT_RANGE, format!("bytes */{len}"))
                .body(Body::empty())
                .unwrap_or_default();
        }
    };

    let bytes = match tokio::fs::read(&full).await {
        Ok(b) => b,
        Err(_) => return status_response(StatusCode::NOT_FOUND),
    };
    let slice = bytes[start as usize..end as usize].to_vec();

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, mime.as_ref())
        .header("accept-ranges", "bytes")
        .header(CONTENT_LENGTH, HeaderValue::from(end - start));
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end - 1, len));
    }
    let body = if head_only {
        Body::empty()
    } else {
        Body::from(slice)
    };
    builder.body(body).unwrap_or_default()
}

/// Decode and normalize a request path into a safe relative path. Rejects
/// traversal; returns `None` for anything that would escape the root.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let mut clean = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => clean.push(s),
        }
    }
    Some(clean)
}

/// Parse a single `bytes=` range against a resource of `len` bytes.
/// Returns the inclusive (start, end) pair, or `None` when unsatisfiable.
fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        // Multiple ranges are not served.
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    if start_s.is_empty() {
        // Suffix range: last n bytes.
        let n: u64 = end_s.parse().ok()?;
        if n == 0 || len == 0 {
            return None;
        }
        let n = n.min(len);
        return Some((len - n, len - 1));
    }
    let start: u64 = start_s.parse().ok()?;
    if start >= len {
        return None;
    }
    let end = if end_s.is_empty() {
        len - 1
    } else {
        end_s.parse::<u64>().ok()?.min(len - 1)
    };
    if start > end {
        return None;
    }
    Some((start, end))
}

pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_default()
}
