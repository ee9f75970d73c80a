//! Rewrite strategies: turn an original URL into the URL served by a node
//!
//! Every function here is pure and total. Whenever a rewrite cannot produce a well-formed
//! URL the original is returned unchanged.

use tracing::trace;
use url::{Position, Url};

use crate::models::{Node, Strategy};
use crate::utils::is_websocket;

/// Substitute URL for `original` when served through `node`
pub fn rewrite(original: &str, node: &Node) -> String {
    let parsed = match Url::parse(original) {
        Ok(url) => url,
        Err(_) => return original.to_string(),
    };

    let rewritten = if is_websocket(&parsed) {
        node.ws_endpoint
            .as_deref()
            .and_then(|ws| replace_origin(&parsed, ws))
    } else if !matches!(parsed.scheme(), "http" | "https") {
        None
    } else {
        match node.strategy {
            Strategy::Mirror => mirror(&parsed, &node.endpoint),
            Strategy::Proxy => proxy(original, &node.endpoint),
            Strategy::CdnRewrite => replace_origin(&parsed, &node.endpoint),
            Strategy::Unsupported => None,
        }
    };

    match rewritten {
        Some(url) => {
            trace!("Rewrote {} -> {} via {}", original, url, node.id);
            url
        }
        None => original.to_string(),
    }
}

/// Scheme and authority come from the endpoint, its path is a prefix to the original path.
/// Query and fragment stay; the original userinfo is never carried over.
fn mirror(original: &Url, endpoint: &str) -> Option<String> {
    let mut url = Url::parse(endpoint).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    let path = format!("{}{}", url.path().trim_end_matches('/'), original.path());
    url.set_path(&path);
    url.set_query(original.query());
    url.set_fragment(original.fragment());
    Some(url.to_string())
}

/// `<endpoint>/proxy?target=<percent-encoded original>`
fn proxy(original: &str, endpoint: &str) -> Option<String> {
    let target: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
    well_formed(format!("{}/proxy?target={}", endpoint.trim_end_matches('/'), target))
}

/// Replace the leading `scheme://authority` with `base`, keeping path, query and fragment
fn replace_origin(original: &Url, base: &str) -> Option<String> {
    well_formed(format!(
        "{}{}",
        base.trim_end_matches('/'),
        &original[Position::BeforePath..]
    ))
}

fn well_formed(candidate: String) -> Option<String> {
    Url::parse(&candidate).ok().map(|_| candidate)
}
