//! Pattern-based request router: matches a textual smart-socket request
//! against registered `(pattern, handler)` entries and resolves the device
//! a device-scoped route should receive.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::device::{Device, DeviceRegistry};
use crate::error::{AdbError, AdbResult};
use crate::response::Response;
use crate::session::Session;

pub type ParamMap = HashMap<String, String>;

/// Arguments passed to every handler: the owning session, the resolved
/// device for device-scoped routes, and the captured pattern parameters.
pub struct HandlerCtx {
    pub session: Arc<Session>,
    pub device: Option<Device>,
    pub params: ParamMap,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = AdbResult<Response>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(HandlerCtx) -> HandlerFuture + Send + Sync>;

/// Box an `async fn(HandlerCtx) -> AdbResult<Response>`-shaped closure into a
/// `HandlerFn`, the way the closures captured by each service are stored.
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(HandlerCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AdbResult<Response>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)) as HandlerFuture)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    Host,
    Device { prefix_only: bool },
}

pub struct Route {
    pub pattern: String,
    pub kind: RouteKind,
    pub handler: HandlerFn,
}

enum Token {
    Literal(String),
    Param(String),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    let mut literal = String::new();
    while let Some(c) = chars.next() {
        if c == '<' {
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            let mut name = String::new();
            for c2 in chars.by_ref() {
                if c2 == '>' {
                    break;
                }
                name.push(c2);
            }
            tokens.push(Token::Param(name));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Match `payload` against `pattern`, anchored at both ends. Each `<name>`
/// placeholder captures a greedy, non-empty run of characters up to the next
/// literal character (or to end-of-input if it is the final token).
fn match_pattern(pattern: &str, payload: &str) -> Option<ParamMap> {
    let tokens = tokenize(pattern);
    let mut pos = 0usize;
    let mut params = ParamMap::new();

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(lit) => {
                if !payload[pos..].starts_with(lit.as_str()) {
                    return None;
                }
                pos += lit.len();
            }
            Token::Param(name) => {
                let next_literal_first_char = tokens.get(i + 1).and_then(|t| match t {
                    Token::Literal(l) if !l.is_empty() => l.chars().next(),
                    _ => None,
                });
                let remaining = &payload[pos..];
                let end = match next_literal_first_char {
                    Some(c) => remaining.find(c).unwrap_or(remaining.len()),
                    None => remaining.len(),
                };
                if end == 0 {
                    return None;
                }
                params.insert(name.clone(), remaining[..end].to_string());
                pos += end;
            }
        }
    }

    if pos == payload.len() {
        Some(params)
    } else {
        None
    }
}

/// Ordered collection of routes. Always kept sorted longest-pattern-first
/// (registration order breaks ties) so matching never has to sort.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    warned_fallback: AtomicBool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, pattern: impl Into<String>, kind: RouteKind, handler: HandlerFn) {
        self.routes.push(Route {
            pattern: pattern.into(),
            kind,
            handler,
        });
        self.routes
            .sort_by_key(|r| std::cmp::Reverse(r.pattern.len()));
    }

    pub fn add_host_route(&mut self, pattern: impl Into<String>, handler: HandlerFn) {
        self.add_route(pattern, RouteKind::Host, handler);
    }

    pub fn add_device_route(
        &mut self,
        pattern: impl Into<String>,
        prefix_only: bool,
        handler: HandlerFn,
    ) {
        self.add_route(pattern, RouteKind::Device { prefix_only }, handler);
    }

    fn find_once(&self, payload: &str) -> Option<(&Route, ParamMap)> {
        self.routes
            .iter()
            .find_map(|r| match_pattern(&r.pattern, payload).map(|p| (r, p)))
    }

    /// Find the route matching `payload`, trying the `host:`-stripped
    /// compatibility fallback if nothing matches directly.
    pub fn find(&self, payload: &str) -> Option<(&Route, ParamMap)> {
        if let Some(found) = self.find_once(payload) {
            return Some(found);
        }
        if let Some(suffix) = payload.strip_prefix("host:") {
            if let Some(found) = self.find_once(suffix) {
                if !self.warned_fallback.swap(true, Ordering::Relaxed) {
                    warn!(
                        payload = %payload,
                        "matched via host: compatibility fallback"
                    );
                }
                return Some(found);
            }
        }
        None
    }
}

/// Resolve the device a device-scoped route should receive, per the order:
/// request-bound device (from `host-serial:`), then the session's
/// persistently selected device, then (unless `prefix_only`) the sole
/// available device.
pub async fn resolve_device(
    prefix_only: bool,
    bound: Option<Device>,
    session_id: &str,
    registry: &dyn DeviceRegistry,
) -> AdbResult<Device> {
    if let Some(device) = bound {
        return Ok(device);
    }
    if let Some(device) = registry.get_selected(session_id).await {
        return Ok(device);
    }
    if prefix_only {
        return Err(AdbError::NoDeviceSpecified);
    }
    let mut devices = registry.list().await;
    if devices.is_empty() {
        return Err(AdbError::NoDeviceAvailable);
    }
    Ok(devices.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_literal_only() {
        let params = match_pattern("host:version", "host:version").unwrap();
        assert!(params.is_empty());
        assert!(match_pattern("host:version", "host:versionX").is_none());
        assert!(match_pattern("host:version", "host:versio").is_none());
    }

    #[test]
    fn test_match_trailing_param() {
        let params = match_pattern("host:transport:<serial>", "host:transport:fake-5554").unwrap();
        assert_eq!(params.get("serial").unwrap(), "fake-5554");
    }

    #[test]
    fn test_match_param_then_literal() {
        let params =
            match_pattern("host-serial:<serial>:<inner>", "host-serial:fake-5554:host:devices")
                .unwrap();
        assert_eq!(params.get("serial").unwrap(), "fake-5554");
        assert_eq!(params.get("inner").unwrap(), "host:devices");
    }

    #[test]
    fn test_match_empty_param_rejected() {
        assert!(match_pattern("host:transport:<serial>", "host:transport:").is_none());
    }

    #[test]
    fn test_longest_pattern_wins() {
        let mut router = Router::new();
        router.add_host_route("host:<x>", handler(|_ctx| async { Ok(Response::ok()) }));
        router.add_host_route(
            "host:transport-any",
            handler(|_ctx| async { Ok(Response::ok_with("any")) }),
        );
        let (route, _) = router.find("host:transport-any").unwrap();
        assert_eq!(route.pattern, "host:transport-any");
    }

    #[test]
    fn test_registration_order_tiebreak() {
        let mut router = Router::new();
        router.add_host_route("host:<a>", handler(|_ctx| async { Ok(Response::ok_with("first")) }));
        router.add_host_route("host:<b>", handler(|_ctx| async { Ok(Response::ok_with("second")) }));
        let (route, params) = router.find("host:kill").unwrap();
        assert_eq!(route.pattern, "host:<a>");
        assert_eq!(params.get("a").unwrap(), "kill");
    }

    #[test]
    fn test_host_prefix_fallback() {
        let mut router = Router::new();
        router.add_host_route("version", handler(|_ctx| async { Ok(Response::ok()) }));
        let (route, _) = router.find("host:version").unwrap();
        assert_eq!(route.pattern, "version");
    }

    #[test]
    fn test_no_match() {
        let router = Router::new();
        assert!(router.find("bogus:thing").is_none());
    }
}
