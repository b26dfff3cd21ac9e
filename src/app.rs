//! Ties the router to a device registry: strips the `host-serial:<serial>:`
//! prefix, resolves device-scoped routes, and shields the server from
//! handler panics.

use std::sync::Arc;

use tracing::error;

use crate::device::{Device, DeviceRegistry};
use crate::error::AdbError;
use crate::response::Response;
use crate::router::{resolve_device, HandlerCtx, RouteKind, Router};
use crate::session::Session;

pub struct App {
    pub router: Router,
    pub device_registry: Arc<dyn DeviceRegistry>,
}

impl App {
    pub fn new(device_registry: Arc<dyn DeviceRegistry>) -> Self {
        App {
            router: Router::new(),
            device_registry,
        }
    }

    /// Strip a leading `host-serial:<serial>:` prefix, resolving `serial`
    /// against the registry and binding it to this request only.
    async fn strip_host_serial(&self, payload: &str) -> Result<(String, Option<Device>), AdbError> {
        if let Some(rest) = payload.strip_prefix("host-serial:") {
            if let Some(idx) = rest.find(':') {
                let serial = &rest[..idx];
                let inner = &rest[idx + 1..];
                let device = self
                    .device_registry
                    .get(serial)
                    .await
                    .ok_or_else(|| AdbError::DeviceNotFound(serial.to_string()))?;
                return Ok((inner.to_string(), Some(device)));
            }
        }
        Ok((payload.to_string(), None))
    }

    /// Run the dispatcher contract from request text to a `Response`:
    /// match the route, resolve the device, invoke the handler, and convert
    /// any handler error or panic into a `FAIL`.
    pub async fn dispatch(&self, raw_payload: &str, session: &Arc<Session>) -> Response {
        let (payload, bound_device) = match self.strip_host_serial(raw_payload).await {
            Ok(v) => v,
            Err(e) => return Response::fail(e.to_string()),
        };

        let Some((route, params)) = self.router.find(&payload) else {
            return Response::fail(AdbError::NoRoute(payload.clone()).to_string());
        };

        let device = match route.kind {
            RouteKind::Host => None,
            RouteKind::Device { prefix_only } => {
                match resolve_device(
                    prefix_only,
                    bound_device,
                    &session.id,
                    self.device_registry.as_ref(),
                )
                .await
                {
                    Ok(d) => Some(d),
                    Err(e) => return Response::fail(e.to_string()),
                }
            }
        };

        let handler = Arc::clone(&route.handler);
        let ctx = HandlerCtx {
            session: Arc::clone(session),
            device,
            params,
        };

        // Isolate handler panics in their own task so one bad handler never
        // takes the server down.
        match tokio::spawn(async move { handler(ctx).await }).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => Response::fail(e.to_string()),
            Err(join_err) => {
                error!(error = %join_err, "handler panicked");
                Response::fail("internal error")
            }
        }
    }
}
