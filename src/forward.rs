//! Port-forward bookkeeping: an in-memory `serial -> local -> remote` table,
//! device-scoped so it always operates on the session's resolved device.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::AdbError;
use crate::response::Response;
use crate::router::{handler, HandlerCtx, Router};

#[derive(Default)]
pub struct ForwardService {
    table: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ForwardService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let svc = Arc::clone(self);
        router.add_device_route(
            "forward:norebind:<spec>",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.device.unwrap().serial;
                    let (local, remote) = parse_spec(&ctx.params["spec"])?;
                    svc.add(&serial, &local, &remote, false).await?;
                    Ok(Response::ok_raw(b"OKAY".to_vec()))
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_device_route(
            "forward:<spec>",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.device.unwrap().serial;
                    let (local, remote) = parse_spec(&ctx.params["spec"])?;
                    svc.add(&serial, &local, &remote, true).await?;
                    Ok(Response::ok_raw(b"OKAY".to_vec()))
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_device_route(
            "killforward-all",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.device.unwrap().serial;
                    svc.clear(&serial).await;
                    Ok(Response::ok())
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_device_route(
            "killforward:<local>",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.device.unwrap().serial;
                    svc.remove(&serial, &ctx.params["local"]).await;
                    Ok(Response::ok())
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_device_route(
            "list-forward",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.device.unwrap().serial;
                    let body = svc.list(&serial).await;
                    Ok(Response::ok_with(body))
                }
            }),
        );
    }

    async fn add(&self, serial: &str, local: &str, remote: &str, rebind_ok: bool) -> Result<(), AdbError> {
        let mut table = self.table.write().await;
        let entry = table.entry(serial.to_string()).or_default();
        if !rebind_ok && entry.contains_key(local) {
            return Err(AdbError::CannotRebind);
        }
        entry.insert(local.to_string(), remote.to_string());
        Ok(())
    }

    async fn remove(&self, serial: &str, local: &str) {
        if let Some(entry) = self.table.write().await.get_mut(serial) {
            entry.remove(local);
        }
    }

    async fn clear(&self, serial: &str) {
        self.table.write().await.remove(serial);
    }

    async fn list(&self, serial: &str) -> String {
        let table = self.table.read().await;
        let mut out = String::new();
        if let Some(entry) = table.get(serial) {
            for (local, remote) in entry {
                out.push_str(&format!("{serial} {local} {remote}\n"));
            }
        }
        out
    }
}

fn parse_spec(spec: &str) -> Result<(String, String), AdbError> {
    spec.split_once(';')
        .map(|(l, r)| (l.to_string(), r.to_string()))
        .ok_or_else(|| AdbError::Protocol(format!("malformed forward spec: {spec}")))
}
