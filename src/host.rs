//! Built-in `host:*` routes: version, device lists, feature negotiation and
//! transport/device selection.

use std::sync::Arc;

use crate::device::DeviceRegistry;
use crate::error::AdbError;
use crate::response::Response;
use crate::router::{handler, HandlerCtx, Router};
use crate::server::ShutdownLatch;

/// Transport ids returned by `host:tport:*`. The reference server hardcodes
/// these rather than deriving them from device state; clients only ever
/// echo the value back, so the literal is what matters, not its origin.
const TPORT_SERIAL: u64 = 1;
const TPORT_ANY: u64 = 2;

pub struct HostService {
    version: u32,
    features: String,
    device_registry: Arc<dyn DeviceRegistry>,
    shutdown: Arc<ShutdownLatch>,
}

impl HostService {
    pub fn new(
        version: u32,
        features: impl Into<String>,
        device_registry: Arc<dyn DeviceRegistry>,
        shutdown: Arc<ShutdownLatch>,
    ) -> Self {
        HostService {
            version,
            features: features.into(),
            device_registry,
            shutdown,
        }
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let svc = Arc::clone(self);
        router.add_host_route(
            "host:version",
            handler(move |_ctx| {
                let svc = Arc::clone(&svc);
                async move { Ok(Response::ok_with(format!("{:04x}", svc.version))) }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:kill",
            handler(move |_ctx| {
                let svc = Arc::clone(&svc);
                async move {
                    svc.shutdown.trigger();
                    Ok(Response::ok())
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:devices",
            handler(move |_ctx| {
                let svc = Arc::clone(&svc);
                async move {
                    let devices = svc.device_registry.list().await;
                    let mut body = String::new();
                    for d in devices {
                        body.push_str(&format!("{}\t{}\n", d.serial, d.state));
                    }
                    Ok(Response::ok_with(body))
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:devices-l",
            handler(move |_ctx| {
                let svc = Arc::clone(&svc);
                async move {
                    let devices = svc.device_registry.list().await;
                    let mut body = String::new();
                    for d in devices {
                        let props = d
                            .properties
                            .iter()
                            .map(|(k, v)| format!("{k}:{v}"))
                            .collect::<Vec<_>>()
                            .join(" ");
                        body.push_str(&format!("{:<22} {:<10} {}\n", d.serial, d.state, props));
                    }
                    Ok(Response::ok_with(body))
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:features",
            handler(move |_ctx| {
                let svc = Arc::clone(&svc);
                async move { Ok(Response::ok_with(svc.features.clone())) }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:tport:serial:<serial>",
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.params["serial"].clone();
                    svc.device_registry
                        .select(&ctx.session.id, Some(&serial))
                        .await?;
                    Ok(Response::ok_raw(TPORT_SERIAL.to_le_bytes().to_vec()).keep_alive())
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:tport:any",
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    svc.device_registry.select(&ctx.session.id, None).await?;
                    Ok(Response::ok_raw(TPORT_ANY.to_le_bytes().to_vec()).keep_alive())
                }
            }),
        );

        let svc = Arc::clone(self);
        router.add_host_route(
            "host:transport:<serial>",
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move {
                    let serial = ctx.params["serial"].clone();
                    svc.device_registry
                        .select(&ctx.session.id, Some(&serial))
                        .await?;
                    Ok(Response::ok().keep_alive())
                }
            }),
        );

        for pattern in ["host:transport-any", "host:transport-usb", "host:transport-local"] {
            let svc = Arc::clone(self);
            router.add_host_route(
                pattern,
                handler(move |ctx: HandlerCtx| {
                    let svc = Arc::clone(&svc);
                    async move { svc.select_any(&ctx).await }
                }),
            );
        }

        router.add_device_route(
            "features",
            false,
            handler(|ctx: HandlerCtx| async move {
                let device = ctx.device.unwrap();
                Ok(Response::ok_with(device.features.join(",")))
            }),
        );
    }

    async fn select_any(&self, ctx: &HandlerCtx) -> Result<Response, AdbError> {
        let devices = self.device_registry.list().await;
        if devices.is_empty() {
            return Err(AdbError::NoDevices);
        }
        if devices.len() > 1 {
            return Err(AdbError::AmbiguousDevice);
        }
        self.device_registry
            .select(&ctx.session.id, Some(&devices[0].serial))
            .await?;
        Ok(Response::ok().keep_alive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::device::{Device, DeviceState, InMemoryDeviceRegistry};

    async fn build() -> (Arc<App>, Arc<ShutdownLatch>, Arc<InMemoryDeviceRegistry>) {
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        let mut app = App::new(Arc::clone(&registry));
        let shutdown = Arc::new(ShutdownLatch::new());
        let host = Arc::new(HostService::new(
            41,
            "shell",
            Arc::clone(&registry),
            Arc::clone(&shutdown),
        ));
        host.register(&mut app.router);
        (Arc::new(app), shutdown, registry)
    }

    async fn fresh_session() -> Arc<crate::session::Session> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(client);
        Arc::new(crate::session::Session::new(server))
    }

    #[tokio::test]
    async fn test_host_version() {
        let (app, _shutdown, _registry) = build().await;
        let session = fresh_session().await;
        let resp = app.dispatch("host:version", &session).await;
        match resp {
            Response::Ok { data, .. } => assert_eq!(data.unwrap(), b"0029"),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn test_host_devices_listing() {
        let (app, _shutdown, registry) = build().await;
        registry
            .insert(Device::new("fake-5554", DeviceState::Device))
            .await;
        registry
            .insert(Device::new("fake-5555", DeviceState::Offline))
            .await;
        let session = fresh_session().await;
        let resp = app.dispatch("host:devices", &session).await;
        match resp {
            Response::Ok { data, .. } => {
                let body = String::from_utf8(data.unwrap()).unwrap();
                assert!(body.contains("fake-5554\tdevice\n"));
                assert!(body.contains("fake-5555\toffline\n"));
            }
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn test_host_kill_notifies_shutdown() {
        let (app, shutdown, _registry) = build().await;
        let session = fresh_session().await;
        let resp = app.dispatch("host:kill", &session).await;
        assert!(matches!(resp, Response::Ok { .. }));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_transport_any_ambiguous() {
        let (app, _shutdown, registry) = build().await;
        registry
            .insert(Device::new("fake-5554", DeviceState::Device))
            .await;
        registry
            .insert(Device::new("fake-5555", DeviceState::Device))
            .await;
        let session = fresh_session().await;
        let resp = app.dispatch("host:transport-any", &session).await;
        match resp {
            Response::Fail { message, .. } => assert!(message.contains("more than one")),
            _ => panic!("expected Fail"),
        }
    }

    #[tokio::test]
    async fn test_transport_serial_selects_device() {
        let (app, _shutdown, registry) = build().await;
        registry
            .insert(Device::new("fake-5554", DeviceState::Device))
            .await;
        let session = fresh_session().await;
        let resp = app
            .dispatch("host:transport:fake-5554", &session)
            .await;
        assert!(matches!(resp, Response::Ok { .. }));
        let selected = registry.get_selected(&session.id).await.unwrap();
        assert_eq!(selected.serial, "fake-5554");
    }

    #[tokio::test]
    async fn test_device_features_route() {
        let (app, _shutdown, registry) = build().await;
        registry
            .insert(
                Device::new("fake-5554", DeviceState::Device)
                    .with_feature("shell_v2")
                    .with_feature("cmd"),
            )
            .await;
        let session = fresh_session().await;
        let resp = app
            .dispatch("host-serial:fake-5554:features", &session)
            .await;
        match resp {
            Response::Ok { data, .. } => {
                assert_eq!(String::from_utf8(data.unwrap()).unwrap(), "shell_v2,cmd");
            }
            _ => panic!("expected Ok"),
        }
    }
}
