use std::path::PathBuf;
use std::sync::Arc;

use adb_server::{
    App, DeviceRegistry, ForwardService, HostService, InMemoryDeviceRegistry, LocalFileSystem,
    ProcessShellExecutor, ServerConfig, ShellService, ShutdownLatch, SyncService,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "adb-server")]
#[command(about = "ADB server - terminates the host-side smart-socket protocol")]
struct Cli {
    /// Address to listen on.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on; 0 picks an OS-assigned port.
    #[arg(short = 'P', long, env = "ADB_SERVER_PORT", default_value_t = 5037)]
    port: u16,

    /// Protocol version reported by `host:version`.
    #[arg(long, default_value_t = 0x29)]
    version: u32,

    /// Comma-separated feature list reported by `host:features`.
    #[arg(long, default_value = "shell")]
    features: String,

    /// Root directory sync v1 reads and writes under. Required unless
    /// `--in-memory-fs` is set.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Use an in-memory filesystem instead of `--base-dir`, useful for
    /// demos and tests.
    #[arg(long)]
    in_memory_fs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let registry: Arc<dyn DeviceRegistry> = Arc::new(InMemoryDeviceRegistry::new());
    let shutdown = Arc::new(ShutdownLatch::new());
    let mut app = App::new(Arc::clone(&registry));

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        version: cli.version,
        features: cli.features,
    };

    let host_service = Arc::new(HostService::new(
        config.version,
        config.features.clone(),
        Arc::clone(&registry),
        Arc::clone(&shutdown),
    ));
    host_service.register(&mut app.router);

    if cli.in_memory_fs {
        let fs = Arc::new(adb_server::MemoryFileSystem::new());
        let sync = Arc::new(SyncService::new(fs));
        sync.register(&mut app.router);
    } else {
        let base_dir = cli
            .base_dir
            .unwrap_or_else(|| std::env::temp_dir().join("adb-server-files"));
        std::fs::create_dir_all(&base_dir)?;
        let fs = Arc::new(LocalFileSystem::new(base_dir));
        let sync = Arc::new(SyncService::new(fs));
        sync.register(&mut app.router);
    }

    let shell = Arc::new(ShellService::new(Arc::new(ProcessShellExecutor)));
    shell.register(&mut app.router);

    let forward = Arc::new(ForwardService::new());
    forward.register(&mut app.router);

    let server = adb_server::AdbServer::bind(&config, Arc::new(app), Arc::clone(&shutdown)).await?;
    tracing::info!(address = %server.local_addr()?, "starting adb server");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            shutdown.trigger();
        }
    }

    Ok(())
}
