mod app;
mod device;
mod error;
mod forward;
mod fs;
mod host;
mod response;
mod router;
mod server;
mod session;
mod shell;
mod sync_proto;
mod sync_service;
mod wire;

pub use app::App;
pub use device::{Device, DeviceRegistry, DeviceState, InMemoryDeviceRegistry};
pub use error::{AdbError, AdbResult};
pub use forward::ForwardService;
pub use fs::{Dirent, FileStat, FileSystem, LocalFileSystem, MemoryFileSystem};
pub use host::HostService;
pub use response::{Response, ResponseAction};
pub use router::{handler, HandlerCtx, HandlerFn, Router};
pub use server::{AdbServer, ServerConfig, ShutdownLatch};
pub use session::Session;
pub use shell::{ProcessShellExecutor, ShellExecutor, ShellHandle, ShellService};
pub use sync_proto::{SyncHeader, SyncId, SYNC_DATA_MAX};
pub use sync_service::SyncService;
