//! Shell v2 packet multiplexing and the pluggable `ShellExecutor` backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::warn;

use crate::error::{AdbError, AdbResult};
use crate::response::Response;
use crate::router::{handler, HandlerCtx, Router};
use crate::session::Session;

const STDOUT_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShellPacketId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Exit = 3,
    CloseStdin = 4,
    WindowSizeChange = 5,
}

impl ShellPacketId {
    pub fn from_u8(b: u8) -> AdbResult<Self> {
        match b {
            0 => Ok(ShellPacketId::Stdin),
            1 => Ok(ShellPacketId::Stdout),
            2 => Ok(ShellPacketId::Stderr),
            3 => Ok(ShellPacketId::Exit),
            4 => Ok(ShellPacketId::CloseStdin),
            5 => Ok(ShellPacketId::WindowSizeChange),
            other => Err(AdbError::Protocol(format!("unknown shell packet id: {other}"))),
        }
    }
}

/// Encode one shell v2 packet: `id:u8` + `len:u32 LE` + payload.
pub fn encode_packet(id: ShellPacketId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.push(id as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode the terminal `EXIT` packet: a single payload byte `code & 0xFF`.
pub fn encode_exit(code: i32) -> Vec<u8> {
    encode_packet(ShellPacketId::Exit, &[(code & 0xFF) as u8])
}

/// Stdout/stderr reads and the exit wait all take `&self`: a shell v2
/// session needs to race a stdout read against a stderr read on the same
/// handle inside one `tokio::select!`, which two `&mut self` methods can't
/// do without two live mutable borrows. Implementations serialize their own
/// I/O behind an internal lock instead.
#[async_trait]
pub trait ShellHandle: Send + Sync {
    async fn read_stdout_chunk(&self) -> AdbResult<Vec<u8>>;
    async fn read_stderr_chunk(&self) -> AdbResult<Vec<u8>>;
    async fn wait(&self) -> AdbResult<i32>;
}

#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn spawn(&self, command: &str) -> AdbResult<Box<dyn ShellHandle>>;
}

struct ProcessShellHandle {
    child: tokio::sync::Mutex<tokio::process::Child>,
    stdout: tokio::sync::Mutex<tokio::process::ChildStdout>,
    stderr: tokio::sync::Mutex<tokio::process::ChildStderr>,
}

#[async_trait]
impl ShellHandle for ProcessShellHandle {
    async fn read_stdout_chunk(&self) -> AdbResult<Vec<u8>> {
        let mut buf = vec![0u8; STDOUT_CHUNK];
        let n = self.stdout.lock().await.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn read_stderr_chunk(&self) -> AdbResult<Vec<u8>> {
        let mut buf = vec![0u8; STDOUT_CHUNK];
        let n = self.stderr.lock().await.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn wait(&self) -> AdbResult<i32> {
        let status = self.child.lock().await.wait().await?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Spawns real OS processes through the platform shell, mirroring the
/// original's `asyncio.create_subprocess_shell` dispatch.
pub struct ProcessShellExecutor;

impl ProcessShellExecutor {
    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let comspec = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
            let mut cmd = Command::new(comspec);
            cmd.arg("/c").arg(command);
            cmd
        } else {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl ShellExecutor for ProcessShellExecutor {
    async fn spawn(&self, command: &str) -> AdbResult<Box<dyn ShellHandle>> {
        let mut cmd = Self::shell_command(command);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        Ok(Box::new(ProcessShellHandle {
            child: tokio::sync::Mutex::new(child),
            stdout: tokio::sync::Mutex::new(stdout),
            stderr: tokio::sync::Mutex::new(stderr),
        }))
    }
}

pub struct ShellService {
    executor: Arc<dyn ShellExecutor>,
}

impl ShellService {
    pub fn new(executor: Arc<dyn ShellExecutor>) -> Self {
        ShellService { executor }
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let svc = Arc::clone(self);
        router.add_device_route(
            "shell,v2:<command>",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move { svc.run_v2(ctx).await }
            }),
        );
        // The pattern matcher requires a non-empty capture, so the
        // interactive (empty command) form needs its own exact route.
        let svc = Arc::clone(self);
        router.add_device_route(
            "shell,v2:",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move { svc.run_v2(ctx).await }
            }),
        );

        let svc = Arc::clone(self);
        router.add_device_route(
            "shell:<command>",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move { svc.run_v1(ctx).await }
            }),
        );
        let svc = Arc::clone(self);
        router.add_device_route(
            "shell:",
            false,
            handler(move |ctx: HandlerCtx| {
                let svc = Arc::clone(&svc);
                async move { svc.run_v1(ctx).await }
            }),
        );

        router.add_device_route(
            "exec:<command>",
            false,
            handler(|_ctx| async { Err(AdbError::ExecUnsupported) }),
        );
    }

    async fn run_v2(&self, ctx: HandlerCtx) -> AdbResult<Response> {
        let command = ctx.params.get("command").cloned().unwrap_or_default();
        if command.is_empty() {
            return Err(AdbError::InteractiveShellUnsupported);
        }

        ctx.session.write_okay(None, false).await?;
        ctx.session.suppress_log();

        let spawned = self.executor.spawn(&command).await;
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                let _ = ctx
                    .session
                    .write_all(&encode_packet(
                        ShellPacketId::Stderr,
                        e.to_string().as_bytes(),
                    ))
                    .await;
                let _ = ctx.session.write_all(&encode_exit(1)).await;
                ctx.session.resume_log();
                return Ok(Response::noop());
            }
        };

        let mut stdout_done = false;
        let mut stderr_done = false;
        while !(stdout_done && stderr_done) {
            tokio::select! {
                out = handle.read_stdout_chunk(), if !stdout_done => {
                    match out {
                        Ok(chunk) if !chunk.is_empty() => {
                            ctx.session.write_all(&encode_packet(ShellPacketId::Stdout, &chunk)).await?;
                        }
                        Ok(_) => stdout_done = true,
                        Err(e) => { warn!(error = %e, "shell stdout read failed"); stdout_done = true; }
                    }
                }
                err = handle.read_stderr_chunk(), if !stderr_done => {
                    match err {
                        Ok(chunk) if !chunk.is_empty() => {
                            ctx.session.write_all(&encode_packet(ShellPacketId::Stderr, &chunk)).await?;
                        }
                        Ok(_) => stderr_done = true,
                        Err(e) => { warn!(error = %e, "shell stderr read failed"); stderr_done = true; }
                    }
                }
            }
        }

        let code = handle.wait().await.unwrap_or(1);
        ctx.session.write_all(&encode_exit(code)).await?;
        ctx.session.resume_log();
        Ok(Response::noop())
    }

    async fn run_v1(&self, ctx: HandlerCtx) -> AdbResult<Response> {
        let command = ctx.params.get("command").cloned().unwrap_or_default();
        if command.is_empty() {
            return Err(AdbError::InteractiveShellUnsupported);
        }

        ctx.session.write_okay(None, false).await?;
        ctx.session.suppress_log();

        let handle = self.executor.spawn(&command).await?;
        loop {
            let out = handle.read_stdout_chunk().await?;
            if out.is_empty() {
                break;
            }
            ctx.session.write_all(&out).await?;
        }
        loop {
            let err = handle.read_stderr_chunk().await?;
            if err.is_empty() {
                break;
            }
            ctx.session.write_all(&err).await?;
        }
        let _ = handle.wait().await;
        ctx.session.resume_log();
        Ok(Response::noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::device::{Device, DeviceState, InMemoryDeviceRegistry};
    use crate::wire::encode_request;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_encode_packet() {
        let buf = encode_packet(ShellPacketId::Stdout, b"hi");
        assert_eq!(buf[0], 1);
        let len = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        assert_eq!(len, 2);
        assert_eq!(&buf[5..], b"hi");
    }

    #[test]
    fn test_encode_exit_masks_to_byte() {
        let buf = encode_exit(257);
        assert_eq!(buf[0], 3);
        assert_eq!(buf[5], 1);
    }

    #[test]
    fn test_shell_packet_id_from_u8() {
        assert_eq!(ShellPacketId::from_u8(0).unwrap(), ShellPacketId::Stdin);
        assert_eq!(ShellPacketId::from_u8(5).unwrap(), ShellPacketId::WindowSizeChange);
        assert!(ShellPacketId::from_u8(9).is_err());
    }

    struct MockHandle {
        stdout: StdMutex<VecDeque<Vec<u8>>>,
        stderr: StdMutex<VecDeque<Vec<u8>>>,
        exit_code: i32,
    }

    #[async_trait]
    impl ShellHandle for MockHandle {
        async fn read_stdout_chunk(&self) -> AdbResult<Vec<u8>> {
            Ok(self.stdout.lock().unwrap().pop_front().unwrap_or_default())
        }
        async fn read_stderr_chunk(&self) -> AdbResult<Vec<u8>> {
            Ok(self.stderr.lock().unwrap().pop_front().unwrap_or_default())
        }
        async fn wait(&self) -> AdbResult<i32> {
            Ok(self.exit_code)
        }
    }

    struct MockExecutor {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i32,
    }

    #[async_trait]
    impl ShellExecutor for MockExecutor {
        async fn spawn(&self, _command: &str) -> AdbResult<Box<dyn ShellHandle>> {
            Ok(Box::new(MockHandle {
                stdout: StdMutex::new(VecDeque::from([self.stdout.clone(), Vec::new()])),
                stderr: StdMutex::new(VecDeque::from([self.stderr.clone(), Vec::new()])),
                exit_code: self.exit_code,
            }))
        }
    }

    #[tokio::test]
    async fn test_shell_v2_streams_stdout_stderr_and_exit() {
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        registry
            .insert(Device::new("fake-5554", DeviceState::Device))
            .await;
        let mut app = App::new(registry);
        let executor: Arc<dyn ShellExecutor> = Arc::new(MockExecutor {
            stdout: b"hello".to_vec(),
            stderr: b"oops".to_vec(),
            exit_code: 7,
        });
        let service = Arc::new(ShellService::new(executor));
        service.register(&mut app.router);
        let app = Arc::new(app);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let session = Arc::new(Session::new(server_stream));
        tokio::spawn(session.run(app));

        client
            .write_all(&encode_request("shell,v2:echo hello"))
            .await
            .unwrap();

        let mut okay = [0u8; 4];
        client.read_exact(&mut okay).await.unwrap();
        assert_eq!(&okay, b"OKAY");

        let mut stdout_acc = Vec::new();
        let mut stderr_acc = Vec::new();
        let mut exit_code = None;
        loop {
            let mut header = [0u8; 5];
            client.read_exact(&mut header).await.unwrap();
            let id = ShellPacketId::from_u8(header[0]).unwrap();
            let len = u32::from_le_bytes(header[1..5].try_into().unwrap()) as usize;
            let mut payload = vec![0u8; len];
            client.read_exact(&mut payload).await.unwrap();
            match id {
                ShellPacketId::Stdout => stdout_acc.extend_from_slice(&payload),
                ShellPacketId::Stderr => stderr_acc.extend_from_slice(&payload),
                ShellPacketId::Exit => {
                    exit_code = Some(payload[0]);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(stdout_acc, b"hello");
        assert_eq!(stderr_acc, b"oops");
        assert_eq!(exit_code, Some(7));
    }

    #[tokio::test]
    async fn test_shell_v2_empty_command_rejected() {
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        registry
            .insert(Device::new("fake-5554", DeviceState::Device))
            .await;
        let mut app = App::new(registry);
        let executor: Arc<dyn ShellExecutor> = Arc::new(MockExecutor {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: 0,
        });
        let service = Arc::new(ShellService::new(executor));
        service.register(&mut app.router);
        let app = Arc::new(app);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let session = Arc::new(Session::new(server_stream));
        tokio::spawn(session.run(app));

        client.write_all(&encode_request("shell,v2:")).await.unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.starts_with(b"FAIL"));
        assert!(String::from_utf8_lossy(&buf).contains("interactive shell"));
    }
}
