//! Per-connection state: one `Session` per accepted socket, driving the
//! framed request/response loop until a handler says to close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::App;
use crate::error::AdbResult;
use crate::response::{Response, ResponseAction};
use crate::wire;

/// One accepted TCP connection. Owns the split halves behind mutexes so it
/// can be shared as `Arc<Session>` into handler closures; only one handler
/// ever runs at a time per session, so the locks never really contend.
pub struct Session {
    pub id: String,
    reader: Mutex<ReadHalf<TcpStream>>,
    writer: Mutex<WriteHalf<TcpStream>>,
    /// Suppresses per-chunk debug logging during sync/shell streaming.
    log_enabled: AtomicBool,
}

impl Session {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Session {
            id: Uuid::new_v4().to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            log_enabled: AtomicBool::new(true),
        }
    }

    pub fn suppress_log(&self) {
        self.log_enabled.store(false, Ordering::Relaxed);
    }

    pub fn resume_log(&self) {
        self.log_enabled.store(true, Ordering::Relaxed);
    }

    fn logging(&self) -> bool {
        self.log_enabled.load(Ordering::Relaxed)
    }

    /// Read one framed smart-socket request.
    pub async fn read_request(&self) -> AdbResult<String> {
        let mut reader = self.reader.lock().await;
        wire::read_request(&mut *reader).await
    }

    /// Read exactly `n` raw bytes (used by sync/shell once they take over
    /// the socket from the framed request loop).
    pub async fn read_exact(&self, n: usize) -> AdbResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; n];
        let mut reader = self.reader.lock().await;
        reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write_all(&self, data: &[u8]) -> AdbResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn write_okay(&self, body: Option<&[u8]>, raw: bool) -> AdbResult<()> {
        let mut writer = self.writer.lock().await;
        wire::write_okay(&mut *writer, body, raw).await
    }

    pub async fn write_fail(&self, body: Option<&[u8]>, raw: bool) -> AdbResult<()> {
        let mut writer = self.writer.lock().await;
        wire::write_fail(&mut *writer, body, raw).await
    }

    /// Drive the framed request/response loop for this session until a
    /// handler's response carries `ResponseAction::Close`, a framing error
    /// occurs, or the client disconnects.
    pub async fn run(self: Arc<Self>, app: Arc<App>) {
        loop {
            let payload = match self.read_request().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(session = %self.id, error = %e, "framing error");
                    let _ = self.write_fail(Some(e.to_string().as_bytes()), false).await;
                    return;
                }
            };
            if self.logging() {
                debug!(session = %self.id, payload = %payload, "dispatching request");
            }

            let response = app.dispatch(&payload, &self).await;
            let action = response.action();
            if let Err(e) = self.emit(response).await {
                warn!(session = %self.id, error = %e, "failed writing response");
                return;
            }

            if action == ResponseAction::Close {
                return;
            }
        }
    }

    async fn emit(&self, response: Response) -> AdbResult<()> {
        match response {
            Response::Ok { data, raw, .. } => self.write_okay(data.as_deref(), raw).await,
            Response::Fail { message, raw, .. } => {
                self.write_fail(Some(message.as_bytes()), raw).await
            }
            Response::Noop { .. } => Ok(()),
        }
    }
}
