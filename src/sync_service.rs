//! Drives the binary sync v1 loop once a `sync:` request has handed the
//! socket over, against a pluggable [`FileSystem`].

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::AdbResult;
use crate::fs::FileSystem;
use crate::response::Response;
use crate::router::{handler, HandlerCtx, Router};
use crate::session::Session;
use crate::sync_proto::{
    encode_data, encode_dent, encode_done, encode_stat_reply, encode_sync_fail, encode_sync_okay,
    parse_send_payload, SyncHeader, SyncId, SYNC_DATA_MAX,
};

pub struct SyncService {
    filesystem: Arc<dyn FileSystem>,
}

impl SyncService {
    pub fn new(filesystem: Arc<dyn FileSystem>) -> Self {
        SyncService { filesystem }
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let service = Arc::clone(self);
        router.add_device_route(
            "sync:",
            false,
            handler(move |ctx: HandlerCtx| {
                let service = Arc::clone(&service);
                async move {
                    ctx.session.write_okay(None, false).await?;
                    ctx.session.suppress_log();
                    let result = service.run(&ctx.session).await;
                    ctx.session.resume_log();
                    result?;
                    Ok(Response::noop())
                }
            }),
        );
    }

    async fn run(&self, session: &Session) -> AdbResult<()> {
        loop {
            let header_bytes = session.read_exact(8).await?;
            let header = SyncHeader::from_bytes(&header_bytes)?;

            match header.id {
                SyncId::Stat => {
                    let path = self.read_path(session, header.length).await?;
                    let stat = self.filesystem.stat(&path).await;
                    session.write_all(&encode_stat_reply(stat)).await?;
                }
                SyncId::List => {
                    let path = self.read_path(session, header.length).await?;
                    if let Err(e) = self.handle_list(session, &path).await {
                        session
                            .write_all(&encode_sync_fail(&e.to_string()))
                            .await?;
                        return Ok(());
                    }
                    // The sync session ends after LIST's DONE record.
                    return Ok(());
                }
                SyncId::Recv => {
                    let path = self.read_path(session, header.length).await?;
                    if let Err(e) = self.handle_recv(session, &path).await {
                        session
                            .write_all(&encode_sync_fail(&e.to_string()))
                            .await?;
                        return Ok(());
                    }
                }
                SyncId::Send => {
                    let payload = self.read_path(session, header.length).await?;
                    if let Err(e) = self.handle_send(session, &payload).await {
                        session
                            .write_all(&encode_sync_fail(&e.to_string()))
                            .await?;
                        return Ok(());
                    }
                }
                SyncId::Quit => return Ok(()),
                other => {
                    session
                        .write_all(&encode_sync_fail(&format!(
                            "unexpected sync tag: {:?}",
                            other.as_bytes()
                        )))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    async fn read_path(&self, session: &Session, len: u32) -> AdbResult<String> {
        let bytes = session.read_exact(len as usize).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn handle_list(&self, session: &Session, path: &str) -> AdbResult<()> {
        let entries = self.filesystem.iterdir(path).await?;
        debug!(path = %path, count = entries.len(), "sync LIST");
        for entry in entries {
            session
                .write_all(&encode_dent(&entry.name, entry.stat))
                .await?;
        }
        session.write_all(&encode_done(0)).await?;
        Ok(())
    }

    async fn handle_recv(&self, session: &Session, path: &str) -> AdbResult<()> {
        let mut reader = self.filesystem.open_for_read(path).await?;
        let mut buf = vec![0u8; SYNC_DATA_MAX as usize];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            session.write_all(&encode_data(&buf[..n])).await?;
        }
        session.write_all(&encode_done(0)).await?;
        Ok(())
    }

    async fn handle_send(&self, session: &Session, payload: &str) -> AdbResult<()> {
        let (path, mode) = parse_send_payload(payload)?;
        let mut writer = self.filesystem.open_for_write(&path, mode).await?;

        let mtime = loop {
            let header_bytes = session.read_exact(8).await?;
            let header = SyncHeader::from_bytes(&header_bytes)?;
            match header.id {
                SyncId::Data => {
                    let chunk = session.read_exact(header.length as usize).await?;
                    writer.write_all(&chunk).await?;
                }
                SyncId::Done => break header.length,
                other => {
                    return Err(crate::error::AdbError::SyncError(format!(
                        "expected DATA or DONE during SEND, got {:?}",
                        other.as_bytes()
                    )))
                }
            }
        };
        writer.shutdown().await?;
        self.filesystem.set_mtime(&path, mtime).await.ok();
        session.write_all(&encode_sync_okay()).await?;
        Ok(())
    }
}
