//! The `FileSystem` capability trait sync v1 runs against, plus two
//! concrete backends: a real-disk implementation rooted at a base
//! directory, and an in-memory tree for tests and sandboxed embedders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{AdbError, AdbResult};

/// `mode`/`size`/`mtime` triple sync v1's `STAT` and `DENT` records carry.
/// All-zero represents "does not exist" — never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl FileStat {
    pub const MISSING: FileStat = FileStat {
        mode: 0,
        size: 0,
        mtime: 0,
    };

    pub fn is_missing(&self) -> bool {
        *self == Self::MISSING
    }
}

/// One entry in a `LIST` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub name: String,
    pub stat: FileStat,
}

pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// `stat` never errors; a missing path is `FileStat::MISSING`.
    async fn stat(&self, path: &str) -> FileStat;
    async fn iterdir(&self, path: &str) -> AdbResult<Vec<Dirent>>;
    async fn open_for_read(&self, path: &str) -> AdbResult<Box<dyn AsyncRead + Send + Unpin>>;
    async fn open_for_write(
        &self,
        path: &str,
        mode: u32,
    ) -> AdbResult<Box<dyn AsyncWrite + Send + Unpin>>;
    async fn set_mtime(&self, path: &str, mtime: u32) -> AdbResult<()>;
    async fn makedirs(&self, path: &str) -> AdbResult<()>;
}

/// Disk-backed filesystem rooted at `base_dir`. Paths are joined onto the
/// root without sandboxing `..` — matching the original implementation,
/// which trusted its embedder to only route validated paths here.
pub struct LocalFileSystem {
    base_dir: PathBuf,
}

impl LocalFileSystem {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        LocalFileSystem {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path.trim_start_matches('/'))
    }

    async fn stat_path(path: &Path) -> FileStat {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let mode = if meta.is_dir() { S_IFDIR } else { S_IFREG } | 0o644;
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as u32)
                    .unwrap_or(0);
                FileStat {
                    mode,
                    size: meta.len() as u32,
                    mtime,
                }
            }
            Err(_) => FileStat::MISSING,
        }
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &str) -> FileStat {
        Self::stat_path(&self.resolve(path)).await
    }

    async fn iterdir(&self, path: &str) -> AdbResult<Vec<Dirent>> {
        let dir = self.resolve(path);
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stat = Self::stat_path(&entry.path()).await;
            entries.push(Dirent { name, stat });
        }
        Ok(entries)
    }

    async fn open_for_read(&self, path: &str) -> AdbResult<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(self.resolve(path)).await?;
        Ok(Box::new(file))
    }

    async fn open_for_write(
        &self,
        path: &str,
        _mode: u32,
    ) -> AdbResult<Box<dyn AsyncWrite + Send + Unpin>> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(target).await?;
        Ok(Box::new(file))
    }

    async fn set_mtime(&self, path: &str, mtime: u32) -> AdbResult<()> {
        let target = self.resolve(path);
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(mtime as u64);
        tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&target)
                .and_then(|f| f.set_modified(time))
        })
        .await
        .map_err(|_| AdbError::Internal)?
        .map_err(AdbError::Io)
    }

    async fn makedirs(&self, path: &str) -> AdbResult<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }
}

#[derive(Clone)]
enum MemNode {
    File { data: Vec<u8>, mode: u32, mtime: u32 },
    Dir,
}

/// In-memory filesystem: a flat path->node map, good enough for sync v1's
/// path-addressed operations without touching real disk. Writes are
/// buffered and committed to the map synchronously when the returned
/// writer is shut down, so a `RECV`/`STAT` immediately following a `SEND`
/// always observes the write.
///
/// A plain `std::sync::Mutex` guards the map rather than `tokio::sync::
/// RwLock`: no access here ever holds the lock across an `.await`, so the
/// synchronous lock lets `poll_shutdown` commit without spawning a task.
#[derive(Default)]
pub struct MemoryFileSystem {
    nodes: Arc<std::sync::Mutex<BTreeMap<String, MemNode>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub async fn put_file(&self, path: &str, data: Vec<u8>, mode: u32, mtime: u32) {
        self.nodes
            .lock()
            .unwrap()
            .insert(Self::normalize(path), MemNode::File { data, mode, mtime });
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, path: &str) -> FileStat {
        match self.nodes.lock().unwrap().get(&Self::normalize(path)) {
            Some(MemNode::File { data, mode, mtime }) => FileStat {
                mode: mode | S_IFREG,
                size: data.len() as u32,
                mtime: *mtime,
            },
            Some(MemNode::Dir) => FileStat {
                mode: S_IFDIR | 0o755,
                size: 0,
                mtime: 0,
            },
            None => FileStat::MISSING,
        }
    }

    async fn iterdir(&self, path: &str) -> AdbResult<Vec<Dirent>> {
        let prefix = format!("{}/", Self::normalize(path));
        let nodes = self.nodes.lock().unwrap();
        let mut entries = Vec::new();
        for (key, node) in nodes.iter() {
            if let Some(name) = key.strip_prefix(&prefix) {
                if !name.is_empty() && !name.contains('/') {
                    let stat = match node {
                        MemNode::File { data, mode, mtime } => FileStat {
                            mode: mode | S_IFREG,
                            size: data.len() as u32,
                            mtime: *mtime,
                        },
                        MemNode::Dir => FileStat {
                            mode: S_IFDIR | 0o755,
                            size: 0,
                            mtime: 0,
                        },
                    };
                    entries.push(Dirent {
                        name: name.to_string(),
                        stat,
                    });
                }
            }
        }
        Ok(entries)
    }

    async fn open_for_read(&self, path: &str) -> AdbResult<Box<dyn AsyncRead + Send + Unpin>> {
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&Self::normalize(path)) {
            Some(MemNode::File { data, .. }) => {
                Ok(Box::new(std::io::Cursor::new(data.clone())))
            }
            _ => Err(AdbError::SyncError(format!("no such file: {path}"))),
        }
    }

    async fn open_for_write(
        &self,
        path: &str,
        mode: u32,
    ) -> AdbResult<Box<dyn AsyncWrite + Send + Unpin>> {
        Ok(Box::new(MemoryWriteHandle {
            nodes: Arc::clone(&self.nodes),
            path: Self::normalize(path),
            mode,
            buf: Vec::new(),
        }))
    }

    async fn set_mtime(&self, path: &str, mtime: u32) -> AdbResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(MemNode::File { mtime: m, .. }) = nodes.get_mut(&Self::normalize(path)) {
            *m = mtime;
        }
        Ok(())
    }

    async fn makedirs(&self, path: &str) -> AdbResult<()> {
        self.nodes
            .lock()
            .unwrap()
            .insert(Self::normalize(path), MemNode::Dir);
        Ok(())
    }
}

/// Buffers a SEND stream and commits it into the in-memory tree on shutdown.
struct MemoryWriteHandle {
    nodes: Arc<std::sync::Mutex<BTreeMap<String, MemNode>>>,
    path: String,
    mode: u32,
    buf: Vec<u8>,
}

impl AsyncWrite for MemoryWriteHandle {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        self.buf.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        let data = std::mem::take(&mut this.buf);
        this.nodes.lock().unwrap().insert(
            this.path.clone(),
            MemNode::File {
                data,
                mode: this.mode,
                mtime: 0,
            },
        );
        std::task::Poll::Ready(Ok(()))
    }
}
