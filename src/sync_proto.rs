//! Sync v1 wire format: the 8-byte `tag + LE u32 length` record header used
//! in both directions, plus the fixed-shape `STAT`/`DENT` records.

use crate::error::{AdbError, AdbResult};
use crate::fs::FileStat;

/// Maximum payload size of a single `DATA` record (64 KiB).
pub const SYNC_DATA_MAX: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    Stat,
    List,
    Send,
    Recv,
    Data,
    Done,
    Okay,
    Fail,
    Dent,
    Quit,
}

impl SyncId {
    pub fn as_bytes(&self) -> &'static [u8; 4] {
        match self {
            SyncId::Stat => b"STAT",
            SyncId::List => b"LIST",
            SyncId::Send => b"SEND",
            SyncId::Recv => b"RECV",
            SyncId::Data => b"DATA",
            SyncId::Done => b"DONE",
            SyncId::Okay => b"OKAY",
            SyncId::Fail => b"FAIL",
            SyncId::Dent => b"DENT",
            SyncId::Quit => b"QUIT",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> AdbResult<SyncId> {
        if bytes.len() < 4 {
            return Err(AdbError::SyncError(format!(
                "sync tag too short: {} bytes",
                bytes.len()
            )));
        }
        match &bytes[..4] {
            b"STAT" => Ok(SyncId::Stat),
            b"LIST" => Ok(SyncId::List),
            b"SEND" => Ok(SyncId::Send),
            b"RECV" => Ok(SyncId::Recv),
            b"DATA" => Ok(SyncId::Data),
            b"DONE" => Ok(SyncId::Done),
            b"OKAY" => Ok(SyncId::Okay),
            b"FAIL" => Ok(SyncId::Fail),
            b"DENT" => Ok(SyncId::Dent),
            b"QUIT" => Ok(SyncId::Quit),
            other => Err(AdbError::SyncError(format!(
                "unknown sync tag: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHeader {
    pub id: SyncId,
    pub length: u32,
}

impl SyncHeader {
    pub fn new(id: SyncId, length: u32) -> Self {
        Self { id, length }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(self.id.as_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> AdbResult<Self> {
        if buf.len() < 8 {
            return Err(AdbError::SyncError(format!(
                "sync header too short: {} bytes, need 8",
                buf.len()
            )));
        }
        let id = SyncId::from_bytes(&buf[0..4])?;
        let length = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { id, length })
    }
}

/// Encode a `STAT` reply: `STAT` + mode + size + mtime, 16 bytes total.
pub fn encode_stat_reply(stat: FileStat) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..4].copy_from_slice(b"STAT");
    buf[4..8].copy_from_slice(&stat.mode.to_le_bytes());
    buf[8..12].copy_from_slice(&stat.size.to_le_bytes());
    buf[12..16].copy_from_slice(&stat.mtime.to_le_bytes());
    buf
}

/// Encode a `DENT` record: `DENT` + mode + size + mtime + namelen + name.
pub fn encode_dent(name: &str, stat: FileStat) -> Vec<u8> {
    let name_bytes = name.as_bytes();
    let mut buf = Vec::with_capacity(20 + name_bytes.len());
    buf.extend_from_slice(b"DENT");
    buf.extend_from_slice(&stat.mode.to_le_bytes());
    buf.extend_from_slice(&stat.size.to_le_bytes());
    buf.extend_from_slice(&stat.mtime.to_le_bytes());
    buf.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(name_bytes);
    buf
}

/// Encode a `DONE` record whose length field carries `value` (either 0 for
/// a terminator or an mtime for a `SEND` acknowledgement).
pub fn encode_done(value: u32) -> [u8; 8] {
    SyncHeader::new(SyncId::Done, value).to_bytes()
}

/// Encode a `DATA` record; caller must keep `chunk` at or under
/// [`SYNC_DATA_MAX`].
pub fn encode_data(chunk: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + chunk.len());
    buf.extend_from_slice(b"DATA");
    buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    buf.extend_from_slice(chunk);
    buf
}

pub fn encode_sync_okay() -> [u8; 8] {
    SyncHeader::new(SyncId::Okay, 0).to_bytes()
}

/// Encode a sync-level `FAIL`: `FAIL` + length + UTF-8 reason.
pub fn encode_sync_fail(reason: &str) -> Vec<u8> {
    let reason_bytes = reason.as_bytes();
    let mut buf = Vec::with_capacity(8 + reason_bytes.len());
    buf.extend_from_slice(b"FAIL");
    buf.extend_from_slice(&(reason_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(reason_bytes);
    buf
}

/// Split a `SEND` request payload `"path,mode"` into its parts.
pub fn parse_send_payload(payload: &str) -> AdbResult<(String, u32)> {
    let (path, mode_str) = payload
        .rsplit_once(',')
        .ok_or_else(|| AdbError::SyncError(format!("malformed SEND payload: {payload}")))?;
    let mode = mode_str
        .parse::<u32>()
        .map_err(|_| AdbError::SyncError(format!("malformed SEND mode: {mode_str}")))?;
    Ok((path.to_string(), mode))
}
