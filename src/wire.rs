//! The ADB smart-socket wire framing: 4 ASCII hex digits of length followed
//! by that many bytes of request text, and `OKAY`/`FAIL` status words with
//! optional length-prefixed or raw bodies on the way out.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AdbError, AdbResult};

/// Read one framed request from `reader`: 4 hex digits, then that many bytes.
///
/// Any short read of the length prefix — including a socket that offers no
/// bytes at all before closing — is a truncation error, matching the body
/// read below; there is no distinct "clean EOF" outcome at this layer.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> AdbResult<String> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AdbError::Truncated("length prefix"),
            _ => AdbError::Io(e),
        })?;

    let hex_str = std::str::from_utf8(&len_buf).map_err(|_| AdbError::BadLengthPrefix)?;
    let len = usize::from_str_radix(hex_str, 16).map_err(|_| AdbError::BadLengthPrefix)?;
    if len == 0 {
        return Err(AdbError::EmptyPayload);
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AdbError::Truncated("request body"),
            _ => AdbError::Io(e),
        })?;

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Write `OKAY`, optionally followed by a body (length-prefixed unless `raw`).
pub async fn write_okay<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: Option<&[u8]>,
    raw: bool,
) -> AdbResult<()> {
    write_status(writer, b"OKAY", body, raw).await
}

/// Write `FAIL`, optionally followed by a body (length-prefixed unless `raw`).
pub async fn write_fail<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: Option<&[u8]>,
    raw: bool,
) -> AdbResult<()> {
    write_status(writer, b"FAIL", body, raw).await
}

async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: &[u8; 4],
    body: Option<&[u8]>,
    raw: bool,
) -> AdbResult<()> {
    writer.write_all(status).await?;
    if let Some(body) = body {
        if raw {
            writer.write_all(body).await?;
        } else {
            let header = format!("{:04x}", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

/// Encode a request the way a client would: `"{:04x}{payload}"`.
///
/// Used by tests that speak the client side of the protocol against this
/// server.
pub fn encode_request(payload: &str) -> Vec<u8> {
    format!("{:04x}{}", payload.len(), payload).into_bytes()
}
