//! Framing for the direct peer-to-peer file transfer stream (§4.6).
//!
//! Unrelated to [`crate::wire`] — this is TCP, not UDP, and carries
//! exactly one request/response exchange per connection: a
//! newline-terminated filename line, followed by an 8-byte
//! big-endian length prefix and that many payload bytes. A zero-length
//! prefix means "request rejected" and ends the exchange with no body.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Read one newline-terminated line (the requested filename).
///
/// Returns an `UnexpectedEof` error if the peer closed the connection
/// before sending a newline.
pub async fn read_line<R>(reader: &mut BufReader<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before a line was sent",
        ));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Write one newline-terminated line.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Write the 8-byte big-endian length prefix.
pub async fn write_length(writer: &mut (impl AsyncWrite + Unpin), len: u64) -> std::io::Result<()> {
    writer.write_all(&len.to_be_bytes()).await
}

/// Read the 8-byte big-endian length prefix.
pub async fn read_length(reader: &mut (impl AsyncRead + Unpin)) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}
