//! Content-Length framing for the service wire.
//!
//! The service speaks JSON-RPC 2.0 in `Content-Length: N\r\n\r\n{json}`
//! frames, the same base protocol whether the bytes flow over a child's
//! stdio pipes or a loopback socket. [`FrameReader`] and [`FrameWriter`]
//! handle one direction each.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Ceiling on a single frame body (4 MiB). Larger `Content-Length` values
/// are rejected before any allocation happens.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    /// EOF inside a frame, malformed headers, and oversized bodies are errors.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(body_len) = self.read_headers().await? else {
            return Ok(None);
        };

        if body_len > MAX_FRAME_BYTES {
            bail!("Content-Length {body_len} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; body_len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let value = serde_json::from_slice(&body).context("parsing frame body as JSON")?;
        Ok(Some(value))
    }

    /// Consume header lines up to the blank separator and return the
    /// `Content-Length` value, or `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut body_len: Option<usize> = None;
        let mut line = String::new();
        let mut mid_frame = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if n == 0 {
                // EOF between frames is a clean shutdown. EOF after any
                // header byte means the peer died mid-frame.
                if mid_frame {
                    bail!("stream ended inside frame headers");
                }
                return Ok(None);
            }
            mid_frame = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; unknown headers
            // (Content-Type in practice) are skipped.
            if let Some((name, value)) = trimmed.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                let parsed = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
                body_len = Some(parsed);
            }
        }

        match body_len {
            Some(len) => Ok(Some(len)),
            None => bail!("frame headers missing Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg` and write it as one frame. `Content-Length` counts
    /// bytes of the UTF-8 body, not characters.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg).context("serializing frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(body.as_bytes())
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }
}
