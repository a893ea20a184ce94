//! Per-stream log pumps.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::log_stream::LogStream;
use crate::constants::MAX_LOG_LINE_BYTES;
use super::types::StreamKind;

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Drain one output stream of a replica into the log stream, line by line,
/// until the pipe closes.
///
/// A line longer than [`MAX_LOG_LINE_BYTES`] is recorded in pieces of at
/// most that size, so a replica that never writes a newline cannot grow the
/// buffer without bound.
pub(crate) async fn pump_lines<R>(logs: Arc<LogStream>, replica: String, stream: StreamKind, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0u64;
    // The previous piece was cut at the cap rather than at a newline.
    let mut split = false;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LOG_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let terminated = buf.ends_with(b"\n");
                // A newline right after a cut belongs to the piece before it.
                if !(split && buf == b"\n") {
                    logs.publish(&replica, stream, decode_line(&buf)).await;
                    lines += 1;
                }
                split = !terminated;
            },
            Err(e) => {
                tracing::warn!(replica = %replica, stream = %stream, error = %e, "Log pump read failed");
                break;
            },
        }
    }

    tracing::debug!(replica = %replica, stream = %stream, lines = lines, "Log pump finished");
}
