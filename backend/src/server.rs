//! Unix socket front door.
//!
//! One request per line, one reply per request terminated by a NUL byte.
//! Each accepted connection runs its own [`SessionManager`] on a spawned
//! task; requests on a connection are answered strictly in order.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

use crate::core::control::ControlMessage;
use crate::error::TransportError;
use crate::session::{SessionDeps, SessionManager};

const REPLY_TERMINATOR: u8 = b'\0';

/// Bind the socket, replacing a stale socket file left by an earlier run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create socket directory {}", parent.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("bind {}", path.display()))
}

/// Accept connections until `shutdown` resolves, then remove the socket file.
#[instrument(skip_all, fields(socket = %socket_path.display()))]
pub async fn serve(
    listener: UnixListener,
    socket_path: &Path,
    deps: SessionDeps,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!("listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }

            conn = listener.accept() => {
                let stream = match conn {
                    Ok((stream, _addr)) => stream,
                    Err(err) => {
                        warn!(err = %err, "accept failed");
                        continue;
                    }
                };
                let mut manager = SessionManager::new(deps.clone(), initial_working_dir());
                let limit = deps.config.limits.max_message_bytes;
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, &mut manager, limit).await {
                        warn!(err = %err, "session ended");
                    }
                });
            }
        }
    }

    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("remove socket {}", socket_path.display()))?;
    }
    Ok(())
}

/// Serve requests on one connection until EOF or a transport failure.
pub async fn serve_connection(
    stream: UnixStream,
    manager: &mut SessionManager,
    max_message_bytes: usize,
) -> Result<(), TransportError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    manager.activate();
    debug!("session active");

    let result = loop {
        let line = match read_request(&mut reader, max_message_bytes).await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = manager.handle(ControlMessage::parse(&line)).await;
        let mut frame = reply.into_bytes();
        frame.push(REPLY_TERMINATOR);
        if let Err(err) = write.write_all(&frame).await {
            break Err(err.into());
        }
        if let Err(err) = write.flush().await {
            break Err(err.into());
        }
    };

    manager.close();
    debug!("session closing");
    result
}

/// Read one `\n`-terminated request. `None` at a clean EOF.
pub async fn read_request<R>(reader: &mut R, limit: usize) -> Result<Option<String>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > limit {
        return Err(TransportError::MessageTooLarge { limit });
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| TransportError::InvalidEncoding)
}

fn initial_working_dir() -> PathBuf {
    std::env::current_dir()
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_and_strips_carriage_returns() {
        let mut reader = BufReader::new(&b"STATUS\r\nCWD:/tmp\nlast"[..]);
        let mut lines = Vec::new();
        while let Some(line) = read_request(&mut reader, 64).await.expect("read") {
            lines.push(line);
        }
        assert_eq!(lines, vec!["STATUS", "CWD:/tmp", "last"]);
    }

    #[tokio::test]
    async fn rejects_oversized_requests() {
        let mut reader = BufReader::new(&b"0123456789\n"[..]);
        let err = read_request(&mut reader, 8).await.expect_err("too large");
        assert!(matches!(err, TransportError::MessageTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn accepts_a_request_exactly_at_the_limit() {
        let mut reader = BufReader::new(&b"01234567\n"[..]);
        assert_eq!(
            read_request(&mut reader, 8).await.expect("read"),
            Some("01234567".to_string())
        );
    }

    #[tokio::test]
    async fn rejects_invalid_utf8() {
        let mut reader = BufReader::new(&[0xff, 0xfe, b'\n'][..]);
        let err = read_request(&mut reader, 8).await.expect_err("invalid");
        assert!(matches!(err, TransportError::InvalidEncoding));
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("awesh.sock");
        std::fs::write(&path, b"stale").expect("write");
        let _listener = bind(&path).expect("bind");
        let metadata = std::fs::metadata(&path).expect("metadata");
        assert!(!metadata.is_file());
    }
}
