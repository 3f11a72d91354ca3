// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! TCP transport helpers: binding, connecting and line framing.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{decode_bytes, encode, Message};

/// Default coordinator port.
pub const DEFAULT_HOST_PORT: u16 = 25580;

/// Default port of the secure file-transfer destination.
pub const DEFAULT_TRANSFER_PORT: u16 = 22;

/// Longest accepted line. Longer lines are discarded and reported as
/// unparseable.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind the coordinator listener.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Open a connection to a coordinator.
pub async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Split `host[:port]` into its parts, applying the default port.
pub fn parse_address(addr: &str) -> Option<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return None;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            let port = port.parse().ok()?;
            Some((host.trim_start_matches('[').trim_end_matches(']').to_string(), port))
        }
        Some(_) => None,
        None => Some((addr.to_string(), DEFAULT_HOST_PORT)),
    }
}

// ============================================================================
// Line Framing
// ============================================================================

/// Reads one message per line from the read half of a connection.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
}

impl LineReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            line: Vec::new(),
        }
    }

    /// Read the next line.
    ///
    /// Returns `Ok(None)` at end of stream and `Err` only for transport
    /// failures. Lines that are not valid UTF-8, not valid JSON, or too long
    /// come back as the inner `Err` so callers can skip them and keep the
    /// link.
    pub async fn next_message(&mut self) -> io::Result<Option<Result<Message, serde_json::Error>>> {
        loop {
            self.line.clear();
            let n = (&mut self.inner)
                .take(MAX_LINE_BYTES as u64 + 1)
                .read_until(b'\n', &mut self.line)
                .await?;
            if n == 0 {
                return Ok(None);
            }
            if n > MAX_LINE_BYTES && self.line.last() != Some(&b'\n') {
                self.discard_rest_of_line().await?;
                return Ok(Some(Err(<serde_json::Error as serde::de::Error>::custom(format!(
                    "line longer than {} bytes",
                    MAX_LINE_BYTES
                )))));
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(decode_bytes(&self.line)));
        }
    }

    async fn discard_rest_of_line(&mut self) -> io::Result<()> {
        loop {
            let (used, done) = {
                let buf = self.inner.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(());
                }
                match buf.iter().position(|b| *b == b'\n') {
                    Some(end) => (end + 1, true),
                    None => (buf.len(), false),
                }
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

/// Write a single message and flush.
pub async fn write_message(writer: &mut OwnedWriteHalf, msg: &Message) -> io::Result<()> {
    let line = encode(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Spawn the send loop for one connection.
///
/// Messages are written strictly in the order they were queued. The loop
/// ends when every sender is dropped or a write fails; the write half is
/// shut down on exit.
pub fn spawn_writer(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    peer: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = outgoing.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                warn!("Failed to send {} to {}: {}", msg.message_type(), peer, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
        debug!("Send loop for {} finished", peer);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("10.0.0.5:4000"), Some(("10.0.0.5".to_string(), 4000)));
        assert_eq!(parse_address("host.lan"), Some(("host.lan".to_string(), DEFAULT_HOST_PORT)));
        assert_eq!(parse_address("[::1]:25590"), Some(("::1".to_string(), 25590)));
        assert_eq!(parse_address("host:notaport"), None);
        assert_eq!(parse_address(":25580"), None);
        assert_eq!(parse_address("  "), None);
    }

    #[tokio::test]
    async fn test_roundtrip_over_tcp() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = connect("127.0.0.1", addr.port()).await.unwrap();
            let (_read, write) = stream.into_split();
            let (tx, rx) = mpsc::unbounded_channel();
            let writer = spawn_writer(write, rx, "test".to_string());
            tx.send(Message::register("a")).unwrap();
            tx.send(Message::Start).unwrap();
            drop(tx);
            writer.await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (read, _write) = stream.into_split();
        let mut reader = LineReader::new(read);

        let first = reader.next_message().await.unwrap().unwrap().unwrap();
        assert!(first.is_register());
        let second = reader.next_message().await.unwrap().unwrap().unwrap();
        assert_eq!(second, Message::Start);
        assert!(reader.next_message().await.unwrap().is_none());

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_line_is_reported_not_fatal() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = connect("127.0.0.1", addr.port()).await.unwrap();
            stream.write_all(b"garbage\n\n{\"type\":\"stop\"}\n").await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (read, _write) = stream.into_split();
        let mut reader = LineReader::new(read);

        assert!(reader.next_message().await.unwrap().unwrap().is_err());
        assert_eq!(reader.next_message().await.unwrap().unwrap().unwrap(), Message::Stop);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skippable() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = connect("127.0.0.1", addr.port()).await.unwrap();
            stream.write_all(b"\xff\xfe\n{\"type\":\"start\"}\n").await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (read, _write) = stream.into_split();
        let mut reader = LineReader::new(read);

        assert!(reader.next_message().await.unwrap().unwrap().is_err());
        assert_eq!(reader.next_message().await.unwrap().unwrap().unwrap(), Message::Start);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = connect("127.0.0.1", addr.port()).await.unwrap();
            let mut payload = vec![b'x'; MAX_LINE_BYTES + 4096];
            payload.extend_from_slice(b"\n{\"type\":\"stop\"}\n");
            stream.write_all(&payload).await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (read, _write) = stream.into_split();
        let mut reader = LineReader::new(read);

        assert!(reader.next_message().await.unwrap().unwrap().is_err());
        assert_eq!(reader.next_message().await.unwrap().unwrap().unwrap(), Message::Stop);
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(connect("127.0.0.1", port).await.is_err());
    }
}
