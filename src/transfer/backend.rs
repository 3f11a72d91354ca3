// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upload backends.
//!
//! The pipeline talks to its destination through [`TransferBackend`]: one
//! authenticated session per processing run, recursive directory creation,
//! and streaming uploads that report progress. [`DirectoryBackend`] writes
//! into a local or mounted directory tree; remote protocols plug in by
//! implementing the trait.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::error::{TransferError, TransferResult};

/// Upload progress callback: `(bytes_transferred, total_bytes)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Written and removed on connect to prove the root accepts files.
const WRITE_CHECK_FILE: &str = ".chunkfleet-write-check";

/// How the backend authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Password(String),
    PublicKey {
        private_key_path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Password(_) => f.write_str("Password(***)"),
            Auth::PublicKey { private_key_path, .. } => f
                .debug_struct("PublicKey")
                .field("private_key_path", private_key_path)
                .finish_non_exhaustive(),
        }
    }
}

/// Connection parameters handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub auth: Auth,
}

/// Result of uploading one file.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes_transferred: u64,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl TransferOutcome {
    /// Throughput in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / secs
    }

    /// One-line human summary, e.g. `1.5 MB in 1200ms (1.2 MB/s)`.
    pub fn summary(&self) -> String {
        if !self.success {
            return format!(
                "failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        format!(
            "{} in {}ms ({}/s)",
            format_bytes(self.bytes_transferred),
            self.duration.as_millis(),
            format_bytes(self.bytes_per_second() as u64)
        )
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}

/// Parent directory of a `/`-separated remote path.
pub fn remote_parent(path: &str) -> Option<&str> {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Destination for compressed region files.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Open and authenticate a session.
    async fn connect(&self, credentials: &Credentials) -> TransferResult<()>;

    /// Create a remote directory and any missing parents.
    async fn create_dirs(&self, remote_dir: &str) -> TransferResult<()>;

    /// Stream `local` to `remote`, reporting progress. Returns bytes sent.
    async fn upload(&self, local: &Path, remote: &str, progress: ProgressFn<'_>) -> TransferResult<u64>;

    /// Close the session.
    async fn disconnect(&self) {}

    /// Connect and disconnect without transferring anything.
    async fn check(&self, credentials: &Credentials) -> TransferResult<()> {
        self.connect(credentials).await?;
        self.disconnect().await;
        Ok(())
    }
}

/// Upload one file, creating its remote parent first.
pub async fn upload_file(
    backend: &dyn TransferBackend,
    local: &Path,
    remote: &str,
    progress: ProgressFn<'_>,
) -> TransferOutcome {
    let started = Instant::now();
    let result = async {
        if let Some(parent) = remote_parent(remote) {
            backend.create_dirs(parent).await?;
        }
        backend.upload(local, remote, progress).await
    }
    .await;

    match result {
        Ok(bytes) => TransferOutcome {
            local_path: local.to_path_buf(),
            remote_path: remote.to_string(),
            bytes_transferred: bytes,
            duration: started.elapsed(),
            success: true,
            error: None,
        },
        Err(e) => TransferOutcome {
            local_path: local.to_path_buf(),
            remote_path: remote.to_string(),
            bytes_transferred: 0,
            duration: started.elapsed(),
            success: false,
            error: Some(e.to_string()),
        },
    }
}

/// Writes uploads below a root directory.
///
/// Remote paths are interpreted relative to `root`; a leading `/` is ignored
/// and `..` components are rejected. Existing files are overwritten.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto the local root.
    pub fn resolve(&self, remote: &str) -> TransferResult<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(remote).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(TransferError::Backend(format!(
                        "remote path escapes destination: {}",
                        remote
                    )))
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl TransferBackend for DirectoryBackend {
    fn name(&self) -> &str {
        "directory"
    }

    async fn connect(&self, credentials: &Credentials) -> TransferResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| TransferError::backend("opening destination", e))?;
        let marker = self.root.join(WRITE_CHECK_FILE);
        fs::write(&marker, b"")
            .await
            .map_err(|e| TransferError::backend("destination not writable", e))?;
        let _ = fs::remove_file(&marker).await;
        debug!(
            root = %self.root.display(),
            user = %credentials.username,
            "Directory backend ready"
        );
        Ok(())
    }

    async fn create_dirs(&self, remote_dir: &str) -> TransferResult<()> {
        let dir = self.resolve(remote_dir)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransferError::backend("creating directory", e))
    }

    async fn upload(&self, local: &Path, remote: &str, progress: ProgressFn<'_>) -> TransferResult<u64> {
        let target = self.resolve(remote)?;
        let total = fs::metadata(local).await?.len();

        let mut source = fs::File::open(local).await?;
        let partial = target.with_extension("part");
        let mut dest = fs::File::create(&partial)
            .await
            .map_err(|e| TransferError::backend("creating remote file", e))?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            dest.write_all(&buffer[..n])
                .await
                .map_err(|e| TransferError::backend("writing remote file", e))?;
            sent += n as u64;
            progress(sent, total);
        }
        dest.flush().await?;
        drop(dest);

        fs::rename(&partial, &target)
            .await
            .map_err(|e| TransferError::backend("finalizing remote file", e))?;
        info!(remote = %remote, bytes = sent, "Uploaded file");
        Ok(sent)
    }
}
