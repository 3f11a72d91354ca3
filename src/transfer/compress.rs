// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming zstd compression of region files.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use super::error::{TransferError, TransferResult};

/// Suffix added to compressed files.
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const MIN_LEVEL: i32 = 1;
const MAX_LEVEL: i32 = 19;
const BUFFER_SIZE: usize = 8192;

/// Compresses region files into a staging directory.
#[derive(Debug, Clone, Copy)]
pub struct RegionCompressor {
    level: i32,
}

impl Default for RegionCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl RegionCompressor {
    /// Create a compressor; the level is clamped to 1..=19.
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(MIN_LEVEL, MAX_LEVEL),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compress `source` into `output_dir`, returning the compressed path.
    pub fn compress(&self, source: &Path, output_dir: &Path) -> TransferResult<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| TransferError::Compression(format!("not a file: {}", source.display())))?
            .to_string_lossy();
        fs::create_dir_all(output_dir)?;
        let output = output_dir.join(compressed_name(&name));

        let started = Instant::now();
        let original_size = fs::metadata(source)?.len();

        let reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(&output)?);
        zstd::stream::copy_encode(reader, &mut writer, self.level)
            .map_err(|e| TransferError::Compression(format!("{}: {}", source.display(), e)))?;
        writer.flush()?;

        let compressed_size = fs::metadata(&output)?.len();
        info!(
            file = %name,
            original_kb = original_size / 1024,
            compressed_kb = compressed_size / 1024,
            ratio = %format!("{:.1}%", compression_ratio(original_size, compressed_size)),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compressed region file"
        );
        Ok(output)
    }

    /// Decompress a `.zst` file into `output_dir`.
    pub fn decompress(&self, source: &Path, output_dir: &Path) -> TransferResult<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| TransferError::Compression(format!("not a file: {}", source.display())))?
            .to_string_lossy();
        fs::create_dir_all(output_dir)?;
        let output = output_dir.join(original_name(&name));

        let reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(&output)?);
        zstd::stream::copy_decode(reader, &mut writer)
            .map_err(|e| TransferError::Compression(format!("{}: {}", source.display(), e)))?;
        writer.flush()?;
        Ok(output)
    }
}

/// `r.0.0.mca` -> `r.0.0.mca.zst`
pub fn compressed_name(name: &str) -> String {
    format!("{}{}", name, COMPRESSED_SUFFIX)
}

/// `r.0.0.mca.zst` -> `r.0.0.mca`; other names are returned unchanged.
pub fn original_name(name: &str) -> &str {
    name.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(name)
}

pub fn is_compressed_region(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(".mca.zst"))
        .unwrap_or(false)
}

/// Compressed size as a percentage of the original size.
pub fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    compressed as f64 * 100.0 / original as f64
}
