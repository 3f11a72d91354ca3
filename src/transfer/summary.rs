// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Aggregated transfer counts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::{TransferRecord, TransferStatus};

/// Counts across a transfer queue at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub total_regions: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TransferRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total_regions += 1;
            match record.status() {
                TransferStatus::Pending => summary.pending += 1,
                TransferStatus::Compressing | TransferStatus::Uploading => summary.in_progress += 1,
                TransferStatus::Completed => summary.completed += 1,
                TransferStatus::Failed => summary.failed += 1,
            }
            summary.bytes_transferred += record.bytes_transferred();
            summary.total_bytes += record.total_bytes();
        }
        summary
    }

    /// Completed regions as a percentage of all regions.
    pub fn percent_complete(&self) -> f64 {
        if self.total_regions == 0 {
            return 0.0;
        }
        f64::from(self.completed) * 100.0 / f64::from(self.total_regions)
    }

    pub fn bytes_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_transferred as f64 * 100.0 / self.total_bytes as f64
    }

    /// Nothing left to do (some records may have failed).
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }

    pub fn is_active(&self) -> bool {
        self.in_progress > 0
    }

    pub fn is_empty(&self) -> bool {
        self.total_regions == 0
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_regions == 0 {
            return f.write_str("No transfers queued");
        }
        write!(
            f,
            "Transfer: {}/{} regions ({:.1}%)",
            self.completed,
            self.total_regions,
            self.percent_complete()
        )?;
        if self.in_progress > 0 {
            write!(f, " [{} active]", self.in_progress)?;
        }
        if self.failed > 0 {
            write!(f, " [{} failed]", self.failed)?;
        }
        Ok(())
    }
}
