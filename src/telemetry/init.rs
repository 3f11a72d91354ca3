// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber installation and the log presets used by the CLI.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target prefix of this crate's log events.
pub const CRATE_TARGET: &str = "chunkfleet";

/// How the `fmt` subscriber is filtered and laid out.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for everything outside this crate.
    pub default_level: Level,

    /// Level for this crate's own events, when different.
    pub crate_level: Option<Level>,

    /// Log span open and close.
    pub include_span_events: bool,

    /// Source file and line of each event.
    pub include_file_line: bool,

    /// Whether to include the target module path.
    pub include_target: bool,

    /// Whether to name the tokio worker thread for each event.
    pub include_thread_names: bool,

    pub ansi_colors: bool,

    /// Whether to use the compact log format.
    pub compact: bool,

    /// Custom filter directive. RUST_LOG still wins when set.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            crate_level: Some(Level::INFO),
            include_span_events: false,
            include_file_line: false,
            include_target: false,
            include_thread_names: false,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output for `--verbose` runs.
    pub fn development() -> Self {
        Self {
            default_level: Level::INFO,
            crate_level: Some(Level::DEBUG),
            include_file_line: true,
            include_target: true,
            include_thread_names: true,
            compact: false,
            ..Self::default()
        }
    }

    /// Unattended nodes: warnings and above, no colors.
    pub fn production() -> Self {
        Self {
            crate_level: None,
            ansi_colors: false,
            ..Self::default()
        }
    }

    /// Everything this crate emits, for debugging tests.
    pub fn testing() -> Self {
        Self {
            crate_level: Some(Level::TRACE),
            include_span_events: true,
            ansi_colors: false,
            ..Self::development()
        }
    }

    /// Set the level for this crate's events.
    pub fn with_level(mut self, level: Level) -> Self {
        self.crate_level = Some(level);
        self
    }

    /// Replace the computed directive entirely.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// Filter directive used when RUST_LOG is not set.
    pub fn directive(&self) -> String {
        if let Some(directive) = &self.filter_directive {
            return directive.clone();
        }
        match self.crate_level {
            Some(level) => format!("{},{}={}", self.default_level, CRATE_TARGET, level),
            None => self.default_level.to_string(),
        }
    }
}

/// Guard returned by [`init_telemetry`].
///
/// Keep this guard alive for the duration of the program.
pub struct TelemetryGuard {
    _private: (),
}

fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(config.directive())
            .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()))
    })
}

/// Install the global subscriber.
///
/// Logs go to stderr so command output on stdout stays clean. Call once at
/// startup; a second call fails.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = build_filter(config);

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_thread_names(config.include_thread_names)
        .with_span_events(span_events);

    if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| io::Error::other(e.to_string()))?;
    }

    Ok(TelemetryGuard { _private: () })
}
