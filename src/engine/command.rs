// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Engine that runs an external program per generation task.
//!
//! The program reports on stdout, one JSON object per line:
//! `{"chunks": 120, "percent": 12.5, "rate": 40.0}` while running and
//! `{"complete": true}` when finished. Other lines are ignored.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EngineError, EngineEvent, EngineResult, GenerationEngine, GenerationRequest};

/// Program and arguments for the external engine.
///
/// Arguments may contain `{world}`, `{shape}`, `{centerX}`, `{centerZ}`,
/// `{radius}`, `{selector}` and `{chunkList}`. With no arguments configured
/// the request is passed positionally in that order.
///
/// # Process contract
///
/// The run ends when the program closes stdout, normally by exiting. The
/// engine then waits for the exit status:
///
/// - exit code 0 means `Completed`;
/// - a nonzero exit still counts as `Completed` if `{"complete": true}` was
///   printed first;
/// - any other exit is `Failed` with the status in the error.
///
/// Closing stdout early does not end the run sooner. The engine keeps
/// waiting for the exit, and a cancel during that wait still kills the
/// program. Progress printed after stdout closes is never seen, so keep
/// stdout open until the work is done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Arguments for one request.
    pub fn render_args(&self, request: &GenerationRequest) -> Vec<String> {
        let values = [
            ("{world}", request.world.clone()),
            ("{shape}", request.shape.to_string()),
            ("{centerX}", request.center_x.to_string()),
            ("{centerZ}", request.center_z.to_string()),
            ("{radius}", request.radius.to_string()),
            ("{selector}", request.selector.clone()),
            ("{chunkList}", request.chunk_list.display().to_string()),
        ];
        if self.args.is_empty() {
            return values.into_iter().map(|(_, value)| value).collect();
        }
        self.args
            .iter()
            .map(|arg| {
                values
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReportLine {
    #[serde(default)]
    chunks: Option<u64>,
    #[serde(default)]
    percent: Option<f64>,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    complete: bool,
}

/// Runs [`CommandSpec`] once per request, one process per world.
pub struct CommandEngine {
    spec: CommandSpec,
    tasks: Arc<Mutex<HashMap<String, CancellationToken>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl CommandEngine {
    pub fn new(spec: CommandSpec) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            spec,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl GenerationEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.spec.command
    }

    async fn start(&self, request: GenerationRequest) -> EngineResult<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&request.world) {
            return Err(EngineError::AlreadyRunning(request.world));
        }

        let args = self.spec.render_args(&request);
        let mut child = Command::new(&self.spec.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.spec.command, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("stdout not captured".to_string()))?;

        let token = CancellationToken::new();
        tasks.insert(request.world.clone(), token.clone());
        drop(tasks);
        info!(world = %request.world, chunks = request.total_chunks, "Generation started");

        let world = request.world;
        let total_chunks = request.total_chunks;
        let events = self.events.clone();
        let tasks = Arc::clone(&self.tasks);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut reported_complete = false;

            let outcome = loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!(world = %world, "Failed to kill engine: {}", e);
                        }
                        break EngineEvent::Cancelled { world: world.clone() };
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let Ok(report) = serde_json::from_str::<ReportLine>(line.trim()) else {
                                debug!(world = %world, "engine: {}", line);
                                continue;
                            };
                            if report.complete {
                                reported_complete = true;
                                continue;
                            }
                            if let Some(chunks) = report.chunks {
                                let percent = report.percent.unwrap_or_else(|| {
                                    if total_chunks == 0 { 0.0 } else { chunks as f64 * 100.0 / total_chunks as f64 }
                                });
                                let _ = events.send(EngineEvent::Progress {
                                    world: world.clone(),
                                    chunks_generated: chunks,
                                    total_chunks,
                                    percent,
                                    rate: report.rate.unwrap_or(0.0),
                                });
                            }
                        }
                        Ok(None) | Err(_) => {
                            let status = tokio::select! {
                                _ = token.cancelled() => None,
                                status = child.wait() => Some(status),
                            };
                            let Some(status) = status else {
                                if let Err(e) = child.kill().await {
                                    warn!(world = %world, "Failed to kill engine: {}", e);
                                }
                                break EngineEvent::Cancelled { world: world.clone() };
                            };
                            break match status {
                                Ok(status) if status.success() || reported_complete => {
                                    EngineEvent::Completed { world: world.clone() }
                                }
                                Ok(status) => EngineEvent::Failed {
                                    world: world.clone(),
                                    error: format!("engine exited with {}", status),
                                },
                                Err(e) => EngineEvent::Failed {
                                    world: world.clone(),
                                    error: e.to_string(),
                                },
                            };
                        }
                    }
                }
            };

            tasks.lock().await.remove(&world);
            match &outcome {
                EngineEvent::Completed { .. } => info!(world = %world, "Generation complete"),
                EngineEvent::Cancelled { .. } => info!(world = %world, "Generation cancelled"),
                EngineEvent::Failed { error, .. } => warn!(world = %world, "Generation failed: {}", error),
                EngineEvent::Progress { .. } => {}
            }
            let _ = events.send(outcome);
        });

        Ok(())
    }

    async fn is_running(&self, world: &str) -> bool {
        self.tasks.lock().await.contains_key(world)
    }

    async fn cancel(&self, world: &str) -> bool {
        match self.tasks.lock().await.get(world) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{ChunkPlan, Selection};
    use std::path::PathBuf;
    use std::time::Duration;

    fn request(world: &str) -> GenerationRequest {
        let selection = Selection::new(world, 0.0, 0.0, 32.0);
        let plan = ChunkPlan::build(&selection, 0, 1);
        GenerationRequest::new(&selection, &plan, "csv=chunkfleet_0", PathBuf::from("chunkfleet_0.csv"))
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<EngineEvent>) -> (Vec<EngineEvent>, EngineEvent) {
        let mut progress = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                EngineEvent::Progress { .. } => progress.push(event),
                other => return (progress, other),
            }
        }
    }

    #[test]
    fn test_render_args_positional() {
        let spec = CommandSpec::new("gen", Vec::new());
        let args = spec.render_args(&request("world"));
        assert_eq!(args[0], "world");
        assert_eq!(args[1], "square");
        assert_eq!(args[5], "csv=chunkfleet_0");
    }

    #[test]
    fn test_render_args_placeholders() {
        let spec = CommandSpec::new(
            "gen",
            vec!["--world={world}".to_string(), "--only".to_string(), "{selector}".to_string()],
        );
        let args = spec.render_args(&request("world_nether"));
        assert_eq!(args, vec!["--world=world_nether", "--only", "csv=chunkfleet_0"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_progress_and_completion() {
        let script = r#"echo '{"chunks":2,"percent":50.0,"rate":4.0}'; echo noise; echo '{"complete":true}'"#;
        let engine = CommandEngine::new(CommandSpec::new("sh", vec!["-c".to_string(), script.to_string()]));
        let mut rx = engine.subscribe();

        engine.start(request("world")).await.unwrap();
        let (progress, terminal) = next_terminal(&mut rx).await;

        assert_eq!(progress.len(), 1);
        match &progress[0] {
            EngineEvent::Progress { chunks_generated, percent, rate, .. } => {
                assert_eq!(*chunks_generated, 2);
                assert_eq!(*percent, 50.0);
                assert_eq!(*rate, 4.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(terminal, EngineEvent::Completed { world: "world".to_string() });
        assert!(!engine.is_running("world").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let engine = CommandEngine::new(CommandSpec::new("sh", vec!["-c".to_string(), "exit 3".to_string()]));
        let mut rx = engine.subscribe();

        engine.start(request("world")).await.unwrap();
        let (_, terminal) = next_terminal(&mut rx).await;
        assert!(matches!(terminal, EngineEvent::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_and_duplicate_start() {
        let engine = CommandEngine::new(CommandSpec::new("sh", vec!["-c".to_string(), "sleep 30".to_string()]));
        let mut rx = engine.subscribe();

        engine.start(request("world")).await.unwrap();
        assert!(engine.is_running("world").await);
        assert!(matches!(
            engine.start(request("world")).await,
            Err(EngineError::AlreadyRunning(_))
        ));

        assert!(engine.cancel("world").await);
        let (_, terminal) = next_terminal(&mut rx).await;
        assert_eq!(terminal, EngineEvent::Cancelled { world: "world".to_string() });
        assert!(!engine.is_running("world").await);
        assert!(!engine.cancel("world").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_complete_line_outranks_exit_code() {
        let script = r#"echo '{"complete":true}'; exit 1"#;
        let engine = CommandEngine::new(CommandSpec::new("sh", vec!["-c".to_string(), script.to_string()]));
        let mut rx = engine.subscribe();

        engine.start(request("world")).await.unwrap();
        let (_, terminal) = next_terminal(&mut rx).await;
        assert_eq!(terminal, EngineEvent::Completed { world: "world".to_string() });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_after_stdout_closes() {
        let script = "exec >&-; sleep 30";
        let engine = CommandEngine::new(CommandSpec::new("sh", vec!["-c".to_string(), script.to_string()]));
        let mut rx = engine.subscribe();

        engine.start(request("world")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.is_running("world").await);

        assert!(engine.cancel("world").await);
        let (_, terminal) = next_terminal(&mut rx).await;
        assert_eq!(terminal, EngineEvent::Cancelled { world: "world".to_string() });
        assert!(!engine.is_running("world").await);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let engine = CommandEngine::new(CommandSpec::new("/nonexistent/chunkfleet-engine", Vec::new()));
        assert!(matches!(engine.start(request("world")).await, Err(EngineError::Launch(_))));
        assert!(!engine.is_running("world").await);
    }
}
