//! Scripted platform: answers every dispatched request with the next result
//! from a prepared list, so chain definitions can be exercised without a UI.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use flowintent_core::models::{LaunchMode, LaunchRequest, LaunchResult};
use flowintent_core::{Dispatch, Launcher};
use serde::Serialize;
use tokio::sync::Notify;

/// One request the platform was asked to launch.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchRecord {
    /// Chain step that dispatched the request; absent for fire-and-forget launches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub request: LaunchRequest,
    pub mode: LaunchMode,
}

pub struct ScriptedLauncher {
    script: Mutex<VecDeque<LaunchResult>>,
    records: Mutex<Vec<LaunchRecord>>,
    exhausted: Notify,
}

impl ScriptedLauncher {
    pub fn new(results: impl IntoIterator<Item = LaunchResult>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            records: Mutex::new(Vec::new()),
            exhausted: Notify::new(),
        }
    }

    /// Answer the first `count` dispatches with an empty OK result.
    pub fn all_ok(count: usize) -> Self {
        Self::new((0..count).map(|_| LaunchResult::ok(LaunchRequest::default())))
    }

    /// Parse a YAML list of results.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let results: Vec<LaunchResult> = serde_yaml::from_str(yaml)
            .map_err(|e| format!("Failed to parse results YAML: {}", e))?;
        Ok(Self::new(results))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read results file '{}': {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    pub fn records(&self) -> Vec<LaunchRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }

    /// Resolves once a dispatch arrives with no scripted result left.
    pub async fn exhausted(&self) {
        self.exhausted.notified().await;
    }

    fn record(&self, step: Option<String>, request: LaunchRequest, mode: LaunchMode) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LaunchRecord {
                step,
                request,
                mode,
            });
        }
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, request: LaunchRequest, mode: LaunchMode) {
        tracing::info!("[ScriptedLauncher] Launch {}", request.target);
        self.record(None, request, mode);
    }

    fn launch_for_result(&self, dispatch: Dispatch) {
        let Dispatch {
            step,
            request,
            mode,
            reply,
            ..
        } = dispatch;
        tracing::info!(
            "[ScriptedLauncher] Dispatch '{}' -> {}",
            step,
            request.target
        );
        self.record(Some(step.to_string()), request, mode);

        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match next {
            Some(result) => {
                if !reply.deliver(result) {
                    tracing::warn!("[ScriptedLauncher] Chain no longer accepts results");
                }
            }
            None => {
                tracing::warn!("[ScriptedLauncher] Script exhausted at step '{}'", step);
                self.exhausted.notify_one();
            }
        }
    }
}
