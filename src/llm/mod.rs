//! Abstract LLM client (C12): real / simulated / record / playback.
//!
//! The real backend spawns a configured command, writes the prompt to
//! stdin, and parses stream-json events off stdout, with no hardcoded CLI
//! binary. The other three modes exist so a pipeline run can be scripted,
//! captured, and replayed without ever making a network call.

pub mod stream;

use crate::errors::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use stream::{ContentBlock, LlmEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub step: u64,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Spawns a real subprocess (e.g. a model CLI) and parses its stream-json
/// output.
pub struct RealLlmClient {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl RealLlmClient {
    pub fn new(command: String, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command,
            args,
            working_dir,
        }
    }
}

#[async_trait]
impl LlmClient for RealLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::RequestFailed("no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let event: LlmEvent = serde_json::from_str(&line)
                .map_err(|e| LlmError::UnparseableResponse(e.to_string()))?;
            match event {
                LlmEvent::Assistant { message, .. } => {
                    for block in message.content {
                        match block {
                            ContentBlock::Text { text: t } => text.push_str(&t),
                            ContentBlock::ToolUse { name, input, id } => {
                                tool_calls.push(ToolCall { id, name, input })
                            }
                        }
                    }
                }
                LlmEvent::Result { is_error, result, .. } => {
                    if is_error {
                        return Err(LlmError::RequestFailed(
                            result.unwrap_or_else(|| "unknown error".to_string()),
                        ));
                    }
                }
                LlmEvent::System { .. } => {}
            }
        }

        child
            .wait()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        Ok(LlmResponse { text, tool_calls })
    }
}

/// Deterministic, pre-scripted responses keyed by call order. Used for
/// dry runs and tests.
pub struct SimulatedLlmClient {
    script: Mutex<Vec<LlmResponse>>,
    cursor: Mutex<usize>,
}

impl SimulatedLlmClient {
    pub fn new(script: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for SimulatedLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut cursor = self.cursor.lock().unwrap();
        let script = self.script.lock().unwrap();
        let response = script
            .get(*cursor)
            .cloned()
            .ok_or(LlmError::ScriptExhausted { step: request.step })?;
        *cursor += 1;
        Ok(response)
    }
}

/// Wraps another client and appends every exchange to a recording file,
/// one JSON object per line, keyed by step.
pub struct RecordingLlmClient<C: LlmClient> {
    inner: C,
    recording_path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct RecordedExchange {
    step: u64,
    request: LlmRequest,
    response: LlmResponse,
}

impl<C: LlmClient> RecordingLlmClient<C> {
    pub fn new(inner: C, recording_path: PathBuf) -> Self {
        Self {
            inner,
            recording_path,
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RecordingLlmClient<C> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self.inner.complete(request).await?;
        let exchange = RecordedExchange {
            step: request.step,
            request: request.clone(),
            response: response.clone(),
        };
        let line = serde_json::to_string(&exchange).map_err(|e| LlmError::UnparseableResponse(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.recording_path)
            .map_err(|e| LlmError::RecordingReadFailed {
                path: self.recording_path.clone(),
                source: e,
            })?;
        use std::io::Write as _;
        writeln!(file, "{line}").map_err(|e| LlmError::RecordingReadFailed {
            path: self.recording_path.clone(),
            source: e,
        })?;
        Ok(response)
    }
}

/// Replays a previously recorded file, keyed by step index, for fully
/// offline replay or fork runs.
pub struct PlaybackLlmClient {
    by_step: HashMap<u64, LlmResponse>,
}

impl PlaybackLlmClient {
    pub fn load(recording_path: &Path) -> Result<Self, LlmError> {
        let content = std::fs::read_to_string(recording_path).map_err(|e| LlmError::RecordingReadFailed {
            path: recording_path.to_path_buf(),
            source: e,
        })?;
        let mut by_step = HashMap::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let exchange: RecordedExchange =
                serde_json::from_str(line).map_err(|e| LlmError::UnparseableResponse(e.to_string()))?;
            by_step.insert(exchange.step, exchange.response);
        }
        Ok(Self { by_step })
    }
}

#[async_trait]
impl LlmClient for PlaybackLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.by_step
            .get(&request.step)
            .cloned()
            .ok_or(LlmError::PlaybackMiss(request.step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(text: &str) -> LlmResponse {
        LlmResponse {
            text: text.to_string(),
            tool_calls: vec![],
        }
    }

    #[tokio::test]
    async fn simulated_client_returns_scripted_responses_in_order() {
        let client = SimulatedLlmClient::new(vec![resp("first"), resp("second")]);
        let r1 = client.complete(&LlmRequest { step: 0, prompt: "p".into() }).await.unwrap();
        let r2 = client.complete(&LlmRequest { step: 1, prompt: "p".into() }).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
    }

    #[tokio::test]
    async fn simulated_client_errors_when_script_exhausted() {
        let client = SimulatedLlmClient::new(vec![resp("only")]);
        let _ = client.complete(&LlmRequest { step: 0, prompt: "p".into() }).await.unwrap();
        let err = client.complete(&LlmRequest { step: 1, prompt: "p".into() }).await;
        assert!(matches!(err, Err(LlmError::ScriptExhausted { step: 1 })));
    }

    #[tokio::test]
    async fn recording_then_playback_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let recording_path = dir.path().join("rec.jsonl");
        let inner = SimulatedLlmClient::new(vec![resp("hello")]);
        let recorder = RecordingLlmClient::new(inner, recording_path.clone());
        let req = LlmRequest { step: 0, prompt: "p".into() };
        let live = recorder.complete(&req).await.unwrap();

        let playback = PlaybackLlmClient::load(&recording_path).unwrap();
        let replayed = playback.complete(&req).await.unwrap();
        assert_eq!(live.text, replayed.text);
    }

    #[tokio::test]
    async fn playback_missing_step_errors() {
        let dir = tempfile::tempdir().unwrap();
        let recording_path = dir.path().join("rec.jsonl");
        std::fs::write(&recording_path, "").unwrap();
        let playback = PlaybackLlmClient::load(&recording_path).unwrap();
        let err = playback.complete(&LlmRequest { step: 5, prompt: "p".into() }).await;
        assert!(matches!(err, Err(LlmError::PlaybackMiss(5))));
    }
}
