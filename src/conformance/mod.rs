//! Post-edit verification bundle (C3).
//!
//! Each layer is an external checker command invoked as a subprocess with
//! the modified-file set piped in as JSON on stdin, and its stdout parsed
//! as a `violations[]` JSON array. The gate never blocks; it only reports.

use crate::state::hash_bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::ConformanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Syntax,
    TypeCheck,
    ConformanceStyle,
    ConformanceArchitecture,
    ConformanceSecurity,
    TestsAffected,
}

impl Layer {
    pub fn ordered() -> [Layer; 6] {
        [
            Layer::Syntax,
            Layer::TypeCheck,
            Layer::ConformanceStyle,
            Layer::ConformanceArchitecture,
            Layer::ConformanceSecurity,
            Layer::TestsAffected,
        ]
    }

    pub fn key(self) -> &'static str {
        match self {
            Layer::Syntax => "syntax",
            Layer::TypeCheck => "type_check",
            Layer::ConformanceStyle => "conformance_style",
            Layer::ConformanceArchitecture => "conformance_architecture",
            Layer::ConformanceSecurity => "conformance_security",
            Layer::TestsAffected => "tests_affected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub duration_ms: u64,
}

/// The bundle produced after one code-edit action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationBundle {
    pub results: HashMap<String, LayerResult>,
}

impl VerificationBundle {
    pub fn passed_all(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|r| r.passed)
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerResult> {
        self.results.get(layer.key())
    }
}

/// Configuration for one checker: the command to run, templated with
/// `{files}` replaced by a JSON array of modified paths passed on stdin.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub layer: Layer,
    pub command: Option<String>,
    pub timeout: Duration,
}

pub struct ConformanceGate {
    checkers: Vec<CheckerConfig>,
    cache: HashMap<(String, String), LayerResult>,
}

impl ConformanceGate {
    pub fn new(checkers: Vec<CheckerConfig>) -> Self {
        Self {
            checkers,
            cache: HashMap::new(),
        }
    }

    /// Run all configured layers in cost order over the given files, short
    /// circuiting remaining layers only when syntax itself fails to spawn.
    pub async fn run(&mut self, modified_files: &[String], file_contents: &HashMap<String, Vec<u8>>) -> VerificationBundle {
        let mut bundle = VerificationBundle::default();
        for layer in Layer::ordered() {
            let Some(cfg) = self.checkers.iter().find(|c| c.layer == layer) else {
                continue;
            };
            let cache_key = (layer.key().to_string(), cache_fingerprint(modified_files, file_contents));
            if let Some(cached) = self.cache.get(&cache_key) {
                bundle.results.insert(layer.key().to_string(), cached.clone());
                continue;
            }
            let result = match &cfg.command {
                None => LayerResult {
                    passed: true,
                    violations: Vec::new(),
                    duration_ms: 0,
                },
                Some(cmd) => run_checker(cmd, layer, modified_files, cfg.timeout)
                    .await
                    .unwrap_or_else(|e| LayerResult {
                        passed: false,
                        violations: vec![Violation {
                            file: String::new(),
                            line: None,
                            message: e.to_string(),
                            rule: None,
                        }],
                        duration_ms: 0,
                    }),
            };
            self.cache.insert(cache_key, result.clone());
            bundle.results.insert(layer.key().to_string(), result);
        }
        bundle
    }
}

fn cache_fingerprint(files: &[String], contents: &HashMap<String, Vec<u8>>) -> String {
    let mut buf = Vec::new();
    for f in files {
        buf.extend_from_slice(f.as_bytes());
        if let Some(bytes) = contents.get(f) {
            buf.extend_from_slice(bytes);
        }
    }
    hash_bytes(&buf)
}

async fn run_checker(
    command: &str,
    layer: Layer,
    modified_files: &[String],
    dur: Duration,
) -> Result<LayerResult, ConformanceError> {
    let start = std::time::Instant::now();
    let payload = serde_json::json!({ "files": modified_files });

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ConformanceError::SpawnFailed {
            layer: layer.key().to_string(),
            source: e,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let _ = stdin.write_all(&bytes).await;
    }

    let output = timeout(dur, child.wait_with_output())
        .await
        .map_err(|_| ConformanceError::Timeout(layer.key().to_string()))?
        .map_err(|e| ConformanceError::SpawnFailed {
            layer: layer.key().to_string(),
            source: e,
        })?;

    let duration_ms = start.elapsed().as_millis() as u64;

    if !output.status.success() {
        return Err(ConformanceError::CheckerFailed {
            layer: layer.key().to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let violations: Vec<Violation> = if stdout.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(stdout.trim())
            .map_err(|e| ConformanceError::UnparseableOutput(layer.key().to_string(), e.to_string()))?
    };

    Ok(LayerResult {
        passed: violations.is_empty(),
        violations,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_bundle_passed_all_requires_nonempty() {
        let bundle = VerificationBundle::default();
        assert!(!bundle.passed_all());
    }

    #[test]
    fn verification_bundle_passed_all_true_when_every_layer_passes() {
        let mut bundle = VerificationBundle::default();
        bundle.results.insert(
            Layer::Syntax.key().to_string(),
            LayerResult {
                passed: true,
                violations: vec![],
                duration_ms: 1,
            },
        );
        assert!(bundle.passed_all());
    }

    #[test]
    fn verification_bundle_passed_all_false_when_any_layer_fails() {
        let mut bundle = VerificationBundle::default();
        bundle.results.insert(
            Layer::Syntax.key().to_string(),
            LayerResult {
                passed: true,
                violations: vec![],
                duration_ms: 1,
            },
        );
        bundle.results.insert(
            Layer::TypeCheck.key().to_string(),
            LayerResult {
                passed: false,
                violations: vec![Violation {
                    file: "a.rs".into(),
                    line: Some(5),
                    message: "type mismatch".into(),
                    rule: None,
                }],
                duration_ms: 1,
            },
        );
        assert!(!bundle.passed_all());
    }

    #[tokio::test]
    async fn layer_with_no_command_trivially_passes() {
        let mut gate = ConformanceGate::new(vec![CheckerConfig {
            layer: Layer::TypeCheck,
            command: None,
            timeout: Duration::from_secs(5),
        }]);
        let bundle = gate.run(&["a.rs".into()], &HashMap::new()).await;
        assert!(bundle.layer(Layer::TypeCheck).unwrap().passed);
    }

    #[tokio::test]
    async fn checker_reporting_no_violations_passes() {
        let mut gate = ConformanceGate::new(vec![CheckerConfig {
            layer: Layer::ConformanceStyle,
            command: Some("echo '[]'".to_string()),
            timeout: Duration::from_secs(5),
        }]);
        let bundle = gate.run(&["a.rs".into()], &HashMap::new()).await;
        assert!(bundle.layer(Layer::ConformanceStyle).unwrap().passed);
    }

    #[tokio::test]
    async fn checker_reporting_violations_fails() {
        let mut gate = ConformanceGate::new(vec![CheckerConfig {
            layer: Layer::ConformanceSecurity,
            command: Some(
                "echo '[{\"file\":\"a.rs\",\"message\":\"possible sql injection\"}]'".to_string(),
            ),
            timeout: Duration::from_secs(5),
        }]);
        let bundle = gate.run(&["a.rs".into()], &HashMap::new()).await;
        let result = bundle.layer(Layer::ConformanceSecurity).unwrap();
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
    }
}
