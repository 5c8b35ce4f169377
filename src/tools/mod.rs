//! Tool dispatch and policy enforcement (C4).
//!
//! Every tool invocation an agent requests is checked against an allow/deny
//! policy before it is dispatched — a declarative allow/disallow table per
//! agent, plus path constraints on filesystem-touching tools.

use crate::errors::ToolError;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A path constraint: a glob the argument path must (or must not) match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConstraint {
    pub pattern: String,
    #[serde(default)]
    pub negate: bool,
}

impl PathConstraint {
    fn allows(&self, path: &str) -> bool {
        let matched = Pattern::new(&self.pattern)
            .map(|p| p.matches(path))
            .unwrap_or(false);
        matched != self.negate
    }
}

/// Per-agent tool access policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub forbidden_tools: Vec<String>,
    #[serde(default)]
    pub path_constraints: HashMap<String, Vec<PathConstraint>>,
    #[serde(default)]
    pub allow_network: bool,
}

impl ToolPolicy {
    pub fn permits(&self, tool_name: &str) -> Result<(), ToolError> {
        if self.forbidden_tools.iter().any(|t| t == tool_name) {
            return Err(ToolError::Forbidden {
                tool: tool_name.to_string(),
            });
        }
        if !self.allowed_tools.is_empty() && !self.allowed_tools.iter().any(|t| t == tool_name) {
            return Err(ToolError::NotAllowed {
                tool: tool_name.to_string(),
            });
        }
        Ok(())
    }

    fn check_path(&self, tool_name: &str, path: &str) -> Result<(), ToolError> {
        if let Some(constraints) = self.path_constraints.get(tool_name) {
            for c in constraints {
                if !c.allows(path) {
                    return Err(ToolError::PathConstraintViolated {
                        tool: tool_name.to_string(),
                        path: path.to_string(),
                        constraint: c.pattern.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A tool's declared call signature and the handler invoked to execute it.
pub type ToolHandler = Box<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, ToolError> + Send + Sync>;

pub struct ToolDefinition {
    pub name: String,
    pub touches_path: bool,
    pub handler: ToolHandler,
}

#[derive(Default)]
pub struct ToolBridge {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Dispatch a tool call under the given policy. Checks registration,
    /// then policy (allow/forbid), then path constraints for
    /// filesystem-touching tools, before running the handler.
    pub fn dispatch(
        &self,
        policy: &ToolPolicy,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        policy.permits(tool_name)?;

        if tool.touches_path {
            if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                policy.check_path(tool_name, path)?;
            }
        }

        (tool.handler)(args)
    }
}

/// A tool bridge wired to real filesystem/process handlers rooted at
/// `project_dir`: `read_file`, `edit_file`, `list_files`, and `run_command`.
/// Used by the CLI's stage runs; tests build bare bridges with their own
/// no-op handlers instead.
pub fn filesystem_bridge(project_dir: std::path::PathBuf) -> ToolBridge {
    let mut bridge = ToolBridge::new();

    let read_root = project_dir.clone();
    bridge.register(ToolDefinition {
        name: "read_file".to_string(),
        touches_path: true,
        handler: Box::new(move |args| {
            let path = args
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::ExecutionFailed {
                    tool: "read_file".to_string(),
                    message: "missing 'path' argument".to_string(),
                })?;
            let content = std::fs::read_to_string(read_root.join(path)).map_err(|e| ToolError::ExecutionFailed {
                tool: "read_file".to_string(),
                message: e.to_string(),
            })?;
            Ok(serde_json::json!({ "content": content }))
        }),
    });

    let edit_root = project_dir.clone();
    bridge.register(ToolDefinition {
        name: "edit_file".to_string(),
        touches_path: true,
        handler: Box::new(move |args| {
            let path = args
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::ExecutionFailed {
                    tool: "edit_file".to_string(),
                    message: "missing 'path' argument".to_string(),
                })?;
            let content = args.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            let full = edit_root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
                    tool: "edit_file".to_string(),
                    message: e.to_string(),
                })?;
            }
            std::fs::write(&full, content).map_err(|e| ToolError::ExecutionFailed {
                tool: "edit_file".to_string(),
                message: e.to_string(),
            })?;
            Ok(serde_json::json!({ "path": path, "bytes_written": content.len() }))
        }),
    });

    let list_root = project_dir.clone();
    bridge.register(ToolDefinition {
        name: "list_files".to_string(),
        touches_path: false,
        handler: Box::new(move |_args| {
            let files: Vec<String> = walkdir::WalkDir::new(&list_root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.path().strip_prefix(&list_root).ok().map(|p| p.display().to_string()))
                .collect();
            Ok(serde_json::json!({ "files": files }))
        }),
    });

    let run_root = project_dir;
    bridge.register(ToolDefinition {
        name: "run_command".to_string(),
        touches_path: false,
        handler: Box::new(move |args| {
            let command = args
                .get("command")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::ExecutionFailed {
                    tool: "run_command".to_string(),
                    message: "missing 'command' argument".to_string(),
                })?;
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&run_root)
                .output()
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: "run_command".to_string(),
                    message: e.to_string(),
                })?;
            Ok(serde_json::json!({
                "exit_code": output.status.code().unwrap_or(-1),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }))
        }),
    });

    bridge
}
