use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity tag of a captured console line, mirroring the five console
/// methods exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Log,
    /// `console.info`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
    /// `console.debug`
    Debug,
}

impl ConsoleLevel {
    /// Lower-case name as it appears in captured output.
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Debug => "debug",
        }
    }
}

/// One captured console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    /// Which console method produced the line.
    pub level: ConsoleLevel,
    /// The arguments joined by single spaces.
    pub text: String,
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level.as_str(), self.text)
    }
}

/// Where a code submission came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecSource {
    /// `POST /v1/execute`
    #[default]
    Api,
    /// Startup script directory.
    File,
    /// MCP tool call.
    Mcp,
}

impl ExecSource {
    /// Lower-case name as stored in the `source` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecSource::Api => "api",
            ExecSource::File => "file",
            ExecSource::Mcp => "mcp",
        }
    }
}

impl fmt::Display for ExecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one code submission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    /// The completion value of the submitted code, exported to JSON.
    pub value: Value,
    /// Console lines captured during the evaluation, in order.
    #[serde(rename = "consoleLog")]
    pub console: Vec<ConsoleLine>,
    /// Error message when the evaluation threw or failed to parse.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Result carrying only an error.
    pub fn from_error(error: impl fmt::Display) -> Self {
        Self {
            value: Value::Null,
            console: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// The captured console rendered one `"[level] text"` line per entry.
    pub fn console_text(&self) -> String {
        self.console
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_lines_render_with_level_tag() {
        let result = ExecutionResult {
            value: Value::Null,
            console: vec![
                ConsoleLine {
                    level: ConsoleLevel::Log,
                    text: "a b".into(),
                },
                ConsoleLine {
                    level: ConsoleLevel::Warn,
                    text: "careful".into(),
                },
            ],
            error: None,
        };
        assert_eq!(result.console_text(), "[log] a b\n[warn] careful");
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ExecSource::File).unwrap(), "\"file\"");
        assert_eq!(ExecSource::Mcp.to_string(), "mcp");
    }
}
