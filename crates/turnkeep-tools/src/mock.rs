//! A scripted tool for exercising the run coordinator in tests (§6).

use crate::registry::{Tool, ToolResult};
use serde_json::Value;

/// A tool whose result is fixed at construction time, optionally echoing
/// back its input arguments.
pub struct MockTool {
    name: String,
    result: ToolResult,
    read_only: bool,
}

impl MockTool {
    pub fn new(name: impl Into<String>, result: ToolResult) -> Self {
        Self { name: name.into(), result, read_only: false }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[async_trait::async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "a scripted tool used in tests"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        self.result.clone()
    }
}
