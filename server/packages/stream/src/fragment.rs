use agent_chat_error::ChatError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker in front of every event payload line.
pub const DATA_PREFIX: &str = "data: ";

/// One `data:` payload from an agent reply stream.
///
/// Tool metadata is kept as raw JSON. Only `content` is ever applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub function_arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<TargetAgent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAgent {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    pub status: String,
}

impl StreamFragment {
    /// Text to append, if any. Empty strings count as no content.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|content| !content.is_empty())
    }

    pub fn has_tool_activity(&self) -> bool {
        self.tool_call.is_some() || self.tool.is_some()
    }

    /// Typed view of `tool_call`, when it has the documented shape.
    pub fn tool_call_info(&self) -> Option<ToolCall> {
        self.tool_call
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn tool_result_info(&self) -> Option<ToolResult> {
        self.tool
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Parses one line of a reply stream.
///
/// Returns `None` for lines that are not `data: ` events (blank separators,
/// comments, `event:` fields).
pub fn parse_data_line(line: &str) -> Option<Result<StreamFragment, ChatError>> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(
        serde_json::from_str::<StreamFragment>(payload).map_err(|err| ChatError::FragmentParse {
            message: err.to_string(),
        }),
    )
}
