//! Streaming response event shape for the real LLM backend.
//!
//! Parses the assistant/tool-use/result event shape a stream-json-speaking
//! backend emits on stdout, one JSON object per line.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum LlmEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System { subtype: String },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_tool_use_event() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"edit_file","input":{"path":"a.rs"},"id":"1"}]},"session_id":"s1"}"#;
        let event: LlmEvent = serde_json::from_str(json).unwrap();
        match event {
            LlmEvent::Assistant { message, .. } => match &message.content[0] {
                ContentBlock::ToolUse { name, .. } => assert_eq!(name, "edit_file"),
                _ => panic!("expected tool use"),
            },
            _ => panic!("expected assistant event"),
        }
    }

    #[test]
    fn parses_result_event() {
        let json = r#"{"type":"result","subtype":"success","result":"done","is_error":false}"#;
        let event: LlmEvent = serde_json::from_str(json).unwrap();
        match event {
            LlmEvent::Result { result, is_error, .. } => {
                assert_eq!(result.as_deref(), Some("done"));
                assert!(!is_error);
            }
            _ => panic!("expected result event"),
        }
    }
}
