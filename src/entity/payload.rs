//! Payload shapes
//!
//! Typed shadows for the subset of LLM payload shapes whose internal text
//! needs to be reachable for the `content_summary` builder. Shapes with no
//! summary-relevant text (token usage aside, which has its own
//! denormalised columns) stay as `serde_json::Value` on the entity — the
//! wide-row/JSON-per-column design explicitly favours this over a
//! fully-typed union.

use serde::{Deserialize, Serialize};

/// One message in a chat-style input/output history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: ChatContent,
}

/// Chat message content is either a plain string or a list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Blocks(Vec<ChatContentBlock>),
}

impl Default for ChatContent {
    fn default() -> Self {
        ChatContent::Text(String::new())
    }
}

impl ChatContent {
    /// Every piece of user-visible text reachable from this content.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            ChatContent::Text(s) if !s.is_empty() => vec![s.as_str()],
            ChatContent::Text(_) => vec![],
            ChatContent::Blocks(blocks) => {
                blocks.iter().filter_map(|b| b.text.as_deref()).collect()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// One item in a `responses`-style input or output history. Items can be
/// ordinary messages, reasoning items (with a textual summary), or tool
/// calls; only the first two carry summary-relevant text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponsesItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ResponsesContentPart>,
    #[serde(default)]
    pub summary: Vec<ResponsesSummaryPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponsesContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponsesSummaryPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ResponsesItem {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .chain(self.summary.iter().filter_map(|s| s.text.as_deref()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpeechInput {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TranscriptionOutput {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImageGenerationInput {
    pub prompt: String,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Denormalised token usage, mirrored into `prompt_tokens`/`completion_tokens`/
/// `total_tokens` columns by the save hook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_content_text_variant_round_trips() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: ChatContent::Text("hello".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
        assert_eq!(back.content.texts(), vec!["hello"]);
    }

    #[test]
    fn chat_content_blocks_collect_text() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: ChatContent::Blocks(vec![
                ChatContentBlock { kind: "text".to_string(), text: Some("a".to_string()) },
                ChatContentBlock { kind: "image".to_string(), text: None },
                ChatContentBlock { kind: "text".to_string(), text: Some("b".to_string()) },
            ]),
        };
        assert_eq!(msg.content.texts(), vec!["a", "b"]);
    }

    #[test]
    fn responses_item_includes_reasoning_summary_text() {
        let item = ResponsesItem {
            kind: "reasoning".to_string(),
            role: None,
            content: vec![],
            summary: vec![ResponsesSummaryPart {
                kind: "summary_text".to_string(),
                text: Some("thinking...".to_string()),
            }],
        };
        let texts: Vec<&str> = item.texts().collect();
        assert_eq!(texts, vec!["thinking..."]);
    }
}
