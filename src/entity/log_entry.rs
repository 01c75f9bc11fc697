//! LogEntry — the canonical record of one LLM invocation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::payload::{
    ChatContent, ChatMessage, ErrorDetails, ImageGenerationInput, ResponsesItem, SpeechInput,
    TokenUsage, TranscriptionOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    ChatCompletion,
    TextCompletion,
    Embedding,
    Responses,
    ResponsesStream,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
    ImageGeneration,
    ListModels,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCompletion => "chat_completion",
            Self::TextCompletion => "text_completion",
            Self::Embedding => "embedding",
            Self::Responses => "responses",
            Self::ResponsesStream => "responses_stream",
            Self::Speech => "speech",
            Self::SpeechStream => "speech_stream",
            Self::Transcription => "transcription",
            Self::TranscriptionStream => "transcription_stream",
            Self::ImageGeneration => "image_generation",
            Self::ListModels => "list_models",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "chat_completion" => Self::ChatCompletion,
            "text_completion" => Self::TextCompletion,
            "embedding" => Self::Embedding,
            "responses" => Self::Responses,
            "responses_stream" => Self::ResponsesStream,
            "speech" => Self::Speech,
            "speech_stream" => Self::SpeechStream,
            "transcription" => Self::Transcription,
            "transcription_stream" => Self::TranscriptionStream,
            "image_generation" => Self::ImageGeneration,
            "list_models" => Self::ListModels,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Processing,
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "processing" => Self::Processing,
            "success" => Self::Success,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

pub fn now_iso() -> String {
    format_iso(Utc::now())
}

/// Format an arbitrary UTC instant the same way [`now_iso`] formats the
/// current one — millis precision, trailing `Z` — so every stored
/// timestamp (including ones derived from `now`, like an async job's
/// `expires_at`) is textually comparable with every other.
pub fn format_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// The on-disk row shape: every payload field is a JSON-string mirror
/// column. Exactly the columns belonging to `object_type` are expected to
/// be populated — the rest stay `None`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub created_at: String,
    pub object_type: String,
    pub provider: String,
    pub model: String,
    pub status: String,

    pub parent_request_id: Option<String>,
    pub selected_key_id: Option<String>,
    pub selected_key_name: Option<String>,
    pub virtual_key_id: Option<String>,
    pub virtual_key_name: Option<String>,
    pub fallback_index: Option<i64>,
    pub number_of_retries: Option<i64>,
    pub routing_rule_id: Option<String>,
    pub routing_rule_name: Option<String>,
    pub routing_engines_used: Option<String>,
    pub routing_engine_logs: Option<String>,

    pub input_history: Option<String>,
    pub responses_input_history: Option<String>,
    pub output_message: Option<String>,
    pub responses_output: Option<String>,
    pub embedding_output: Option<String>,
    pub list_models_output: Option<String>,
    pub image_generation_input: Option<String>,
    pub image_generation_output: Option<String>,
    pub speech_input: Option<String>,
    pub speech_output: Option<String>,
    pub transcription_input: Option<String>,
    pub transcription_output: Option<String>,
    pub tool_list: Option<String>,
    pub tool_call_list: Option<String>,
    pub model_parameters: Option<String>,
    pub token_usage: Option<String>,
    pub cache_debug: Option<String>,
    pub raw_request: Option<String>,
    pub raw_response: Option<String>,
    pub error_details: Option<String>,
    pub metadata: Option<String>,

    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub latency: Option<i64>,
    pub cost: Option<f64>,
    pub content_summary: Option<String>,
    pub completed_at: Option<String>,
}

/// In-memory shadow holding typed payloads. The codec (§4.4) stages writes
/// here, serialises into the mirror columns on save, and rebuilds this
/// shape on load — best-effort, per field.
#[derive(Debug, Clone, Default)]
pub struct LogEntryParsed {
    pub input_history: Option<Vec<ChatMessage>>,
    pub responses_input_history: Option<Vec<ResponsesItem>>,
    pub output_message: Option<ChatMessage>,
    pub responses_output: Option<Vec<ResponsesItem>>,
    pub embedding_output: Option<serde_json::Value>,
    pub list_models_output: Option<serde_json::Value>,
    pub image_generation_input: Option<ImageGenerationInput>,
    pub image_generation_output: Option<serde_json::Value>,
    pub speech_input: Option<SpeechInput>,
    pub speech_output: Option<serde_json::Value>,
    pub transcription_input: Option<serde_json::Value>,
    pub transcription_output: Option<TranscriptionOutput>,
    pub tool_list: Option<serde_json::Value>,
    pub tool_call_list: Option<serde_json::Value>,
    pub model_parameters: Option<serde_json::Value>,
    pub token_usage: Option<TokenUsage>,
    pub cache_debug: Option<serde_json::Value>,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
    pub error_details: Option<ErrorDetails>,
    pub metadata: Option<serde_json::Value>,
}

macro_rules! stage_field {
    ($row:expr, $parsed:expr, $field:ident) => {
        $row.$field = match &$parsed.$field {
            Some(v) => serde_json::to_string(v).ok(),
            None => None,
        };
    };
}

macro_rules! load_field {
    ($row:expr, $parsed:expr, $field:ident) => {
        $parsed.$field = match &$row.$field {
            Some(raw) if !raw.is_empty() => match serde_json::from_str(raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(field = stringify!($field), error = %e, "corrupt payload column, degrading to empty");
                    None
                },
            },
            _ => None,
        };
    };
}

impl LogEntry {
    /// Pre-save hook: serialise every populated parsed field into its
    /// mirror column, mirror token usage into the denormalised counters,
    /// and rebuild `content_summary`.
    pub fn prepare_save(&mut self, parsed: &LogEntryParsed) {
        stage_field!(self, parsed, input_history);
        stage_field!(self, parsed, responses_input_history);
        stage_field!(self, parsed, output_message);
        stage_field!(self, parsed, responses_output);
        stage_field!(self, parsed, embedding_output);
        stage_field!(self, parsed, list_models_output);
        stage_field!(self, parsed, image_generation_input);
        stage_field!(self, parsed, image_generation_output);
        stage_field!(self, parsed, speech_input);
        stage_field!(self, parsed, speech_output);
        stage_field!(self, parsed, transcription_input);
        stage_field!(self, parsed, transcription_output);
        stage_field!(self, parsed, tool_list);
        stage_field!(self, parsed, tool_call_list);
        stage_field!(self, parsed, model_parameters);
        stage_field!(self, parsed, token_usage);
        stage_field!(self, parsed, cache_debug);
        stage_field!(self, parsed, raw_request);
        stage_field!(self, parsed, raw_response);
        stage_field!(self, parsed, error_details);
        stage_field!(self, parsed, metadata);

        if let Some(usage) = &parsed.token_usage {
            self.prompt_tokens = Some(usage.prompt_tokens);
            self.completion_tokens = Some(usage.completion_tokens);
            self.total_tokens = Some(usage.total_tokens);
        }

        self.content_summary = Self::build_content_summary(parsed);
    }

    /// Post-load hook: deserialise each non-empty mirror column, degrading
    /// a single corrupt cell to the zero value instead of failing the read.
    pub fn after_load(&self) -> LogEntryParsed {
        let mut parsed = LogEntryParsed::default();
        load_field!(self, parsed, input_history);
        load_field!(self, parsed, responses_input_history);
        load_field!(self, parsed, output_message);
        load_field!(self, parsed, responses_output);
        load_field!(self, parsed, embedding_output);
        load_field!(self, parsed, list_models_output);
        load_field!(self, parsed, image_generation_input);
        load_field!(self, parsed, image_generation_output);
        load_field!(self, parsed, speech_input);
        load_field!(self, parsed, speech_output);
        load_field!(self, parsed, transcription_input);
        load_field!(self, parsed, transcription_output);
        load_field!(self, parsed, tool_list);
        load_field!(self, parsed, tool_call_list);
        load_field!(self, parsed, model_parameters);
        load_field!(self, parsed, token_usage);
        load_field!(self, parsed, cache_debug);
        load_field!(self, parsed, raw_request);
        load_field!(self, parsed, raw_response);
        load_field!(self, parsed, error_details);
        load_field!(self, parsed, metadata);
        parsed
    }

    /// Concatenate every piece of user-visible text reachable from the
    /// request/response, space-separated.
    fn build_content_summary(parsed: &LogEntryParsed) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();

        if let Some(history) = &parsed.input_history {
            for msg in history {
                parts.extend(msg.content.texts().into_iter().map(str::to_string));
            }
        }
        if let Some(history) = &parsed.responses_input_history {
            for item in history {
                parts.extend(item.texts().map(str::to_string));
            }
        }
        if let Some(msg) = &parsed.output_message {
            parts.extend(msg.content.texts().into_iter().map(str::to_string));
        }
        if let Some(history) = &parsed.responses_output {
            for item in history {
                parts.extend(item.texts().map(str::to_string));
            }
        }
        if let Some(speech) = &parsed.speech_input
            && !speech.text.is_empty()
        {
            parts.push(speech.text.clone());
        }
        if let Some(transcription) = &parsed.transcription_output
            && !transcription.text.is_empty()
        {
            parts.push(transcription.text.clone());
        }
        if let Some(image) = &parsed.image_generation_input
            && !image.prompt.is_empty()
        {
            parts.push(image.prompt.clone());
        }
        if let Some(err) = &parsed.error_details
            && !err.message.is_empty()
        {
            parts.push(err.message.clone());
        }

        if parts.is_empty() { None } else { Some(parts.join(" ")) }
    }

    /// Whether the populated payload columns are consistent with exactly
    /// one shape for `object_type`.
    pub fn has_single_shape(&self) -> bool {
        let populated = [
            self.input_history.is_some(),
            self.responses_input_history.is_some(),
            self.output_message.is_some(),
            self.responses_output.is_some(),
            self.embedding_output.is_some(),
            self.list_models_output.is_some(),
            self.image_generation_input.is_some() || self.image_generation_output.is_some(),
            self.speech_input.is_some() || self.speech_output.is_some(),
            self.transcription_input.is_some() || self.transcription_output.is_some(),
        ];
        populated.iter().filter(|p| **p).count() <= 1
    }
}

impl ChatContent {
    pub fn single_text(text: impl Into<String>) -> Self {
        ChatContent::Text(text.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::payload::ChatContentBlock;

    fn base_row(id: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: now_iso(),
            created_at: now_iso(),
            object_type: ObjectType::ChatCompletion.as_str().to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            status: LogStatus::Success.as_str().to_string(),
            parent_request_id: None,
            selected_key_id: None,
            selected_key_name: None,
            virtual_key_id: None,
            virtual_key_name: None,
            fallback_index: None,
            number_of_retries: None,
            routing_rule_id: None,
            routing_rule_name: None,
            routing_engines_used: None,
            routing_engine_logs: None,
            input_history: None,
            responses_input_history: None,
            output_message: None,
            responses_output: None,
            embedding_output: None,
            list_models_output: None,
            image_generation_input: None,
            image_generation_output: None,
            speech_input: None,
            speech_output: None,
            transcription_input: None,
            transcription_output: None,
            tool_list: None,
            tool_call_list: None,
            model_parameters: None,
            token_usage: None,
            cache_debug: None,
            raw_request: None,
            raw_response: None,
            error_details: None,
            metadata: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            latency: None,
            cost: None,
            content_summary: None,
            completed_at: None,
        }
    }

    #[test]
    fn content_summary_joins_input_and_output_text() {
        let mut row = base_row("log-1");
        let parsed = LogEntryParsed {
            input_history: Some(vec![ChatMessage {
                role: "user".to_string(),
                content: ChatContent::single_text("What is the capital of France?"),
            }]),
            output_message: Some(ChatMessage {
                role: "assistant".to_string(),
                content: ChatContent::single_text("Paris"),
            }),
            ..Default::default()
        };

        row.prepare_save(&parsed);

        let summary = row.content_summary.expect("summary should be built");
        assert!(summary.contains("What is the capital of France?"));
        assert!(summary.contains("Paris"));

        let reloaded = row.after_load();
        assert_eq!(
            reloaded.input_history.unwrap()[0].content,
            ChatContent::single_text("What is the capital of France?")
        );
        assert_eq!(reloaded.output_message.unwrap().content, ChatContent::single_text("Paris"));
    }

    #[test]
    fn token_usage_mirrors_into_denormalised_columns() {
        let mut row = base_row("log-2");
        let parsed = LogEntryParsed {
            token_usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
            ..Default::default()
        };
        row.prepare_save(&parsed);
        assert_eq!(row.prompt_tokens, Some(10));
        assert_eq!(row.completion_tokens, Some(5));
        assert_eq!(row.total_tokens, Some(15));
    }

    #[test]
    fn corrupt_payload_column_degrades_to_none_instead_of_failing() {
        let mut row = base_row("log-3");
        row.input_history = Some("{not valid json".to_string());
        let parsed = row.after_load();
        assert!(parsed.input_history.is_none());
    }

    #[test]
    fn single_shape_invariant_rejects_mixed_payloads() {
        let mut row = base_row("log-4");
        row.input_history = Some("[]".to_string());
        assert!(row.has_single_shape());
        row.embedding_output = Some("{}".to_string());
        assert!(!row.has_single_shape());
    }

    #[test]
    fn content_block_text_extraction_skips_non_text_blocks() {
        let content = ChatContent::Blocks(vec![
            ChatContentBlock { kind: "image_url".to_string(), text: None },
            ChatContentBlock { kind: "text".to_string(), text: Some("hello".to_string()) },
        ]);
        assert_eq!(content.texts(), vec!["hello"]);
    }
}
