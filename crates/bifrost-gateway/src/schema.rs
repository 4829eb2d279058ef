//! Canonical (internal) request/response/error schema — C1.
//!
//! Every field that is heterogeneous on the wire across vendors is
//! normalized here to one of two shapes: an explicit `string XOR blocks`
//! union with a hand-written codec that enforces mutual exclusion, or a
//! typed struct with optional fields. Adapters (`crate::llm`) are the only
//! code that should ever touch the messy vendor-native shapes; everything
//! downstream of `toInternal` sees only what's in this module.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One of the vendor backends a request can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Vertex,
    Azure,
    Cohere,
    Bedrock,
    Gemini,
    LiteLLM,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Vertex => "vertex",
            Provider::Azure => "azure",
            Provider::Cohere => "cohere",
            Provider::Bedrock => "bedrock",
            Provider::Gemini => "gemini",
            Provider::LiteLLM => "litellm",
        }
    }
}

/// The canonical request. Constructed by an adapter's `to_internal`, owned
/// by the route handler for the lifetime of one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub provider: Provider,
    pub model: String,
    pub input: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fallback {
    pub provider: Provider,
    pub model: String,
}

/// Exactly one of these is ever set for a given request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Input {
    Chat { messages: Vec<Message> },
    Text { text: String },
    Embedding { input: EmbeddingInput },
    Speech { input: SpeechInput },
    Transcription { input: TranscriptionInput },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    #[default]
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechInput {
    pub text: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionInput {
    /// Raw file bytes extracted by the multipart parser (§4.3 step 2).
    pub file: Vec<u8>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamp_granularities: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Sampling/tool-bundle parameters shared by (most) chat-shaped calls, plus
/// an `extra` escape hatch for whatever a provider-specific field doesn't
/// have a canonical home.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    None,
    Auto,
    Required,
    Function { name: String },
}

/// Chat message. `content` is either a bare string or a block array, never
/// both — see [`Content`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Content::is_empty")]
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantExtra>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolExtra>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: Content::text(text),
            assistant: None,
            tool: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: Content::text(text),
            assistant: None,
            tool: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantExtra {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExtra {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageUrl>,
}

/// `content.string` and `content.blocks` are mutually exclusive. Decoding
/// accepts both a bare JSON string and an array of blocks; encoding emits
/// whichever is set, `null` if neither, and errors if both are (testable
/// property 1 in spec.md §8).
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub string: Option<String>,
    pub blocks: Option<Vec<ContentBlock>>,
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Content {
            string: Some(s.into()),
            blocks: None,
        }
    }

    pub fn blocks(blocks: Vec<ContentBlock>) -> Self {
        Content {
            string: None,
            blocks: Some(blocks),
        }
    }

    pub fn empty() -> Self {
        Content::default()
    }

    pub fn is_empty(&self) -> bool {
        self.string.is_none() && self.blocks.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.string.as_deref()
    }

    pub fn as_blocks(&self) -> Option<&[ContentBlock]> {
        self.blocks.as_deref()
    }

    /// Best-effort plain text view, used by token estimation and logging:
    /// the string form verbatim, or the concatenation of text blocks.
    pub fn as_plain_text(&self) -> String {
        if let Some(s) = &self.string {
            return s.clone();
        }
        self
            .blocks
            .iter()
            .flatten()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

impl Serialize for Content {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (&self.string, &self.blocks) {
            (Some(_), Some(_)) => Err(serde::ser::Error::custom(
                "content: string and blocks are mutually exclusive",
            )),
            (Some(s), None) => serializer.serialize_str(s),
            (None, Some(blocks)) => blocks.serialize(serializer),
            (None, None) => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Content {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(Content::empty()),
            serde_json::Value::String(s) => Ok(Content::text(s)),
            serde_json::Value::Array(_) => {
                let blocks: Vec<ContentBlock> =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(Content::blocks(blocks))
            },
            other => Err(D::Error::custom(format!(
                "content must be a string or an array of blocks, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { image_url: ImageUrl },
}

/// A single URL string: either `data:<mime>;base64,<bytes>` for an inline
/// image, or a plain URL otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ImageUrl {
    pub fn data_uri(mime: &str, base64_bytes: &str) -> Self {
        ImageUrl {
            url: format!("data:{mime};base64,{base64_bytes}"),
        }
    }

    pub fn as_data_uri_parts(&self) -> Option<(&str, &str)> {
        let rest = self.url.strip_prefix("data:")?;
        let (mime, b64) = rest.split_once(";base64,")?;
        Some((mime, b64))
    }
}

/// `{id?, type="function", function:{name, arguments}}`. `arguments` is
/// always a JSON-encoded string in canonical form — see [`tool_args`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default = "ToolCall::default_type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    fn default_type() -> String {
        "function".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Helpers for the tool-call `arguments` wire string. Providers that carry
/// arguments as a parsed JSON object must round-trip through here rather
/// than pass the object straight through, so the canonical form stays a
/// string on every path (spec.md §4.1, testable property 2).
pub mod tool_args {
    use serde_json::Value;

    /// Parse a wire `arguments` string. On malformed JSON, substitute an
    /// empty object instead of failing the request.
    pub fn decode(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// Encode a value a provider carries as a parsed object back into the
    /// canonical string form. On encode failure (practically unreachable
    /// for `Value`, but not for arbitrary `T`), substitute `"{}"`.
    pub fn encode<T: serde::Serialize>(value: &T) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The canonical response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
    /// Raw synthesized audio bytes for speech (text-to-speech) responses;
    /// `None` for every other mode. Kept off `ChoiceContent` because a
    /// speech response has no choices to speak of, just a byte stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(flatten)]
    pub content: ChoiceContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_string: Option<String>,
}

/// A choice carries a finalized message (non-streaming), a streaming
/// delta, or an embedding vector — never more than one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceContent {
    Message { message: Message },
    Delta { delta: Message },
    Embedding { embedding: Vec<f32> },
}

impl ChoiceContent {
    /// Panics if this choice is an embedding vector, not a message — only
    /// chat-shaped adapters should call this.
    pub fn message(&self) -> &Message {
        match self {
            ChoiceContent::Message { message } => message,
            ChoiceContent::Delta { delta } => delta,
            ChoiceContent::Embedding { .. } => {
                panic!("choice holds an embedding vector, not a message")
            },
        }
    }

    pub fn message_mut(&mut self) -> &mut Message {
        match self {
            ChoiceContent::Message { message } => message,
            ChoiceContent::Delta { delta } => delta,
            ChoiceContent::Embedding { .. } => {
                panic!("choice holds an embedding vector, not a message")
            },
        }
    }

    pub fn as_embedding(&self) -> Option<&[f32]> {
        match self {
            ChoiceContent::Embedding { embedding } => Some(embedding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_token_details: Option<AudioTokenDetails>,
    #[serde(default)]
    pub is_cache_read: bool,
    #[serde(default)]
    pub is_batch: bool,
}

impl Usage {
    /// A usage block counts as "present" for stream-finalization purposes
    /// (spec.md §4.5) once it carries any non-zero token count.
    pub fn is_non_empty(&self) -> bool {
        self.prompt_tokens.unwrap_or(0) > 0
            || self.completion_tokens.unwrap_or(0) > 0
            || self.total_tokens.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTokenDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Extra {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none() && self.raw.is_none()
    }
}

/// The canonical error shape (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BifrostErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub is_bifrost_error: bool,
    pub provider: Provider,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
    #[serde(flatten, default)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}
