//! OpenAI Chat Completions adapter (spec.md §4.2 "OpenAI adapter").
//!
//! Accepts both string and structured ("vision" array) content. Combines
//! modern `tools`+`tool_choice` with legacy `functions`+`function_call`,
//! preferring the modern fields. On response emission, a single function
//! tool-call gets mirrored into the legacy `function_call` field for
//! backward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::{Adapter, AdapterError};
use crate::schema;

pub const DEFAULT_HOST: &str = "api.openai.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Legacy pre-tools function calling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<ToolChoice>,
    #[serde(flatten, default)]
    pub extra: Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlObj },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrlObj {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default = "function_tag")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDef {
    Function { function: FunctionDef },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Named {
        #[serde(rename = "type")]
        kind: String,
        function: NamedFunction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}

fn function_tag() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn content_to_internal(content: Option<MessageContent>) -> schema::Content {
    match content {
        None => schema::Content::empty(),
        Some(MessageContent::Text(t)) => schema::Content::text(t),
        Some(MessageContent::Parts(parts)) => {
            let blocks = parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Text { text } => schema::ContentBlock::Text { text },
                    ContentPart::ImageUrl { image_url } => schema::ContentBlock::Image {
                        image_url: schema::ImageUrl { url: image_url.url },
                    },
                })
                .collect();
            schema::Content::blocks(blocks)
        },
    }
}

fn content_from_internal(content: &schema::Content) -> Option<MessageContent> {
    if let Some(s) = content.as_str() {
        return Some(MessageContent::Text(s.to_string()));
    }
    content.as_blocks().map(|blocks| {
        MessageContent::Parts(
            blocks
                .iter()
                .map(|b| match b {
                    schema::ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
                    schema::ContentBlock::Image { image_url } => ContentPart::ImageUrl {
                        image_url: ImageUrlObj {
                            url: image_url.url.clone(),
                        },
                    },
                })
                .collect(),
        )
    })
}

fn role_to_internal(role: &str) -> schema::Role {
    match role {
        "system" | "developer" => schema::Role::System,
        "assistant" => schema::Role::Assistant,
        "tool" | "function" => schema::Role::Tool,
        _ => schema::Role::User,
    }
}

fn role_from_internal(role: schema::Role) -> &'static str {
    match role {
        schema::Role::System => "system",
        schema::Role::User => "user",
        schema::Role::Assistant => "assistant",
        schema::Role::Tool => "tool",
    }
}

fn message_to_internal(m: Message) -> schema::Message {
    let role = role_to_internal(&m.role);
    let content = content_to_internal(m.content);
    let assistant = if role == schema::Role::Assistant {
        let tool_calls = m
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| schema::ToolCall {
                id: c.id,
                kind: c.kind,
                function: schema::FunctionCall {
                    name: c.function.name,
                    arguments: c.function.arguments,
                },
            })
            .collect::<Vec<_>>();
        if !tool_calls.is_empty() || m.refusal.is_some() {
            Some(schema::AssistantExtra {
                tool_calls,
                thought: None,
                refusal: m.refusal,
            })
        } else {
            None
        }
    } else {
        None
    };
    let tool = if role == schema::Role::Tool {
        m.tool_call_id.map(|id| schema::ToolExtra {
            tool_call_id: id,
            image: None,
        })
    } else {
        None
    };
    schema::Message {
        role,
        content,
        assistant,
        tool,
    }
}

fn message_from_internal(m: &schema::Message) -> Message {
    let tool_calls = m.assistant.as_ref().map(|a| {
        a.tool_calls
            .iter()
            .map(|c| ToolCall {
                id: c.id.clone(),
                kind: c.kind.clone(),
                function: FunctionCall {
                    name: c.function.name.clone(),
                    arguments: c.function.arguments.clone(),
                },
            })
            .collect::<Vec<_>>()
    });
    // Backward-compat mirror: exactly one function tool-call also gets a
    // legacy `function_call` field populated.
    let function_call = match tool_calls.as_deref() {
        Some([single]) => Some(FunctionCall {
            name: single.function.name.clone(),
            arguments: single.function.arguments.clone(),
        }),
        _ => None,
    };
    Message {
        role: role_from_internal(m.role).to_string(),
        content: content_from_internal(&m.content),
        name: None,
        tool_calls: tool_calls.filter(|v| !v.is_empty()),
        tool_call_id: m.tool.as_ref().map(|t| t.tool_call_id.clone()),
        function_call,
        refusal: m.assistant.as_ref().and_then(|a| a.refusal.clone()),
    }
}

fn tools_and_choice_to_internal(req: &Request) -> (Vec<schema::Tool>, Option<schema::ToolChoice>) {
    // Modern fields take precedence over legacy ones when both are present.
    let tools = if let Some(tools) = &req.tools {
        tools
            .iter()
            .map(|ToolDef::Function { function }| schema::Tool {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: function.parameters.clone(),
            })
            .collect()
    } else if let Some(functions) = &req.functions {
        functions
            .iter()
            .map(|f| schema::Tool {
                name: f.name.clone(),
                description: f.description.clone(),
                parameters: f.parameters.clone(),
            })
            .collect()
    } else {
        vec![]
    };

    let choice_source = req.tool_choice.as_ref().or(req.function_call.as_ref());
    let choice = choice_source.map(|c| match c {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "none" => schema::ToolChoice::None,
            "required" => schema::ToolChoice::Required,
            // Unknown strings fall back to auto (spec.md §4.2).
            _ => schema::ToolChoice::Auto,
        },
        ToolChoice::Named { function, .. } => schema::ToolChoice::Function {
            name: function.name.clone(),
        },
    });

    (tools, choice)
}

pub struct ChatAdapter;

impl Adapter for ChatAdapter {
    type Request = Request;
    type Response = Response;
    type Error = ErrorResponse;

    fn new_request() -> Self::Request {
        Request::default()
    }

    fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError> {
        let model = native
            .model
            .clone()
            .ok_or_else(|| AdapterError::MissingField("model".into()))?;
        let (tools, tool_choice) = tools_and_choice_to_internal(&native);
        let messages = native
            .messages
            .into_iter()
            .map(message_to_internal)
            .collect();
        let params = schema::Params {
            temperature: native.temperature,
            top_p: native.top_p,
            max_tokens: native.max_tokens,
            stop: None,
            tools,
            tool_choice,
            stream: native.stream,
            extra: native.extra,
        };
        Ok(schema::Request {
            provider: schema::Provider::OpenAI,
            model,
            input: schema::Input::Chat { messages },
            params: Some(params),
            fallbacks: vec![],
        })
    }

    fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        let choices = resp
            .choices
            .iter()
            .map(|c| Choice {
                index: c.index,
                message: Some(message_from_internal(c.content.message())),
                delta: None,
                finish_reason: c.finish_reason.clone(),
            })
            .collect();
        Ok(Response {
            id: resp.id.clone(),
            object: "chat.completion".to_string(),
            created: resp.created,
            model: resp.model.clone(),
            choices,
            usage: resp.usage.as_ref().map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            }),
        })
    }

    fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
        ErrorResponse {
            error: ErrorBody {
                message: err.error.message.clone(),
                kind: err
                    .error
                    .error_type
                    .clone()
                    .unwrap_or_else(|| "internal_error".to_string()),
                code: err.status_code.map(|c| c.to_string()),
            },
        }
    }

    fn from_internal_stream_chunk(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        let choices = resp
            .choices
            .iter()
            .map(|c| Choice {
                index: c.index,
                message: None,
                delta: Some(message_from_internal(c.content.message())),
                finish_reason: c.finish_reason.clone(),
            })
            .collect();
        Ok(Response {
            id: resp.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: resp.created,
            model: resp.model.clone(),
            choices,
            usage: resp.usage.as_ref().map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            }),
        })
    }

    fn is_streaming_requested(native: &Self::Request) -> bool {
        native.stream.unwrap_or(false)
    }
}

/// `/openai/v1/embeddings` — carried through close to verbatim; Bifrost
/// only needs `model` and the input text(s) to build an internal request.
pub mod embeddings {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub model: Option<String>,
        pub input: schema::EmbeddingInput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub encoding_format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub dimensions: Option<u64>,
        #[serde(flatten, default)]
        pub extra: Map<String, serde_json::Value>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Response {
        pub object: String,
        pub model: String,
        pub data: Vec<EmbeddingData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub usage: Option<Usage>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct EmbeddingData {
        pub index: u32,
        pub embedding: Vec<f32>,
        pub object: String,
    }

    pub struct EmbeddingsAdapter;

    impl Adapter for EmbeddingsAdapter {
        type Request = Request;
        type Response = Response;
        type Error = ErrorResponse;

        fn new_request() -> Self::Request {
            Request::default()
        }

        fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError> {
            let model = native
                .model
                .clone()
                .ok_or_else(|| AdapterError::MissingField("model".into()))?;
            let params = schema::Params {
                extra: native.extra,
                ..Default::default()
            };
            let params = encoding_format_passthrough(native.encoding_format, native.dimensions, params);
            Ok(schema::Request {
                provider: schema::Provider::OpenAI,
                model,
                input: schema::Input::Embedding { input: native.input },
                params: Some(params),
                fallbacks: vec![],
            })
        }

        fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
            let data = resp
                .choices
                .iter()
                .map(|c| {
                    let embedding = c.content.as_embedding().ok_or_else(|| {
                        AdapterError::ResponseParse("choice did not carry an embedding vector".into())
                    })?;
                    Ok(EmbeddingData {
                        index: c.index,
                        embedding: embedding.to_vec(),
                        object: "embedding".to_string(),
                    })
                })
                .collect::<Result<Vec<_>, AdapterError>>()?;
            Ok(Response {
                object: "list".to_string(),
                model: resp.model.clone(),
                data,
                usage: resp.usage.as_ref().map(|u| Usage {
                    prompt_tokens: u.prompt_tokens.unwrap_or(0),
                    completion_tokens: 0,
                    total_tokens: u.total_tokens.unwrap_or(0),
                }),
            })
        }

        fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
            ChatAdapter::from_internal_error(err)
        }
    }

    fn encoding_format_passthrough(
        encoding_format: Option<String>,
        dimensions: Option<u64>,
        mut params: schema::Params,
    ) -> schema::Params {
        if let Some(ef) = encoding_format {
            params.extra.insert("encoding_format".into(), ef.into());
        }
        if let Some(d) = dimensions {
            params.extra.insert("dimensions".into(), d.into());
        }
        params
    }
}

/// `/openai/v1/audio/speech` — text-to-speech. Unlike every other route
/// the response body isn't JSON at all but raw audio bytes, so
/// `SpeechAdapter::Response` is `Vec<u8>` and the route that mounts it
/// (`crate::router`) renders it directly rather than through `Json`.
pub mod speech {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub model: Option<String>,
        #[serde(default)]
        pub input: String,
        #[serde(default)]
        pub voice: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub response_format: Option<String>,
    }

    pub struct SpeechAdapter;

    impl Adapter for SpeechAdapter {
        type Request = Request;
        type Response = Vec<u8>;
        type Error = ErrorResponse;

        fn new_request() -> Self::Request {
            Request::default()
        }

        fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError> {
            let model = native
                .model
                .clone()
                .ok_or_else(|| AdapterError::MissingField("model".into()))?;
            Ok(schema::Request {
                provider: schema::Provider::OpenAI,
                model,
                input: schema::Input::Speech {
                    input: schema::SpeechInput {
                        text: native.input,
                        voice: native.voice,
                        format: native.response_format,
                    },
                },
                params: None,
                fallbacks: vec![],
            })
        }

        fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
            resp.audio
                .clone()
                .ok_or_else(|| AdapterError::ResponseParse("upstream did not return audio bytes".into()))
        }

        fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
            ChatAdapter::from_internal_error(err)
        }
    }
}

/// `/openai/v1/audio/transcriptions` — speech-to-text. The multipart body
/// is parsed at the route boundary (spec.md §4.3 step 1) into
/// `schema::TranscriptionInput` before this adapter ever sees it, so
/// `Request` here already carries decoded fields rather than raw
/// multipart parts.
pub mod transcription {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub model: Option<String>,
        #[serde(flatten)]
        pub input: schema::TranscriptionInput,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Response {
        pub text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub duration: Option<f64>,
    }

    pub struct TranscriptionAdapter;

    impl Adapter for TranscriptionAdapter {
        type Request = Request;
        type Response = Response;
        type Error = ErrorResponse;

        fn new_request() -> Self::Request {
            Request::default()
        }

        fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError> {
            let model = native
                .model
                .clone()
                .ok_or_else(|| AdapterError::MissingField("model".into()))?;
            Ok(schema::Request {
                provider: schema::Provider::OpenAI,
                model,
                input: schema::Input::Transcription { input: native.input },
                params: None,
                fallbacks: vec![],
            })
        }

        fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
            let choice = resp
                .choices
                .first()
                .ok_or_else(|| AdapterError::ResponseParse("upstream returned no transcription choice".into()))?;
            let text = choice.content.message().content.as_str().unwrap_or_default().to_string();
            Ok(Response {
                text,
                language: None,
                duration: resp.usage.as_ref().and_then(|u| u.audio_seconds),
            })
        }

        fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
            ChatAdapter::from_internal_error(err)
        }
    }
}

/// `/openai/deployments/{deployment-id}/...`. Same wire shape as chat
/// completions; the only difference is that the route's pre-callback
/// (`crate::route`) has already rewritten `model` to `azure/<deployment>`
/// before `to_internal` runs, and that rewrite is unconditional — the
/// deployment segment always wins over whatever `model` was in the body
/// (spec.md §4.2 "Azure variant", testable property 9).
pub struct AzureChatAdapter;

impl Adapter for AzureChatAdapter {
    type Request = Request;
    type Response = Response;
    type Error = ErrorResponse;

    fn new_request() -> Self::Request {
        Request::default()
    }

    fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError> {
        let mut internal = ChatAdapter::to_internal(native)?;
        internal.provider = schema::Provider::Azure;
        Ok(internal)
    }

    fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        ChatAdapter::from_internal(resp)
    }

    fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
        ChatAdapter::from_internal_error(err)
    }

    fn from_internal_stream_chunk(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        ChatAdapter::from_internal_stream_chunk(resp)
    }

    fn is_streaming_requested(native: &Self::Request) -> bool {
        ChatAdapter::is_streaming_requested(native)
    }
}

/// Rewrite the deployment-id path segment into `azure/<deployment>`,
/// unconditionally overriding whatever `model` the request body carried.
pub fn apply_deployment_id(req: &mut Request, deployment_id: &str) {
    req.model = Some(format!("azure/{deployment_id}"));
}
