//! Google GenAI / Vertex `generateContent` adapter (spec.md §4.2).
//!
//! Gemini's wire shape distinguishes part kinds by which optional field is
//! populated rather than by a tag, so [`Part`] mirrors that directly
//! instead of using an internal enum. `role: "model"` canonicalizes to our
//! `assistant`; `functionResponse` parts split out into their own
//! tool-role message the same way Anthropic's `tool_result` does.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Adapter, AdapterError};
use crate::schema;

pub const DEFAULT_HOST: &str = "generativelanguage.googleapis.com";

/// URL suffix Vertex/GenAI uses to request a streaming response; stripped
/// from the model path before dispatch and used to set `stream` instead.
pub const STREAM_URL_SUFFIX: &str = ":streamGenerateContent";
pub const EMBED_URL_SUFFIX: &str = ":embedContent";
pub const GENERATE_URL_SUFFIX: &str = ":generateContent";

/// Strip a `:generateContent`/`:streamGenerateContent`/`:embedContent`
/// suffix from a model path, reporting whether streaming was requested.
pub fn split_model_suffix(path: &str) -> (&str, bool) {
    if let Some(stripped) = path.strip_suffix(STREAM_URL_SUFFIX) {
        (stripped, true)
    } else if let Some(stripped) = path
        .strip_suffix(GENERATE_URL_SUFFIX)
        .or_else(|| path.strip_suffix(EMBED_URL_SUFFIX))
    {
        (stripped, false)
    } else {
        (path, false)
    }
}

/// Gemini inline-data `data` is base64 (standard alphabet in the public
/// API, URL-safe from some internal callers). Custom decoder: `-`/`_` are
/// mapped to `+`/`/` and padding restored before further processing, so
/// every blob this adapter emits or stores is standard-alphabet (spec.md
/// §4.2).
pub fn normalize_inline_data(data: &str) -> Result<String, AdapterError> {
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
        return Ok(base64::engine::general_purpose::STANDARD.encode(bytes));
    }
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| AdapterError::RequestParse(format!("invalid inline_data base64: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_code: Option<ExecutableCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<FunctionCallingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

fn role_to_internal(role: Option<&str>) -> schema::Role {
    match role {
        Some("model") => schema::Role::Assistant,
        _ => schema::Role::User,
    }
}

fn role_from_internal(role: schema::Role) -> &'static str {
    match role {
        schema::Role::Assistant => "model",
        _ => "user",
    }
}

/// One turn can expand into more than one internal message: a
/// `functionResponse` part always becomes its own tool-role message, parts
/// that are only images with no accompanying text are dropped from the
/// canonical content rather than invented as empty text blocks.
fn content_to_internal(turn: Content) -> Result<Vec<schema::Message>, AdapterError> {
    let role = role_to_internal(turn.role.as_deref());
    let mut out = Vec::new();
    let mut content_blocks = Vec::new();
    let mut tool_calls = Vec::new();
    let mut thought = None;

    for part in turn.parts {
        if let Some(text) = part.text {
            if part.thought == Some(true) {
                thought = Some(match thought {
                    Some(existing) => format!("{existing}\n{text}"),
                    None => text,
                });
            } else {
                content_blocks.push(schema::ContentBlock::Text { text });
            }
        } else if let Some(blob) = part.inline_data {
            if blob.mime_type.starts_with("image/") {
                let data = normalize_inline_data(&blob.data)?;
                content_blocks.push(schema::ContentBlock::Image {
                    image_url: schema::ImageUrl::data_uri(&blob.mime_type, &data),
                });
            }
        } else if let Some(call) = part.function_call {
            tool_calls.push(schema::ToolCall {
                id: call.id,
                kind: "function".to_string(),
                function: schema::FunctionCall {
                    name: call.name,
                    arguments: schema::tool_args::encode(&call.args),
                },
            });
        } else if let Some(response) = part.function_response {
            out.push(schema::Message {
                role: schema::Role::Tool,
                content: schema::Content::text(schema::tool_args::encode(&response.response)),
                assistant: None,
                tool: Some(schema::ToolExtra {
                    tool_call_id: response.id.unwrap_or_else(|| response.name.clone()),
                    image: None,
                }),
            });
        }
        // file_data / executable_code / code_execution_result parts carry
        // no canonical representation yet and are dropped.
    }

    let main_content = if content_blocks.is_empty() {
        schema::Content::empty()
    } else {
        schema::Content::blocks(content_blocks)
    };
    let assistant = if role == schema::Role::Assistant && (!tool_calls.is_empty() || thought.is_some()) {
        Some(schema::AssistantExtra {
            tool_calls,
            thought,
            refusal: None,
        })
    } else {
        None
    };
    if !main_content.is_empty() || assistant.is_some() {
        out.insert(
            0,
            schema::Message {
                role,
                content: main_content,
                assistant,
                tool: None,
            },
        );
    }
    Ok(out)
}

fn message_from_internal(message: &schema::Message) -> Result<Content, AdapterError> {
    let mut parts = Vec::new();
    if let Some(assistant) = &message.assistant {
        if let Some(thought) = &assistant.thought {
            parts.push(Part {
                text: Some(thought.clone()),
                thought: Some(true),
                ..Default::default()
            });
        }
    }
    if let Some(s) = message.content.as_str() {
        if !s.is_empty() {
            parts.push(Part {
                text: Some(s.to_string()),
                ..Default::default()
            });
        }
    } else if let Some(blocks) = message.content.as_blocks() {
        for b in blocks {
            match b {
                schema::ContentBlock::Text { text } => parts.push(Part {
                    text: Some(text.clone()),
                    ..Default::default()
                }),
                schema::ContentBlock::Image { image_url } => {
                    if let Some((mime, data)) = image_url.as_data_uri_parts() {
                        parts.push(Part {
                            inline_data: Some(Blob {
                                mime_type: mime.to_string(),
                                data: normalize_inline_data(data)?,
                            }),
                            ..Default::default()
                        });
                    }
                },
            }
        }
    }
    if let Some(assistant) = &message.assistant {
        for call in &assistant.tool_calls {
            parts.push(Part {
                function_call: Some(FunctionCall {
                    name: call.function.name.clone(),
                    args: super::parsed_arguments(call),
                    id: call.id.clone(),
                }),
                ..Default::default()
            });
        }
    }
    Ok(Content {
        role: Some(role_from_internal(message.role).to_string()),
        parts,
    })
}

pub struct GenerateContentAdapter;

impl Adapter for GenerateContentAdapter {
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
        let mut messages = Vec::new();
        if let Some(system) = native.system_instruction {
            let text: String = system
                .parts
                .iter()
                .filter_map(|p| p.text.clone())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                messages.push(schema::Message {
                    role: schema::Role::System,
                    content: schema::Content::text(text),
                    assistant: None,
                    tool: None,
                });
            }
        }
        for turn in native.contents {
            messages.extend(content_to_internal(turn)?);
        }
        let tools = native
            .tools
            .into_iter()
            .flat_map(|t| t.function_declarations)
            .map(|f| schema::Tool {
                name: f.name,
                description: f.description,
                parameters: f.parameters,
            })
            .collect();
        let tool_choice = native
            .tool_config
            .and_then(|c| c.function_calling_config)
            .and_then(|c| c.mode)
            .map(|mode| match mode.as_str() {
                "ANY" => schema::ToolChoice::Required,
                "NONE" => schema::ToolChoice::None,
                _ => schema::ToolChoice::Auto,
            });
        let params = schema::Params {
            temperature: native.generation_config.as_ref().and_then(|g| g.temperature),
            top_p: native.generation_config.as_ref().and_then(|g| g.top_p),
            max_tokens: native.generation_config.as_ref().and_then(|g| g.max_output_tokens),
            stop: native.generation_config.and_then(|g| g.stop_sequences),
            tools,
            tool_choice,
            stream: native.stream,
            extra: native.extra,
        };
        Ok(schema::Request {
            provider: schema::Provider::Gemini,
            model,
            input: schema::Input::Chat { messages },
            params: Some(params),
            fallbacks: vec![],
        })
    }

    fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        let choice = resp
            .choices
            .first()
            .ok_or_else(|| AdapterError::ResponseParse("no choices in response".into()))?;
        let message = choice.content.message();
        Ok(Response {
            model_version: Some(resp.model.clone()),
            candidates: vec![Candidate {
                content: message_from_internal(message)?,
                finish_reason: choice.finish_reason.clone(),
                index: choice.index,
            }],
            usage_metadata: resp.usage.as_ref().map(|u| UsageMetadata {
                prompt_token_count: u.prompt_tokens,
                candidates_token_count: u.completion_tokens,
                total_token_count: u.total_tokens,
            }),
        })
    }

    fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
        ErrorResponse {
            error: ErrorBody {
                code: err.status_code.unwrap_or(500),
                message: err.error.message.clone(),
                status: err.error.error_type.clone(),
            },
        }
    }

    fn is_streaming_requested(native: &Self::Request) -> bool {
        native.stream.unwrap_or(false)
    }
}
