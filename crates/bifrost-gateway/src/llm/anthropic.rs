//! Anthropic Messages adapter (spec.md §4.2 "Anthropic adapter").
//!
//! `content` and `system` both decode string XOR block-array. `tool_use`
//! blocks convert to tool calls; `tool_result` blocks convert to a
//! tool-role message. Image blocks convert inline base64 + media-type to a
//! `data:` URL. Response generation emits `thinking` / `text` / `tool_use`
//! blocks in that order, an empty array rather than `null` when there's no
//! content.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::{Adapter, AdapterError};
use crate::schema;

pub const DEFAULT_HOST: &str = "api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(flatten, default)]
    pub extra: Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Block>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemContent {
    Text(String),
    Blocks(Vec<Block>),
}

impl SystemContent {
    pub fn as_plain_text(&self) -> String {
        match self {
            SystemContent::Text(t) => t.clone(),
            SystemContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Block>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    None,
    Tool { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// A single native message can expand into more than one internal message:
/// `tool_result` blocks always become their own tool-role message, while
/// text/image/tool_use/thinking blocks merge into one message for the
/// turn. Open question (spec.md §9): whether `tool_result.content` may mix
/// text and image blocks is left ambiguous upstream; here it's permitted —
/// text blocks concatenate into the tool message's string content and the
/// first image block (if any) is attached via `ToolExtra::image`.
fn message_to_internal(m: Message) -> Vec<schema::Message> {
    let role = match m.role.as_str() {
        "assistant" => schema::Role::Assistant,
        _ => schema::Role::User,
    };
    let blocks: Vec<Block> = match m.content {
        MessageContent::Text(t) => {
            return vec![schema::Message {
                role,
                content: schema::Content::text(t),
                assistant: None,
                tool: None,
            }];
        },
        MessageContent::Blocks(b) => b,
    };

    let mut out = Vec::new();
    let mut content_blocks: Vec<schema::ContentBlock> = Vec::new();
    let mut tool_calls: Vec<schema::ToolCall> = Vec::new();
    let mut thought: Option<String> = None;

    for block in blocks {
        match block {
            Block::Text { text } => content_blocks.push(schema::ContentBlock::Text { text }),
            Block::Image { source: ImageSource::Base64 { media_type, data } } => {
                content_blocks.push(schema::ContentBlock::Image {
                    image_url: schema::ImageUrl::data_uri(&media_type, &data),
                });
            },
            Block::ToolUse { id, name, input } => {
                tool_calls.push(schema::ToolCall {
                    id: Some(id),
                    kind: "function".to_string(),
                    function: schema::FunctionCall {
                        name,
                        arguments: schema::tool_args::encode(&input),
                    },
                });
            },
            Block::Thinking { thinking } => {
                thought = Some(match thought {
                    Some(existing) => format!("{existing}\n{thinking}"),
                    None => thinking,
                });
            },
            Block::ToolResult { tool_use_id, content, .. } => {
                let (text, image) = match content {
                    None => (String::new(), None),
                    Some(ToolResultContent::Text(s)) => (s, None),
                    Some(ToolResultContent::Blocks(blocks)) => {
                        let mut text_parts = Vec::new();
                        let mut image = None;
                        for b in blocks {
                            match b {
                                Block::Text { text } => text_parts.push(text),
                                Block::Image { source: ImageSource::Base64 { media_type, data } } => {
                                    image.get_or_insert(schema::ImageUrl::data_uri(&media_type, &data));
                                },
                                other => text_parts.push(schema::tool_args::encode(&other)),
                            }
                        }
                        (text_parts.join(""), image)
                    },
                };
                out.push(schema::Message {
                    role: schema::Role::Tool,
                    content: schema::Content::text(text),
                    assistant: None,
                    tool: Some(schema::ToolExtra {
                        tool_call_id: tool_use_id,
                        image,
                    }),
                });
            },
        }
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
    out
}

fn tools_to_internal(tools: Option<Vec<Tool>>) -> Vec<schema::Tool> {
    tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| schema::Tool {
            name: t.name,
            description: t.description,
            parameters: Some(t.input_schema),
        })
        .collect()
}

fn tool_choice_to_internal(choice: Option<ToolChoice>) -> Option<schema::ToolChoice> {
    choice.map(|c| match c {
        ToolChoice::Tool { name } => schema::ToolChoice::Function { name },
        ToolChoice::Auto => schema::ToolChoice::Auto,
        ToolChoice::Any => schema::ToolChoice::Required,
        ToolChoice::None => schema::ToolChoice::None,
    })
}

pub struct MessagesAdapter;

impl Adapter for MessagesAdapter {
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
        let mut messages: Vec<schema::Message> = Vec::new();
        if let Some(system) = &native.system {
            let text = system.as_plain_text();
            if !text.is_empty() {
                messages.push(schema::Message {
                    role: schema::Role::System,
                    content: schema::Content::text(text),
                    assistant: None,
                    tool: None,
                });
            }
        }
        for m in native.messages {
            messages.extend(message_to_internal(m));
        }
        let params = schema::Params {
            temperature: native.temperature,
            top_p: native.top_p,
            max_tokens: Some(native.max_tokens),
            tools: tools_to_internal(native.tools),
            tool_choice: tool_choice_to_internal(native.tool_choice),
            stream: native.stream,
            extra: native.extra,
            ..Default::default()
        };
        Ok(schema::Request {
            provider: schema::Provider::Anthropic,
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
        let mut content = Vec::new();
        if let Some(assistant) = &message.assistant {
            if let Some(thought) = &assistant.thought {
                content.push(Block::Thinking {
                    thinking: thought.clone(),
                });
            }
        }
        if let Some(s) = message.content.as_str() {
            if !s.is_empty() {
                content.push(Block::Text { text: s.to_string() });
            }
        } else if let Some(blocks) = message.content.as_blocks() {
            for b in blocks {
                content.push(match b {
                    schema::ContentBlock::Text { text } => Block::Text { text: text.clone() },
                    schema::ContentBlock::Image { image_url } => {
                        let (mime, data) = image_url
                            .as_data_uri_parts()
                            .unwrap_or(("application/octet-stream", ""));
                        Block::Image {
                            source: ImageSource::Base64 {
                                media_type: mime.to_string(),
                                data: data.to_string(),
                            },
                        }
                    },
                });
            }
        }
        if let Some(assistant) = &message.assistant {
            for call in &assistant.tool_calls {
                content.push(Block::ToolUse {
                    id: call.id.clone().unwrap_or_default(),
                    name: call.function.name.clone(),
                    input: super::parsed_arguments(call),
                });
            }
        }
        Ok(Response {
            id: resp.id.clone(),
            kind: "message".to_string(),
            role: "assistant".to_string(),
            model: resp.model.clone(),
            content,
            stop_reason: choice.finish_reason.clone(),
            stop_sequence: choice.stop_string.clone(),
            usage: Usage {
                input_tokens: resp.usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0),
                output_tokens: resp
                    .usage
                    .as_ref()
                    .and_then(|u| u.completion_tokens)
                    .unwrap_or(0),
            },
        })
    }

    fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error {
        ErrorResponse {
            kind: "error".to_string(),
            error: ErrorBody {
                kind: err
                    .error
                    .error_type
                    .clone()
                    .unwrap_or_else(|| "api_error".to_string()),
                message: err.error.message.clone(),
            },
        }
    }

    fn is_streaming_requested(native: &Self::Request) -> bool {
        native.stream.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_message_splits_image_and_text_blocks() {
        let req = Request {
            model: Some("claude-y".into()),
            max_tokens: 10,
            messages: vec![Message {
                role: "user".into(),
                content: MessageContent::Blocks(vec![
                    Block::Image {
                        source: ImageSource::Base64 {
                            media_type: "image/png".into(),
                            data: "AAAA".into(),
                        },
                    },
                    Block::Text {
                        text: "describe".into(),
                    },
                ]),
            }],
            ..Default::default()
        };
        let internal = MessagesAdapter::to_internal(req).unwrap();
        let schema::Input::Chat { messages } = internal.input else {
            panic!("expected chat input")
        };
        assert_eq!(messages.len(), 1);
        let blocks = messages[0].content.as_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_matches::assert_matches!(&blocks[0], schema::ContentBlock::Image { image_url } if image_url.url == "data:image/png;base64,AAAA");
        assert_matches::assert_matches!(&blocks[1], schema::ContentBlock::Text { text } if text == "describe");
    }

    #[test]
    fn tool_use_round_trips_arguments_as_string() {
        let req = Request {
            model: Some("claude-y".into()),
            max_tokens: 10,
            messages: vec![Message {
                role: "assistant".into(),
                content: MessageContent::Blocks(vec![Block::ToolUse {
                    id: "call_1".into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"x": 1}),
                }]),
            }],
            ..Default::default()
        };
        let internal = MessagesAdapter::to_internal(req).unwrap();
        let schema::Input::Chat { messages } = internal.input else {
            panic!("expected chat input")
        };
        let call = &messages[0].assistant.as_ref().unwrap().tool_calls[0];
        assert_eq!(call.function.arguments, "{\"x\":1}");

        let back = super::super::parsed_arguments(call);
        assert_eq!(back, serde_json::json!({"x": 1}));
    }
}
