//! Integration adapters — C2.
//!
//! Each adapter translates between one vendor's native request/response
//! shape and the canonical [`crate::schema`] types. The hard part of this
//! crate lives here: asymmetric, overlapping, partially-ambiguous vendor
//! schemas (spec.md §4.2).
//!
//! Per the design note in spec.md §9 ("Heterogeneous provider requests →
//! per-adapter structs + one trait"), every (provider, route) pair
//! implements [`Adapter`] once. The generic route engine (`crate::route`)
//! is generic over this trait rather than reaching for `dyn`/reflection.

use thiserror::Error;

use crate::schema;

pub mod anthropic;
pub mod genai;
pub mod litellm;
pub mod openai;

#[cfg(test)]
mod tests;

/// Adapter-layer failures (spec.md §7 parse_error / internal_error at the
/// adapter boundary). Adapters must never panic; a conversion failure
/// always becomes one of these instead.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("failed to parse request: {0}")]
    RequestParse(String),
    #[error("failed to parse response: {0}")]
    ResponseParse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),
}

impl From<AdapterError> for crate::error::GatewayError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::RequestParse(m) | AdapterError::MissingField(m) => {
                crate::error::GatewayError::parse(m)
            },
            AdapterError::ResponseParse(m) | AdapterError::UnsupportedConversion(m) => {
                crate::error::GatewayError::internal(m)
            },
        }
    }
}

/// The translation contract for one (provider, route) pair (spec.md §4.2).
///
/// `Response` doubles as the streaming chunk shape: OpenAI-style chunk
/// objects differ from full responses only in `object` and in carrying a
/// `delta` instead of a `message` per choice, both of which
/// [`schema::Response`]/[`schema::ChoiceContent`] already represent.
/// `Error` is the vendor-native error body, a distinct shape from
/// `Response` on every adapter in this crate.
pub trait Adapter: Send + Sync {
    type Request: serde::de::DeserializeOwned + Send + Sync + 'static;
    type Response: serde::Serialize + Send + Sync + 'static;
    type Error: serde::Serialize + Send + Sync + 'static;

    /// A fresh zero value of the native request struct.
    fn new_request() -> Self::Request;

    fn to_internal(native: Self::Request) -> Result<schema::Request, AdapterError>;

    fn from_internal(resp: &schema::Response) -> Result<Self::Response, AdapterError>;

    fn from_internal_error(err: &schema::BifrostErrorBody) -> Self::Error;

    /// Only implemented by adapters registered with a `StreamConfig`
    /// (spec.md §4.3 step 5). The default rejects streaming outright.
    fn from_internal_stream_chunk(_resp: &schema::Response) -> Result<Self::Response, AdapterError> {
        Err(AdapterError::UnsupportedConversion(
            "this route does not support streaming".into(),
        ))
    }

    fn from_internal_stream_error(err: &schema::BifrostErrorBody) -> Self::Error {
        Self::from_internal_error(err)
    }

    /// Whether the just-decoded native request asked for a streaming
    /// response (spec.md §4.3 step 5, "IsStreamingRequested").
    fn is_streaming_requested(_native: &Self::Request) -> bool {
        false
    }
}

/// Shared helper: parse a tool-call's JSON-string `arguments` the tolerant
/// way described in spec.md §4.1, used by every adapter that must hand a
/// provider a parsed object instead of our canonical string.
pub fn parsed_arguments(call: &schema::ToolCall) -> serde_json::Value {
    schema::tool_args::decode(&call.function.arguments)
}
