//! Unified error handling (spec.md §7).
//!
//! Every layer (adapter, route engine, dispatcher, governance) produces its
//! own `thiserror` enum; all of them fold into [`GatewayError`] at the
//! generic route engine boundary, which is the one place that turns a
//! failure into the canonical `{status_code, is_bifrost_error, provider,
//! error}` body (spec.md §3, §4.3 steps 6/7).

use crate::schema::{BifrostErrorBody, ErrorDetail, Provider};

/// The five error kinds named in spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("admission error: {0}")]
    Admission(String),
    #[error("governance: {0}")]
    Governance(#[from] crate::governance::GovernanceError),
    #[error("upstream error ({status:?}): {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
        retriable: bool,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn parse(msg: impl Into<String>) -> Self {
        GatewayError::Parse(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// HTTP status this error should be reported with (spec.md §7).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Parse(_) => 400,
            GatewayError::Admission(_) => 403,
            GatewayError::Governance(e) => e.status_code(),
            GatewayError::Upstream { status, .. } => status.unwrap_or(502),
            GatewayError::Internal(_) => 500,
        }
    }

    /// Whether a retriable upstream error should trigger a fallback attempt
    /// (spec.md §7 "Fallbacks"). Parse and governance errors never do.
    pub fn is_retriable_upstream(&self) -> bool {
        matches!(self, GatewayError::Upstream { retriable: true, .. })
    }

    pub fn is_bifrost_error(&self) -> bool {
        !matches!(self, GatewayError::Upstream { .. })
    }

    /// Render as the canonical error body (used by generic routes; native
    /// routes instead ask the adapter for a vendor-shaped error).
    pub fn to_canonical_body(&self, provider: Provider) -> BifrostErrorBody {
        BifrostErrorBody {
            status_code: Some(self.status_code()),
            is_bifrost_error: self.is_bifrost_error(),
            provider,
            error: ErrorDetail {
                error_type: Some(self.kind_name().to_string()),
                message: self.to_string(),
                rest: Default::default(),
            },
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            GatewayError::Parse(_) => "parse_error",
            GatewayError::Admission(_) => "admission_error",
            GatewayError::Governance(_) => "governance_error",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}
