//! Error classification.
//!
//! Maps an RPC failure to the recovery policy that applies to it. Matching is
//! a heuristic over HTTP status and lowercased error text: providers word the
//! same condition differently, so the table below is ordered and the first
//! hit wins. Anything unmatched is `Fatal`.

use serde::Serialize;

use crate::rpc::types::RpcError;

/// Recovery class of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Network hiccup; retry in place.
    Transient,
    /// Endpoint is throttling or broken; switch endpoints.
    RotationWorthy,
    /// Nonce already used or out of sequence.
    NonceConflict,
    /// Gas limit or fee below what the node accepts.
    GasTooLow,
    /// Execution reverted.
    Revert,
    /// Everything else.
    Fatal,
    /// Ephemeral test network ran out of quota.
    QuotaExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RotationWorthy => "rotation_worthy",
            ErrorKind::NonceConflict => "nonce_conflict",
            ErrorKind::GasTooLow => "gas_too_low",
            ErrorKind::Revert => "revert",
            ErrorKind::Fatal => "fatal",
            ErrorKind::QuotaExhausted => "quota_exhausted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bare status codes that mean throttling or a server-side failure. Matched as
/// whole tokens so hex payloads in revert data do not trigger them.
pub const ROTATION_STATUS_CODES: &[&str] = &["429", "500", "502", "503", "504"];

/// Ordered (pattern, kind) table. Earlier rows win.
pub const PATTERNS: &[(&str, ErrorKind)] = &[
    // throttling and server-side failures
    ("too many requests", ErrorKind::RotationWorthy),
    ("rate limit", ErrorKind::RotationWorthy),
    ("ratelimit", ErrorKind::RotationWorthy),
    ("internal server error", ErrorKind::RotationWorthy),
    ("bad gateway", ErrorKind::RotationWorthy),
    ("service unavailable", ErrorKind::RotationWorthy),
    ("gateway timeout", ErrorKind::RotationWorthy),
    // gas / fee
    ("feetoolow", ErrorKind::GasTooLow),
    ("fee too low", ErrorKind::GasTooLow),
    ("intrinsic gas too low", ErrorKind::GasTooLow),
    ("replacement transaction underpriced", ErrorKind::GasTooLow),
    ("transaction underpriced", ErrorKind::GasTooLow),
    ("out of gas", ErrorKind::GasTooLow),
    // nonce
    ("gs026", ErrorKind::NonceConflict),
    ("already executed", ErrorKind::NonceConflict),
    ("duplicate", ErrorKind::NonceConflict),
    ("already known", ErrorKind::NonceConflict),
    ("nonce", ErrorKind::NonceConflict),
    // revert
    ("revert", ErrorKind::Revert),
    // connection level
    ("timeout", ErrorKind::Transient),
    ("timed out", ErrorKind::Transient),
    ("connection refused", ErrorKind::Transient),
    ("connection reset", ErrorKind::Transient),
    ("connection aborted", ErrorKind::Transient),
    ("connection error", ErrorKind::Transient),
    ("connection closed", ErrorKind::Transient),
    ("error sending request", ErrorKind::Transient),
    ("name resolution", ErrorKind::Transient),
    ("dns", ErrorKind::Transient),
    ("no route to host", ErrorKind::Transient),
    ("network unreachable", ErrorKind::Transient),
    ("remote end closed", ErrorKind::Transient),
    ("broken pipe", ErrorKind::Transient),
];

/// Text signals that a Safe transaction collided on nonce.
pub const NONCE_SIGNALS: &[&str] = &["nonce", "gs026", "already executed", "duplicate"];

/// Classify a raw failure from its HTTP status and message.
///
/// `ephemeral` is true when the failing endpoint belongs to a forked test
/// network; only there does a 403 mean the quota is gone.
pub fn classify_message(status: Option<u16>, message: &str, ephemeral: bool) -> ErrorKind {
    let text = message.to_lowercase();

    let forbidden = status == Some(403) || (text.contains("403") && text.contains("forbidden"));
    if forbidden && (ephemeral || text.contains("tenderly") || text.contains("virtual")) {
        return ErrorKind::QuotaExhausted;
    }

    if let Some(code) = status {
        if code == 429 || (500..600).contains(&code) {
            return ErrorKind::RotationWorthy;
        }
    }

    if text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| ROTATION_STATUS_CODES.contains(&token))
    {
        return ErrorKind::RotationWorthy;
    }

    PATTERNS
        .iter()
        .find(|(pattern, _)| text.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Fatal)
}

/// Classify an [`RpcError`].
pub fn classify(err: &RpcError, ephemeral: bool) -> ErrorKind {
    match err {
        RpcError::Timeout(_) | RpcError::RateLimitTimeout(_) => ErrorKind::Transient,
        RpcError::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
        RpcError::NoEndpoint(_) | RpcError::InvalidUrl { .. } => ErrorKind::Fatal,
        RpcError::ReceiptTimeout(..) => ErrorKind::Transient,
        RpcError::Http { status, message } => classify_message(Some(*status), message, ephemeral),
        RpcError::Rpc(message) => classify_message(None, message, ephemeral),
    }
}

/// True when the failure text looks like throttling rather than an outage.
pub fn is_rate_limit(err: &RpcError) -> bool {
    if err.status() == Some(429) {
        return true;
    }
    let text = err.to_string().to_lowercase();
    text.split(|c: char| !c.is_ascii_alphanumeric()).any(|t| t == "429")
        || ["too many requests", "rate limit", "ratelimit"]
            .iter()
            .any(|p| text.contains(p))
}

/// True when the text carries one of the Safe nonce-conflict signals.
pub fn has_nonce_signal(message: &str) -> bool {
    let text = message.to_lowercase();
    NONCE_SIGNALS.iter().any(|s| text.contains(s))
}
