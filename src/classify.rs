//! 故障分类。
//!
//! 每个连接超时、传输错误和认证错误在状态机决定下一步之前都要经过 [`classify`]。
//! 认证信号优先于其他所有信号，因为它的补救措施（重新认证）不同于简单重试。
//!
//! Failure classification.
//!
//! Every connect timeout, transport error and authentication error goes through
//! [`classify`] before the state machine decides what to do next. Authentication
//! wins over every other signal because its remedy (re-authenticate) differs from
//! a plain retry.

use crate::error::Error;
use std::fmt;

/// 故障的类别。
/// The category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Timeout,
    Network,
    /// A user-supplied handler failed during dispatch.
    Handler,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Handler => "handler",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用方应如何处理故障。
/// What the caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Drop the credential and ask the user to sign in again.
    Reauthenticate,
    /// Reconnect with backoff.
    Reconnect,
    /// Keep going; the failure was local to one consumer.
    Continue,
    /// Retry; nothing more specific is known.
    Retry,
}

/// [`classify`] 的结果。临时派生，从不持久化。
///
/// The outcome of [`classify`]. Derived transiently, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub recoverable: bool,
    pub action: RecoveryAction,
    pub message: String,
}

impl ClassifiedError {
    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }

    /// 适合状态栏或提示框的文本。
    ///
    /// Text suitable for a status line or toast.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Authentication => "Your session has expired. Please sign in again.",
            ErrorKind::Timeout => "The server is taking too long to respond. Reconnecting...",
            ErrorKind::Network => "Connection lost. Reconnecting...",
            ErrorKind::Handler => "A live view failed to update.",
            ErrorKind::Unknown => "Something went wrong with the live connection.",
        }
    }
}

const AUTH_MARKERS: [&str; 5] = ["auth", "jwt", "token", "unauthorized", "forbidden"];
const TIMEOUT_MARKERS: [&str; 2] = ["timeout", "etimedout"];
const NETWORK_CODES: [&str; 3] = ["ECONNREFUSED", "ENOTFOUND", "ENETUNREACH"];
const NETWORK_MARKERS: [&str; 2] = ["network", "connection"];

/// 对原始故障信号进行分类。
///
/// 优先级：认证 > 超时 > 网络 > 未知。
///
/// Classifies raw failure signals.
///
/// Precedence: authentication > timeout > network > unknown.
pub fn classify_signals(status: Option<u16>, code: Option<&str>, message: &str) -> ClassifiedError {
    let lowered = message.to_lowercase();
    let code_upper = code.map(str::to_uppercase);
    let code_upper = code_upper.as_deref();
    let mentions = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    let kind = if matches!(status, Some(401) | Some(403)) || mentions(&AUTH_MARKERS) {
        ErrorKind::Authentication
    } else if mentions(&TIMEOUT_MARKERS) || code_upper == Some("ETIMEDOUT") {
        ErrorKind::Timeout
    } else if code_upper.is_some_and(|c| NETWORK_CODES.contains(&c)) || mentions(&NETWORK_MARKERS) {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    };

    let (recoverable, action) = match kind {
        ErrorKind::Authentication => (false, RecoveryAction::Reauthenticate),
        ErrorKind::Timeout | ErrorKind::Network => (true, RecoveryAction::Reconnect),
        ErrorKind::Handler => (true, RecoveryAction::Continue),
        ErrorKind::Unknown => (true, RecoveryAction::Retry),
    };

    ClassifiedError {
        kind,
        recoverable,
        action,
        message: message.to_string(),
    }
}

/// 对库错误进行分类。
///
/// Classifies a library error.
pub fn classify(error: &Error) -> ClassifiedError {
    match error {
        Error::Authentication(message) => ClassifiedError {
            kind: ErrorKind::Authentication,
            recoverable: false,
            action: RecoveryAction::Reauthenticate,
            message: message.clone(),
        },
        Error::ConnectTimeout => ClassifiedError {
            kind: ErrorKind::Timeout,
            recoverable: true,
            action: RecoveryAction::Reconnect,
            message: error.to_string(),
        },
        Error::HandlerPanicked { .. } => ClassifiedError {
            kind: ErrorKind::Handler,
            recoverable: true,
            action: RecoveryAction::Continue,
            message: error.to_string(),
        },
        Error::Transport {
            message,
            status,
            code,
        } => classify_signals(*status, code.as_deref(), message),
        other => classify_signals(None, None, &other.to_string()),
    }
}
