//! Error types for mdsctl.
//!
//! Every fallible operation in the crate reports a [`CmdError`]: a numeric
//! code plus a human-readable message. The code space is partitioned into
//! bands by [`CODE_BASE_LINE`], and the CLI turns the code into the process
//! exit status, so the band layout is part of the public contract.
//!
//! # Code Bands
//!
//! | Band                      | Code                          |
//! |---------------------------|-------------------------------|
//! | success                   | `0`                           |
//! | rpc application result    | `1 * CODE_BASE_LINE + status` |
//! | http application result   | `2 * CODE_BASE_LINE + status` |
//! | rpc transport             | `3 * CODE_BASE_LINE`          |
//! | http transport            | `4 * CODE_BASE_LINE`          |
//! | internal                  | `9 * CODE_BASE_LINE`          |
//! | unknown                   | `10 * CODE_BASE_LINE`         |
//!
//! A smaller code is a more significant error. Callers that have to pick one
//! error out of many (one per endpoint, one per filesystem) rely on that
//! ordering, see [`most_important`], [`merge_except_success`] and
//! [`merge_any`].
//!
//! # Example
//!
//! ```rust
//! use mdsctl::error::{merge_except_success, CmdError, CODE_RPC};
//!
//! let errors = vec![
//!     CmdError::success(),
//!     CmdError::rpc_transport("10.0.0.1:6700", "connection refused"),
//!     CmdError::internal("bad fsid"),
//! ];
//! let merged = merge_except_success(&errors);
//! assert_eq!(merged.code(), CODE_RPC);
//! ```

use std::io;
use thiserror::Error;

/// Multiplier separating the error bands.
pub const CODE_BASE_LINE: i32 = 10_000;

/// Success.
pub const CODE_SUCCESS: i32 = 0;
/// The service answered with a non-OK status.
pub const CODE_RPC_RESULT: i32 = CODE_BASE_LINE;
/// An HTTP endpoint answered with a non-success status.
pub const CODE_HTTP_RESULT: i32 = 2 * CODE_BASE_LINE;
/// Dial, timeout or disconnect on the RPC path.
pub const CODE_RPC: i32 = 3 * CODE_BASE_LINE;
/// Dial, timeout or disconnect on the HTTP path.
pub const CODE_HTTP: i32 = 4 * CODE_BASE_LINE;
/// Local precondition or parse failure.
pub const CODE_INTERNAL: i32 = 9 * CODE_BASE_LINE;
/// Aggregation fallback when nothing more specific is known.
pub const CODE_UNKNOWN: i32 = 10 * CODE_BASE_LINE;

/// The band a [`CmdError`] code falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorBand {
    Success,
    RpcResult,
    HttpResult,
    Rpc,
    Http,
    Internal,
    Unknown,
}

impl ErrorBand {
    /// Classify a raw code.
    pub fn of(code: i32) -> Self {
        match code {
            CODE_SUCCESS => ErrorBand::Success,
            c if c < CODE_HTTP_RESULT => ErrorBand::RpcResult,
            c if c < CODE_RPC => ErrorBand::HttpResult,
            c if c < CODE_HTTP => ErrorBand::Rpc,
            c if c < CODE_INTERNAL => ErrorBand::Http,
            c if c < CODE_UNKNOWN => ErrorBand::Internal,
            _ => ErrorBand::Unknown,
        }
    }
}

/// Error value shared by every layer of the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CmdError {
    code: i32,
    message: String,
}

impl CmdError {
    /// Build an error with an explicit code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The success value. Code 0 is reserved for it.
    pub fn success() -> Self {
        Self::new(CODE_SUCCESS, "success")
    }

    /// The service answered, but with a non-OK status.
    pub fn rpc_result(status: i32, message: impl Into<String>) -> Self {
        Self::new(CODE_RPC_RESULT + status.clamp(1, CODE_BASE_LINE - 1), message)
    }

    /// An HTTP endpoint answered with a non-success status.
    pub fn http_result(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            CODE_HTTP_RESULT + i32::from(status).clamp(1, CODE_BASE_LINE - 1),
            message,
        )
    }

    /// Transport failure on the RPC path, tagged with the address.
    pub fn rpc_transport(addr: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(CODE_RPC, format!("rpc to {} failed: {}", addr, cause))
    }

    /// Transport failure on the HTTP path, tagged with the address.
    pub fn http_transport(addr: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(CODE_HTTP, format!("http request to {} failed: {}", addr, cause))
    }

    /// Local precondition or parse failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, message)
    }

    /// Error without a more specific band.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(CODE_UNKNOWN, message)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn band(&self) -> ErrorBand {
        ErrorBand::of(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        self.code
    }

    /// Prefix the message with the operation that produced it.
    pub fn context(mut self, what: impl std::fmt::Display) -> Self {
        if !self.is_success() {
            self.message = format!("{}: {}", what, self.message);
        }
        self
    }

    /// Convert into a `Result`, mapping success to `Ok(())`.
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<io::Error> for CmdError {
    fn from(e: io::Error) -> Self {
        CmdError::internal(format!("io error: {}", e))
    }
}

impl From<serde_json::Error> for CmdError {
    fn from(e: serde_json::Error) -> Self {
        CmdError::internal(format!("serialization error: {}", e))
    }
}

impl From<reqwest::Error> for CmdError {
    fn from(e: reqwest::Error) -> Self {
        let addr = e
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        match e.status() {
            Some(status) => CmdError::http_result(status.as_u16(), e.to_string()),
            None => CmdError::http_transport(&addr, e),
        }
    }
}

/// Result type alias for mdsctl operations.
pub type Result<T> = std::result::Result<T, CmdError>;

/// Pick the most significant error: the smallest non-zero code, first
/// occurrence on ties. Success only when every input is success.
pub fn most_important(errors: &[CmdError]) -> CmdError {
    errors
        .iter()
        .filter(|e| !e.is_success())
        .fold(None::<&CmdError>, |best, e| match best {
            Some(b) if b.code <= e.code => Some(b),
            _ => Some(e),
        })
        .cloned()
        .unwrap_or_else(CmdError::success)
}

/// Merge all failures into one error. Success only when every input is
/// success; otherwise the smallest failure code with every failure message.
pub fn merge_except_success(errors: &[CmdError]) -> CmdError {
    let mut code = CODE_UNKNOWN;
    let mut messages = Vec::new();
    for e in errors.iter().filter(|e| !e.is_success()) {
        code = code.min(e.code);
        messages.push(e.message.as_str());
    }
    if messages.is_empty() {
        return CmdError::success();
    }
    CmdError::new(code, messages.join("\n"))
}

/// Like [`merge_except_success`], but the first success wins and the rest of
/// the input is never pulled.
pub fn merge_any<I>(errors: I) -> CmdError
where
    I: IntoIterator<Item = CmdError>,
{
    let mut code = CODE_UNKNOWN;
    let mut messages = Vec::new();
    for e in errors {
        if e.is_success() {
            return e;
        }
        code = code.min(e.code);
        messages.push(e.message);
    }
    if messages.is_empty() {
        return CmdError::success();
    }
    CmdError::new(code, messages.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_band_layout() {
        assert_eq!(CmdError::success().band(), ErrorBand::Success);
        assert_eq!(CmdError::rpc_result(7, "x").band(), ErrorBand::RpcResult);
        assert_eq!(CmdError::http_result(503, "x").band(), ErrorBand::HttpResult);
        assert_eq!(CmdError::rpc_transport("a", "x").band(), ErrorBand::Rpc);
        assert_eq!(CmdError::http_transport("a", "x").band(), ErrorBand::Http);
        assert_eq!(CmdError::internal("x").band(), ErrorBand::Internal);
        assert_eq!(CmdError::unknown("x").band(), ErrorBand::Unknown);
    }

    #[test]
    fn test_only_success_is_zero() {
        assert_ne!(CmdError::rpc_result(0, "x").code(), 0);
        assert_ne!(CmdError::http_result(0, "x").code(), 0);
        assert!(CmdError::success().into_result().is_ok());
        assert!(CmdError::internal("x").into_result().is_err());
    }

    #[test]
    fn test_most_important_all_success() {
        let errors = vec![CmdError::success(), CmdError::success()];
        assert!(most_important(&errors).is_success());
        assert!(most_important(&[]).is_success());
    }

    #[test]
    fn test_most_important_picks_min_non_zero() {
        let errors = vec![
            CmdError::internal("internal"),
            CmdError::success(),
            CmdError::rpc_transport("a", "down"),
            CmdError::rpc_result(3, "first result"),
            CmdError::rpc_result(3, "second result"),
        ];
        let e = most_important(&errors);
        assert_eq!(e.code(), CODE_RPC_RESULT + 3);
        assert_eq!(e.message(), "first result");
    }

    #[test]
    fn test_merge_except_success() {
        let errors = vec![
            CmdError::success(),
            CmdError::internal("bad input"),
            CmdError::rpc_transport("a:1", "refused"),
        ];
        let merged = merge_except_success(&errors);
        assert_eq!(merged.code(), CODE_RPC);
        assert!(merged.message().contains("bad input"));
        assert!(merged.message().contains("refused"));
        assert!(!merged.message().contains("success"));

        assert!(merge_except_success(&[CmdError::success()]).is_success());
    }

    #[test]
    fn test_merge_any_short_circuits() {
        let pulled = Cell::new(0);
        let errors = vec![
            CmdError::internal("one"),
            CmdError::success(),
            CmdError::rpc_transport("a", "never seen"),
        ];
        let merged = merge_any(errors.into_iter().inspect(|_| pulled.set(pulled.get() + 1)));
        assert!(merged.is_success());
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn test_merge_any_all_failed() {
        let merged = merge_any(vec![CmdError::internal("x"), CmdError::rpc_result(2, "y")]);
        assert_eq!(merged.code(), CODE_RPC_RESULT + 2);
        assert_eq!(merged.message(), "x\ny");
    }

    #[test]
    fn test_context() {
        let e = CmdError::internal("boom").context("get fs info");
        assert_eq!(e.message(), "get fs info: boom");
        assert_eq!(CmdError::success().context("x").message(), "success");
    }
}
