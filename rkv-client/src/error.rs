//! # Client Errors
//!
//! Purpose: One error type for every failure the client core can surface,
//! grouped into the connection, protocol, server, marshal and validation kinds.
//!
//! ## Design Principles
//! 1. **Single Taxonomy**: Callers match one enum instead of chasing sentinels.
//! 2. **Verbatim Server Messages**: Error replies are passed through untouched.
//! 3. **Bounded Excerpts**: Protocol violations quote at most 40 bytes of input.

use std::fmt::Write as _;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or IO failure while dialing, reading or writing.
    #[error("rkv: io error: {0}")]
    Io(#[from] std::io::Error),
    /// The call context was cancelled.
    #[error("rkv: context cancelled")]
    Cancelled,
    /// The call context deadline elapsed.
    #[error("rkv: context deadline exceeded")]
    DeadlineExceeded,
    /// The connection pool was closed.
    #[error("rkv: connection pool closed")]
    PoolClosed,
    /// RESP framing error or reply shape mismatch.
    #[error("rkv: protocol violation; {0}")]
    Protocol(String),
    /// Server returned an error reply.
    #[error("{message}")]
    Server { message: String },
    /// An argument could not be encoded.
    #[error("rkv: can't marshal {type_name}: {reason}")]
    Marshal {
        type_name: &'static str,
        reason: &'static str,
    },
    /// Configuration or connection URL was rejected.
    #[error("rkv: invalid config: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Returns true for failures of the transport or of the call context.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Cancelled
                | ClientError::DeadlineExceeded
                | ClientError::PoolClosed
        )
    }

    /// Returns true when the server answered with an error reply.
    pub fn is_server(&self) -> bool {
        matches!(self, ClientError::Server { .. })
    }

    /// Returns true for protocol violations.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    pub(crate) fn server(message: impl Into<String>) -> Self {
        ClientError::Server {
            message: message.into(),
        }
    }

    pub(crate) fn marshal(type_name: &'static str, reason: &'static str) -> Self {
        ClientError::Marshal { type_name, reason }
    }

    /// Builds a shape mismatch error quoting the offending line.
    pub(crate) fn unexpected(want: &str, line: &[u8]) -> Self {
        ClientError::Protocol(format!("{} expected, received {}", want, excerpt(line)))
    }
}

const EXCERPT_MAX: usize = 40;

/// Quotes at most `EXCERPT_MAX` bytes of raw protocol input.
pub(crate) fn excerpt(raw: &[u8]) -> String {
    let cut = raw.len().min(EXCERPT_MAX);
    let mut out = String::with_capacity(cut + 4);
    out.push('"');
    for &b in &raw[..cut] {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out.push('"');
    if raw.len() > EXCERPT_MAX {
        out.push('…');
    }
    out
}
