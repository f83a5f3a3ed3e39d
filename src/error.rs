// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

/// Status codes carried by server responses, mirroring the wire protocol's
/// status enumeration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Unspecified = 0,
    Success = 1,
    BadRequest = 2,
    Unauthorized = 3,
    InternalError = 4,
    Aborted = 5,
    Unavailable = 6,
    Overloaded = 7,
    SchemeError = 8,
    GenericError = 9,
    Timeout = 10,
    BadSession = 11,
    PreconditionFailed = 12,
    AlreadyExists = 13,
    NotFound = 14,
    SessionExpired = 15,
    Cancelled = 16,
    Undetermined = 17,
    Unsupported = 18,
    SessionBusy = 19,
}

impl StatusCode {
    /// Decodes a status code received over the wire, mapping unknown values
    /// to [`StatusCode::Unspecified`].
    pub fn from_wire(value: i32) -> Self {
        Self::try_from(value).unwrap_or(Self::Unspecified)
    }
}

/// How the retry engine treats a classified error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Transient server-side error without session impact; the first retry is
    /// immediate, later ones back off.
    RetryableFast,
    /// Client-transient error (transport failures, deadlines); always backs off.
    RetryableSlow,
    /// The session this request ran on is no longer usable; the pool must
    /// discard it. Not retried on the same session.
    SessionBroken,
    /// Not retried; propagated to the caller.
    Fatal,
}

/// Error type for driver operations.
#[derive(Clone, Debug, Error)]
pub enum YdbError {
    #[error("deadline of {0:?} expired")]
    TimeoutExpired(Duration),

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("server returned {code:?}: {message}")]
    ServerStatus { code: StatusCode, message: String },

    #[error("server response is missing {0}")]
    EmptyPayload(&'static str),

    #[error("No session became available within timeout of {0} ms")]
    SessionPoolTimeout(u64),

    #[error("no endpoints are known for the database")]
    NoEndpoints,

    #[error("cannot resolve entry point address: {address}")]
    CannotResolveAddress { address: String },

    #[error("{0} has been destroyed")]
    Destroyed(&'static str),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl YdbError {
    /// Classifies this error for the retry engine.
    pub fn classify(&self) -> ErrorClass {
        match self {
            YdbError::TimeoutExpired(_) | YdbError::Transport { .. } => ErrorClass::RetryableSlow,
            YdbError::ServerStatus { code, .. } => match code {
                StatusCode::Aborted | StatusCode::Overloaded => ErrorClass::RetryableFast,
                StatusCode::Unavailable => ErrorClass::RetryableSlow,
                StatusCode::BadSession | StatusCode::SessionExpired => ErrorClass::SessionBroken,
                _ => ErrorClass::Fatal,
            },
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether this is the scheme-specific server status, tolerated by some
    /// operations such as dropping a table that does not exist.
    pub fn is_scheme_error(&self) -> bool {
        matches!(
            self,
            YdbError::ServerStatus {
                code: StatusCode::SchemeError,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn status(code: StatusCode) -> YdbError {
        YdbError::ServerStatus {
            code,
            message: "test".to_string(),
        }
    }

    #[test_case(StatusCode::Aborted, ErrorClass::RetryableFast)]
    #[test_case(StatusCode::Overloaded, ErrorClass::RetryableFast)]
    #[test_case(StatusCode::Unavailable, ErrorClass::RetryableSlow)]
    #[test_case(StatusCode::BadSession, ErrorClass::SessionBroken)]
    #[test_case(StatusCode::SessionExpired, ErrorClass::SessionBroken)]
    #[test_case(StatusCode::BadRequest, ErrorClass::Fatal)]
    #[test_case(StatusCode::SchemeError, ErrorClass::Fatal)]
    #[test_case(StatusCode::GenericError, ErrorClass::Fatal)]
    fn server_status_classification(code: StatusCode, class: ErrorClass) {
        assert_eq!(status(code).classify(), class);
    }

    #[test]
    fn client_side_classification() {
        let timeout = YdbError::TimeoutExpired(Duration::from_secs(1));
        assert_eq!(timeout.classify(), ErrorClass::RetryableSlow);
        let transport = YdbError::Transport {
            message: "connection refused".to_string(),
        };
        assert_eq!(transport.classify(), ErrorClass::RetryableSlow);
        assert_eq!(YdbError::NoEndpoints.classify(), ErrorClass::Fatal);
        assert_eq!(YdbError::EmptyPayload("tx_meta").classify(), ErrorClass::Fatal);
    }

    #[test]
    fn scheme_error_detection() {
        assert!(status(StatusCode::SchemeError).is_scheme_error());
        assert!(!status(StatusCode::NotFound).is_scheme_error());
    }

    #[test]
    fn pool_timeout_message() {
        assert_eq!(
            YdbError::SessionPoolTimeout(100).to_string(),
            "No session became available within timeout of 100 ms"
        );
    }

    #[test]
    fn unknown_wire_status() {
        assert_eq!(StatusCode::from_wire(9999), StatusCode::Unspecified);
        assert_eq!(StatusCode::from_wire(8), StatusCode::SchemeError);
    }
}
