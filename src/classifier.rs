//! Maps pipeline failures onto the user-facing error taxonomy.
//!
//! Typed pipeline failures map by variant. Opaque messages (collaborator
//! errors, wrapped internals) go through a fixed, ordered rule table: the
//! first rule whose predicate matches decides the kind. Anything unmatched
//! is an `INTERNAL_ERROR`.

use serde::Serialize;
use thiserror::Error;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    DatabaseError,
    Timeout,
    ChainError,
    RateLimit,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ChainError => "CHAIN_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        !matches!(self, Self::ValidationError | Self::ChainError)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ValidationError => "The request was malformed. Check the identifier and try again.",
            Self::NotFound => "The requested record could not be found. It may not be indexed yet.",
            Self::DatabaseError => "The data store is temporarily unavailable.",
            Self::Timeout => "The request took too long to complete.",
            Self::ChainError => "The requested network is not supported.",
            Self::RateLimit => "Too many requests are being processed right now.",
            Self::InternalError => "An unexpected error occurred while analyzing the request.",
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            Self::ValidationError => &[
                "Transaction hashes must be 0x followed by 64 hexadecimal characters",
                "Block identifiers must be a non-negative number or \"latest\"",
                "Verify the network has a configured data source",
            ],
            Self::NotFound => &[
                "Double-check the identifier for typos",
                "Confirm the record belongs to the selected network",
                "Recent records may still be indexing; retry in a few seconds",
            ],
            Self::DatabaseError => &[
                "Retry the request shortly",
                "Check data store connectivity if the problem persists",
            ],
            Self::Timeout => &[
                "Retry the request",
                "Large blocks take longer to analyze; try a specific transaction instead",
            ],
            Self::ChainError => &[
                "Select one of the supported networks",
                "List supported networks with the `networks` command",
            ],
            Self::RateLimit => &[
                "Wait a moment before retrying",
                "Reduce the request frequency",
            ],
            Self::InternalError => &[
                "Retry the request",
                "Report the issue if it keeps happening",
            ],
        }
    }
}

/// What was being worked on when the failure happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub user_message: String,
    pub context: ErrorContext,
    pub suggestions: Vec<String>,
    pub retryable: bool,
    pub code: &'static str,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: kind.user_message().to_string(),
            context,
            suggestions: kind.suggestions().iter().map(|s| s.to_string()).collect(),
            retryable: kind.retryable(),
            code: kind.code(),
        }
    }
}

/// A failure as seen by the classifier: a lowercased message plus context.
pub struct Failure<'a> {
    message: String,
    context: &'a ErrorContext,
}

impl<'a> Failure<'a> {
    pub fn new(message: &str, context: &'a ErrorContext) -> Self {
        Self {
            message: message.to_lowercase(),
            context,
        }
    }

    fn mentions(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.message.contains(n))
    }
}

pub struct Rule {
    pub name: &'static str,
    pub kind: ErrorKind,
    matches: fn(&Failure<'_>) -> bool,
}

impl Rule {
    pub fn matches(&self, failure: &Failure<'_>) -> bool {
        (self.matches)(failure)
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "not-found",
        kind: ErrorKind::NotFound,
        matches: |f| f.mentions(&["not found", "no rows returned"]),
    },
    Rule {
        name: "timeout",
        kind: ErrorKind::Timeout,
        matches: |f| f.mentions(&["timeout", "timed out", "deadline has elapsed"]),
    },
    Rule {
        name: "invalid-hash-format",
        kind: ErrorKind::ValidationError,
        matches: |f| {
            f.mentions(&["invalid hash", "invalid transaction hash"])
                || f.context.tx_hash.as_deref().is_some_and(|h| !is_valid_hash(h))
        },
    },
    Rule {
        name: "invalid-network-id",
        kind: ErrorKind::ChainError,
        matches: |f| f.mentions(&["unsupported network", "unknown network", "invalid network"]),
    },
    Rule {
        name: "rate-limit",
        kind: ErrorKind::RateLimit,
        matches: |f| f.mentions(&["rate limit", "too many requests"]),
    },
    Rule {
        name: "validation",
        kind: ErrorKind::ValidationError,
        matches: |f| {
            f.mentions(&[
                "invalid identifier",
                "missing connection configuration",
                "malformed",
            ])
        },
    },
    Rule {
        name: "database",
        kind: ErrorKind::DatabaseError,
        matches: |f| f.mentions(&["database", "sqlite", "connection refused"]),
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify_message(&self, message: &str, context: ErrorContext) -> ClassifiedError {
        let kind = match_rules(message, &context);
        ClassifiedError::new(kind, message, context)
    }

    /// Variants that may embed caller-supplied identifiers are decided by
    /// their type alone; only opaque collaborator text reaches [`RULES`].
    pub fn classify(&self, err: &PipelineError, context: ErrorContext) -> ClassifiedError {
        let message = err.to_string();
        let kind = match err {
            PipelineError::InvalidHash(_)
            | PipelineError::InvalidIdentifier(_)
            | PipelineError::MissingConnectionConfig(_) => ErrorKind::ValidationError,
            PipelineError::UnsupportedNetwork(_) => ErrorKind::ChainError,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Database(_) => ErrorKind::DatabaseError,
            PipelineError::RateLimited => ErrorKind::RateLimit,
            PipelineError::Generation(_) | PipelineError::Internal(_) => {
                match_rules(&message, &context)
            }
        };
        ClassifiedError::new(kind, message, context)
    }
}

fn match_rules(message: &str, context: &ErrorContext) -> ErrorKind {
    let failure = Failure::new(message, context);
    RULES
        .iter()
        .find(|rule| rule.matches(&failure))
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::InternalError)
}

pub fn is_valid_hash(raw: &str) -> bool {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .is_some_and(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
}
