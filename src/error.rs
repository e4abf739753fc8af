//! Error taxonomy for query compilation and graph execution

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, GraphError>;

/// Connection failure signatures that mean the session must be recreated.
///
/// Matched case-insensitively against the driver's error message.
pub const STALE_SIGNATURES: &[&str] = &[
    "pool closed",
    "pool is closed",
    "socket closed",
    "reset by peer",
    "broken pipe",
    "stale",
];

/// Engine messages for failures that are safe to retry without reconnecting.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "neo.transienterror",
    "deadlock",
    "leader switch",
    "not a leader",
    "database unavailable",
];

const AUTH_SIGNATURES: &[&str] = &[
    "authentication",
    "unauthorized",
    "credentials",
    "neo.clienterror.security",
];

const CONSTRAINT_SIGNATURES: &[&str] = &[
    "constraintvalidationfailed",
    "already exists with label",
    "constraint violation",
];

/// Every failure the core can raise.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Malformed predicate, operator or operand; raised before any network call
    #[error("compile error: {0}")]
    Compile(String),

    /// Relationship descriptor violates its strategy invariants
    #[error("invalid relationship `{relation}`: {reason}")]
    InvalidRelation { relation: String, reason: String },

    /// Uniqueness or schema constraint violated by a write
    #[error("constraint violation on {entity} (value: {value}): {message}")]
    Constraint {
        entity: String,
        value: String,
        message: String,
    },

    /// The underlying session is no longer usable
    #[error("stale connection: {0}")]
    Stale(String),

    /// Engine reported a transient failure (deadlock, leader switch, ...)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Credentials were rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Query text rejected by the engine, or any other fatal engine error
    #[error("query failed: {0}")]
    Query(String),

    /// A required lookup yielded nothing
    #[error("no {entity} found for id(s) [{}]", ids.join(", "))]
    NotFound { entity: String, ids: Vec<String> },

    /// Transaction misuse or a unit of work finalized as rolled back
    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A result row could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

/// Coarse classification driving retry and rollback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Compile,
    Constraint,
    Transient,
    Fatal,
    NotFound,
}

impl GraphError {
    /// Classify a raw driver/engine message.
    pub fn from_engine(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if is_stale_message(&lower) {
            return GraphError::Stale(message);
        }
        if TRANSIENT_SIGNATURES.iter().any(|s| lower.contains(s)) {
            return GraphError::Transient(message);
        }
        if AUTH_SIGNATURES.iter().any(|s| lower.contains(s)) {
            return GraphError::Authentication(message);
        }
        if CONSTRAINT_SIGNATURES.iter().any(|s| lower.contains(s)) {
            let (entity, value) = parse_constraint_message(&message);
            return GraphError::Constraint {
                entity,
                value,
                message,
            };
        }
        GraphError::Query(message)
    }

    pub fn not_found(entity: impl Into<String>, ids: Vec<String>) -> Self {
        GraphError::NotFound {
            entity: entity.into(),
            ids,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GraphError::Compile(_) | GraphError::InvalidRelation { .. } => ErrorClass::Compile,
            GraphError::Constraint { .. } => ErrorClass::Constraint,
            GraphError::Stale(_) | GraphError::Transient(_) => ErrorClass::Transient,
            GraphError::NotFound { .. } => ErrorClass::NotFound,
            GraphError::Authentication(_)
            | GraphError::Query(_)
            | GraphError::Transaction(_)
            | GraphError::Config(_)
            | GraphError::Decode(_) => ErrorClass::Fatal,
        }
    }

    /// Returns `true` if the transaction manager may retry the unit of work.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns `true` if the failure means the session must be recreated.
    pub fn is_stale(&self) -> bool {
        match self {
            GraphError::Stale(_) => true,
            GraphError::Transient(msg) | GraphError::Query(msg) => is_stale_message(msg),
            _ => false,
        }
    }
}

/// Returns `true` if `message` carries one of the staleness signatures.
pub fn is_stale_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    STALE_SIGNATURES.iter().any(|s| lower.contains(s))
}

/// Pull the label and offending value out of a Neo4j constraint message, e.g.
/// `Node(12) already exists with label `User` and property `email` = 'a@b.c'`.
fn parse_constraint_message(message: &str) -> (String, String) {
    let entity = message
        .split("label `")
        .nth(1)
        .and_then(|rest| rest.split('`').next())
        .unwrap_or("unknown")
        .to_string();
    let value = message
        .rsplit(" = ")
        .next()
        .filter(|_| message.contains(" = "))
        .map(|v| v.trim().trim_matches('\'').to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (entity, value)
}
