//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports: the remote rule
//! group service client, the change-token source and the clock.

use std::fmt::Debug;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::domain::diff::MutationOp;
use crate::domain::rule::{ActivatedRule, ChangeToken, RuleGroupId, RuleGroupRef, Scope};

/// Closed classification of failures reported by the remote service.
///
/// Retry policy is decided on this kind alone, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// The referenced rule group does not exist
    NotFound,
    /// The change token was already consumed or superseded
    StaleToken,
    /// Another mutation in the same scope is in flight
    ConcurrentModification,
    /// Request rate exceeded
    Throttled,
    /// The rule group still has members and cannot be deleted
    NonEmptyEntity,
    /// The batch is not applicable to the current membership
    InvalidOperation,
    /// Anything else
    Other,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::StaleToken => "stale_token",
            ApiErrorKind::ConcurrentModification => "concurrent_modification",
            ApiErrorKind::Throttled => "throttled",
            ApiErrorKind::NonEmptyEntity => "non_empty_entity",
            ApiErrorKind::InvalidOperation => "invalid_operation",
            ApiErrorKind::Other => "other",
        }
    }
}

/// Failure reported by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", .kind.as_str())]
pub struct ApiError {
    kind: ApiErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn stale_token(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::StaleToken, message)
    }

    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ConcurrentModification, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Throttled, message)
    }

    pub fn non_empty(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NonEmptyEntity, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidOperation, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, message)
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    /// Whether the token retryer absorbs this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::StaleToken
                | ApiErrorKind::ConcurrentModification
                | ApiErrorKind::Throttled
        )
    }
}

/// Port for obtaining the current change token of a scope.
///
/// Implementations may block until a concurrent holder elsewhere releases
/// the scope.
pub trait ChangeTokenSource: Send + Sync + Debug {
    /// Fetch a fresh token for `scope`.
    fn get_change_token(&self, scope: &Scope) -> Result<ChangeToken, ApiError>;
}

/// Port for the remote rule group service.
///
/// Mutating calls require a token obtained from
/// [`ChangeTokenSource::get_change_token`] for the same scope.
pub trait RuleGroupApi: ChangeTokenSource {
    /// Create an empty rule group and return its identifier.
    fn create_rule_group(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<RuleGroupId, ApiError>;

    /// Fetch metadata. Fails with [`ApiErrorKind::NotFound`] for unknown ids.
    fn get_rule_group(&self, id: &RuleGroupId) -> Result<RuleGroupRef, ApiError>;

    /// List the current members.
    fn list_activated_rules(&self, id: &RuleGroupId) -> Result<Vec<ActivatedRule>, ApiError>;

    /// Submit a batch of membership changes as one request.
    fn update_rule_group(
        &self,
        token: &ChangeToken,
        id: &RuleGroupId,
        updates: &[MutationOp],
    ) -> Result<(), ApiError>;

    /// Delete an empty rule group.
    fn delete_rule_group(&self, token: &ChangeToken, id: &RuleGroupId) -> Result<(), ApiError>;
}

/// Port for obtaining current time and waiting.
///
/// This abstraction allows the retry loop to work with time without
/// depending on the system clock. Infrastructure provides concrete
/// implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}
