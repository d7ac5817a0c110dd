//! # rule-group-reconciler
//!
//! Declarative reconciliation of WAF rule group membership against a remote
//! service that serializes mutations with a single-use change token.
//!
//! Callers hand over the last known member list and the desired one. The
//! crate computes the minimal batch of deletes and inserts, then submits it
//! through a retry loop that fetches a fresh token for every attempt,
//! re-fetches on conflicts, backs off on throttling and gives up after a
//! configurable timeout.
//!
//! ## Quick Start
//!
//! ```rust
//! use rule_group_reconciler::{ActivatedRule, InMemoryRuleGroupApi, Reconciler, WafAction};
//! use std::sync::Arc;
//!
//! let api = Arc::new(InMemoryRuleGroupApi::new());
//! let reconciler = Reconciler::builder(api).build().unwrap();
//!
//! let v1 = vec![
//!     ActivatedRule::new(1, "sql-injection").with_action(WafAction::Block),
//!     ActivatedRule::new(2, "bad-bots").with_action(WafAction::Count),
//! ];
//! let group = reconciler.create("edge", "EdgeRules", &v1).unwrap();
//!
//! // Promote bad-bots from COUNT to BLOCK: one delete plus one insert.
//! let v2 = vec![
//!     ActivatedRule::new(1, "sql-injection").with_action(WafAction::Block),
//!     ActivatedRule::new(2, "bad-bots").with_action(WafAction::Block),
//! ];
//! let ops = reconciler.update(&group.id, &v1, &v2).unwrap();
//! assert_eq!(ops.len(), 2);
//! ```
//!
//! ## Change Tokens
//!
//! Every mutation needs a token for its [`Scope`]. A token is consumed by
//! the first mutation that succeeds with it and superseded by any newer
//! fetch in the same scope, so concurrent writers routinely see
//! [`ApiErrorKind::StaleToken`]. The [`TokenRetryer`] never reuses a token
//! after such a conflict. Throttled attempts reuse the token since it was
//! never spent.
//!
//! Scopes are independent: reconcilers bound to `global` and to
//! `regional("eu-west-1")` never contend for tokens.
//!
//! ## Retry Configuration
//!
//! ```rust
//! use rule_group_reconciler::{InMemoryRuleGroupApi, Reconciler, RetryConfig, Scope};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let reconciler = Reconciler::builder(Arc::new(InMemoryRuleGroupApi::new()))
//!     .with_scope(Scope::regional("eu-west-1"))
//!     .with_retry_config(RetryConfig {
//!         timeout: Duration::from_secs(120),
//!         initial_backoff: Duration::from_millis(200),
//!         ..RetryConfig::default()
//!     })
//!     .build()
//!     .expect("valid config");
//! ```
//!
//! Defaults: 15 minute timeout, 500ms initial backoff doubling up to 10s.
//! [`RetryConfig`] also deserializes from millisecond fields
//! (`timeout_ms`, `initial_backoff_ms`, `max_backoff_ms`, `multiplier`).
//!
//! ## Cancellation
//!
//! A [`Cancellation`] handle, shared through the builder, aborts retry loops
//! between attempts. A cancelled operation fails with
//! [`RetryError::Cancelled`], never with a timeout.
//!
//! ## Observability
//!
//! Operations log through `tracing` with `scope` and `rule_group_id` fields:
//! `info` for completed mutations, `debug` for individual retries, `warn` for
//! groups that turned out to be gone. Counters are available from
//! [`Reconciler::metrics`]:
//!
//! ```rust
//! # use rule_group_reconciler::{InMemoryRuleGroupApi, Reconciler};
//! # use std::sync::Arc;
//! # let reconciler = Reconciler::builder(Arc::new(InMemoryRuleGroupApi::new())).build().unwrap();
//! let snapshot = reconciler.metrics().snapshot();
//! println!(
//!     "mutations: {}, conflicts: {}, throttles: {}, timeouts: {}",
//!     snapshot.mutations_submitted,
//!     snapshot.conflicts_retried,
//!     snapshot.throttles_retried,
//!     snapshot.retry_timeouts,
//! );
//! ```
//!
//! ## Records
//!
//! Members can also be exchanged as JSON object maps ([`Record`]) with the
//! keys `priority`, `rule_id`, `type`, `action` and `override_action`, the
//! last two as single-element lists of `{"type": ...}` blocks. See
//! [`domain::codec`].

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    codec::{decode, encode, Record, SchemaError},
    diff::{apply, diff, diff_records, MutationOp},
    rule::{
        ActivatedRule, ChangeToken, OverrideAction, RuleGroup, RuleGroupId, RuleGroupRef,
        RuleType, Scope, WafAction,
    },
};

pub use application::{
    metrics::{Metrics, MetricsSnapshot},
    ports::{ApiError, ApiErrorKind, ChangeTokenSource, Clock, RuleGroupApi},
    reconciler::{BuildError, DeleteStage, ReconcileError, Reconciler, ReconcilerBuilder},
    retryer::{Cancellation, ConfigError, RetryConfig, RetryError, TokenRetryer},
};

pub use infrastructure::{clock::SystemClock, memory_api::InMemoryRuleGroupApi};
