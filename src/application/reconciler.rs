//! Lifecycle orchestration for a single rule group.
//!
//! `Absent → Created → (Updated)* → Deleted`. Diffing is delegated to
//! [`crate::domain::diff`] and every mutation goes through the
//! [`TokenRetryer`]; this module only decides which mutations to run and
//! attaches operation context to failures.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::metrics::Metrics;
use crate::application::ports::{ApiError, Clock, RuleGroupApi};
use crate::application::retryer::{
    Cancellation, ConfigError, RetryConfig, RetryError, TokenRetryer,
};
use crate::domain::codec::{Record, SchemaError};
use crate::domain::diff::{self, MutationOp};
use crate::domain::rule::{ActivatedRule, RuleGroup, RuleGroupId, RuleGroupRef, Scope};
use crate::infrastructure::clock::SystemClock;

/// Step of a delete that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    /// Removing the remaining members
    Drain,
    /// Deleting the emptied group
    Remove,
}

impl fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteStage::Drain => f.write_str("drain"),
            DeleteStage::Remove => f.write_str("remove"),
        }
    }
}

/// Terminal failure of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("invalid rule group input: {0}")]
    Schema(#[from] SchemaError),

    #[error("failed to create rule group `{name}`: {source}")]
    Create { name: String, source: RetryError },

    #[error("failed to read rule group {id}: {source}")]
    Read { id: RuleGroupId, source: ApiError },

    #[error("failed to update rule group {id}: {source}")]
    Update { id: RuleGroupId, source: RetryError },

    #[error("failed to delete rule group {id} ({stage}): {source}")]
    Delete {
        id: RuleGroupId,
        stage: DeleteStage,
        source: RetryError,
    },
}

impl ReconcileError {
    /// The rule group the failure concerns, if one was assigned.
    pub fn rule_group_id(&self) -> Option<&RuleGroupId> {
        match self {
            ReconcileError::Read { id, .. }
            | ReconcileError::Update { id, .. }
            | ReconcileError::Delete { id, .. } => Some(id),
            ReconcileError::Schema(_) | ReconcileError::Create { .. } => None,
        }
    }

    fn retry_error(&self) -> Option<&RetryError> {
        match self {
            ReconcileError::Create { source, .. }
            | ReconcileError::Update { source, .. }
            | ReconcileError::Delete { source, .. } => Some(source),
            ReconcileError::Schema(_) | ReconcileError::Read { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.retry_error().is_some_and(RetryError::is_timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.retry_error().is_some_and(RetryError::is_cancelled)
    }
}

/// Error returned when building a [`Reconciler`] fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("retry configuration error: {0}")]
    RetryConfig(#[from] ConfigError),
}

/// Builder for constructing a [`Reconciler`].
pub struct ReconcilerBuilder<A: ?Sized> {
    api: Arc<A>,
    scope: Scope,
    retry_config: RetryConfig,
    clock: Option<Arc<dyn Clock>>,
    cancellation: Cancellation,
    metrics: Option<Metrics>,
}

impl<A> ReconcilerBuilder<A>
where
    A: RuleGroupApi + ?Sized,
{
    /// Set the token scope. Default: `global`.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the retry loop settings.
    ///
    /// Validated when `build()` is called.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a cancellation handle with the caller.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Record into an existing metrics instance.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Reconciler<A>, BuildError> {
        self.retry_config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = self.metrics.unwrap_or_default();
        let retryer = TokenRetryer::new(
            Arc::clone(&self.api),
            self.scope,
            self.retry_config,
            clock,
            metrics.clone(),
        );

        Ok(Reconciler {
            api: self.api,
            retryer,
            cancellation: self.cancellation,
            metrics,
        })
    }
}

/// Reconciles rule groups against the remote service.
///
/// # Example
///
/// ```
/// use rule_group_reconciler::{ActivatedRule, InMemoryRuleGroupApi, Reconciler};
/// use std::sync::Arc;
///
/// let api = Arc::new(InMemoryRuleGroupApi::new());
/// let reconciler = Reconciler::builder(api).build().unwrap();
///
/// let group = reconciler
///     .create("edge", "EdgeRules", &[ActivatedRule::new(1, "R1")])
///     .unwrap();
/// let current = reconciler.read(&group.id).unwrap().expect("group exists");
/// assert_eq!(current.activated_rules, vec![ActivatedRule::new(1, "R1")]);
///
/// reconciler.delete(&group.id, &current.activated_rules).unwrap();
/// assert!(reconciler.read(&group.id).unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct Reconciler<A: ?Sized> {
    api: Arc<A>,
    retryer: TokenRetryer<A>,
    cancellation: Cancellation,
    metrics: Metrics,
}

impl<A: ?Sized> Clone for Reconciler<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            retryer: self.retryer.clone(),
            cancellation: self.cancellation.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<A> Reconciler<A>
where
    A: RuleGroupApi + ?Sized,
{
    /// Start building a reconciler over `api`.
    pub fn builder(api: Arc<A>) -> ReconcilerBuilder<A> {
        ReconcilerBuilder {
            api,
            scope: Scope::global(),
            retry_config: RetryConfig::default(),
            clock: None,
            cancellation: Cancellation::new(),
            metrics: None,
        }
    }

    pub fn scope(&self) -> &Scope {
        self.retryer.scope()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Handle that aborts in-flight retry loops of this reconciler.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Create a rule group and populate it with `rules`.
    ///
    /// If creation succeeds but population fails, the error is an
    /// [`ReconcileError::Update`] carrying the new id so the caller can still
    /// track the group.
    pub fn create(
        &self,
        name: &str,
        metric_name: &str,
        rules: &[ActivatedRule],
    ) -> Result<RuleGroupRef, ReconcileError> {
        RuleGroupRef::validate(name, metric_name)?;

        let id = self
            .retryer
            .retry_with_token(&self.cancellation, |token| {
                self.api.create_rule_group(token, name, metric_name)
            })
            .map_err(|source| ReconcileError::Create {
                name: name.to_string(),
                source,
            })?;
        info!(
            scope = %self.scope(),
            rule_group_id = %id,
            rule_group_name = name,
            "created rule group"
        );

        self.update(&id, &[], rules)?;

        Ok(RuleGroupRef {
            id,
            name: name.to_string(),
            metric_name: metric_name.to_string(),
        })
    }

    /// Fetch a rule group and its members.
    ///
    /// Returns `Ok(None)` when the remote does not know `id`; the caller
    /// should treat the group as absent.
    pub fn read(&self, id: &RuleGroupId) -> Result<Option<RuleGroup>, ReconcileError> {
        let group = match self.api.get_rule_group(id) {
            Ok(group) => group,
            Err(err) if err.is_not_found() => {
                warn!(rule_group_id = %id, "rule group not found, treating as absent");
                return Ok(None);
            }
            Err(source) => {
                return Err(ReconcileError::Read {
                    id: id.clone(),
                    source,
                })
            }
        };

        let activated_rules = match self.api.list_activated_rules(id) {
            Ok(rules) => rules,
            Err(err) if err.is_not_found() => {
                warn!(rule_group_id = %id, "rule group disappeared while listing members");
                return Ok(None);
            }
            Err(source) => {
                return Err(ReconcileError::Read {
                    id: id.clone(),
                    source,
                })
            }
        };

        Ok(Some(RuleGroup {
            group,
            activated_rules,
        }))
    }

    /// Move membership from `old` to `new` in one mutation.
    ///
    /// Returns the submitted operations; an empty diff submits nothing and
    /// makes no remote call at all.
    pub fn update(
        &self,
        id: &RuleGroupId,
        old: &[ActivatedRule],
        new: &[ActivatedRule],
    ) -> Result<Vec<MutationOp>, ReconcileError> {
        let ops = diff::diff(old, new);
        self.submit(id, ops)
    }

    /// [`update`](Self::update) over structured records.
    ///
    /// Malformed records are rejected before any remote call.
    pub fn update_records(
        &self,
        id: &RuleGroupId,
        old: &[Record],
        new: &[Record],
    ) -> Result<Vec<MutationOp>, ReconcileError> {
        let ops = diff::diff_records(old, new)?;
        self.submit(id, ops)
    }

    /// Update, then read back the resulting state.
    pub fn update_and_read(
        &self,
        id: &RuleGroupId,
        old: &[ActivatedRule],
        new: &[ActivatedRule],
    ) -> Result<Option<RuleGroup>, ReconcileError> {
        self.update(id, old, new)?;
        self.read(id)
    }

    /// Delete a rule group, draining `current` members first.
    ///
    /// The remote refuses to delete a non-empty group, so members are removed
    /// in one batch before the delete. An already deleted group is success,
    /// even when `current` still lists members.
    pub fn delete(
        &self,
        id: &RuleGroupId,
        current: &[ActivatedRule],
    ) -> Result<(), ReconcileError> {
        if !current.is_empty() {
            debug!(rule_group_id = %id, members = current.len(), "draining rule group");
            match self.update(id, current, &[]) {
                Ok(_) => {}
                Err(ReconcileError::Update {
                    source: RetryError::Api(err),
                    ..
                }) if err.is_not_found() => {
                    warn!(rule_group_id = %id, "rule group already deleted");
                    return Ok(());
                }
                Err(ReconcileError::Update { id, source }) => {
                    return Err(ReconcileError::Delete {
                        id,
                        stage: DeleteStage::Drain,
                        source,
                    })
                }
                Err(other) => return Err(other),
            }
        }

        let result = self.retryer.retry_with_token(&self.cancellation, |token| {
            self.api.delete_rule_group(token, id)
        });

        match result {
            Ok(()) => {
                info!(scope = %self.scope(), rule_group_id = %id, "deleted rule group");
                Ok(())
            }
            Err(RetryError::Api(err)) if err.is_not_found() => {
                warn!(rule_group_id = %id, "rule group already deleted");
                Ok(())
            }
            Err(source) => Err(ReconcileError::Delete {
                id: id.clone(),
                stage: DeleteStage::Remove,
                source,
            }),
        }
    }

    fn submit(
        &self,
        id: &RuleGroupId,
        ops: Vec<MutationOp>,
    ) -> Result<Vec<MutationOp>, ReconcileError> {
        if ops.is_empty() {
            self.metrics.record_noop();
            debug!(rule_group_id = %id, "membership unchanged, skipping update");
            return Ok(ops);
        }

        let inserts = ops.iter().filter(|op| op.is_insert()).count();
        let deletes = ops.len() - inserts;

        self.retryer
            .retry_with_token(&self.cancellation, |token| {
                self.api.update_rule_group(token, id, &ops)
            })
            .map_err(|source| ReconcileError::Update {
                id: id.clone(),
                source,
            })?;

        self.metrics.record_operations(ops.len());
        info!(
            scope = %self.scope(),
            rule_group_id = %id,
            inserts,
            deletes,
            "updated rule group membership"
        );
        Ok(ops)
    }
}
