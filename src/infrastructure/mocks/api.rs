//! Recording, fault-injecting wrapper around a rule group service.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::application::ports::{ApiError, ChangeTokenSource, RuleGroupApi};
use crate::domain::diff::MutationOp;
use crate::domain::rule::{ActivatedRule, ChangeToken, RuleGroupId, RuleGroupRef, Scope};

const POISONED: &str =
    "FaultInjectingApi mutex poisoned - a test thread panicked while holding the lock";

#[derive(Debug, Default)]
struct Journal {
    tokens_issued: Vec<ChangeToken>,
    mutation_tokens: Vec<ChangeToken>,
    batches: Vec<Vec<MutationOp>>,
    deletes: Vec<RuleGroupId>,
}

#[derive(Debug, Default)]
struct Faults {
    next_reads: VecDeque<ApiError>,
    next_mutations: VecDeque<ApiError>,
    every_mutation: Option<ApiError>,
}

/// Wraps an inner [`RuleGroupApi`], journals every call and fails calls on
/// demand.
///
/// Injected mutation failures are returned without reaching the inner
/// service, so they never consume the inner token.
///
/// # Examples
///
/// ```
/// use rule_group_reconciler::infrastructure::mocks::FaultInjectingApi;
/// use rule_group_reconciler::{ApiError, InMemoryRuleGroupApi, Reconciler};
/// use std::sync::Arc;
///
/// let api = Arc::new(FaultInjectingApi::new(InMemoryRuleGroupApi::new()));
/// api.fail_next_mutations(vec![ApiError::stale_token("superseded")]);
///
/// let reconciler = Reconciler::builder(Arc::clone(&api)).build().unwrap();
/// reconciler.create("edge", "Edge", &[]).unwrap();
///
/// assert_eq!(api.tokens_issued().len(), 2);
/// ```
pub struct FaultInjectingApi<A> {
    inner: A,
    journal: Mutex<Journal>,
    faults: Mutex<Faults>,
}

impl<A> FaultInjectingApi<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            journal: Mutex::new(Journal::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Fail the next `get_rule_group` call with `error`.
    pub fn fail_next_read(&self, error: ApiError) {
        self.faults.lock().expect(POISONED).next_reads.push_back(error);
    }

    /// Fail the next mutating calls, one error per call, in order.
    pub fn fail_next_mutations(&self, errors: Vec<ApiError>) {
        self.faults
            .lock()
            .expect(POISONED)
            .next_mutations
            .extend(errors);
    }

    /// Fail every mutating call from now on.
    pub fn always_fail_mutations(&self, error: ApiError) {
        self.faults.lock().expect(POISONED).every_mutation = Some(error);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        *self.faults.lock().expect(POISONED) = Faults::default();
    }

    /// Every token handed out, in order.
    pub fn tokens_issued(&self) -> Vec<ChangeToken> {
        self.journal.lock().expect(POISONED).tokens_issued.clone()
    }

    /// Tokens presented to mutating calls, including failed ones.
    pub fn mutation_tokens(&self) -> Vec<ChangeToken> {
        self.journal.lock().expect(POISONED).mutation_tokens.clone()
    }

    /// Update batches accepted by the inner service.
    pub fn batches(&self) -> Vec<Vec<MutationOp>> {
        self.journal.lock().expect(POISONED).batches.clone()
    }

    /// Rule groups a delete was attempted for.
    pub fn deletes(&self) -> Vec<RuleGroupId> {
        self.journal.lock().expect(POISONED).deletes.clone()
    }

    fn begin_mutation(&self, token: &ChangeToken) -> Result<(), ApiError> {
        self.journal
            .lock()
            .expect(POISONED)
            .mutation_tokens
            .push(token.clone());

        let mut faults = self.faults.lock().expect(POISONED);
        if let Some(err) = faults.next_mutations.pop_front() {
            return Err(err);
        }
        match &faults.every_mutation {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl<A> fmt::Debug for FaultInjectingApi<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultInjectingApi").finish_non_exhaustive()
    }
}

impl<A: ChangeTokenSource> ChangeTokenSource for FaultInjectingApi<A> {
    fn get_change_token(&self, scope: &Scope) -> Result<ChangeToken, ApiError> {
        let token = self.inner.get_change_token(scope)?;
        self.journal
            .lock()
            .expect(POISONED)
            .tokens_issued
            .push(token.clone());
        Ok(token)
    }
}

impl<A: RuleGroupApi> RuleGroupApi for FaultInjectingApi<A> {
    fn create_rule_group(
        &self,
        token: &ChangeToken,
        name: &str,
        metric_name: &str,
    ) -> Result<RuleGroupId, ApiError> {
        self.begin_mutation(token)?;
        self.inner.create_rule_group(token, name, metric_name)
    }

    fn get_rule_group(&self, id: &RuleGroupId) -> Result<RuleGroupRef, ApiError> {
        if let Some(err) = self.faults.lock().expect(POISONED).next_reads.pop_front() {
            return Err(err);
        }
        self.inner.get_rule_group(id)
    }

    fn list_activated_rules(&self, id: &RuleGroupId) -> Result<Vec<ActivatedRule>, ApiError> {
        self.inner.list_activated_rules(id)
    }

    fn update_rule_group(
        &self,
        token: &ChangeToken,
        id: &RuleGroupId,
        updates: &[MutationOp],
    ) -> Result<(), ApiError> {
        self.begin_mutation(token)?;
        self.inner.update_rule_group(token, id, updates)?;
        self.journal
            .lock()
            .expect(POISONED)
            .batches
            .push(updates.to_vec());
        Ok(())
    }

    fn delete_rule_group(&self, token: &ChangeToken, id: &RuleGroupId) -> Result<(), ApiError> {
        self.journal.lock().expect(POISONED).deletes.push(id.clone());
        self.begin_mutation(token)?;
        self.inner.delete_rule_group(token, id)
    }
}
