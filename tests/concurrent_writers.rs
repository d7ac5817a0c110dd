//! Several reconcilers mutating through one service from separate threads.

use rule_group_reconciler::{
    ActivatedRule, ChangeTokenSource, InMemoryRuleGroupApi, Metrics, Reconciler, RetryConfig,
    RuleGroupApi, Scope,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn fast_retries() -> RetryConfig {
    RetryConfig {
        timeout: Duration::from_secs(60),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.5,
    }
}

/// Grow a group one rule at a time, returning the final member list.
fn grow(
    reconciler: &Reconciler<InMemoryRuleGroupApi>,
    name: &str,
    steps: i64,
) -> Vec<ActivatedRule> {
    let group = reconciler.create(name, "Concurrent", &[]).unwrap();
    let mut members = Vec::new();
    for priority in 0..steps {
        let mut next = members.clone();
        next.push(ActivatedRule::new(priority, format!("{name}-{priority}")));
        reconciler.update(&group.id, &members, &next).unwrap();
        members = next;
    }

    let read = reconciler.read(&group.id).unwrap().unwrap();
    assert_eq!(read.activated_rules, members);
    members
}

#[test]
fn test_writers_sharing_a_scope_all_succeed() {
    let api = Arc::new(InMemoryRuleGroupApi::new());
    let metrics = Metrics::new();

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let reconciler = Reconciler::builder(Arc::clone(&api))
                .with_retry_config(fast_retries())
                .with_metrics(metrics.clone())
                .build()
                .unwrap();
            thread::spawn(move || grow(&reconciler, &format!("writer{n}"), 10))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().len(), 10);
    }

    assert_eq!(api.len(), 4);
    // One create plus ten updates per writer.
    assert_eq!(metrics.mutations_submitted(), 44);
    assert_eq!(metrics.retry_timeouts(), 0);
}

#[test]
fn test_scopes_do_not_share_tokens() {
    let api = Arc::new(InMemoryRuleGroupApi::new());

    let handles: Vec<_> = ["global", "eu-west-1", "us-east-1"]
        .into_iter()
        .map(|region| {
            let scope = if region == "global" {
                Scope::global()
            } else {
                Scope::regional(region)
            };
            let metrics = Metrics::new();
            let reconciler = Reconciler::builder(Arc::clone(&api))
                .with_scope(scope)
                .with_retry_config(fast_retries())
                .with_metrics(metrics.clone())
                .build()
                .unwrap();
            thread::spawn(move || {
                grow(&reconciler, region, 5);
                metrics
            })
        })
        .collect();

    for handle in handles {
        let metrics = handle.join().unwrap();
        // Each scope has a single writer, so no token is ever superseded.
        assert_eq!(metrics.conflicts_retried(), 0);
    }
    assert_eq!(api.len(), 3);
}

#[test]
fn test_tokens_fetched_while_another_writer_holds_one_go_stale() {
    let api = InMemoryRuleGroupApi::new();
    let scope = Scope::global();

    let first = api.get_change_token(&scope).unwrap();
    let second = api.get_change_token(&scope).unwrap();

    assert!(api.create_rule_group(&first, "a", "A").is_err());
    assert!(api.create_rule_group(&second, "a", "A").is_ok());
}
