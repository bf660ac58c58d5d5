//! Runs the built-in rule base over the bundled demo fixtures.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use ruleops::config::RuleopsConfig;
use ruleops_advisor::{Advisor, FixtureResourceSource};
use ruleops_rules::RuleBaseRegistry;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures").join("demo")
}

async fn started_advisor(namespace: &str) -> Advisor {
    let config = RuleopsConfig {
        namespace: namespace.to_string(),
        fixtures: Some(demo_dir()),
        ..RuleopsConfig::default()
    };
    let source = unwrap_result(FixtureResourceSource::new(demo_dir()), "demo fixtures should exist");
    let advisor = Advisor::new(
        config.advisor_config(),
        Arc::new(source),
        Arc::new(RuleBaseRegistry::with_builtins()),
    );
    unwrap_result(advisor.on_start().await, "advisor should start");
    advisor
}

#[tokio::test]
async fn demo_fixtures_produce_every_expected_category() {
    // GIVEN: The demo workloads listed in their own namespace
    let advisor = started_advisor("shop").await;

    // WHEN: One run is triggered
    let advice = unwrap_result(advisor.evaluate_advice(None).await, "run should succeed");

    // THEN: Each problem planted in the fixtures is reported
    let categories: BTreeSet<&str> = advice.iter().map(|a| a.category.as_str()).collect();
    for expected in [
        "DeploymentUnavailable",
        "DeploymentDegraded",
        "StatefulSetNotReady",
        "CrashLoop",
        "StuckPod",
        "ClaimPending",
        "PodWaitingOnClaim",
        "MissingConfigMap",
        "ServiceWithoutEndpoints",
    ] {
        assert!(categories.contains(expected), "missing {expected} in {categories:?}");
    }
    assert!(!categories.contains("ClaimLost"));
    assert!(advice.iter().all(|a| a.rule.is_some()));
}

#[tokio::test]
async fn repeated_runs_over_the_same_files_agree() {
    let advisor = started_advisor("shop").await;

    let first = unwrap_result(advisor.evaluate_advice(None).await, "first run");
    let second = unwrap_result(advisor.evaluate_advice(None).await, "second run");

    // The StuckPod message carries the pending duration, which grows with
    // the wall clock between runs; compare everything else.
    let strip = |advice: &[ruleops_rules::Advice]| -> Vec<(String, Option<String>)> {
        advice
            .iter()
            .map(|a| (a.category.clone(), a.primary_ref().map(ToString::to_string)))
            .collect()
    };
    assert_eq!(strip(&first), strip(&second));
}

#[tokio::test]
async fn other_namespace_sees_only_cluster_wide_kinds() {
    // GIVEN: The collector pointed at a namespace with no workloads
    let advisor = started_advisor("default").await;

    // WHEN: One run is triggered
    let advice = unwrap_result(advisor.evaluate_advice(None).await, "run should succeed");

    // THEN: Pods are still listed across namespaces, deployments are not
    let categories: BTreeSet<&str> = advice.iter().map(|a| a.category.as_str()).collect();
    assert!(categories.contains("CrashLoop"));
    assert!(!categories.contains("DeploymentUnavailable"));
    // The claim lives in "shop" and was not listed, so the mount is missing.
    assert!(categories.contains("MissingClaim"));
}
