//! Evaluation tests against the built-in and ad-hoc rule bases.
//!
//! Tests verify that:
//! - Identical inputs produce identical advice
//! - Time-based rules judge against the snapshot instant
//! - `arg0` reaches rule conditions as a global
//! - Failing actions and misbehaving listeners are contained

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use ruleops_core::{
    ClaimPhase, ContainerStatus, Deployment, ObjectMeta, PersistentVolumeClaim, Pod, PodPhase, ResourceKind,
    ResourceRecord, Service, Snapshot,
};
use ruleops_rules::{
    evaluate, Advice, Error, ListenerResult, ObjectInserted, Rule, RuleBase, RuleBaseLoader,
    RuleBaseRegistry, StatelessSession, TracingListener, WorkingMemoryListener, ARG0,
    DEFAULT_RULE_BASE, EMPTY_RULE_BASE,
};

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn taken_at() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0) {
        chrono::LocalResult::Single(t) => t,
        _ => panic!("fixed timestamp should be valid"),
    }
}

fn pod(name: &str, namespace: &str, phase: PodPhase, age: TimeDelta) -> ResourceRecord {
    ResourceRecord::Pod(Pod {
        metadata: ObjectMeta::new(name)
            .in_namespace(namespace)
            .created_at(taken_at() - age),
        phase,
        ..Pod::default()
    })
}

fn default_base() -> Arc<RuleBase> {
    unwrap_result(
        RuleBaseRegistry::with_builtins().load(DEFAULT_RULE_BASE),
        "default rule base should load",
    )
}

#[cfg(test)]
mod evaluation_tests {
    use super::*;

    // ==========================================================================
    // BUILT-IN RULE BASE
    // ==========================================================================

    #[test]
    fn one_pod_pending_for_ten_minutes_yields_one_stuck_pod_advice() {
        // GIVEN: Three pods, one of them Pending for 10 minutes
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![
                pod("web-1", "shop", PodPhase::Running, TimeDelta::hours(1)),
                pod("web-2", "shop", PodPhase::Pending, TimeDelta::minutes(10)),
                pod("web-3", "shop", PodPhase::Running, TimeDelta::hours(1)),
            ],
        );

        // WHEN: The default rule base evaluates the snapshot
        let advice = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");

        // THEN: Exactly one StuckPod advice references the pending pod
        assert_eq!(advice.len(), 1, "expected one advice, got {advice:?}");
        let stuck = &advice[0];
        assert_eq!(stuck.category, "StuckPod");
        assert_eq!(stuck.rule.as_deref(), Some("stuck-pod"));
        let reference = stuck.primary_ref().map(ToString::to_string);
        assert_eq!(reference.as_deref(), Some("Pod/shop/web-2"));
    }

    #[test]
    fn recently_pending_pod_is_not_stuck() {
        // GIVEN: A pod Pending for two minutes
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![pod("fresh", "shop", PodPhase::Pending, TimeDelta::minutes(2))],
        );

        // WHEN/THEN: Nothing is reported
        let advice = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");
        assert!(advice.is_empty());
    }

    #[test]
    fn empty_snapshot_yields_no_advice() {
        // GIVEN: An empty snapshot
        let snapshot = Snapshot::empty(taken_at());

        // WHEN: Both built-in rule bases evaluate it
        let registry = RuleBaseRegistry::with_builtins();
        for name in [DEFAULT_RULE_BASE, EMPTY_RULE_BASE] {
            let base = unwrap_result(registry.load(name), "rule base should load");
            let advice = unwrap_result(evaluate(base, &snapshot, None), "evaluate should succeed");

            // THEN: No advice is produced
            assert!(advice.is_empty(), "{name} produced {advice:?}");
        }
    }

    #[test]
    fn more_findings_than_any_fixed_cap_still_evaluate() {
        // GIVEN: 12 000 pods Pending for ten minutes
        let records: Vec<_> = (0..12_000)
            .map(|i| pod(&format!("batch-{i}"), "jobs", PodPhase::Pending, TimeDelta::minutes(10)))
            .collect();
        let snapshot = Snapshot::from_records(taken_at(), records);

        // WHEN: The default rule base evaluates it, with and without a focus namespace
        let all = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");
        let elsewhere = unwrap_result(
            evaluate(default_base(), &snapshot, Some("other")),
            "focused evaluate should succeed",
        );

        // THEN: Every pod is reported, and the focus drops them all
        assert_eq!(all.len(), 12_000);
        assert!(all.iter().all(|a| a.category == "StuckPod"));
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn pods_joined_to_their_claims_scale_to_thousands() {
        // GIVEN: 3 000 stuck pods, each mounting its own unbound claim
        let mut records = Vec::new();
        for i in 0..3_000 {
            let claim = format!("data-{i}");
            records.push(ResourceRecord::Pod(Pod {
                metadata: ObjectMeta::new(format!("db-{i}"))
                    .in_namespace("b")
                    .created_at(taken_at() - TimeDelta::minutes(10)),
                phase: PodPhase::Pending,
                claim_names: vec![claim.clone()],
                ..Pod::default()
            }));
            records.push(ResourceRecord::PersistentVolumeClaim(PersistentVolumeClaim {
                metadata: ObjectMeta::new(claim).in_namespace("b"),
                phase: ClaimPhase::Pending,
                ..PersistentVolumeClaim::default()
            }));
        }
        let snapshot = Snapshot::from_records(taken_at(), records);

        // WHEN: Evaluated focused on the namespace and away from it
        let focused = unwrap_result(evaluate(default_base(), &snapshot, Some("b")), "evaluate should succeed");
        let elsewhere = unwrap_result(evaluate(default_base(), &snapshot, Some("a")), "evaluate should succeed");

        // THEN: Each pod yields StuckPod, ClaimPending and PodWaitingOnClaim; none survive elsewhere
        assert_eq!(focused.len(), 9_000);
        let waiting = focused.iter().filter(|a| a.category == "PodWaitingOnClaim").count();
        assert_eq!(waiting, 3_000);
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn crash_looping_container_and_unavailable_deployment_are_reported() {
        // GIVEN: A crash-looping pod and a deployment with nothing available
        let mut crashing = Pod {
            metadata: ObjectMeta::new("api-0").in_namespace("shop").created_at(taken_at()),
            phase: PodPhase::Running,
            ..Pod::default()
        };
        crashing.containers.push(ContainerStatus {
            name: "api".into(),
            ready: false,
            restart_count: 7,
            waiting_reason: Some("CrashLoopBackOff".into()),
        });
        let deployment = Deployment {
            metadata: ObjectMeta::new("api").in_namespace("shop"),
            replicas: 2,
            ..Deployment::default()
        };
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![ResourceRecord::Pod(crashing), ResourceRecord::Deployment(deployment)],
        );

        // WHEN: The default rule base evaluates the snapshot
        let advice = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");

        // THEN: Higher salience fires first, so advice comes in that order
        let categories: Vec<_> = advice.iter().map(|a| a.category.as_str()).collect();
        assert_eq!(categories, vec!["DeploymentUnavailable", "CrashLoop"]);
    }

    #[test]
    fn service_without_matching_running_pod_is_reported() {
        // GIVEN: Two services, only one of which selects a running pod
        let mut backing = pod("db-0", "shop", PodPhase::Running, TimeDelta::hours(1));
        if let ResourceRecord::Pod(p) = &mut backing {
            p.metadata = p.metadata.clone().with_label("app", "db");
        }
        let served = Service {
            metadata: ObjectMeta::new("db").in_namespace("shop"),
            selector: [("app".to_string(), "db".to_string())].into(),
            ..Service::default()
        };
        let orphan = Service {
            metadata: ObjectMeta::new("cache").in_namespace("shop"),
            selector: [("app".to_string(), "cache".to_string())].into(),
            ..Service::default()
        };
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![backing, ResourceRecord::Service(served), ResourceRecord::Service(orphan)],
        );

        // WHEN: The default rule base evaluates the snapshot
        let advice = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");

        // THEN: Only the orphaned service is reported
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].category, "ServiceWithoutEndpoints");
        assert_eq!(advice[0].primary_ref().map(|r| r.name.as_str()), Some("cache"));
    }

    #[test]
    fn arg0_narrows_default_advice_to_one_namespace() {
        // GIVEN: Stuck pods in two namespaces
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![
                pod("a", "team-a", PodPhase::Pending, TimeDelta::minutes(30)),
                pod("b", "team-b", PodPhase::Pending, TimeDelta::minutes(30)),
            ],
        );

        // WHEN: Evaluated with and without a namespace argument
        let all = unwrap_result(evaluate(default_base(), &snapshot, None), "evaluate should succeed");
        let focused = unwrap_result(
            evaluate(default_base(), &snapshot, Some("team-b")),
            "evaluate should succeed",
        );

        // THEN: The argument keeps only advice about that namespace
        assert_eq!(all.len(), 2);
        assert_eq!(focused.len(), 1);
        assert_eq!(
            focused[0].primary_ref().and_then(|r| r.namespace.as_deref()),
            Some("team-b")
        );
    }

    // ==========================================================================
    // GLOBALS AND SESSIONS
    // ==========================================================================

    #[test]
    fn arg0_is_visible_to_rule_conditions() {
        // GIVEN: A rule that only matches when arg0 is "namespace-x"
        let base = unwrap_result(
            RuleBase::new(
                "arg-test",
                vec![Rule::builder("sees-arg")
                    .when(|memory| {
                        if memory.global_text(ARG0) == Some("namespace-x") {
                            vec![Vec::new()]
                        } else {
                            Vec::new()
                        }
                    })
                    .then(|ctx| {
                        ctx.insert_advice(Advice::new("Arg", "arg0 seen"));
                        Ok(())
                    })],
            ),
            "rule base should compile",
        );
        let base = Arc::new(base);
        let snapshot = Snapshot::empty(taken_at());

        // WHEN: Evaluated with, without, and with a different argument
        let with_arg = unwrap_result(evaluate(base.clone(), &snapshot, Some("namespace-x")), "with arg");
        let without = unwrap_result(evaluate(base.clone(), &snapshot, None), "without arg");
        let other = unwrap_result(evaluate(base, &snapshot, Some("namespace-y")), "other arg");

        // THEN: Only the matching argument fires the rule
        assert_eq!(with_arg.len(), 1);
        assert!(without.is_empty());
        assert!(other.is_empty());
    }

    #[test]
    fn failing_action_fails_the_run_and_the_next_run_succeeds() {
        // GIVEN: A rule that fails whenever a Deployment is present
        let base = unwrap_result(
            RuleBase::new(
                "fragile",
                vec![
                    Rule::builder("explode")
                        .when_resource(ResourceKind::Deployment, |_, _| true)
                        .then(|_| Err(Error::invalid_fact("deployment not supported"))),
                    Rule::builder("count-pods")
                        .when_resource(ResourceKind::Pod, |_, _| true)
                        .then(|ctx| {
                            ctx.insert_advice(Advice::new("Pod", "seen"));
                            Ok(())
                        }),
                ],
            ),
            "rule base should compile",
        );
        let session = StatelessSession::new(Arc::new(base));
        let bad = Snapshot::from_records(
            taken_at(),
            vec![ResourceRecord::Deployment(Deployment {
                metadata: ObjectMeta::new("boom"),
                ..Deployment::default()
            })],
        );
        let good = Snapshot::from_records(
            taken_at(),
            vec![pod("p", "ns", PodPhase::Running, TimeDelta::zero())],
        );

        // WHEN: The failing snapshot is evaluated, then a healthy one
        let failed = session.evaluate(&bad, None);
        let next = session.evaluate(&good, None);

        // THEN: The first run errors, the second is unaffected
        assert!(matches!(failed, Err(Error::ActionFailed { ref rule, .. }) if rule == "explode"));
        let next = unwrap_result(next, "next run should succeed");
        assert_eq!(next.len(), 1);
        assert_eq!(session.rule_base().len(), 2);
    }

    #[test]
    fn panicking_listener_does_not_change_the_result() {
        struct Exploding;
        impl WorkingMemoryListener for Exploding {
            fn object_inserted(&self, _: &ObjectInserted<'_>) -> ListenerResult {
                panic!("listener blew up");
            }
        }

        // GIVEN: The same snapshot and two sessions, one with a panicking listener
        let snapshot = Snapshot::from_records(
            taken_at(),
            vec![pod("stuck", "ns", PodPhase::Pending, TimeDelta::hours(2))],
        );
        let quiet = StatelessSession::new(default_base());
        let mut noisy = StatelessSession::new(default_base());
        noisy.add_event_listener(Arc::new(Exploding));
        noisy.add_event_listener(Arc::new(TracingListener));

        // WHEN: Both evaluate
        let expected = unwrap_result(quiet.evaluate(&snapshot, None), "quiet evaluate");
        let actual = unwrap_result(noisy.evaluate(&snapshot, None), "noisy evaluate");

        // THEN: Advice is identical
        assert_eq!(expected, actual);
        assert_eq!(actual.len(), 1);
    }

    #[test]
    fn unknown_rule_base_is_not_found() {
        let registry = RuleBaseRegistry::with_builtins();
        let result = registry.load("no-such-base");
        assert!(matches!(result, Err(Error::RuleBaseNotFound { ref name }) if name == "no-such-base"));
    }

    // ==========================================================================
    // PROPERTY-BASED TESTS
    // ==========================================================================

    fn arb_phase() -> impl Strategy<Value = PodPhase> {
        prop_oneof![
            Just(PodPhase::Pending),
            Just(PodPhase::Running),
            Just(PodPhase::Succeeded),
            Just(PodPhase::Failed),
            Just(PodPhase::Unknown),
        ]
    }

    fn arb_pod() -> impl Strategy<Value = ResourceRecord> {
        (
            "[a-z]{1,8}",
            prop::sample::select(vec!["a", "b", "c"]),
            arb_phase(),
            0i64..120,
            0u32..10,
        )
            .prop_map(|(name, ns, phase, age, restarts)| {
                let mut record = pod(&name, ns, phase, TimeDelta::minutes(age));
                if let ResourceRecord::Pod(p) = &mut record {
                    p.containers.push(ContainerStatus {
                        name: "main".into(),
                        ready: phase == PodPhase::Running,
                        restart_count: restarts,
                        waiting_reason: None,
                    });
                }
                record
            })
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(
            pods in prop::collection::vec(arb_pod(), 0..12),
            arg in prop::option::of(prop::sample::select(vec!["a", "b"])),
        ) {
            let snapshot = Snapshot::from_records(taken_at(), pods);
            let base = default_base();

            let first = evaluate(base.clone(), &snapshot, arg);
            let second = evaluate(base, &snapshot, arg);

            prop_assert!(first.is_ok());
            prop_assert_eq!(first, second);
        }
    }
}
