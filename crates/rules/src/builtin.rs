//! Built-in rule bases.
//!
//! `ruleops-default` covers the common ways workloads get stuck. Time-based
//! rules read the `now` global, which sessions bind to the snapshot instant,
//! so evaluation never consults the wall clock.

use chrono::TimeDelta;
use itertools::Itertools;
use ruleops_core::{ClaimPhase, PodPhase, ResourceKind, ResourceRecord, ServiceType};

use crate::advice::{Advice, Severity};
use crate::base::{RuleBase, RuleBaseRegistry};
use crate::error::Result;
use crate::fact::FactFilter;
use crate::rule::{Rule, RuleContext, Tuple};
use crate::session::{ARG0, NOW};

pub const DEFAULT_RULE_BASE: &str = "ruleops-default";
pub const EMPTY_RULE_BASE: &str = "ruleops-empty";

/// Restarts at which a container counts as crash-looping.
pub const CRASH_LOOP_RESTARTS: u32 = 5;

const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";

/// How long a pod may stay Pending before it is reported.
#[must_use]
pub fn stuck_pod_threshold() -> TimeDelta {
    TimeDelta::minutes(5)
}

/// Register every built-in rule base.
pub fn register_all(registry: &mut RuleBaseRegistry) {
    registry.register(DEFAULT_RULE_BASE, default_rule_base);
    registry.register(EMPTY_RULE_BASE, || RuleBase::new(EMPTY_RULE_BASE, Vec::new()));
}

/// Compile `ruleops-default`.
///
/// # Errors
///
/// Only if two rules share a name.
pub fn default_rule_base() -> Result<RuleBase> {
    RuleBase::new(
        DEFAULT_RULE_BASE,
        vec![
            stuck_pod(),
            crash_loop(),
            deployment_unavailable(),
            deployment_degraded(),
            stateful_set_not_ready(),
            claim_pending(),
            claim_lost(),
            pod_waiting_on_claim(),
            pod_missing_claim(),
            pod_missing_config_map(),
            service_without_endpoints(),
            focus_namespace(),
        ],
    )
}

fn advise(ctx: &mut RuleContext<'_>, category: &str, severity: Severity, message: String) {
    let references = ctx
        .matched()
        .iter()
        .filter_map(|h| ctx.memory().get(*h))
        .filter_map(|f| f.as_resource().map(ResourceRecord::resource_ref))
        .collect::<Vec<_>>();
    let advice = references
        .into_iter()
        .fold(Advice::new(category, message).with_severity(severity), Advice::referencing);
    ctx.insert_advice(advice);
}

fn stuck_pod() -> Rule {
    Rule::builder("stuck-pod")
        .when_record(ResourceKind::Pod, |record, globals| {
            let Some(now) = globals.timestamp(NOW) else {
                return false;
            };
            record
                .as_pod()
                .and_then(|pod| pod.pending_for(now))
                .is_some_and(|pending| pending > stuck_pod_threshold())
        })
        .then(|ctx| {
            let name = ctx.resource(0).map(ResourceRecord::resource_ref);
            let minutes = ctx
                .global(NOW)
                .and_then(crate::fact::GlobalValue::as_timestamp)
                .zip(ctx.resource(0).and_then(ResourceRecord::as_pod))
                .and_then(|(now, pod)| pod.pending_for(now))
                .map_or(0, |d| d.num_minutes());
            let message = match name {
                Some(r) => format!("{r} has been Pending for {minutes}m"),
                None => format!("pod has been Pending for {minutes}m"),
            };
            advise(ctx, "StuckPod", Severity::Warning, message);
            Ok(())
        })
}

fn crash_loop() -> Rule {
    Rule::builder("crash-loop")
        .when_record(ResourceKind::Pod, |record, _| {
            record.as_pod().is_some_and(|pod| {
                pod.containers.iter().any(|c| {
                    c.waiting_reason.as_deref() == Some(CRASH_LOOP_REASON)
                        || c.restart_count >= CRASH_LOOP_RESTARTS
                })
            })
        })
        .then(|ctx| {
            let restarts = ctx
                .resource(0)
                .and_then(ResourceRecord::as_pod)
                .map_or(0, ruleops_core::Pod::restart_count);
            let name = ctx.resource(0).map_or_else(String::new, |r| r.resource_ref().to_string());
            advise(
                ctx,
                "CrashLoop",
                Severity::Critical,
                format!("{name} is crash-looping ({restarts} restarts)"),
            );
            Ok(())
        })
}

fn deployment_unavailable() -> Rule {
    Rule::builder("deployment-unavailable")
        .salience(10)
        .when_record(ResourceKind::Deployment, |record, _| {
            record
                .as_deployment()
                .is_some_and(|d| d.replicas > 0 && d.available_replicas == 0)
        })
        .then(|ctx| {
            let name = ctx.resource(0).map_or_else(String::new, |r| r.resource_ref().to_string());
            advise(
                ctx,
                "DeploymentUnavailable",
                Severity::Critical,
                format!("{name} has no available replicas"),
            );
            Ok(())
        })
}

fn deployment_degraded() -> Rule {
    Rule::builder("deployment-degraded")
        .when_record(ResourceKind::Deployment, |record, _| {
            record
                .as_deployment()
                .is_some_and(|d| d.available_replicas > 0 && d.available_replicas < d.replicas)
        })
        .then(|ctx| {
            let (name, available, desired) = ctx
                .resource(0)
                .and_then(|r| r.as_deployment().map(|d| (r.resource_ref().to_string(), d.available_replicas, d.replicas)))
                .unwrap_or_default();
            advise(
                ctx,
                "DeploymentDegraded",
                Severity::Warning,
                format!("{name} has {available}/{desired} replicas available"),
            );
            Ok(())
        })
}

fn stateful_set_not_ready() -> Rule {
    Rule::builder("statefulset-not-ready")
        .when_record(ResourceKind::StatefulSet, |record, _| {
            record.as_stateful_set().is_some_and(|s| s.ready_replicas < s.replicas)
        })
        .then(|ctx| {
            let (name, ready, desired) = ctx
                .resource(0)
                .and_then(|r| r.as_stateful_set().map(|s| (r.resource_ref().to_string(), s.ready_replicas, s.replicas)))
                .unwrap_or_default();
            advise(
                ctx,
                "StatefulSetNotReady",
                Severity::Warning,
                format!("{name} has {ready}/{desired} replicas ready"),
            );
            Ok(())
        })
}

fn claim_pending() -> Rule {
    Rule::builder("claim-pending")
        .when_record(ResourceKind::PersistentVolumeClaim, |record, _| {
            record.as_claim().is_some_and(|c| c.phase == ClaimPhase::Pending)
        })
        .then(|ctx| {
            let (name, class) = ctx
                .resource(0)
                .and_then(|r| {
                    r.as_claim().map(|c| {
                        (
                            r.resource_ref().to_string(),
                            c.storage_class.clone().unwrap_or_else(|| "<default>".to_string()),
                        )
                    })
                })
                .unwrap_or_default();
            advise(
                ctx,
                "ClaimPending",
                Severity::Warning,
                format!("{name} is not bound (storage class {class})"),
            );
            Ok(())
        })
}

fn claim_lost() -> Rule {
    Rule::builder("claim-lost")
        .salience(10)
        .when_record(ResourceKind::PersistentVolumeClaim, |record, _| {
            record.as_claim().is_some_and(|c| c.phase == ClaimPhase::Lost)
        })
        .then(|ctx| {
            let name = ctx.resource(0).map_or_else(String::new, |r| r.resource_ref().to_string());
            advise(
                ctx,
                "ClaimLost",
                Severity::Critical,
                format!("{name} lost its bound volume"),
            );
            Ok(())
        })
}

/// Pending pods paired with the Pending claims they mount.
fn pod_waiting_on_claim() -> Rule {
    Rule::builder("pod-waiting-on-claim")
        .when(|memory| {
            let mut tuples: Vec<Tuple> = Vec::new();
            for (pod_handle, pod_record) in memory.resources(ResourceKind::Pod) {
                let Some(pod) = pod_record.as_pod().filter(|p| p.phase == PodPhase::Pending) else {
                    continue;
                };
                for claim_name in &pod.claim_names {
                    tuples.extend(
                        memory
                            .named(ResourceKind::PersistentVolumeClaim, pod_record.namespace(), claim_name)
                            .filter(|(_, claim)| claim.as_claim().is_some_and(|c| c.phase == ClaimPhase::Pending))
                            .map(|(claim_handle, _)| vec![pod_handle, claim_handle]),
                    );
                }
            }
            tuples
        })
        .watching([ResourceKind::Pod, ResourceKind::PersistentVolumeClaim])
        .then(|ctx| {
            let pod = ctx.resource(0).map_or_else(String::new, |r| r.resource_ref().to_string());
            let claim = ctx.resource(1).map_or_else(String::new, |r| r.name().to_string());
            advise(
                ctx,
                "PodWaitingOnClaim",
                Severity::Warning,
                format!("{pod} is waiting for claim {claim} to bind"),
            );
            Ok(())
        })
}

fn pod_missing_claim() -> Rule {
    Rule::builder("pod-missing-claim")
        .when_resource(ResourceKind::Pod, |record, memory| {
            record.as_pod().is_some_and(|pod| {
                pod.claim_names.iter().any(|claim| {
                    !memory.has_resource(ResourceKind::PersistentVolumeClaim, record.namespace(), claim)
                })
            })
        })
        .watching([ResourceKind::Pod, ResourceKind::PersistentVolumeClaim])
        .then(|ctx| {
            let Some(record) = ctx.resource(0) else {
                return Ok(());
            };
            let missing = record
                .as_pod()
                .map(|pod| {
                    pod.claim_names
                        .iter()
                        .filter(|claim| {
                            !ctx.memory()
                                .has_resource(ResourceKind::PersistentVolumeClaim, record.namespace(), claim)
                        })
                        .join(", ")
                })
                .unwrap_or_default();
            let message = format!("{} mounts missing claim(s): {missing}", record.resource_ref());
            advise(ctx, "MissingClaim", Severity::Critical, message);
            Ok(())
        })
}

fn pod_missing_config_map() -> Rule {
    Rule::builder("pod-missing-config-map")
        .when_resource(ResourceKind::Pod, |record, memory| {
            record.as_pod().is_some_and(|pod| {
                pod.config_map_names
                    .iter()
                    .any(|cm| !memory.has_resource(ResourceKind::ConfigMap, record.namespace(), cm))
            })
        })
        .watching([ResourceKind::Pod, ResourceKind::ConfigMap])
        .then(|ctx| {
            let Some(record) = ctx.resource(0) else {
                return Ok(());
            };
            let missing = record
                .as_pod()
                .map(|pod| {
                    pod.config_map_names
                        .iter()
                        .filter(|cm| !ctx.memory().has_resource(ResourceKind::ConfigMap, record.namespace(), cm))
                        .join(", ")
                })
                .unwrap_or_default();
            let message = format!("{} references missing ConfigMap(s): {missing}", record.resource_ref());
            advise(ctx, "MissingConfigMap", Severity::Critical, message);
            Ok(())
        })
}

fn service_without_endpoints() -> Rule {
    Rule::builder("service-without-endpoints")
        .when_resource(ResourceKind::Service, |record, memory| {
            let Some(service) = record.as_service() else {
                return false;
            };
            if service.service_type == ServiceType::ExternalName || service.selector.is_empty() {
                return false;
            }
            !memory.resources(ResourceKind::Pod).any(|(_, pod)| {
                pod.namespace() == record.namespace()
                    && pod.as_pod().is_some_and(|p| p.phase == PodPhase::Running)
                    && pod.metadata().matches_selector(&service.selector)
            })
        })
        .watching([ResourceKind::Service, ResourceKind::Pod])
        .then(|ctx| {
            let name = ctx.resource(0).map_or_else(String::new, |r| r.resource_ref().to_string());
            advise(
                ctx,
                "ServiceWithoutEndpoints",
                Severity::Warning,
                format!("{name} selects no running pods"),
            );
            Ok(())
        })
}

/// With `arg0` bound, drop advice about resources in other namespaces.
fn focus_namespace() -> Rule {
    Rule::builder("focus-namespace")
        .salience(-100)
        .when_fact(FactFilter::Advice, |fact, globals| {
            let Some(focus) = globals.text(ARG0) else {
                return false;
            };
            fact.as_advice()
                .and_then(Advice::primary_ref)
                .and_then(|r| r.namespace.as_deref())
                .is_some_and(|ns| ns != focus)
        })
        .then(|ctx| {
            if let Some(handle) = ctx.matched().first().copied() {
                ctx.retract(handle);
            }
            Ok(())
        })
}
