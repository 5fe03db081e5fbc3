//! Property-based tests for the invariants the decider must hold
//! regardless of the specific workload or policy values involved.

use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use kube_downscaler::decider::{decide, Action};
use kube_downscaler::policy::EffectivePolicy;
use kube_downscaler::resources::{ResourceKind, Workload};
use proptest::prelude::*;

fn base_policy() -> EffectivePolicy {
    EffectivePolicy {
        upscale_period: "never".to_string(),
        downscale_period: "never".to_string(),
        uptime: "always".to_string(),
        downtime: "never".to_string(),
        downtime_replicas: 0,
        forced_uptime: false,
        excluded: false,
        grace_period_seconds: 0,
    }
}

fn deployment(replicas: i64, created: chrono::DateTime<Utc>, annotations: BTreeMap<String, String>) -> Workload {
    Workload {
        kind: ResourceKind::Deployments,
        api_version: "apps/v1".to_string(),
        namespace: "default".to_string(),
        name: "demo".to_string(),
        creation_timestamp: created,
        annotations,
        owner_references: vec![],
        raw: serde_json::json!({ "spec": { "replicas": replicas } }),
    }
}

proptest! {
    /// Round-trip: a workload downscaled then restored, with no external
    /// mutation in between, ends up back at its original replica count
    /// with the `original-replicas` annotation cleared.
    #[test]
    fn round_trip_restores_exact_replicas(
        replicas in 1i64..50,
        downtime_replicas in 0i64..50,
    ) {
        prop_assume!(replicas > downtime_replicas);
        let now = Utc.with_ymd_and_hms(2018, 10, 23, 21, 56, 0).unwrap();
        let created = now - Duration::hours(1);

        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.downtime_replicas = downtime_replicas;

        let mut w = deployment(replicas, created, BTreeMap::new());
        let down = decide(&w, &policy, now, None).unwrap();
        prop_assert_eq!(down, Action::ScaleDown(downtime_replicas));

        // apply the patch by hand, as the driver would
        w.raw["spec"]["replicas"] = serde_json::json!(downtime_replicas);
        w.annotations.insert("downscaler/original-replicas".to_string(), replicas.to_string());

        let mut uptime_policy = base_policy();
        uptime_policy.uptime = "always".to_string();
        uptime_policy.downtime = "never".to_string();
        uptime_policy.downtime_replicas = downtime_replicas;

        let up = decide(&w, &uptime_policy, now, None).unwrap();
        prop_assert_eq!(up, Action::ScaleUp(replicas));

        w.raw["spec"]["replicas"] = serde_json::json!(replicas);
        w.annotations.remove("downscaler/original-replicas");

        prop_assert_eq!(w.get_scale().unwrap(), replicas);
        prop_assert!(!w.annotations.contains_key("downscaler/original-replicas"));
    }

    /// A single call to `decide` never returns more than one action: the
    /// enum itself forbids a simultaneous scale-up and scale-down, so this
    /// checks the match is exhaustive and the returned action is always
    /// one of exactly three variants for arbitrary replica counts.
    #[test]
    fn at_most_one_transition(
        replicas in 0i64..50,
        downtime_replicas in 0i64..50,
        grace in 0u64..3600,
    ) {
        let now = Utc::now();
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.downtime_replicas = downtime_replicas;
        policy.grace_period_seconds = grace;
        let w = deployment(replicas, now - Duration::hours(2), BTreeMap::new());
        let action = decide(&w, &policy, now, None).unwrap();
        let is_single = matches!(action, Action::NoOp)
            || matches!(action, Action::ScaleDown(_))
            || matches!(action, Action::ScaleUp(_));
        prop_assert!(is_single);
    }

    /// Within the grace period, no scale-down is ever emitted, regardless
    /// of the downtime policy.
    #[test]
    fn grace_period_always_blocks_scale_down(
        replicas in 1i64..50,
        grace_seconds in 60u64..7200,
        elapsed_seconds in 0i64..60,
    ) {
        let now = Utc::now();
        let created = now - Duration::seconds(elapsed_seconds);
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.grace_period_seconds = grace_seconds;
        let w = deployment(replicas, created, BTreeMap::new());
        let action = decide(&w, &policy, now, None).unwrap();
        prop_assert_eq!(action, Action::NoOp);
    }

    /// Overlapping upscale/downscale periods always produce no patch.
    #[test]
    fn overlapping_periods_are_always_noop(replicas in 0i64..50) {
        let now = Utc::now();
        let mut policy = base_policy();
        policy.upscale_period = "always".to_string();
        policy.downscale_period = "always".to_string();
        let w = deployment(replicas, now - Duration::hours(2), BTreeMap::new());
        let action = decide(&w, &policy, now, None).unwrap();
        prop_assert_eq!(action, Action::NoOp);
    }

    /// A workload sitting at `downtime_replicas` with a stored
    /// `original-replicas` that becomes excluded is restored on the next
    /// tick and the annotation is implicitly cleared by the scale-up path.
    #[test]
    fn exclusion_restores_original(original in 1i64..50) {
        let now = Utc::now();
        let mut ann = BTreeMap::new();
        ann.insert("downscaler/original-replicas".to_string(), original.to_string());
        let w = deployment(0, now - Duration::hours(2), ann);
        let mut policy = base_policy();
        policy.excluded = true;
        let action = decide(&w, &policy, now, None).unwrap();
        prop_assert_eq!(action, Action::ScaleUp(original));
    }

    /// Two evaluations of `decide` against identical inputs produce
    /// identical output: the decider is a pure function of its arguments.
    #[test]
    fn clock_determinism(replicas in 0i64..50, downtime_replicas in 0i64..50) {
        let now = Utc::now();
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.downtime_replicas = downtime_replicas;
        let w = deployment(replicas, now - Duration::hours(2), BTreeMap::new());
        let first = decide(&w, &policy, now, None).unwrap();
        let second = decide(&w, &policy, now, None).unwrap();
        prop_assert_eq!(first, second);
    }
}
