//! Decides scale-up, scale-down, or no-op for a single workload given its
//! current state, resolved policy, and the clock (spec.md §4.4).

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::error::DownscalerError;
use crate::policy::{self, EffectivePolicy};
use crate::resources::{ResourceKind, Workload};
use crate::timespec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoOp,
    ScaleDown(i64),
    ScaleUp(i64),
}

fn is_stack_managed_deployment(workload: &Workload) -> bool {
    if !matches!(workload.kind, ResourceKind::Deployments) {
        return false;
    }
    let stack_gvk = ResourceKind::Stacks.group_version_kind();
    let stack_api_version = format!("{}/{}", stack_gvk.group, stack_gvk.version);
    workload.is_owned_by(&stack_gvk.kind, &stack_api_version)
}

/// `creationTimestamp`, bumped forward by `deployment_time_annotation` if
/// the workload carries a parseable value for it (spec.md §4.4 "Grace
/// period").
fn within_grace_period(
    workload: &Workload,
    grace_period_seconds: u64,
    now: DateTime<Utc>,
    deployment_time_annotation: Option<&str>,
) -> bool {
    let mut update_time = workload.creation_timestamp;
    if let Some(annotation_name) = deployment_time_annotation {
        if let Some(value) = workload.annotations.get(annotation_name) {
            if let Some(parsed) = policy::parse_timestamp(value) {
                if parsed > update_time {
                    update_time = parsed;
                }
            }
        }
    }
    let elapsed = now.signed_duration_since(update_time).num_seconds();
    elapsed <= grace_period_seconds as i64
}

/// Per-workload `downscaler/downtime-replicas` override, if present.
fn workload_downtime_replicas(
    workload: &Workload,
    fallback: i64,
) -> Result<i64, DownscalerError> {
    match workload.annotations.get(policy::DOWNTIME_REPLICAS) {
        Some(v) => v.parse::<i64>().map_err(|_| DownscalerError::Parse {
            resource: workload.identity(),
            field: "downscaler/downtime-replicas",
            detail: format!("{v:?} is not a non-negative integer"),
        }),
        None => Ok(fallback),
    }
}

pub fn decide(
    workload: &Workload,
    policy: &EffectivePolicy,
    now: DateTime<Utc>,
    deployment_time_annotation: Option<&str>,
) -> Result<Action, DownscalerError> {
    let identity = workload.identity();

    let excluded = policy.excluded
        || policy::workload_excluded(&workload.annotations, now, &identity)
        || is_stack_managed_deployment(workload);

    let original = policy::original_replicas(&workload.annotations);
    let downtime_replicas = workload_downtime_replicas(workload, policy.downtime_replicas)?;

    if excluded && original.is_none() {
        debug!("{identity} was excluded");
        return Ok(Action::NoOp);
    }

    let mut ignore = false;
    let is_uptime;

    if policy.forced_uptime || (excluded && original.is_some()) {
        is_uptime = true;
    } else if policy.upscale_period != "never" || policy.downscale_period != "never" {
        let upscale_matches = timespec::matches(now, &policy.upscale_period)?;
        let downscale_matches = timespec::matches(now, &policy.downscale_period)?;
        if upscale_matches && downscale_matches {
            debug!("{identity}: upscale and downscale periods overlap, doing nothing");
            ignore = true;
            is_uptime = true;
        } else if upscale_matches {
            is_uptime = true;
        } else if downscale_matches {
            is_uptime = false;
        } else {
            ignore = true;
            is_uptime = true;
        }
    } else {
        is_uptime =
            timespec::matches(now, &policy.uptime)? && !timespec::matches(now, &policy.downtime)?;
    }

    let replicas = workload.get_scale()?;
    debug!(
        "{identity} has {replicas} replicas (original: {original:?}, uptime: {is_uptime}, ignore: {ignore})"
    );

    if !ignore && is_uptime && replicas == downtime_replicas {
        if let Some(orig) = original {
            if orig > 0 {
                info!(
                    "scaling up {identity} from {replicas} to {orig} replicas (downtime_replicas: {downtime_replicas})"
                );
                return Ok(Action::ScaleUp(orig));
            }
        }
    }

    if !ignore && !is_uptime && replicas > 0 && replicas > downtime_replicas {
        if within_grace_period(workload, policy.grace_period_seconds, now, deployment_time_annotation) {
            info!(
                "{identity} within grace period ({}s), not scaling down (yet)",
                policy.grace_period_seconds
            );
            return Ok(Action::NoOp);
        }
        info!("scaling down {identity} from {replicas} to {downtime_replicas} replicas");
        return Ok(Action::ScaleDown(downtime_replicas));
    }

    Ok(Action::NoOp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceKind;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn workload(
        kind: ResourceKind,
        replicas_ptr: &str,
        replicas: i64,
        now: DateTime<Utc>,
        created_minutes_ago: i64,
        annotations: BTreeMap<String, String>,
    ) -> Workload {
        let mut raw = serde_json::json!({});
        let mut cur = &mut raw;
        let parts: Vec<&str> = replicas_ptr.trim_start_matches('/').split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            if i == parts.len() - 1 {
                cur[*part] = serde_json::json!(replicas);
            } else {
                cur[*part] = serde_json::json!({});
                cur = cur.get_mut(*part).unwrap();
            }
        }
        Workload {
            kind,
            api_version: "apps/v1".to_string(),
            namespace: "default".to_string(),
            name: "demo".to_string(),
            creation_timestamp: now - chrono::Duration::minutes(created_minutes_ago),
            annotations,
            owner_references: vec![],
            raw,
        }
    }

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

    #[test]
    fn downtime_always_scales_down() {
        let now = Utc.with_ymd_and_hms(2018, 10, 23, 21, 56, 0).unwrap();
        let w = workload(
            ResourceKind::Deployments,
            "/spec/replicas",
            1,
            now,
            1,
            BTreeMap::new(),
        );
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::ScaleDown(0));
    }

    #[test]
    fn grace_period_blocks_scale_down() {
        let now = Utc.with_ymd_and_hms(2018, 10, 23, 21, 56, 0).unwrap();
        let w = workload(
            ResourceKind::Deployments,
            "/spec/replicas",
            1,
            now,
            1,
            BTreeMap::new(),
        );
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.grace_period_seconds = 300;
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::NoOp);
    }

    #[test]
    fn scale_up_restores_original() {
        let now = Utc.with_ymd_and_hms(2018, 10, 23, 15, 0, 0).unwrap();
        let mut ann = BTreeMap::new();
        ann.insert("downscaler/original-replicas".to_string(), "3".to_string());
        let w = workload(ResourceKind::Deployments, "/spec/replicas", 0, now, 600, ann);
        let mut policy = base_policy();
        policy.uptime = "Mon-Fri 07:30-20:30 Europe/Berlin".to_string();
        policy.downtime = "never".to_string();
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::ScaleUp(3));
    }

    #[test]
    fn overlap_is_noop() {
        let now = Utc::now();
        let w = workload(
            ResourceKind::Deployments,
            "/spec/replicas",
            1,
            now,
            600,
            BTreeMap::new(),
        );
        let mut policy = base_policy();
        policy.upscale_period = "always".to_string();
        policy.downscale_period = "always".to_string();
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::NoOp);
    }

    #[test]
    fn excluded_with_stored_original_restores() {
        let now = Utc::now();
        let mut ann = BTreeMap::new();
        ann.insert("downscaler/original-replicas".to_string(), "4".to_string());
        ann.insert("downscaler/exclude".to_string(), "true".to_string());
        let w = workload(ResourceKind::Deployments, "/spec/replicas", 0, now, 600, ann);
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::ScaleUp(4));
    }

    #[test]
    fn original_zero_is_not_restored() {
        let now = Utc::now();
        let mut ann = BTreeMap::new();
        ann.insert("downscaler/original-replicas".to_string(), "0".to_string());
        let w = workload(ResourceKind::Deployments, "/spec/replicas", 0, now, 600, ann);
        let policy = base_policy();
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::NoOp);
    }

    #[test]
    fn force_uptime_overrides_downtime() {
        let now = Utc::now();
        let w = workload(
            ResourceKind::Deployments,
            "/spec/replicas",
            1,
            now,
            600,
            BTreeMap::new(),
        );
        let mut policy = base_policy();
        policy.downtime = "always".to_string();
        policy.forced_uptime = true;
        let action = decide(&w, &policy, now, None).unwrap();
        assert_eq!(action, Action::NoOp);
    }
}
