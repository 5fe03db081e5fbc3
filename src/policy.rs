//! Merges cluster defaults, namespace annotations, and workload
//! annotations into the effective `PolicyContext` the decider acts on
//! (spec.md §4.3). Precedence, lowest to highest: command-line defaults
//! → namespace annotations → workload annotations.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::warn;

use crate::cli::Config;
use crate::error::DownscalerError;
use crate::timespec;

pub const ANNOTATION_PREFIX: &str = "downscaler/";
pub const EXCLUDE: &str = "downscaler/exclude";
pub const EXCLUDE_UNTIL: &str = "downscaler/exclude-until";
pub const FORCE_UPTIME: &str = "downscaler/force-uptime";
pub const UPSCALE_PERIOD: &str = "downscaler/upscale-period";
pub const DOWNSCALE_PERIOD: &str = "downscaler/downscale-period";
pub const UPTIME: &str = "downscaler/uptime";
pub const DOWNTIME: &str = "downscaler/downtime";
pub const DOWNTIME_REPLICAS: &str = "downscaler/downtime-replicas";
pub const ORIGINAL_REPLICAS: &str = "downscaler/original-replicas";

/// A namespace, read-only to the engine (spec.md §3 "NamespaceRecord").
#[derive(Debug, Clone)]
pub struct NamespaceRecord {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

/// Policy resolved once per namespace per tick (spec.md §4.5 step 3).
#[derive(Debug, Clone)]
pub struct NamespacePolicy {
    pub upscale_period: String,
    pub downscale_period: String,
    pub default_uptime: String,
    pub default_downtime: String,
    pub downtime_replicas: i64,
    pub forced_uptime: bool,
    pub excluded: bool,
}

/// Final, per-workload policy the decider consumes.
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub upscale_period: String,
    pub downscale_period: String,
    pub uptime: String,
    pub downtime: String,
    pub downtime_replicas: i64,
    pub forced_uptime: bool,
    pub excluded: bool,
    pub grace_period_seconds: u64,
}

/// Resolves the "true"/"false"/TimeSpec tri-state `downscaler/force-uptime`
/// value (spec.md §4.3) against `now`.
pub fn resolve_force_uptime_value(value: &str, now: DateTime<Utc>) -> Result<bool, DownscalerError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => timespec::matches(now, value),
    }
}

/// `downscaler/exclude`: any value other than "false" (case-insensitive)
/// excludes, by design, to be conservative (spec.md §4.3).
fn is_truthy_exclude(value: &str) -> bool {
    !value.eq_ignore_ascii_case("false")
}

/// Timestamp formats accepted by `downscaler/exclude-until`, tried in
/// order (spec.md §4.3).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

/// Namespace-level exclusion: `downscaler/exclude` only (not
/// `exclude-until`, which spec.md §4.3 defines only at workload level).
pub fn namespace_excluded(ns: &NamespaceRecord) -> bool {
    ns.annotations
        .get(EXCLUDE)
        .map(|v| is_truthy_exclude(v))
        .unwrap_or(false)
}

/// Workload-level exclusion: `downscaler/exclude` OR a still-active
/// `downscaler/exclude-until`. An unparseable `exclude-until` logs a
/// warning and does not exclude (spec.md §4.3).
pub fn workload_excluded(
    annotations: &BTreeMap<String, String>,
    now: DateTime<Utc>,
    resource_id: &str,
) -> bool {
    if annotations
        .get(EXCLUDE)
        .map(|v| is_truthy_exclude(v))
        .unwrap_or(false)
    {
        return true;
    }
    if let Some(value) = annotations.get(EXCLUDE_UNTIL) {
        match parse_timestamp(value) {
            Some(until) => return now < until,
            None => {
                warn!("{resource_id}: invalid downscaler/exclude-until value {value:?}, ignoring");
                return false;
            }
        }
    }
    false
}

pub fn resolve_namespace(
    config: &Config,
    ns: &NamespaceRecord,
    now: DateTime<Utc>,
) -> Result<NamespacePolicy, DownscalerError> {
    let get = |key: &str, default: &str| -> String {
        ns.annotations
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    let downtime_replicas = match ns.annotations.get(DOWNTIME_REPLICAS) {
        Some(v) => v.parse::<i64>().map_err(|_| DownscalerError::Parse {
            resource: ns.name.clone(),
            field: "downscaler/downtime-replicas",
            detail: format!("{v:?} is not a non-negative integer"),
        })?,
        None => config.downtime_replicas,
    };

    let forced_uptime = match ns.annotations.get(FORCE_UPTIME) {
        Some(v) => resolve_force_uptime_value(v, now)?,
        None => false,
    };

    Ok(NamespacePolicy {
        upscale_period: get(UPSCALE_PERIOD, &config.upscale_period),
        downscale_period: get(DOWNSCALE_PERIOD, &config.downscale_period),
        default_uptime: get(UPTIME, &config.default_uptime),
        default_downtime: get(DOWNTIME, &config.default_downtime),
        downtime_replicas,
        forced_uptime,
        excluded: namespace_excluded(ns),
    })
}

pub fn resolve_workload(
    namespace_policy: &NamespacePolicy,
    annotations: &BTreeMap<String, String>,
    resource_id: &str,
    grace_period_seconds: u64,
    global_forced_uptime: bool,
) -> Result<EffectivePolicy, DownscalerError> {
    let get = |key: &str, default: &str| -> String {
        annotations
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    let downtime_replicas = match annotations.get(DOWNTIME_REPLICAS) {
        Some(v) => v.parse::<i64>().map_err(|_| DownscalerError::Parse {
            resource: resource_id.to_string(),
            field: "downscaler/downtime-replicas",
            detail: format!("{v:?} is not a non-negative integer"),
        })?,
        None => namespace_policy.downtime_replicas,
    };

    Ok(EffectivePolicy {
        upscale_period: get(UPSCALE_PERIOD, &namespace_policy.upscale_period),
        downscale_period: get(DOWNSCALE_PERIOD, &namespace_policy.downscale_period),
        uptime: get(UPTIME, &namespace_policy.default_uptime),
        downtime: get(DOWNTIME, &namespace_policy.default_downtime),
        downtime_replicas,
        forced_uptime: global_forced_uptime || namespace_policy.forced_uptime,
        excluded: namespace_policy.excluded,
        grace_period_seconds,
    })
}

pub fn original_replicas(annotations: &BTreeMap<String, String>) -> Option<i64> {
    annotations.get(ORIGINAL_REPLICAS).and_then(|v| v.parse().ok())
}
