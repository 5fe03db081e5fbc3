//! Command-line configuration (spec.md §6), replacing the original's
//! `argparse`-based `cmd.py` with `clap`'s derive API, the way the
//! teacher repo configures its binary.

use clap::Parser;
use regex::Regex;

use crate::error::DownscalerError;
use crate::resources::ResourceKind;

#[derive(Debug, Parser)]
#[command(
    name = "kube-downscaler",
    about = "Scales Kubernetes workloads down outside of business hours"
)]
pub struct Config {
    /// Dry run mode: compute patches, do not send them
    #[arg(long)]
    pub dry_run: bool,

    /// Debug mode: print more information
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Run the reconcile loop only once and exit
    #[arg(long)]
    pub once: bool,

    /// Loop interval in seconds
    #[arg(long, default_value_t = 30)]
    pub interval: u64,

    /// Restrict to a single namespace (default: all)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Downscale resources of these kinds
    #[arg(long, value_delimiter = ',', default_value = "deployments")]
    pub include_resources: Vec<ResourceKind>,

    /// Grace period in seconds before scaling down a newly created workload
    #[arg(long, default_value_t = 900)]
    pub grace_period: u64,

    /// Default one-shot time period to scale up once
    #[arg(long, env = "UPSCALE_PERIOD", default_value = "never", conflicts_with = "default_uptime")]
    pub upscale_period: String,

    /// Default recurring time range to scale up for
    #[arg(long, env = "DEFAULT_UPTIME", default_value = "always")]
    pub default_uptime: String,

    /// Default one-shot time period to scale down once
    #[arg(long, env = "DOWNSCALE_PERIOD", default_value = "never", conflicts_with = "default_downtime")]
    pub downscale_period: String,

    /// Default recurring time range to scale down for
    #[arg(long, env = "DEFAULT_DOWNTIME", default_value = "never")]
    pub default_downtime: String,

    /// Comma-separated regexes of namespaces to exclude entirely
    #[arg(long, env = "EXCLUDE_NAMESPACES", default_value = "kube-system")]
    pub exclude_namespaces: String,

    /// Comma-separated deployment names to exclude
    #[arg(long, env = "EXCLUDE_DEPLOYMENTS", default_value = "kube-downscaler,downscaler")]
    pub exclude_deployments: String,

    /// Comma-separated statefulset names to exclude
    #[arg(long, env = "EXCLUDE_STATEFULSETS", default_value = "")]
    pub exclude_statefulsets: String,

    /// Comma-separated cronjob names to exclude
    #[arg(long, env = "EXCLUDE_CRONJOBS", default_value = "")]
    pub exclude_cronjobs: String,

    /// Comma-separated stack names to exclude
    #[arg(long, env = "EXCLUDE_STACKS", default_value = "")]
    pub exclude_stacks: String,

    /// Comma-separated stackset names to exclude
    #[arg(long, env = "EXCLUDE_STACKSETS", default_value = "")]
    pub exclude_stacksets: String,

    /// Target replica count during downtime
    #[arg(long, env = "DOWNTIME_REPLICAS", default_value_t = 0)]
    pub downtime_replicas: i64,

    /// Annotation name read for the grace-period anchor, in addition to creationTimestamp
    #[arg(long)]
    pub deployment_time_annotation: Option<String>,

    /// Emit cluster Events on scaling actions and failures
    #[arg(long)]
    pub enable_events: bool,
}

impl Config {
    pub fn exclude_namespace_patterns(&self) -> Result<Vec<Regex>, DownscalerError> {
        self.exclude_namespaces
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| DownscalerError::Config(format!(
                    "invalid --exclude-namespaces pattern {pattern:?}: {e}"
                )))
            })
            .collect()
    }

    pub fn exclude_names(&self, kind: ResourceKind) -> Vec<String> {
        let raw = match kind {
            ResourceKind::Deployments => &self.exclude_deployments,
            ResourceKind::Statefulsets => &self.exclude_statefulsets,
            ResourceKind::Cronjobs => &self.exclude_cronjobs,
            ResourceKind::Stacks => &self.exclude_stacks,
            ResourceKind::Stacksets => &self.exclude_stacksets,
            ResourceKind::Horizontalpodautoscalers => return Vec::new(),
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let config = Config::parse_from(["kube-downscaler"]);
        assert_eq!(config.interval, 30);
        assert_eq!(config.grace_period, 900);
        assert_eq!(config.default_uptime, "always");
        assert_eq!(config.default_downtime, "never");
        assert_eq!(config.include_resources, vec![ResourceKind::Deployments]);
    }

    #[test]
    fn rejects_bad_exclude_namespace_regex() {
        let config = Config::parse_from(["kube-downscaler", "--exclude-namespaces", "kube-system,("]);
        assert!(config.exclude_namespace_patterns().is_err());
    }
}
