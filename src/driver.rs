//! Per-tick orchestration (spec.md §4.5): enumerate kinds, list workloads
//! per namespace, resolve per-namespace defaults once, apply the
//! decider, emit patches.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::Client;
use log::{debug, error, info, warn};
use regex::Regex;

use crate::cli::Config;
use crate::decider::{self, Action};
use crate::error::DownscalerError;
use crate::events::{EventEmitter, EventType, InvolvedObject};
use crate::policy::{self, NamespacePolicy, NamespaceRecord};
use crate::resources::{AnnotationChange, ResourceKind, Workload};

pub struct Driver {
    client: Client,
    config: Config,
    exclude_namespaces: Vec<Regex>,
    events: Option<EventEmitter>,
}

impl Driver {
    pub fn new(client: Client, config: Config) -> Result<Self, DownscalerError> {
        let exclude_namespaces = config.exclude_namespace_patterns()?;
        let events = config
            .enable_events
            .then(|| EventEmitter::new(client.clone(), config.dry_run));
        Ok(Driver {
            client,
            config,
            exclude_namespaces,
            events,
        })
    }

    fn namespace_is_excluded(&self, namespace: &str) -> bool {
        self.exclude_namespaces.iter().any(|re| re.is_match(namespace))
    }

    /// One reconcile pass across all configured kinds.
    ///
    /// Workloads are processed sorted-namespace-major, kind-list-minor
    /// (spec.md §5: "sorted namespaces, then kind-list order"), so dry-run
    /// diffs are reproducible: all kinds for namespace A before any kind
    /// for namespace B.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let forced_uptime = match self.pods_force_uptime(now).await {
            Ok(v) => v,
            Err(e) => {
                error!("failed to list pods for force-uptime check: {e}");
                false
            }
        };

        let mut by_namespace: BTreeMap<String, Vec<(ResourceKind, DynamicObject)>> = BTreeMap::new();

        for kind in self.config.include_resources.clone() {
            let items = match self.list_kind(kind).await {
                Ok(items) => items,
                Err(e) => {
                    error!("failed to list {}: {e}", kind.as_str());
                    continue;
                }
            };

            let exclude_names: HashSet<String> = self.config.exclude_names(kind).into_iter().collect();

            let mut items = items;
            items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

            for obj in items {
                let name = obj.metadata.name.clone().unwrap_or_default();
                let namespace = match obj.metadata.namespace.clone() {
                    Some(ns) => ns,
                    None => continue,
                };
                if self.namespace_is_excluded(&namespace) || exclude_names.contains(&name) {
                    debug!(
                        "{} {}/{} was excluded (namespace or name exclusion)",
                        kind.kind_name(),
                        namespace,
                        name
                    );
                    continue;
                }
                by_namespace.entry(namespace).or_default().push((kind, obj));
            }
        }

        for (namespace, entries) in &by_namespace {
            let ns_policy = match self.fetch_namespace(namespace).await {
                Ok(record) => policy::resolve_namespace(&self.config, &record, now),
                Err(e) => Err(e),
            };
            let ns_policy = match ns_policy {
                Ok(ns_policy) => ns_policy,
                Err(e) => {
                    warn!("skipping namespace {namespace}: {e}");
                    continue;
                }
            };

            for (kind, obj) in entries {
                let ar = kind.api_resource();
                let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
                let name = obj.metadata.name.clone().unwrap_or_default();

                if let Err(e) = self
                    .reconcile_one(*kind, &api, obj, &ns_policy, now, forced_uptime)
                    .await
                {
                    error!("failed to process {} {}/{}: {}", kind.kind_name(), namespace, name, e);
                    if let Some(events) = &self.events {
                        if let Ok(workload) = Workload::from_dynamic(*kind, obj) {
                            let involved = involved_object(&workload, obj);
                            let _ = events
                                .emit(&involved, "ScalingFailed", EventType::Warning, &e.to_string())
                                .await;
                        }
                    }
                }
            }
        }

        if self.config.include_resources.contains(&ResourceKind::Cronjobs) {
            if let Err(e) = self.restore_cronjob_deadlines().await {
                warn!("failed to restore cronjob startingDeadlineSeconds: {e}");
            }
        }

        Ok(())
    }

    /// Lists every workload of `kind`, scoped to `--namespace` if set.
    async fn list_kind(&self, kind: ResourceKind) -> Result<Vec<DynamicObject>, DownscalerError> {
        let ar = kind.api_resource();
        let api: Api<DynamicObject> = match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| DownscalerError::Cluster {
                resource: kind.as_str().to_string(),
                source,
            })?;
        Ok(list.items)
    }

    /// Any running (non-terminal) pod carrying `downscaler/force-uptime:
    /// "true"` forces every workload to uptime this tick (spec.md §4.5 step 1).
    async fn pods_force_uptime(&self, _now: DateTime<Utc>) -> Result<bool, DownscalerError> {
        let api: Api<Pod> = match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|source| DownscalerError::Cluster {
                resource: "Pod".to_string(),
                source,
            })?;
        for pod in pods.items {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("");
            if phase == "Succeeded" || phase == "Failed" {
                continue;
            }
            let forced = pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(policy::FORCE_UPTIME))
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if forced {
                info!(
                    "forced uptime because of pod {}/{}",
                    pod.metadata.namespace.as_deref().unwrap_or(""),
                    pod.metadata.name.as_deref().unwrap_or("")
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fetch_namespace(&self, name: &str) -> Result<NamespaceRecord, DownscalerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api.get(name).await.map_err(|source| DownscalerError::Cluster {
            resource: format!("Namespace/{name}"),
            source,
        })?;
        Ok(NamespaceRecord {
            name: name.to_string(),
            annotations: ns.metadata.annotations.unwrap_or_default().into_iter().collect(),
        })
    }

    async fn reconcile_one(
        &self,
        kind: ResourceKind,
        api: &Api<DynamicObject>,
        obj: &DynamicObject,
        namespace_policy: &NamespacePolicy,
        now: DateTime<Utc>,
        forced_uptime: bool,
    ) -> Result<(), DownscalerError> {
        let workload = Workload::from_dynamic(kind, obj)?;
        let identity = workload.identity();

        let effective = policy::resolve_workload(
            namespace_policy,
            &workload.annotations,
            &identity,
            self.config.grace_period,
            forced_uptime,
        )?;

        let action = decider::decide(
            &workload,
            &effective,
            now,
            self.config.deployment_time_annotation.as_deref(),
        )?;

        let (scale_patch, annotation_change, reason, message) = match action {
            Action::NoOp => return Ok(()),
            Action::ScaleDown(target) => {
                let prior = workload.get_scale()?;
                (
                    workload.scale_down_patch(target),
                    AnnotationChange::Set(
                        policy::ORIGINAL_REPLICAS.to_string(),
                        prior.to_string(),
                    ),
                    "ScaledDown",
                    format!("scaled {identity} down to {target} replicas"),
                )
            }
            Action::ScaleUp(target) => (
                workload.scale_up_patch(target),
                AnnotationChange::Remove(policy::ORIGINAL_REPLICAS.to_string()),
                "ScaledUp",
                format!("scaled {identity} up to {target} replicas"),
            ),
        };

        let patch = workload.build_patch(scale_patch, annotation_change);

        if self.config.dry_run {
            info!("**DRY-RUN**: would update {identity}: {patch}");
        } else {
            api.patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|source| DownscalerError::Cluster {
                    resource: identity.clone(),
                    source,
                })?;
        }

        if let Some(events) = &self.events {
            let involved = involved_object(&workload, obj);
            events.emit(&involved, reason, EventType::Normal, &message).await?;
        }

        Ok(())
    }

    /// Restores `spec.startingDeadlineSeconds` on CronJobs that the
    /// engine force-reset to `0` on unsuspend, using the value from
    /// `kubectl.kubernetes.io/last-applied-configuration` (spec.md
    /// Supplemented Feature B.4).
    async fn restore_cronjob_deadlines(&self) -> Result<(), DownscalerError> {
        let ar = ResourceKind::Cronjobs.api_resource();
        let api: Api<DynamicObject> = match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| DownscalerError::Cluster {
                resource: "CronJob".to_string(),
                source,
            })?;

        for obj in &list.items {
            let starting_deadline = obj
                .data
                .pointer("/spec/startingDeadlineSeconds")
                .and_then(|v| v.as_i64());
            if starting_deadline != Some(0) {
                continue;
            }
            let last_applied = obj
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get("kubectl.kubernetes.io/last-applied-configuration"));
            let Some(last_applied) = last_applied else {
                continue;
            };
            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(last_applied) else {
                continue;
            };
            let original = parsed.pointer("/spec/startingDeadlineSeconds").cloned();
            let original_value = original.unwrap_or(serde_json::Value::Null);
            if original_value == serde_json::json!(0) {
                continue;
            }
            let name = obj.metadata.name.clone().unwrap_or_default();
            let patch = serde_json::json!({ "spec": { "startingDeadlineSeconds": original_value } });
            if self.config.dry_run {
                info!("**DRY-RUN**: would restore startingDeadlineSeconds for CronJob {name}");
                continue;
            }
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|source| DownscalerError::Cluster {
                    resource: format!("CronJob/{name}"),
                    source,
                })?;
        }
        Ok(())
    }
}

fn involved_object(workload: &Workload, obj: &DynamicObject) -> InvolvedObject {
    InvolvedObject {
        api_version: workload.api_version.clone(),
        kind: workload.kind.kind_name().to_string(),
        name: workload.name.clone(),
        namespace: workload.namespace.clone(),
        uid: obj.metadata.uid.clone().unwrap_or_default(),
        resource_version: obj.metadata.resource_version.clone(),
    }
}
