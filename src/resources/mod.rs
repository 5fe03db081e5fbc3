//! Uniform read/write of "current scale" across the six workload kinds the
//! engine understands, despite their differing schemas (spec.md §4.2).
//!
//! `Workload` is the common envelope (metadata the decider needs,
//! regardless of kind); `ScaleAdapter` is the per-kind interface the
//! design notes call for in place of the original's mixin inheritance.
//! `kube::core::DynamicObject` is used as the on-the-wire representation
//! so the zalando.org CRDs (Stack, StackSet) and the built-in kinds share
//! one `Api<DynamicObject>` code path in the driver.

mod cronjob;
mod deployment;
mod hpa;
mod stack;
mod stackset;
mod statefulset;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DownscalerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ResourceKind {
    Deployments,
    Statefulsets,
    Stacks,
    Stacksets,
    Cronjobs,
    Horizontalpodautoscalers,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Deployments,
        ResourceKind::Statefulsets,
        ResourceKind::Stacks,
        ResourceKind::Stacksets,
        ResourceKind::Cronjobs,
        ResourceKind::Horizontalpodautoscalers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployments => "deployments",
            ResourceKind::Statefulsets => "statefulsets",
            ResourceKind::Stacks => "stacks",
            ResourceKind::Stacksets => "stacksets",
            ResourceKind::Cronjobs => "cronjobs",
            ResourceKind::Horizontalpodautoscalers => "horizontalpodautoscalers",
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::Deployments => "Deployment",
            ResourceKind::Statefulsets => "StatefulSet",
            ResourceKind::Stacks => "Stack",
            ResourceKind::Stacksets => "StackSet",
            ResourceKind::Cronjobs => "CronJob",
            ResourceKind::Horizontalpodautoscalers => "HorizontalPodAutoscaler",
        }
    }

    pub fn group_version_kind(&self) -> GroupVersionKind {
        let (group, version) = match self {
            ResourceKind::Deployments => ("apps", "v1"),
            ResourceKind::Statefulsets => ("apps", "v1"),
            ResourceKind::Cronjobs => ("batch", "v1"),
            ResourceKind::Horizontalpodautoscalers => ("autoscaling", "v2"),
            ResourceKind::Stacks => ("zalando.org", "v1"),
            ResourceKind::Stacksets => ("zalando.org", "v1"),
        };
        GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: self.kind_name().to_string(),
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.group_version_kind(), self.as_str())
    }

    fn adapter(&self) -> &'static dyn ScaleAdapter {
        match self {
            ResourceKind::Deployments => &deployment::DeploymentAdapter,
            ResourceKind::Statefulsets => &statefulset::StatefulSetAdapter,
            ResourceKind::Stacks => &stack::StackAdapter,
            ResourceKind::Stacksets => &stackset::StackSetAdapter,
            ResourceKind::Cronjobs => &cronjob::CronJobAdapter,
            ResourceKind::Horizontalpodautoscalers => &hpa::HpaAdapter,
        }
    }
}

/// Per-kind read/write of the scale value. One implementation per kind,
/// as recommended in spec.md §9 in place of the source's mixin-inherited
/// `Scalable`/`ReplicatedMixin` classes.
pub trait ScaleAdapter: Sync {
    /// The effective replica count (or suspend-derived 0/1) for decider logic.
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError>;

    /// Strategic-merge/JSON-merge patch body (`spec` subtree only) that
    /// brings the workload down to `target` replicas.
    fn scale_down_patch(&self, obj: &Value, target: i64) -> Value;

    /// Patch body that restores the workload to `target` replicas.
    fn scale_up_patch(&self, obj: &Value, target: i64) -> Value;
}

/// The abstract record the engine manipulates (spec.md §3 "Workload").
#[derive(Debug, Clone)]
pub struct Workload {
    pub kind: ResourceKind,
    pub api_version: String,
    pub namespace: String,
    pub name: String,
    pub creation_timestamp: DateTime<Utc>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    /// Full object body, used only by the adapter to read kind-specific
    /// scale fields (Stack's `autoscaler.maxReplicas` fallback, etc).
    pub raw: Value,
}

impl Workload {
    pub fn from_dynamic(kind: ResourceKind, obj: &DynamicObject) -> Result<Self, DownscalerError> {
        let namespace = obj.metadata.namespace.clone().ok_or_else(|| {
            DownscalerError::Parse {
                resource: obj.metadata.name.clone().unwrap_or_default(),
                field: "namespace",
                detail: "missing namespace on namespaced resource".to_string(),
            }
        })?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| DownscalerError::Parse {
                resource: namespace.clone(),
                field: "name",
                detail: "missing name".to_string(),
            })?;
        let creation_timestamp = obj
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .ok_or_else(|| DownscalerError::Parse {
                resource: format!("{namespace}/{name}"),
                field: "creationTimestamp",
                detail: "missing creationTimestamp".to_string(),
            })?;
        let annotations = obj
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let owner_references = obj.metadata.owner_references.clone().unwrap_or_default();
        let api_version = obj
            .types
            .as_ref()
            .map(|t| t.api_version.clone())
            .unwrap_or_else(|| {
                let gvk = kind.group_version_kind();
                if gvk.group.is_empty() {
                    gvk.version
                } else {
                    format!("{}/{}", gvk.group, gvk.version)
                }
            });
        let raw = serde_json::to_value(obj).unwrap_or(Value::Null);

        Ok(Workload {
            kind,
            api_version,
            namespace,
            name,
            creation_timestamp,
            annotations,
            owner_references,
            raw,
        })
    }

    pub fn get_scale(&self) -> Result<i64, DownscalerError> {
        self.kind.adapter().get_scale(&self.raw)
    }

    pub fn identity(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_owned_by(&self, kind: &str, api_version: &str) -> bool {
        self.owner_references
            .iter()
            .any(|owner| owner.kind == kind && owner.api_version == api_version)
    }

    /// Builds the combined patch: the kind-specific scale change plus the
    /// `original-replicas` annotation change, atomically (spec.md
    /// Invariant 5). `annotation_change` of `None` leaves annotations
    /// untouched.
    pub fn build_patch(&self, scale_patch: Value, annotation_change: AnnotationChange) -> Value {
        let mut patch = scale_patch;
        if !matches!(annotation_change, AnnotationChange::None) {
            let mut annotations = serde_json::Map::new();
            match annotation_change {
                AnnotationChange::Set(key, value) => {
                    annotations.insert(key, Value::String(value));
                }
                AnnotationChange::Remove(key) => {
                    // JSON merge patch: null removes the key server-side.
                    annotations.insert(key, Value::Null);
                }
                AnnotationChange::None => unreachable!(),
            }
            patch
                .as_object_mut()
                .expect("patch body is always a JSON object")
                .insert(
                    "metadata".to_string(),
                    serde_json::json!({ "annotations": annotations }),
                );
        }
        patch
    }

    pub fn scale_down_patch(&self, target: i64) -> Value {
        self.kind.adapter().scale_down_patch(&self.raw, target)
    }

    pub fn scale_up_patch(&self, target: i64) -> Value {
        self.kind.adapter().scale_up_patch(&self.raw, target)
    }
}

/// Distinguishes "set annotation key = value" from "remove annotation
/// key" in a merge-patch body (spec.md §9, "Annotation-as-sentinel None").
#[derive(Debug, Clone)]
pub enum AnnotationChange {
    None,
    Set(String, String),
    Remove(String),
}
