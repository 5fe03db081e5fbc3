use serde_json::{json, Value};

use super::ScaleAdapter;
use crate::error::DownscalerError;

/// `zalando.org/v1 Stack` (zalando-incubator/stackset-controller): the
/// replica count may be unset, falling back to the HPA sub-spec's
/// `maxReplicas` (`autoscaler.maxReplicas` or the newer
/// `horizontalPodAutoscaler.maxReplicas` field name).
pub struct StackAdapter;

fn max_replicas(obj: &Value) -> Option<i64> {
    obj.pointer("/spec/autoscaler/maxReplicas")
        .and_then(Value::as_i64)
        .or_else(|| {
            obj.pointer("/spec/horizontalPodAutoscaler/maxReplicas")
                .and_then(Value::as_i64)
        })
}

impl ScaleAdapter for StackAdapter {
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError> {
        if let Some(replicas) = obj.pointer("/spec/replicas").and_then(Value::as_i64) {
            return Ok(replicas);
        }
        max_replicas(obj).ok_or_else(|| DownscalerError::Parse {
            resource: "Stack".to_string(),
            field: "spec.replicas",
            detail: "no spec.replicas and no autoscaler maxReplicas to fall back to".to_string(),
        })
    }

    fn scale_down_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "replicas": target } })
    }

    /// If `target` equals the HPA's `maxReplicas`, `spec.replicas` is
    /// cleared (JSON-merge-patch null) so it falls back to the
    /// autoscaler's own ceiling rather than pinning it (spec.md §4.2).
    fn scale_up_patch(&self, obj: &Value, target: i64) -> Value {
        if max_replicas(obj) == Some(target) {
            json!({ "spec": { "replicas": Value::Null } })
        } else {
            json!({ "spec": { "replicas": target } })
        }
    }
}
