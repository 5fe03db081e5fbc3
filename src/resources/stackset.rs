use serde_json::{json, Value};

use super::ScaleAdapter;
use crate::error::DownscalerError;

/// `zalando.org/v1 StackSet` keeps its replica count nested under a pod
/// template spec (`resources/stackset.py`).
pub struct StackSetAdapter;

impl ScaleAdapter for StackSetAdapter {
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError> {
        obj.pointer("/spec/stackTemplate/spec/replicas")
            .and_then(Value::as_i64)
            .ok_or_else(|| DownscalerError::Parse {
                resource: "StackSet".to_string(),
                field: "spec.stackTemplate.spec.replicas",
                detail: "missing or non-integer replicas".to_string(),
            })
    }

    fn scale_down_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "stackTemplate": { "spec": { "replicas": target } } } })
    }

    fn scale_up_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "stackTemplate": { "spec": { "replicas": target } } } })
    }
}
