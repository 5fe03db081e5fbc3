use serde_json::{json, Value};

use super::ScaleAdapter;
use crate::error::DownscalerError;

pub struct HpaAdapter;

impl ScaleAdapter for HpaAdapter {
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError> {
        obj.pointer("/spec/minReplicas")
            .and_then(Value::as_i64)
            .ok_or_else(|| DownscalerError::Parse {
                resource: "HorizontalPodAutoscaler".to_string(),
                field: "spec.minReplicas",
                detail: "missing or non-integer minReplicas".to_string(),
            })
    }

    fn scale_down_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "minReplicas": target } })
    }

    fn scale_up_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "minReplicas": target } })
    }
}
