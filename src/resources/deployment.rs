use serde_json::{json, Value};

use super::ScaleAdapter;
use crate::error::DownscalerError;

pub struct DeploymentAdapter;

impl ScaleAdapter for DeploymentAdapter {
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError> {
        obj.pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .ok_or_else(|| DownscalerError::Parse {
                resource: "Deployment".to_string(),
                field: "spec.replicas",
                detail: "missing or non-integer replicas".to_string(),
            })
    }

    fn scale_down_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "replicas": target } })
    }

    fn scale_up_patch(&self, _obj: &Value, target: i64) -> Value {
        json!({ "spec": { "replicas": target } })
    }
}
