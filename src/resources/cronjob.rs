use serde_json::{json, Value};

use super::ScaleAdapter;
use crate::error::DownscalerError;

/// `batch/v1 CronJob` has no replica count; "scale" is derived from
/// `spec.suspend` (spec.md §4.2).
pub struct CronJobAdapter;

impl ScaleAdapter for CronJobAdapter {
    fn get_scale(&self, obj: &Value) -> Result<i64, DownscalerError> {
        let suspended = obj
            .pointer("/spec/suspend")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(if suspended { 0 } else { 1 })
    }

    fn scale_down_patch(&self, _obj: &Value, _target: i64) -> Value {
        json!({ "spec": { "suspend": true } })
    }

    /// Forces `startingDeadlineSeconds` to 0 on unsuspend to avoid a burst
    /// of missed-schedule catch-up runs (original `scaler.py`); the
    /// driver's `restore_cronjob_deadlines` pass restores the user's
    /// originally-applied value afterwards (spec.md Supplemented Feature
    /// B.4).
    fn scale_up_patch(&self, _obj: &Value, _target: i64) -> Value {
        json!({ "spec": { "suspend": false, "startingDeadlineSeconds": 0 } })
    }
}
