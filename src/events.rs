//! De-duplicated cluster Event emission for scaling actions and failures
//! (spec.md §6 "Event emitter wire form"), grounded in the original's
//! `helper.add_event`/`create_event` (exercised by
//! `tests/test_events.py`).

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use log::warn;

use crate::error::DownscalerError;

const COMPONENT: &str = "kube-downscaler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Identifies the object an Event is "about", matching spec.md's
/// `{apiVersion,kind,name,namespace,uid,resourceVersion}`.
#[derive(Debug, Clone)]
pub struct InvolvedObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: Option<String>,
}

pub struct EventEmitter {
    client: Client,
    dry_run: bool,
}

impl EventEmitter {
    pub fn new(client: Client, dry_run: bool) -> Self {
        EventEmitter { client, dry_run }
    }

    /// Creates or de-duplicates-and-bumps an Event. Matches on
    /// `(involvedObject.uid, reason, type, message)`: a match increments
    /// `count` and bumps `lastTimestamp`; otherwise a new Event is
    /// created with `count=1`.
    pub async fn emit(
        &self,
        involved: &InvolvedObject,
        reason: &str,
        event_type: EventType,
        message: &str,
    ) -> Result<(), DownscalerError> {
        if self.dry_run {
            log::info!(
                "**DRY-RUN**: would emit event {reason} ({}) for {}/{}: {message}",
                event_type.as_str(),
                involved.namespace,
                involved.name
            );
            return Ok(());
        }

        let api: Api<Event> = Api::namespaced(self.client.clone(), &involved.namespace);
        let existing = self
            .find_existing(&api, involved, reason, event_type, message)
            .await?;

        let now = chrono::Utc::now();
        match existing {
            Some((name, count)) => {
                let patch = serde_json::json!({
                    "count": count + 1,
                    "lastTimestamp": Time(now).0.to_rfc3339(),
                });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(patch))
                    .await
                    .map_err(|source| DownscalerError::Cluster {
                        resource: format!("Event/{name}"),
                        source,
                    })?;
            }
            None => {
                let event = self.build_event(involved, reason, event_type, message, now);
                api.create(&PostParams::default(), &event).await.map_err(|source| {
                    DownscalerError::Cluster {
                        resource: format!("Event for {}/{}", involved.namespace, involved.name),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    async fn find_existing(
        &self,
        api: &Api<Event>,
        involved: &InvolvedObject,
        reason: &str,
        event_type: EventType,
        message: &str,
    ) -> Result<Option<(String, i32)>, DownscalerError> {
        let list = api
            .list(&Default::default())
            .await
            .map_err(|source| DownscalerError::Cluster {
                resource: format!("Event list in {}", involved.namespace),
                source,
            })?;
        for event in list.items {
            let matches_involved = event
                .involved_object
                .uid
                .as_deref()
                .map(|uid| uid == involved.uid)
                .unwrap_or(false);
            if matches_involved
                && event.reason.as_deref() == Some(reason)
                && event.type_.as_deref() == Some(event_type.as_str())
                && event.message.as_deref() == Some(message)
            {
                let name = event.metadata.name.clone().unwrap_or_default();
                let count = event.count.unwrap_or(1);
                return Ok(Some((name, count)));
            }
        }
        Ok(None)
    }

    fn build_event(
        &self,
        involved: &InvolvedObject,
        reason: &str,
        event_type: EventType,
        message: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Event {
        Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", involved.name)),
                namespace: Some(involved.namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(involved.api_version.clone()),
                kind: Some(involved.kind.clone()),
                name: Some(involved.name.clone()),
                namespace: Some(involved.namespace.clone()),
                uid: Some(involved.uid.clone()),
                resource_version: involved.resource_version.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.as_str().to_string()),
            count: Some(1),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            event_time: Some(MicroTime(now)),
            source: Some(EventSource {
                component: Some(COMPONENT.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn log_emit_failure(resource: &str, err: &DownscalerError) {
    warn!("failed to emit event for {resource}: {err}");
}
