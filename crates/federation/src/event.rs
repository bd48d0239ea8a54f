//! Recording Kubernetes events about reconciled objects.

use std::sync::{Mutex, PoisonError};

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::chrono::Utc;
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

/// Severity of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// Routine progress.
    Normal,
    /// Something went wrong.
    Warning,
}

impl EventType {
    /// The API representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Records events against objects. Recording never fails the caller.
pub trait EventRecorder: Send + Sync {
    /// Records one event about `object`.
    fn event(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str);
}

/// A reference to `object` suitable for [`EventRecorder::event`].
pub fn object_reference<R>(object: &R) -> ObjectReference
where
    R: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(R::api_version(&()).to_string()),
        kind: Some(R::kind(&()).to_string()),
        name: Some(object.name()),
        namespace: object.namespace(),
        uid: object.meta().uid.clone(),
        resource_version: object.resource_version(),
        ..Default::default()
    }
}

/// Creates `Event` objects through the API server. Creation happens in the
/// background; failures are only logged.
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: kube::Client,
    component: String,
}

impl KubeEventRecorder {
    /// Records events on behalf of `component`.
    pub fn new(client: kube::Client, component: &str) -> Self {
        KubeEventRecorder {
            client,
            component: component.to_string(),
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn event(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let namespace = object
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let now = Time(Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!(
                    "{}.",
                    object.name.as_deref().unwrap_or_default()
                )),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            involved_object: object.clone(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(type_.as_str().to_string()),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                host: None,
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };

        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        let reason = reason.to_string();
        tokio::spawn(async move {
            match api.create(&PostParams::default(), &event).await {
                Ok(_) => debug!(%reason, "recorded event"),
                Err(error) => warn!(%reason, ?error, "unable to record event"),
            }
        });
    }
}

/// An event captured by [`MemoryEventRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `namespace/name` of the involved object.
    pub object: String,
    /// Severity.
    pub type_: EventType,
    /// Machine readable reason.
    pub reason: String,
    /// Human readable message.
    pub message: String,
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reasons of every event recorded so far, in order.
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn event(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let object = match &object.namespace {
            Some(namespace) => format!(
                "{}/{}",
                namespace,
                object.name.as_deref().unwrap_or_default()
            ),
            None => object.name.clone().unwrap_or_default(),
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                object,
                type_,
                reason: reason.to_string(),
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;

    #[test]
    fn references_carry_kind_and_identity() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                namespace: Some("prod".to_string()),
                uid: Some("1234".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let reference = object_reference(&secret);
        assert_eq!(reference.kind.as_deref(), Some("Secret"));
        assert_eq!(reference.api_version.as_deref(), Some("v1"));
        assert_eq!(reference.uid.as_deref(), Some("1234"));

        let recorder = MemoryEventRecorder::new();
        recorder.event(&reference, EventType::Warning, "Oops", "it broke");
        assert_eq!(
            recorder.events(),
            vec![RecordedEvent {
                object: "prod/db".to_string(),
                type_: EventType::Warning,
                reason: "Oops".to_string(),
                message: "it broke".to_string(),
            }]
        );
    }
}
