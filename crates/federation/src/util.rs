//! Helpers shared by the watchers and controllers.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::watcher::Event;

use crate::NamespacedName;

/// Summary of a `kube_runtime::watcher::Event` for log output.
///
/// ```
/// # use kube_runtime::watcher::Event;
/// # use k8s_openapi::api::core::v1::Secret;
/// # use tracing::debug;
/// # let event: Event<Secret> = Event::Restarted(vec![]);
/// use federation::util::PrettyEvent;
/// debug!(event = ?PrettyEvent::from(&event));
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum PrettyEvent {
    /// One object was created or changed.
    Applied(NamespacedName),
    /// One object was deleted.
    Deleted(NamespacedName),
    /// The watch was relisted with this many objects.
    Relisted(usize),
}

impl<R: Resource> From<&Event<R>> for PrettyEvent {
    fn from(event: &Event<R>) -> Self {
        match event {
            Event::Applied(object) => PrettyEvent::Applied(NamespacedName::of(object)),
            Event::Deleted(object) => PrettyEvent::Deleted(NamespacedName::of(object)),
            Event::Restarted(objects) => PrettyEvent::Relisted(objects.len()),
        }
    }
}

/// Whether two objects carry the same identity, labels and annotations.
/// Server-populated fields such as the resource version are ignored, and a
/// missing map equals an empty one.
pub fn object_meta_equivalent(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    a.name == b.name
        && a.namespace.as_deref().unwrap_or_default() == b.namespace.as_deref().unwrap_or_default()
        && map_or_empty(&a.labels) == map_or_empty(&b.labels)
        && map_or_empty(&a.annotations) == map_or_empty(&b.annotations)
}

/// Copies the parts of `meta` a federated controller owns: name, namespace,
/// labels and annotations.
pub fn copy_object_meta(meta: &ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
        labels: meta.labels.clone(),
        annotations: meta.annotations.clone(),
        ..Default::default()
    }
}

fn map_or_empty<V>(map: &Option<BTreeMap<String, V>>) -> Option<&BTreeMap<String, V>> {
    map.as_ref().filter(|map| !map.is_empty())
}
