//! The `flowcontrol.apiserver.k8s.io/v1beta1` configuration objects.
//!
//! Field names follow the wire format so manifests written for a real API
//! server decode unchanged.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::{Deserialize, Serialize};

/// The API group and version these types are modelled on.
pub const API_VERSION: &str = "flowcontrol.apiserver.k8s.io/v1beta1";

/// Wildcard for user, group and service account names.
pub const NAME_ALL: &str = "*";
/// Wildcard for namespaces.
pub const NAMESPACE_EVERY: &str = "*";
/// Wildcard for verbs.
pub const VERB_ALL: &str = "*";
/// Wildcard for API groups.
pub const API_GROUP_ALL: &str = "*";
/// Wildcard for resources.
pub const RESOURCE_ALL: &str = "*";
/// Wildcard for non-resource URLs.
pub const NON_RESOURCE_ALL: &str = "*";

/// Name of the mandatory exempt priority level and flow schema.
pub const PRIORITY_LEVEL_CONFIGURATION_NAME_EXEMPT: &str = "exempt";
/// Name of the mandatory catch-all priority level and flow schema.
pub const PRIORITY_LEVEL_CONFIGURATION_NAME_CATCH_ALL: &str = "catch-all";
/// Name of the mandatory exempt flow schema.
pub const FLOW_SCHEMA_NAME_EXEMPT: &str = "exempt";
/// Name of the mandatory catch-all flow schema.
pub const FLOW_SCHEMA_NAME_CATCH_ALL: &str = "catch-all";

string_enum! {
    /// How requests matched by a flow schema are split into flows.
    FlowDistinguisherMethodType {
        /// One flow per requesting user.
        ByUser => "ByUser",
        /// One flow per request namespace.
        ByNamespace => "ByNamespace",
    }
}

string_enum! {
    /// The kind of a [`Subject`].
    SubjectKind {
        /// An authenticated user name.
        User => "User",
        /// A user group.
        Group => "Group",
        /// A service account.
        ServiceAccount => "ServiceAccount",
    }
}

string_enum! {
    /// Whether a priority level is subject to concurrency limits.
    PriorityLevelEnablement {
        /// Requests are never queued or rejected.
        Exempt => "Exempt",
        /// Requests are limited by the level's concurrency share.
        Limited => "Limited",
    }
}

string_enum! {
    /// What happens to requests that cannot be executed immediately.
    LimitResponseType {
        /// Requests wait in a queue.
        Queue => "Queue",
        /// Requests are rejected.
        Reject => "Reject",
    }
}

/// A status condition reported on a flow-control object.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The condition type.
    #[serde(rename = "type", default)]
    pub type_: String,
    /// `True`, `False` or `Unknown`.
    #[serde(default)]
    pub status: String,
    /// When the status last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    /// Machine readable reason for the last change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable detail for the last change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Routes matching requests to a priority level.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FlowSchema {
    /// Standard object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired behavior.
    #[serde(default)]
    pub spec: FlowSchemaSpec,
    /// Observed status.
    #[serde(default)]
    pub status: FlowSchemaStatus,
}

/// The desired behavior of a [`FlowSchema`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSchemaSpec {
    /// The priority level matching requests are assigned to.
    #[serde(default)]
    pub priority_level_configuration: PriorityLevelConfigurationReference,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub matching_precedence: i32,
    /// How matching requests are split into flows. `None` puts every
    /// matching request in one flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinguisher_method: Option<FlowDistinguisherMethod>,
    /// The schema matches a request if at least one rule matches.
    #[serde(default)]
    pub rules: Vec<PolicyRulesWithSubjects>,
}

/// Observed status of a [`FlowSchema`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FlowSchemaStatus {
    /// Current state of the schema.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Reference to a [`PriorityLevelConfiguration`] by name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PriorityLevelConfigurationReference {
    /// Name of the referenced priority level.
    #[serde(default)]
    pub name: String,
}

/// Selects the flow distinguisher.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FlowDistinguisherMethod {
    /// The distinguisher method type.
    #[serde(rename = "type", default)]
    pub type_: FlowDistinguisherMethodType,
}

/// A set of subjects together with the requests they make that a
/// [`FlowSchema`] matches.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRulesWithSubjects {
    /// Who makes the request. Must not be empty.
    #[serde(default)]
    pub subjects: Vec<Subject>,
    /// Rules for resource requests.
    #[serde(default)]
    pub resource_rules: Vec<ResourcePolicyRule>,
    /// Rules for non-resource requests.
    #[serde(default)]
    pub non_resource_rules: Vec<NonResourcePolicyRule>,
}

/// Identifies a requester.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Which of the members below is meaningful.
    #[serde(default)]
    pub kind: SubjectKind,
    /// Set when `kind` is `User`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSubject>,
    /// Set when `kind` is `Group`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupSubject>,
    /// Set when `kind` is `ServiceAccount`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountSubject>,
}

impl Subject {
    /// A `User` subject.
    pub fn user(name: &str) -> Self {
        Subject {
            kind: SubjectKind::User,
            user: Some(UserSubject {
                name: name.to_string(),
            }),
            ..Default::default()
        }
    }

    /// A `Group` subject.
    pub fn group(name: &str) -> Self {
        Subject {
            kind: SubjectKind::Group,
            group: Some(GroupSubject {
                name: name.to_string(),
            }),
            ..Default::default()
        }
    }

    /// A `ServiceAccount` subject.
    pub fn service_account(namespace: &str, name: &str) -> Self {
        Subject {
            kind: SubjectKind::ServiceAccount,
            service_account: Some(ServiceAccountSubject {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// A user, matched by name. `*` matches every user.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct UserSubject {
    /// User name.
    #[serde(default)]
    pub name: String,
}

/// A group, matched by name. `*` matches every group.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GroupSubject {
    /// Group name.
    #[serde(default)]
    pub name: String,
}

/// A service account, matched by namespace and name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceAccountSubject {
    /// Namespace of the service account.
    #[serde(default)]
    pub namespace: String,
    /// Name of the service account, or `*` for all in the namespace.
    #[serde(default)]
    pub name: String,
}

/// Matches resource requests.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicyRule {
    /// Matching verbs, or `["*"]`.
    #[serde(default)]
    pub verbs: Vec<String>,
    /// Matching API groups, or `["*"]`.
    #[serde(default)]
    pub api_groups: Vec<String>,
    /// Matching resources (optionally `resource/subresource`), or `["*"]`.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Whether requests without a namespace match.
    #[serde(default)]
    pub cluster_scope: bool,
    /// Matching namespaces, or `["*"]`.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// Matches non-resource requests.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct NonResourcePolicyRule {
    /// Matching verbs, or `["*"]`.
    #[serde(default)]
    pub verbs: Vec<String>,
    /// Matching URL paths. A trailing `/*` matches any suffix.
    #[serde(rename = "nonResourceURLs", default)]
    pub non_resource_urls: Vec<String>,
}

/// A priority level: a concurrency budget with an optional queue.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PriorityLevelConfiguration {
    /// Standard object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired behavior.
    #[serde(default)]
    pub spec: PriorityLevelConfigurationSpec,
    /// Observed status.
    #[serde(default)]
    pub status: PriorityLevelConfigurationStatus,
}

/// The desired behavior of a [`PriorityLevelConfiguration`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PriorityLevelConfigurationSpec {
    /// Whether the level is limited.
    #[serde(rename = "type", default)]
    pub type_: PriorityLevelEnablement,
    /// Limits; required exactly when `type` is `Limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limited: Option<LimitedPriorityLevelConfiguration>,
}

/// Observed status of a [`PriorityLevelConfiguration`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PriorityLevelConfigurationStatus {
    /// Current state of the priority level.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Limits applied to a `Limited` priority level.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitedPriorityLevelConfiguration {
    /// Share of the server's concurrency limit.
    #[serde(default)]
    pub assured_concurrency_shares: i32,
    /// Handling of requests that cannot run immediately.
    #[serde(default)]
    pub limit_response: LimitResponse,
}

/// Handling of requests that cannot run immediately.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LimitResponse {
    /// Queue or reject.
    #[serde(rename = "type", default)]
    pub type_: LimitResponseType,
    /// Queue parameters; required exactly when `type` is `Queue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queuing: Option<QueuingConfiguration>,
}

/// Shuffle-sharding queue parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuingConfiguration {
    /// Number of queues (the deck size).
    #[serde(default)]
    pub queues: i32,
    /// Number of queues each flow may use (the hand size).
    #[serde(default)]
    pub hand_size: i32,
    /// Maximum length of each queue.
    #[serde(default)]
    pub queue_length_limit: i32,
}

impl PriorityLevelConfiguration {
    /// A `Limited` level whose excess requests are queued.
    pub fn queuing(name: &str, shares: i32, queuing: QueuingConfiguration) -> Self {
        PriorityLevelConfiguration {
            metadata: named(name),
            spec: PriorityLevelConfigurationSpec {
                type_: PriorityLevelEnablement::Limited,
                limited: Some(LimitedPriorityLevelConfiguration {
                    assured_concurrency_shares: shares,
                    limit_response: LimitResponse {
                        type_: LimitResponseType::Queue,
                        queuing: Some(queuing),
                    },
                }),
            },
            ..Default::default()
        }
    }

    /// A `Limited` level whose excess requests are rejected.
    pub fn rejecting(name: &str, shares: i32) -> Self {
        PriorityLevelConfiguration {
            metadata: named(name),
            spec: PriorityLevelConfigurationSpec {
                type_: PriorityLevelEnablement::Limited,
                limited: Some(LimitedPriorityLevelConfiguration {
                    assured_concurrency_shares: shares,
                    limit_response: LimitResponse {
                        type_: LimitResponseType::Reject,
                        queuing: None,
                    },
                }),
            },
            ..Default::default()
        }
    }

    /// An `Exempt` level.
    pub fn exempt(name: &str) -> Self {
        PriorityLevelConfiguration {
            metadata: named(name),
            spec: PriorityLevelConfigurationSpec {
                type_: PriorityLevelEnablement::Exempt,
                limited: None,
            },
            ..Default::default()
        }
    }

    /// The object name, or an empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Queue parameters if this level queues.
    pub fn queuing_config(&self) -> Option<&QueuingConfiguration> {
        self.spec
            .limited
            .as_ref()
            .and_then(|limited| limited.limit_response.queuing.as_ref())
    }
}

impl FlowSchema {
    /// The object name, or an empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

pub(crate) fn named(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Any flow-control object, tagged by its `kind`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum FlowControlObject {
    /// A `FlowSchema` manifest.
    FlowSchema(FlowSchema),
    /// A `PriorityLevelConfiguration` manifest.
    PriorityLevelConfiguration(PriorityLevelConfiguration),
}

impl FlowControlObject {
    /// The object name, or an empty string when unset.
    pub fn name(&self) -> &str {
        match self {
            FlowControlObject::FlowSchema(fs) => fs.name(),
            FlowControlObject::PriorityLevelConfiguration(pl) => pl.name(),
        }
    }

    /// The `kind` of the object.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowControlObject::FlowSchema(_) => "FlowSchema",
            FlowControlObject::PriorityLevelConfiguration(_) => "PriorityLevelConfiguration",
        }
    }
}

/// Decodes every YAML document in `manifest`. Empty and comment-only
/// documents are skipped.
pub fn decode_manifests(manifest: &str) -> anyhow::Result<Vec<FlowControlObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| anyhow::anyhow!("unable to parse flow-control manifest: {}", e))?;
        if value.is_null() {
            continue;
        }
        let object = serde_yaml::from_value::<FlowControlObject>(value)
            .map_err(|e| anyhow::anyhow!("unable to decode flow-control manifest: {}", e))?;
        objects.push(object);
    }
    Ok(objects)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_enum_values_are_preserved() {
        let method: FlowDistinguisherMethodType = "ByColor".into();
        assert_eq!(method, FlowDistinguisherMethodType::Unknown("ByColor".into()));
        assert_eq!(method.as_str(), "ByColor");
        assert!(!method.is_known());
        assert!(FlowDistinguisherMethodType::from("ByUser").is_known());
    }

    #[test]
    fn decodes_multiple_documents() {
        let manifest = r#"
apiVersion: flowcontrol.apiserver.k8s.io/v1beta1
kind: PriorityLevelConfiguration
metadata:
  name: system
spec:
  type: Limited
  limited:
    assuredConcurrencyShares: 30
    limitResponse:
      type: Queue
      queuing:
        queues: 64
        handSize: 6
        queueLengthLimit: 50
---
apiVersion: flowcontrol.apiserver.k8s.io/v1beta1
kind: FlowSchema
metadata:
  name: system-nodes
spec:
  priorityLevelConfiguration:
    name: system
  matchingPrecedence: 500
  distinguisherMethod:
    type: ByUser
  rules:
  - subjects:
    - kind: Group
      group:
        name: system:nodes
    nonResourceRules:
    - verbs: ["*"]
      nonResourceURLs: ["*"]
"#;
        let objects = decode_manifests(manifest).unwrap();
        assert_eq!(objects.len(), 2);

        match &objects[0] {
            FlowControlObject::PriorityLevelConfiguration(pl) => {
                assert_eq!(pl.name(), "system");
                let queuing = pl.queuing_config().unwrap();
                assert_eq!(queuing.queues, 64);
                assert_eq!(queuing.hand_size, 6);
            }
            other => panic!("unexpected object {:?}", other),
        }
        match &objects[1] {
            FlowControlObject::FlowSchema(fs) => {
                assert_eq!(fs.spec.matching_precedence, 500);
                assert_eq!(
                    fs.spec.distinguisher_method.as_ref().unwrap().type_,
                    FlowDistinguisherMethodType::ByUser
                );
                assert_eq!(fs.spec.rules[0].non_resource_rules[0].non_resource_urls, vec!["*"]);
                assert_eq!(fs.spec.rules[0].subjects[0].kind, SubjectKind::Group);
            }
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[test]
    fn empty_documents_are_skipped() {
        let objects = decode_manifests("---\n# nothing here\n---\n").unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn separators_may_carry_comments() {
        let manifest = "kind: PriorityLevelConfiguration\nmetadata:\n  name: a\n--- # second\nkind: PriorityLevelConfiguration\nmetadata:\n  name: b\n";
        let names: Vec<_> = decode_manifests(manifest)
            .unwrap()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        assert!(decode_manifests("kind: Deployment\nmetadata:\n  name: web\n").is_err());
    }
}
