//! The configuration every cluster starts with.
//!
//! The mandatory objects must always exist: `exempt` lets cluster admins
//! through unconditionally and `catch-all` guarantees every request matches
//! some schema. The suggested objects are a sensible default split of the
//! remaining traffic and may be changed by operators.

use crate::types::*;

/// Groups every authenticated user belongs to.
pub const GROUP_AUTHENTICATED: &str = "system:authenticated";
/// Groups every anonymous user belongs to.
pub const GROUP_UNAUTHENTICATED: &str = "system:unauthenticated";
/// Cluster administrators.
pub const GROUP_MASTERS: &str = "system:masters";
/// Kubelets.
pub const GROUP_NODES: &str = "system:nodes";
/// Every service account.
pub const GROUP_SERVICE_ACCOUNTS: &str = "system:serviceaccounts";

const USER_CONTROLLER_MANAGER: &str = "system:kube-controller-manager";
const USER_SCHEDULER: &str = "system:kube-scheduler";

/// Priority levels that must always exist.
pub fn mandatory_priority_levels() -> Vec<PriorityLevelConfiguration> {
    vec![
        PriorityLevelConfiguration::exempt(PRIORITY_LEVEL_CONFIGURATION_NAME_EXEMPT),
        PriorityLevelConfiguration::rejecting(PRIORITY_LEVEL_CONFIGURATION_NAME_CATCH_ALL, 5),
    ]
}

/// The default split of non-mandatory traffic.
pub fn suggested_priority_levels() -> Vec<PriorityLevelConfiguration> {
    vec![
        queuing("system", 30, 64, 6),
        queuing("leader-election", 10, 16, 4),
        queuing("workload-high", 40, 128, 6),
        queuing("workload-low", 100, 128, 6),
        queuing("global-default", 20, 128, 6),
    ]
}

fn queuing(name: &str, shares: i32, queues: i32, hand_size: i32) -> PriorityLevelConfiguration {
    PriorityLevelConfiguration::queuing(
        name,
        shares,
        QueuingConfiguration {
            queues,
            hand_size,
            queue_length_limit: 50,
        },
    )
}

/// Flow schemas that must always exist.
pub fn mandatory_flow_schemas() -> Vec<FlowSchema> {
    vec![
        flow_schema(
            FLOW_SCHEMA_NAME_EXEMPT,
            PRIORITY_LEVEL_CONFIGURATION_NAME_EXEMPT,
            1,
            None,
            everything(vec![Subject::group(GROUP_MASTERS)]),
        ),
        flow_schema(
            FLOW_SCHEMA_NAME_CATCH_ALL,
            PRIORITY_LEVEL_CONFIGURATION_NAME_CATCH_ALL,
            10_000,
            Some(FlowDistinguisherMethodType::ByUser),
            everything(vec![
                Subject::group(GROUP_AUTHENTICATED),
                Subject::group(GROUP_UNAUTHENTICATED),
            ]),
        ),
    ]
}

/// Flow schemas routing traffic to the suggested priority levels.
pub fn suggested_flow_schemas() -> Vec<FlowSchema> {
    use FlowDistinguisherMethodType::{ByNamespace, ByUser};

    let leader_election = PolicyRulesWithSubjects {
        subjects: vec![
            Subject::user(USER_CONTROLLER_MANAGER),
            Subject::user(USER_SCHEDULER),
        ],
        resource_rules: vec![
            ResourcePolicyRule {
                verbs: strings(&["get", "create", "update"]),
                api_groups: strings(&[""]),
                resources: strings(&["endpoints", "configmaps"]),
                cluster_scope: false,
                namespaces: strings(&["kube-system"]),
            },
            ResourcePolicyRule {
                verbs: strings(&["get", "create", "update"]),
                api_groups: strings(&["coordination.k8s.io"]),
                resources: strings(&["leases"]),
                cluster_scope: false,
                namespaces: strings(&["kube-system"]),
            },
        ],
        non_resource_rules: vec![],
    };

    vec![
        flow_schema(
            "system-leader-election",
            "leader-election",
            100,
            Some(ByUser),
            vec![leader_election],
        ),
        flow_schema(
            "system-nodes",
            "system",
            500,
            Some(ByUser),
            everything(vec![Subject::group(GROUP_NODES)]),
        ),
        flow_schema(
            "kube-controller-manager",
            "workload-high",
            800,
            Some(ByNamespace),
            everything(vec![Subject::user(USER_CONTROLLER_MANAGER)]),
        ),
        flow_schema(
            "kube-scheduler",
            "workload-high",
            800,
            Some(ByNamespace),
            everything(vec![Subject::user(USER_SCHEDULER)]),
        ),
        flow_schema(
            "kube-system-service-accounts",
            "workload-high",
            900,
            Some(ByNamespace),
            everything(vec![Subject::service_account("kube-system", NAME_ALL)]),
        ),
        flow_schema(
            "service-accounts",
            "workload-low",
            9000,
            Some(ByUser),
            everything(vec![Subject::group(GROUP_SERVICE_ACCOUNTS)]),
        ),
        flow_schema(
            "global-default",
            "global-default",
            9900,
            Some(ByUser),
            everything(vec![
                Subject::group(GROUP_UNAUTHENTICATED),
                Subject::group(GROUP_AUTHENTICATED),
            ]),
        ),
    ]
}

fn flow_schema(
    name: &str,
    level: &str,
    precedence: i32,
    distinguisher: Option<FlowDistinguisherMethodType>,
    rules: Vec<PolicyRulesWithSubjects>,
) -> FlowSchema {
    FlowSchema {
        metadata: named(name),
        spec: FlowSchemaSpec {
            priority_level_configuration: PriorityLevelConfigurationReference {
                name: level.to_string(),
            },
            matching_precedence: precedence,
            distinguisher_method: distinguisher.map(|type_| FlowDistinguisherMethod { type_ }),
            rules,
        },
        ..Default::default()
    }
}

// Every resource in every namespace and every non-resource URL.
fn everything(subjects: Vec<Subject>) -> Vec<PolicyRulesWithSubjects> {
    vec![PolicyRulesWithSubjects {
        subjects,
        resource_rules: vec![ResourcePolicyRule {
            verbs: strings(&[VERB_ALL]),
            api_groups: strings(&[API_GROUP_ALL]),
            resources: strings(&[RESOURCE_ALL]),
            cluster_scope: true,
            namespaces: strings(&[NAMESPACE_EVERY]),
        }],
        non_resource_rules: vec![NonResourcePolicyRule {
            verbs: strings(&[VERB_ALL]),
            non_resource_urls: strings(&[NON_RESOURCE_ALL]),
        }],
    }]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
