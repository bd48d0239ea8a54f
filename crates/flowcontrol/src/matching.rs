//! Matching incoming requests against flow schemas.
//!
//! A request is described by a [`RequestDigest`]. Schemas are evaluated in
//! ascending `matchingPrecedence` (ties broken by name) and the first one
//! with a matching rule wins. The winning schema and the request's flow
//! distinguisher together identify the request's flow, whose hash drives
//! [`shufflesharding`](crate::shufflesharding).

use std::cmp::Ordering;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::*;

/// Username prefix of service account identities.
pub const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";

/// The authenticated identity behind a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// User name.
    pub name: String,
    /// Groups the user belongs to.
    pub groups: Vec<String>,
}

impl UserInfo {
    /// A user with the given groups.
    pub fn new(name: &str, groups: &[&str]) -> Self {
        UserInfo {
            name: name.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// What the request asks for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Whether this is a request for an API resource.
    pub is_resource_request: bool,
    /// Lower-case request verb.
    pub verb: String,
    /// API group, empty for the core group.
    pub api_group: String,
    /// Namespace, empty for cluster-scoped requests.
    pub namespace: String,
    /// Resource name, such as `pods`.
    pub resource: String,
    /// Subresource name, such as `status`.
    pub subresource: String,
    /// URL path, used for non-resource requests.
    pub path: String,
}

impl RequestInfo {
    /// A resource request.
    pub fn resource(verb: &str, api_group: &str, resource: &str, namespace: &str) -> Self {
        RequestInfo {
            is_resource_request: true,
            verb: verb.to_string(),
            api_group: api_group.to_string(),
            resource: resource.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// A request for a plain URL path.
    pub fn non_resource(verb: &str, path: &str) -> Self {
        RequestInfo {
            verb: verb.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }
}

/// Everything classification looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestDigest {
    /// Who is asking.
    pub user: UserInfo,
    /// What is asked for.
    pub request: RequestInfo,
}

/// The outcome of classifying a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    /// The matching flow schema.
    pub flow_schema: String,
    /// The priority level it routes to.
    pub priority_level: String,
    /// The flow distinguisher, empty when the schema has none.
    pub distinguisher: String,
    /// Hash identifying the flow within the priority level.
    pub flow_hash: u64,
}

/// Whether any rule of `fs` matches the request.
pub fn matches_flow_schema(digest: &RequestDigest, fs: &FlowSchema) -> bool {
    fs.spec
        .rules
        .iter()
        .any(|rule| matches_policy_rules(digest, rule))
}

fn matches_policy_rules(digest: &RequestDigest, rule: &PolicyRulesWithSubjects) -> bool {
    if !rule
        .subjects
        .iter()
        .any(|subject| matches_subject(&digest.user, subject))
    {
        return false;
    }
    if digest.request.is_resource_request {
        rule.resource_rules
            .iter()
            .any(|r| matches_resource_rule(&digest.request, r))
    } else {
        rule.non_resource_rules
            .iter()
            .any(|r| matches_non_resource_rule(&digest.request, r))
    }
}

/// Whether `subject` names the requesting user.
pub fn matches_subject(user: &UserInfo, subject: &Subject) -> bool {
    match &subject.kind {
        SubjectKind::User => subject
            .user
            .as_ref()
            .map_or(false, |u| u.name == NAME_ALL || u.name == user.name),
        SubjectKind::Group => subject.group.as_ref().map_or(false, |g| {
            g.name == NAME_ALL || user.groups.iter().any(|group| *group == g.name)
        }),
        SubjectKind::ServiceAccount => subject.service_account.as_ref().map_or(false, |sa| {
            let prefix = format!("{}{}:", SERVICE_ACCOUNT_USERNAME_PREFIX, sa.namespace);
            match user.name.strip_prefix(&prefix) {
                Some(name) => sa.name == NAME_ALL || sa.name == name,
                None => false,
            }
        }),
        SubjectKind::Unknown(_) => false,
    }
}

/// Whether a resource request matches `rule`.
pub fn matches_resource_rule(request: &RequestInfo, rule: &ResourcePolicyRule) -> bool {
    if !contains(&rule.verbs, &request.verb, VERB_ALL)
        || !contains(&rule.api_groups, &request.api_group, API_GROUP_ALL)
    {
        return false;
    }

    let resource = if request.subresource.is_empty() {
        request.resource.clone()
    } else {
        format!("{}/{}", request.resource, request.subresource)
    };
    if !contains(&rule.resources, &resource, RESOURCE_ALL) {
        return false;
    }

    if request.namespace.is_empty() {
        rule.cluster_scope
    } else {
        contains(&rule.namespaces, &request.namespace, NAMESPACE_EVERY)
    }
}

/// Whether a non-resource request matches `rule`.
pub fn matches_non_resource_rule(request: &RequestInfo, rule: &NonResourcePolicyRule) -> bool {
    contains(&rule.verbs, &request.verb, VERB_ALL)
        && rule
            .non_resource_urls
            .iter()
            .any(|url| matches_non_resource_url(url, &request.path))
}

fn matches_non_resource_url(rule_url: &str, path: &str) -> bool {
    if rule_url == NON_RESOURCE_ALL || rule_url == path {
        return true;
    }
    match rule_url.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => false,
    }
}

// A list holding only the wildcard matches everything.
fn contains(values: &[String], wanted: &str, wildcard: &str) -> bool {
    if values.len() == 1 && values[0] == wildcard {
        return true;
    }
    values.iter().any(|v| v == wanted)
}

fn evaluation_order(a: &FlowSchema, b: &FlowSchema) -> Ordering {
    a.spec
        .matching_precedence
        .cmp(&b.spec.matching_precedence)
        .then_with(|| a.name().cmp(b.name()))
}

/// Orders schemas by ascending precedence, then name.
pub fn sort_flow_schemas(schemas: &mut [FlowSchema]) {
    schemas.sort_by(evaluation_order);
}

/// Returns the schema that governs the request, if any.
pub fn select_flow_schema<'a>(
    schemas: &'a [FlowSchema],
    digest: &RequestDigest,
) -> Option<&'a FlowSchema> {
    let mut ordered: Vec<&FlowSchema> = schemas.iter().collect();
    ordered.sort_by(|a, b| evaluation_order(a, b));
    ordered
        .into_iter()
        .find(|fs| matches_flow_schema(digest, fs))
}

/// The part of the request that splits `fs`'s traffic into flows.
pub fn flow_distinguisher(fs: &FlowSchema, digest: &RequestDigest) -> String {
    match fs.spec.distinguisher_method.as_ref().map(|m| &m.type_) {
        Some(FlowDistinguisherMethodType::ByUser) => digest.user.name.clone(),
        Some(FlowDistinguisherMethodType::ByNamespace) => digest.request.namespace.clone(),
        _ => String::new(),
    }
}

/// Hashes a flow identity. The schema name and the distinguisher are
/// separated by a NUL byte so distinct pairs never collide by concatenation.
pub fn flow_hash(flow_schema_name: &str, distinguisher: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(flow_schema_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(distinguisher.as_bytes());
    let sum = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&sum[..8]);
    u64::from_le_bytes(prefix)
}

/// Selects the schema for a request and computes its flow.
pub fn classify(schemas: &[FlowSchema], digest: &RequestDigest) -> Option<Classification> {
    let fs = select_flow_schema(schemas, digest)?;
    let distinguisher = flow_distinguisher(fs, digest);
    let classification = Classification {
        flow_schema: fs.name().to_string(),
        priority_level: fs.spec.priority_level_configuration.name.clone(),
        flow_hash: flow_hash(fs.name(), &distinguisher),
        distinguisher,
    };
    debug!(
        user = %digest.user.name,
        flow_schema = %classification.flow_schema,
        priority_level = %classification.priority_level,
        "classified request"
    );
    Some(classification)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bootstrap;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn schema(name: &str, precedence: i32, subject: Subject) -> FlowSchema {
        FlowSchema {
            metadata: named(name),
            spec: FlowSchemaSpec {
                priority_level_configuration: PriorityLevelConfigurationReference {
                    name: format!("{}-level", name),
                },
                matching_precedence: precedence,
                distinguisher_method: Some(FlowDistinguisherMethod {
                    type_: FlowDistinguisherMethodType::ByUser,
                }),
                rules: vec![PolicyRulesWithSubjects {
                    subjects: vec![subject],
                    resource_rules: vec![ResourcePolicyRule {
                        verbs: strings(&["*"]),
                        api_groups: strings(&["*"]),
                        resources: strings(&["*"]),
                        cluster_scope: true,
                        namespaces: strings(&["*"]),
                    }],
                    non_resource_rules: vec![],
                }],
            },
            ..Default::default()
        }
    }

    fn get_pods(user: UserInfo) -> RequestDigest {
        RequestDigest {
            user,
            request: RequestInfo::resource("get", "", "pods", "default"),
        }
    }

    #[test]
    fn subjects() {
        let alice = UserInfo::new("alice", &["dev"]);
        assert!(matches_subject(&alice, &Subject::user("alice")));
        assert!(matches_subject(&alice, &Subject::user("*")));
        assert!(!matches_subject(&alice, &Subject::user("bob")));
        assert!(matches_subject(&alice, &Subject::group("dev")));
        assert!(!matches_subject(&alice, &Subject::group("ops")));

        let sa = UserInfo::new("system:serviceaccount:kube-system:coredns", &[]);
        assert!(matches_subject(&sa, &Subject::service_account("kube-system", "coredns")));
        assert!(matches_subject(&sa, &Subject::service_account("kube-system", "*")));
        assert!(!matches_subject(&sa, &Subject::service_account("default", "*")));
        assert!(!matches_subject(&alice, &Subject::service_account("kube-system", "*")));
    }

    #[test]
    fn resource_rules() {
        let rule = ResourcePolicyRule {
            verbs: strings(&["get", "list"]),
            api_groups: strings(&["", "apps"]),
            resources: strings(&["pods", "deployments/status"]),
            cluster_scope: false,
            namespaces: strings(&["default"]),
        };
        assert!(matches_resource_rule(
            &RequestInfo::resource("get", "", "pods", "default"),
            &rule
        ));
        assert!(!matches_resource_rule(
            &RequestInfo::resource("delete", "", "pods", "default"),
            &rule
        ));
        assert!(!matches_resource_rule(
            &RequestInfo::resource("get", "", "pods", "kube-system"),
            &rule
        ));
        assert!(!matches_resource_rule(
            &RequestInfo::resource("get", "", "pods", ""),
            &rule
        ));

        let mut status = RequestInfo::resource("get", "apps", "deployments", "default");
        assert!(!matches_resource_rule(&status, &rule));
        status.subresource = "status".to_string();
        assert!(matches_resource_rule(&status, &rule));
    }

    #[test]
    fn non_resource_urls() {
        let rule = NonResourcePolicyRule {
            verbs: strings(&["get"]),
            non_resource_urls: strings(&["/healthz", "/metrics/*"]),
        };
        let get = |path| RequestInfo::non_resource("get", path);
        assert!(matches_non_resource_rule(&get("/healthz"), &rule));
        assert!(matches_non_resource_rule(&get("/metrics/cadvisor"), &rule));
        assert!(!matches_non_resource_rule(&get("/metrics"), &rule));
        assert!(!matches_non_resource_rule(&get("/healthz/etcd"), &rule));
        assert!(!matches_non_resource_rule(
            &RequestInfo::non_resource("post", "/healthz"),
            &rule
        ));
    }

    #[test]
    fn lowest_precedence_then_name_wins() {
        let schemas = vec![
            schema("zeta", 100, Subject::user("*")),
            schema("beta", 50, Subject::group("dev")),
            schema("alpha", 50, Subject::group("dev")),
        ];
        let dev = get_pods(UserInfo::new("alice", &["dev"]));
        assert_eq!(select_flow_schema(&schemas, &dev).unwrap().name(), "alpha");

        let other = get_pods(UserInfo::new("bob", &["ops"]));
        assert_eq!(select_flow_schema(&schemas, &other).unwrap().name(), "zeta");

        let mut sorted = schemas.clone();
        sort_flow_schemas(&mut sorted);
        let names: Vec<&str> = sorted.iter().map(|fs| fs.name()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn distinguishers() {
        let mut fs = schema("tenant", 10, Subject::user("*"));
        let digest = get_pods(UserInfo::new("alice", &[]));
        assert_eq!(flow_distinguisher(&fs, &digest), "alice");

        fs.spec.distinguisher_method = Some(FlowDistinguisherMethod {
            type_: FlowDistinguisherMethodType::ByNamespace,
        });
        assert_eq!(flow_distinguisher(&fs, &digest), "default");

        fs.spec.distinguisher_method = None;
        assert_eq!(flow_distinguisher(&fs, &digest), "");
    }

    #[test]
    fn flow_hashes_separate_fields() {
        assert_eq!(flow_hash("a", "b"), flow_hash("a", "b"));
        assert_ne!(flow_hash("ab", ""), flow_hash("a", "b"));
        assert_ne!(flow_hash("a", "b"), flow_hash("a", "c"));
    }

    #[test]
    fn bootstrap_routing() {
        let mut schemas = bootstrap::mandatory_flow_schemas();
        let anonymous = get_pods(UserInfo::new("system:anonymous", &["system:unauthenticated"]));
        let classification = classify(&schemas, &anonymous).unwrap();
        assert_eq!(classification.flow_schema, "catch-all");
        assert_eq!(classification.priority_level, "catch-all");
        assert_eq!(classification.distinguisher, "system:anonymous");

        schemas.extend(bootstrap::suggested_flow_schemas());
        assert_eq!(
            classify(&schemas, &anonymous).unwrap().priority_level,
            "global-default"
        );

        let admin = get_pods(UserInfo::new("root", &["system:masters"]));
        assert_eq!(classify(&schemas, &admin).unwrap().priority_level, "exempt");

        let nobody = get_pods(UserInfo::new("ghost", &[]));
        assert!(classify(&schemas, &nobody).is_none());
    }
}
