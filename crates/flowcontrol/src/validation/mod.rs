//! Validation of [`FlowSchema`] and [`PriorityLevelConfiguration`] objects.
//!
//! Every function here is pure and collects all failures into an
//! [`ErrorList`] instead of stopping at the first one. An object with a
//! non-empty list is rejected as a whole.

mod field;
pub mod names;

pub use field::{into_result, ErrorList, ErrorType, FieldError, FieldPath, ValidationError};

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::shufflesharding::{required_entropy_bits, MAX_HASH_BITS};
use crate::types::*;

/// Largest allowed `matchingPrecedence`.
pub const FLOW_SCHEMA_MAX_MATCHING_PRECEDENCE: i32 = 10_000;
/// Largest allowed number of queues in a priority level.
pub const PRIORITY_LEVEL_CONFIGURATION_QUEUING_MAX_QUEUES: i32 = 10_000_000;

/// Verbs a rule may name explicitly.
pub const SUPPORTED_VERBS: &[&str] = &[
    "get",
    "list",
    "create",
    "update",
    "delete",
    "deletecollection",
    "patch",
    "watch",
    "proxy",
];

/// Validates a whole flow schema.
pub fn validate_flow_schema(fs: &FlowSchema) -> ErrorList {
    let mut errs = validate_object_meta(&fs.metadata, &FieldPath::new("metadata"));
    errs.extend(validate_flow_schema_spec(&fs.spec, &FieldPath::new("spec")));
    errs
}

/// Validates an update to a flow schema. The new object must be valid on its
/// own and keep the old name.
pub fn validate_flow_schema_update(old: &FlowSchema, fs: &FlowSchema) -> ErrorList {
    let mut errs = validate_flow_schema(fs);
    errs.extend(validate_immutable_name(&old.metadata, &fs.metadata));
    errs
}

/// Validates the status of a flow schema.
pub fn validate_flow_schema_status(status: &FlowSchemaStatus) -> ErrorList {
    validate_conditions(&status.conditions, &FieldPath::new("status").child("conditions"))
}

/// Validates a flow schema spec.
pub fn validate_flow_schema_spec(spec: &FlowSchemaSpec, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();

    if spec.matching_precedence <= 0 {
        errs.push(FieldError::invalid(
            &path.child("matchingPrecedence"),
            spec.matching_precedence,
            "must be a positive value",
        ));
    } else if spec.matching_precedence > FLOW_SCHEMA_MAX_MATCHING_PRECEDENCE {
        errs.push(FieldError::invalid(
            &path.child("matchingPrecedence"),
            spec.matching_precedence,
            format!(
                "must not be greater than {}",
                FLOW_SCHEMA_MAX_MATCHING_PRECEDENCE
            ),
        ));
    }

    if let Some(method) = &spec.distinguisher_method {
        if !method.type_.is_known() {
            errs.push(FieldError::not_supported(
                &path.child("distinguisherMethod").child("type"),
                method.type_.as_str(),
                FlowDistinguisherMethodType::SUPPORTED,
            ));
        }
    }

    let reference = path.child("priorityLevelConfiguration").child("name");
    let level = &spec.priority_level_configuration.name;
    if level.is_empty() {
        errs.push(FieldError::required(&reference, "must reference a priority level"));
    } else {
        for msg in names::is_valid_path_segment_name(level) {
            errs.push(FieldError::invalid(&reference, level, msg));
        }
    }

    for (i, rule) in spec.rules.iter().enumerate() {
        errs.extend(validate_policy_rules_with_subjects(
            rule,
            &path.child("rules").index(i),
        ));
    }
    errs
}

fn validate_policy_rules_with_subjects(rule: &PolicyRulesWithSubjects, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();

    if rule.subjects.is_empty() {
        errs.push(FieldError::required(
            &path.child("subjects"),
            "subjects must contain at least one value",
        ));
    }
    for (i, subject) in rule.subjects.iter().enumerate() {
        errs.extend(validate_subject(subject, &path.child("subjects").index(i)));
    }

    if rule.resource_rules.is_empty() && rule.non_resource_rules.is_empty() {
        errs.push(FieldError::required(
            path,
            "at least one of resourceRules and nonResourceRules has to be non-empty",
        ));
    }
    for (i, resource_rule) in rule.resource_rules.iter().enumerate() {
        errs.extend(validate_resource_policy_rule(
            resource_rule,
            &path.child("resourceRules").index(i),
        ));
    }
    for (i, non_resource_rule) in rule.non_resource_rules.iter().enumerate() {
        errs.extend(validate_non_resource_policy_rule(
            non_resource_rule,
            &path.child("nonResourceRules").index(i),
        ));
    }
    errs
}

fn validate_subject(subject: &Subject, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();
    let forbid = |errs: &mut ErrorList, present: bool, member: &str, kind: &str| {
        if present {
            errs.push(FieldError::forbidden(
                &path.child(member),
                format!("{} is forbidden when subject kind is not '{}'", member, kind),
            ));
        }
    };

    match &subject.kind {
        SubjectKind::ServiceAccount => {
            errs.extend(validate_service_account_subject(
                subject.service_account.as_ref(),
                &path.child("serviceAccount"),
            ));
            forbid(&mut errs, subject.user.is_some(), "user", "User");
            forbid(&mut errs, subject.group.is_some(), "group", "Group");
        }
        SubjectKind::User => {
            match &subject.user {
                None => errs.push(FieldError::required(
                    &path.child("user"),
                    "user is required when subject kind is 'User'",
                )),
                Some(user) if user.name.is_empty() => errs.push(FieldError::required(
                    &path.child("user").child("name"),
                    "username is required",
                )),
                Some(_) => {}
            }
            forbid(
                &mut errs,
                subject.service_account.is_some(),
                "serviceAccount",
                "ServiceAccount",
            );
            forbid(&mut errs, subject.group.is_some(), "group", "Group");
        }
        SubjectKind::Group => {
            match &subject.group {
                None => errs.push(FieldError::required(
                    &path.child("group"),
                    "group is required when subject kind is 'Group'",
                )),
                Some(group) if group.name.is_empty() => errs.push(FieldError::required(
                    &path.child("group").child("name"),
                    "groupname is required",
                )),
                Some(_) => {}
            }
            forbid(
                &mut errs,
                subject.service_account.is_some(),
                "serviceAccount",
                "ServiceAccount",
            );
            forbid(&mut errs, subject.user.is_some(), "user", "User");
        }
        SubjectKind::Unknown(kind) => errs.push(FieldError::not_supported(
            &path.child("kind"),
            kind,
            SubjectKind::SUPPORTED,
        )),
    }
    errs
}

fn validate_service_account_subject(
    subject: Option<&ServiceAccountSubject>,
    path: &FieldPath,
) -> ErrorList {
    let subject = match subject {
        Some(subject) => subject,
        None => {
            return vec![FieldError::required(
                path,
                "serviceAccount is required when subject kind is 'ServiceAccount'",
            )]
        }
    };

    let mut errs = ErrorList::new();
    if subject.name.is_empty() {
        errs.push(FieldError::required(&path.child("name"), ""));
    } else if subject.name != NAME_ALL {
        for msg in names::is_dns1123_subdomain(&subject.name) {
            errs.push(FieldError::invalid(&path.child("name"), &subject.name, msg));
        }
    }

    if subject.namespace.is_empty() {
        errs.push(FieldError::required(
            &path.child("namespace"),
            "must specify namespace for service account",
        ));
    } else {
        for msg in names::is_dns1123_label(&subject.namespace) {
            errs.push(FieldError::invalid(
                &path.child("namespace"),
                &subject.namespace,
                msg,
            ));
        }
    }
    errs
}

/// Validates one resource rule of a flow schema.
pub fn validate_resource_policy_rule(rule: &ResourcePolicyRule, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();

    errs.extend(validate_verbs(&rule.verbs, &path.child("verbs")));
    errs.extend(validate_wildcard_list(
        &rule.api_groups,
        API_GROUP_ALL,
        &path.child("apiGroups"),
        "resource rules must supply at least one api group",
        "api groups",
    ));
    errs.extend(validate_wildcard_list(
        &rule.resources,
        RESOURCE_ALL,
        &path.child("resources"),
        "resource rules must supply at least one resource",
        "resources",
    ));

    let namespaces = path.child("namespaces");
    if rule.namespaces.is_empty() {
        if !rule.cluster_scope {
            errs.push(FieldError::required(
                &namespaces,
                "resource rules that are not cluster scoped must supply at least one namespace",
            ));
        }
    } else if has_wildcard(&rule.namespaces, NAMESPACE_EVERY) {
        if rule.namespaces.len() > 1 {
            errs.push(FieldError::invalid(
                &namespaces,
                &rule.namespaces,
                "if '*' is present, must not specify other namespaces",
            ));
        }
    } else {
        for (i, namespace) in rule.namespaces.iter().enumerate() {
            for msg in names::is_dns1123_label(namespace) {
                errs.push(FieldError::invalid(&namespaces.index(i), namespace, msg));
            }
        }
    }
    errs
}

/// Validates one non-resource rule of a flow schema.
pub fn validate_non_resource_policy_rule(
    rule: &NonResourcePolicyRule,
    path: &FieldPath,
) -> ErrorList {
    let mut errs = validate_verbs(&rule.verbs, &path.child("verbs"));

    let urls = path.child("nonResourceURLs");
    let wildcard_errs = validate_wildcard_list(
        &rule.non_resource_urls,
        NON_RESOURCE_ALL,
        &urls,
        "nonResourceURLs must contain at least one value",
        "non-resource URLs",
    );
    if wildcard_errs.is_empty() && !has_wildcard(&rule.non_resource_urls, NON_RESOURCE_ALL) {
        for (i, url) in rule.non_resource_urls.iter().enumerate() {
            if let Some(err) = validate_non_resource_url_path(url, &urls.index(i)) {
                errs.push(err);
            }
        }
    }
    errs.extend(wildcard_errs);
    errs
}

/// Checks a concrete non-resource URL: it must be absolute, free of
/// whitespace and empty segments, and may only glob with a trailing `/*`.
pub fn validate_non_resource_url_path(url: &str, path: &FieldPath) -> Option<FieldError> {
    if url.is_empty() {
        return Some(FieldError::invalid(path, url, "must not be empty"));
    }
    if url == "/" {
        return None;
    }
    if !url.starts_with('/') {
        return Some(FieldError::invalid(path, url, "must start with slash"));
    }
    if url.contains(char::is_whitespace) {
        return Some(FieldError::invalid(path, url, "must not contain white-space"));
    }
    if url.contains("//") {
        return Some(FieldError::invalid(path, url, "must not contain double slash"));
    }
    let wildcards = url.matches('*').count();
    if wildcards > 1 || (wildcards == 1 && !url.ends_with("/*")) {
        return Some(FieldError::invalid(
            path,
            url,
            "wildcard can only do suffix glob matching",
        ));
    }
    None
}

fn validate_verbs(verbs: &[String], path: &FieldPath) -> ErrorList {
    let mut errs = validate_wildcard_list(
        verbs,
        VERB_ALL,
        path,
        "verbs must contain at least one value",
        "verbs",
    );
    if !verbs.is_empty() && !has_wildcard(verbs, VERB_ALL) {
        if verbs
            .iter()
            .any(|verb| !SUPPORTED_VERBS.contains(&verb.as_str()))
        {
            errs.push(FieldError::not_supported(path, verbs, SUPPORTED_VERBS));
        }
    }
    errs
}

/// A list is valid when it is exactly the wildcard, or non-empty without it.
fn validate_wildcard_list(
    values: &[String],
    wildcard: &str,
    path: &FieldPath,
    required: &str,
    noun: &str,
) -> ErrorList {
    if values.is_empty() {
        return vec![FieldError::required(path, required)];
    }
    if has_wildcard(values, wildcard) && values.len() > 1 {
        return vec![FieldError::invalid(
            path,
            values,
            format!("if '{}' is present, must not specify other {}", wildcard, noun),
        )];
    }
    vec![]
}

fn has_wildcard(values: &[String], wildcard: &str) -> bool {
    values.iter().any(|v| v == wildcard)
}

/// Validates a whole priority level.
pub fn validate_priority_level_configuration(pl: &PriorityLevelConfiguration) -> ErrorList {
    let mut errs = validate_object_meta(&pl.metadata, &FieldPath::new("metadata"));
    let spec = FieldPath::new("spec");

    let is_exempt_name = pl.name() == PRIORITY_LEVEL_CONFIGURATION_NAME_EXEMPT;
    let is_exempt_type = pl.spec.type_ == PriorityLevelEnablement::Exempt;
    if pl.spec.type_.is_known() && is_exempt_name != is_exempt_type {
        errs.push(FieldError::invalid(
            &spec.child("type"),
            pl.spec.type_.as_str(),
            "type must be 'Exempt' if and only if name is 'exempt'",
        ));
    }

    errs.extend(validate_priority_level_configuration_spec(&pl.spec, &spec));
    errs
}

/// Validates an update to a priority level. The new object must be valid on
/// its own and keep the old name.
pub fn validate_priority_level_configuration_update(
    old: &PriorityLevelConfiguration,
    pl: &PriorityLevelConfiguration,
) -> ErrorList {
    let mut errs = validate_priority_level_configuration(pl);
    errs.extend(validate_immutable_name(&old.metadata, &pl.metadata));
    errs
}

/// Validates the status of a priority level.
pub fn validate_priority_level_configuration_status(
    status: &PriorityLevelConfigurationStatus,
) -> ErrorList {
    validate_conditions(&status.conditions, &FieldPath::new("status").child("conditions"))
}

/// Validates a priority level spec.
pub fn validate_priority_level_configuration_spec(
    spec: &PriorityLevelConfigurationSpec,
    path: &FieldPath,
) -> ErrorList {
    let mut errs = ErrorList::new();
    let limited_path = path.child("limited");
    match &spec.type_ {
        PriorityLevelEnablement::Exempt => {
            if spec.limited.is_some() {
                errs.push(FieldError::forbidden(
                    &limited_path,
                    "must be nil if the type is not Limited",
                ));
            }
        }
        PriorityLevelEnablement::Limited => match &spec.limited {
            None => errs.push(FieldError::required(
                &limited_path,
                "must not be empty when type is Limited",
            )),
            Some(limited) => errs.extend(validate_limited(limited, &limited_path)),
        },
        PriorityLevelEnablement::Unknown(other) => errs.push(FieldError::not_supported(
            &path.child("type"),
            other,
            PriorityLevelEnablement::SUPPORTED,
        )),
    }
    errs
}

fn validate_limited(limited: &LimitedPriorityLevelConfiguration, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();
    if limited.assured_concurrency_shares <= 0 {
        errs.push(FieldError::invalid(
            &path.child("assuredConcurrencyShares"),
            limited.assured_concurrency_shares,
            "must be positive",
        ));
    }
    errs.extend(validate_limit_response(
        &limited.limit_response,
        &path.child("limitResponse"),
    ));
    errs
}

fn validate_limit_response(response: &LimitResponse, path: &FieldPath) -> ErrorList {
    let queuing_path = path.child("queuing");
    match &response.type_ {
        LimitResponseType::Reject => match response.queuing {
            Some(_) => vec![FieldError::forbidden(
                &queuing_path,
                "must be nil if limited.limitResponse.type is not Queue",
            )],
            None => vec![],
        },
        LimitResponseType::Queue => match &response.queuing {
            None => vec![FieldError::required(
                &queuing_path,
                "must not be empty if limited.limitResponse.type is Queue",
            )],
            Some(queuing) => validate_queuing_configuration(queuing, &queuing_path),
        },
        LimitResponseType::Unknown(other) => vec![FieldError::not_supported(
            &path.child("type"),
            other,
            LimitResponseType::SUPPORTED,
        )],
    }
}

/// Validates shuffle-sharding queue parameters. The entropy check keeps
/// dealing within the bits a 64 bit flow hash can supply.
pub fn validate_queuing_configuration(queuing: &QueuingConfiguration, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();
    if queuing.queue_length_limit <= 0 {
        errs.push(FieldError::invalid(
            &path.child("queueLengthLimit"),
            queuing.queue_length_limit,
            "must be positive",
        ));
    }

    if queuing.queues <= 0 {
        errs.push(FieldError::invalid(
            &path.child("queues"),
            queuing.queues,
            "must be positive",
        ));
    } else if queuing.queues > PRIORITY_LEVEL_CONFIGURATION_QUEUING_MAX_QUEUES {
        errs.push(FieldError::invalid(
            &path.child("queues"),
            queuing.queues,
            format!(
                "must not be greater than {}",
                PRIORITY_LEVEL_CONFIGURATION_QUEUING_MAX_QUEUES
            ),
        ));
    }

    if queuing.hand_size <= 0 {
        errs.push(FieldError::invalid(
            &path.child("handSize"),
            queuing.hand_size,
            "must be positive",
        ));
    } else if queuing.hand_size > queuing.queues {
        errs.push(FieldError::invalid(
            &path.child("handSize"),
            queuing.hand_size,
            format!("should not be greater than queues ({})", queuing.queues),
        ));
    } else {
        let bits = required_entropy_bits(queuing.queues as usize, queuing.hand_size as usize);
        if bits > MAX_HASH_BITS {
            errs.push(FieldError::invalid(
                path,
                queuing,
                format!(
                    "required entropy bits of deckSize {} and handSize {} should not be greater than {}",
                    queuing.queues, queuing.hand_size, MAX_HASH_BITS
                ),
            ));
        }
    }
    errs
}

fn validate_object_meta(meta: &ObjectMeta, path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();
    match meta.name.as_deref() {
        None | Some("") => errs.push(FieldError::required(
            &path.child("name"),
            "name or generateName is required",
        )),
        Some(name) => {
            if name.len() > names::OBJECT_NAME_MAX_LENGTH {
                errs.push(FieldError::too_long(
                    &path.child("name"),
                    names::OBJECT_NAME_MAX_LENGTH,
                ));
            }
            for msg in names::is_valid_path_segment_name(name) {
                errs.push(FieldError::invalid(&path.child("name"), name, msg));
            }
        }
    }
    if meta.namespace.as_deref().map_or(false, |ns| !ns.is_empty()) {
        errs.push(FieldError::forbidden(
            &path.child("namespace"),
            "not allowed on this type",
        ));
    }
    errs
}

fn validate_immutable_name(old: &ObjectMeta, new: &ObjectMeta) -> ErrorList {
    if old.name != new.name {
        vec![FieldError::invalid(
            &FieldPath::new("metadata").child("name"),
            new.name.as_deref().unwrap_or_default(),
            "field is immutable",
        )]
    } else {
        vec![]
    }
}

fn validate_conditions(conditions: &[Condition], path: &FieldPath) -> ErrorList {
    let mut errs = ErrorList::new();
    let mut seen = HashSet::new();
    for (i, condition) in conditions.iter().enumerate() {
        let type_path = path.index(i).child("type");
        if condition.type_.is_empty() {
            errs.push(FieldError::required(&type_path, "must not be empty"));
        } else if !seen.insert(condition.type_.as_str()) {
            errs.push(FieldError::invalid(
                &type_path,
                &condition.type_,
                "must not be repeated",
            ));
        }
    }
    errs
}

#[cfg(test)]
mod test {
    use super::*;

    fn flow_schema(rules: Vec<PolicyRulesWithSubjects>) -> FlowSchema {
        FlowSchema {
            metadata: named("system-nodes"),
            spec: FlowSchemaSpec {
                priority_level_configuration: PriorityLevelConfigurationReference {
                    name: "system".to_string(),
                },
                matching_precedence: 500,
                distinguisher_method: Some(FlowDistinguisherMethod {
                    type_: FlowDistinguisherMethodType::ByUser,
                }),
                rules,
            },
            ..Default::default()
        }
    }

    fn resource_rule(verbs: &[&str]) -> ResourcePolicyRule {
        ResourcePolicyRule {
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            api_groups: vec!["*".to_string()],
            resources: vec!["*".to_string()],
            cluster_scope: true,
            namespaces: vec!["*".to_string()],
        }
    }

    fn rules_with(resource_rules: Vec<ResourcePolicyRule>) -> Vec<PolicyRulesWithSubjects> {
        vec![PolicyRulesWithSubjects {
            subjects: vec![Subject::group("system:nodes")],
            resource_rules,
            non_resource_rules: vec![],
        }]
    }

    fn fields(errs: &ErrorList) -> Vec<&str> {
        errs.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn valid_flow_schema() {
        let fs = flow_schema(rules_with(vec![resource_rule(&["get", "list"])]));
        assert!(validate_flow_schema(&fs).is_empty());
    }

    #[test]
    fn wildcard_verb_must_stand_alone() {
        let fs = flow_schema(rules_with(vec![
            resource_rule(&["get"]),
            resource_rule(&["*", "get"]),
        ]));
        let errs = validate_flow_schema(&fs);
        assert_eq!(fields(&errs), vec!["spec.rules[0].resourceRules[1].verbs"]);
        assert_eq!(errs[0].error_type, ErrorType::Invalid);
        assert_eq!(
            errs[0].detail,
            "if '*' is present, must not specify other verbs"
        );
    }

    #[test]
    fn unknown_verbs_are_not_supported() {
        let fs = flow_schema(rules_with(vec![resource_rule(&["get", "steal"])]));
        let errs = validate_flow_schema(&fs);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].error_type, ErrorType::NotSupported);
    }

    #[test]
    fn every_spec_violation_is_reported() {
        let mut fs = flow_schema(vec![PolicyRulesWithSubjects::default()]);
        fs.spec.matching_precedence = 0;
        fs.spec.priority_level_configuration.name = String::new();
        fs.spec.distinguisher_method = Some(FlowDistinguisherMethod {
            type_: "ByColor".into(),
        });
        let errs = validate_flow_schema(&fs);
        assert_eq!(
            fields(&errs),
            vec![
                "spec.matchingPrecedence",
                "spec.distinguisherMethod.type",
                "spec.priorityLevelConfiguration.name",
                "spec.rules[0].subjects",
                "spec.rules[0]",
            ]
        );
    }

    #[test]
    fn matching_precedence_is_bounded() {
        let mut fs = flow_schema(rules_with(vec![resource_rule(&["*"])]));
        fs.spec.matching_precedence = 10_001;
        let errs = validate_flow_schema(&fs);
        assert_eq!(fields(&errs), vec!["spec.matchingPrecedence"]);
    }

    #[test]
    fn subjects_are_checked_per_kind() {
        let mut mixed = Subject::user("alice");
        mixed.group = Some(GroupSubject {
            name: "admins".to_string(),
        });
        let rules = vec![PolicyRulesWithSubjects {
            subjects: vec![
                mixed,
                Subject::service_account("", "*"),
                Subject::service_account("kube-system", "Bad_Name"),
                Subject {
                    kind: SubjectKind::Group,
                    ..Default::default()
                },
                Subject {
                    kind: "Robot".into(),
                    ..Default::default()
                },
            ],
            resource_rules: vec![resource_rule(&["*"])],
            non_resource_rules: vec![],
        }];
        let errs = validate_flow_schema(&flow_schema(rules));
        assert_eq!(
            fields(&errs),
            vec![
                "spec.rules[0].subjects[0].group",
                "spec.rules[0].subjects[1].serviceAccount.namespace",
                "spec.rules[0].subjects[2].serviceAccount.name",
                "spec.rules[0].subjects[3].group",
                "spec.rules[0].subjects[4].kind",
            ]
        );
    }

    #[test]
    fn namespaced_rules_need_namespaces() {
        let mut rule = resource_rule(&["get"]);
        rule.cluster_scope = false;
        rule.namespaces = vec![];
        let errs = validate_flow_schema(&flow_schema(rules_with(vec![rule.clone()])));
        assert_eq!(fields(&errs), vec!["spec.rules[0].resourceRules[0].namespaces"]);

        rule.namespaces = vec!["default".to_string(), "Kube_System".to_string()];
        let errs = validate_flow_schema(&flow_schema(rules_with(vec![rule])));
        assert_eq!(
            fields(&errs),
            vec!["spec.rules[0].resourceRules[0].namespaces[1]"]
        );
    }

    #[test]
    fn wildcards_must_stand_alone_in_every_list() {
        let rule = ResourcePolicyRule {
            verbs: vec!["get".to_string()],
            api_groups: vec!["*".to_string(), "apps".to_string()],
            resources: vec!["pods".to_string(), "*".to_string()],
            cluster_scope: false,
            namespaces: vec!["*".to_string(), "default".to_string()],
        };
        let errs = validate_flow_schema(&flow_schema(rules_with(vec![rule])));
        assert_eq!(
            fields(&errs),
            vec![
                "spec.rules[0].resourceRules[0].apiGroups",
                "spec.rules[0].resourceRules[0].resources",
                "spec.rules[0].resourceRules[0].namespaces",
            ]
        );
    }

    #[test]
    fn non_resource_urls() {
        let rule = |urls: &[&str]| PolicyRulesWithSubjects {
            subjects: vec![Subject::user("*")],
            resource_rules: vec![],
            non_resource_rules: vec![NonResourcePolicyRule {
                verbs: vec!["get".to_string()],
                non_resource_urls: urls.iter().map(|s| s.to_string()).collect(),
            }],
        };

        let valid: [&[&str]; 3] = [&["*"], &["/"], &["/healthz", "/metrics/*"]];
        for urls in valid {
            assert!(validate_flow_schema(&flow_schema(vec![rule(urls)])).is_empty());
        }

        let errs = validate_flow_schema(&flow_schema(vec![rule(&["*", "/healthz"])]));
        assert_eq!(
            fields(&errs),
            vec!["spec.rules[0].nonResourceRules[0].nonResourceURLs"]
        );

        let errs = validate_flow_schema(&flow_schema(vec![rule(&[
            "healthz", "/a b", "/a//b", "/a*", "/*/b/*", "",
        ])]));
        let details: Vec<&str> = errs.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            details,
            vec![
                "must start with slash",
                "must not contain white-space",
                "must not contain double slash",
                "wildcard can only do suffix glob matching",
                "wildcard can only do suffix glob matching",
                "must not be empty",
            ]
        );
    }

    #[test]
    fn suggested_system_level_is_valid() {
        let pl = PriorityLevelConfiguration::queuing(
            "system",
            30,
            QueuingConfiguration {
                queues: 128,
                hand_size: 6,
                queue_length_limit: 100,
            },
        );
        assert!(validate_priority_level_configuration(&pl).is_empty());
    }

    #[test]
    fn hand_larger_than_deck_is_rejected() {
        let pl = PriorityLevelConfiguration::queuing(
            "workload",
            10,
            QueuingConfiguration {
                queues: 4,
                hand_size: 5,
                queue_length_limit: 10,
            },
        );
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(
            fields(&errs),
            vec!["spec.limited.limitResponse.queuing.handSize"]
        );
    }

    #[test]
    fn excess_entropy_is_rejected_on_queuing() {
        let pl = PriorityLevelConfiguration::queuing(
            "workload",
            10,
            QueuingConfiguration {
                queues: 10_000_000,
                hand_size: 8,
                queue_length_limit: 10,
            },
        );
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["spec.limited.limitResponse.queuing"]);
        assert!(errs[0].detail.contains("should not be greater than 60"));
    }

    #[test]
    fn queue_parameters_must_be_positive_and_bounded() {
        let pl = PriorityLevelConfiguration::queuing(
            "workload",
            0,
            QueuingConfiguration {
                queues: 10_000_001,
                hand_size: 0,
                queue_length_limit: 0,
            },
        );
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(
            fields(&errs),
            vec![
                "spec.limited.assuredConcurrencyShares",
                "spec.limited.limitResponse.queuing.queueLengthLimit",
                "spec.limited.limitResponse.queuing.queues",
                "spec.limited.limitResponse.queuing.handSize",
            ]
        );
    }

    #[test]
    fn limit_response_shape_follows_type() {
        let mut pl = PriorityLevelConfiguration::rejecting("workload", 10);
        assert!(validate_priority_level_configuration(&pl).is_empty());

        if let Some(limited) = pl.spec.limited.as_mut() {
            limited.limit_response.queuing = Some(QueuingConfiguration::default());
        }
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["spec.limited.limitResponse.queuing"]);
        assert_eq!(errs[0].error_type, ErrorType::Forbidden);

        if let Some(limited) = pl.spec.limited.as_mut() {
            limited.limit_response.type_ = LimitResponseType::Queue;
            limited.limit_response.queuing = None;
        }
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(errs[0].error_type, ErrorType::Required);
    }

    #[test]
    fn long_names_are_too_long() {
        let pl = PriorityLevelConfiguration::rejecting(&"a".repeat(254), 10);
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["metadata.name"]);
        assert_eq!(errs[0].error_type, ErrorType::TooLong);
        assert_eq!(errs[0].detail, "must have at most 253 bytes");

        let pl = PriorityLevelConfiguration::rejecting(&"a".repeat(253), 10);
        assert!(validate_priority_level_configuration(&pl).is_empty());
    }

    #[test]
    fn exempt_type_is_reserved_for_exempt_name() {
        assert!(
            validate_priority_level_configuration(&PriorityLevelConfiguration::exempt("exempt"))
                .is_empty()
        );

        let errs =
            validate_priority_level_configuration(&PriorityLevelConfiguration::exempt("other"));
        assert_eq!(fields(&errs), vec!["spec.type"]);

        let errs = validate_priority_level_configuration(&PriorityLevelConfiguration::rejecting(
            "exempt", 10,
        ));
        assert_eq!(fields(&errs), vec!["spec.type"]);

        let mut pl = PriorityLevelConfiguration::exempt("exempt");
        pl.spec.limited = Some(LimitedPriorityLevelConfiguration::default());
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["spec.limited"]);
    }

    #[test]
    fn metadata_is_checked() {
        let mut pl = PriorityLevelConfiguration::rejecting("a/b", 10);
        pl.metadata.namespace = Some("default".to_string());
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["metadata.name", "metadata.namespace"]);

        pl.metadata.name = None;
        pl.metadata.namespace = None;
        let errs = validate_priority_level_configuration(&pl);
        assert_eq!(fields(&errs), vec!["metadata.name"]);
        assert_eq!(errs[0].error_type, ErrorType::Required);
    }

    #[test]
    fn updates_keep_the_name() {
        let old = PriorityLevelConfiguration::rejecting("workload", 10);
        let renamed = PriorityLevelConfiguration::rejecting("other", 10);
        let errs = validate_priority_level_configuration_update(&old, &renamed);
        assert_eq!(errs[0].detail, "field is immutable");
        assert!(validate_priority_level_configuration_update(&old, &old).is_empty());
    }

    #[test]
    fn condition_types_are_required_and_unique() {
        let status = FlowSchemaStatus {
            conditions: vec![
                Condition {
                    type_: "Dangling".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                },
                Condition::default(),
                Condition {
                    type_: "Dangling".to_string(),
                    ..Default::default()
                },
            ],
        };
        let errs = validate_flow_schema_status(&status);
        assert_eq!(
            fields(&errs),
            vec!["status.conditions[1].type", "status.conditions[2].type"]
        );
    }
}
