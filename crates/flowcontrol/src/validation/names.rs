//! Kubernetes object name rules.

use lazy_static::lazy_static;
use regex::Regex;

const DNS1123_LABEL_MAX_LENGTH: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

/// Longest `metadata.name` accepted for flow-control objects.
pub const OBJECT_NAME_MAX_LENGTH: usize = DNS1123_SUBDOMAIN_MAX_LENGTH;

lazy_static! {
    static ref DNS1123_LABEL: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("hardcoded regex is valid");
    static ref DNS1123_SUBDOMAIN: Regex = Regex::new(
        r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$"
    )
    .expect("hardcoded regex is valid");
}

/// Messages describing why `value` is not a DNS-1123 label. Empty when
/// valid.
pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_LABEL_MAX_LENGTH
        ));
    }
    if !DNS1123_LABEL.is_match(value) {
        errs.push(
            "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

/// Messages describing why `value` is not a DNS-1123 subdomain. Empty when
/// valid.
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LENGTH
        ));
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        errs.push(
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, \
             '-' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

/// Messages describing why `name` cannot be used as a single URL path
/// segment. Empty when valid.
pub fn is_valid_path_segment_name(name: &str) -> Vec<String> {
    if name == "." || name == ".." {
        return vec![format!("may not be '{}'", name)];
    }
    let mut errs = Vec::new();
    for illegal in &["/", "%"] {
        if name.contains(illegal) {
            errs.push(format!("may not contain '{}'", illegal));
        }
    }
    errs
}
