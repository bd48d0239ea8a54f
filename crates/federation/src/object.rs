//! Keys identifying namespaced objects.

use std::fmt;
use std::str::FromStr;

use kube::ResourceExt;

/// The `namespace/name` key of an object. Cluster-scoped objects have an
/// empty namespace and render as just `name`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NamespacedName {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object.
    pub name: String,
}

impl NamespacedName {
    /// Builds a key from its parts.
    pub fn new(namespace: &str, name: &str) -> Self {
        NamespacedName {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// The key of a Kubernetes object.
    pub fn of<R: kube::Resource>(object: &R) -> Self {
        NamespacedName {
            namespace: object.namespace().unwrap_or_default(),
            name: object.name(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A key that is not of the form `name` or `namespace/name`.
#[derive(Debug, thiserror::Error)]
#[error("unexpected key format: {0:?}")]
pub struct InvalidKey(String);

impl FromStr for NamespacedName {
    type Err = InvalidKey;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(NamespacedName::new("", name)),
            [namespace, name] if !name.is_empty() => Ok(NamespacedName::new(namespace, name)),
            _ => Err(InvalidKey(key.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn keys_round_trip_through_strings() {
        let key = NamespacedName::new("default", "db-password");
        assert_eq!(key.to_string(), "default/db-password");
        assert_eq!("default/db-password".parse::<NamespacedName>().unwrap(), key);
        assert_eq!(
            "cluster-wide".parse::<NamespacedName>().unwrap(),
            NamespacedName::new("", "cluster-wide")
        );
        assert!("a/b/c".parse::<NamespacedName>().is_err());
        assert!("default/".parse::<NamespacedName>().is_err());
    }

    #[test]
    fn key_of_object() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("token".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(NamespacedName::of(&secret).to_string(), "kube-system/token");
    }
}
