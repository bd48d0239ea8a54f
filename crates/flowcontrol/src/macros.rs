//! Macro for defining string-backed API enumerations.

/// Defines an enumeration that is serialized as a plain string.
///
/// Values outside the known set are kept verbatim in an `Unknown` variant so
/// validation can report exactly what was submitted instead of failing at
/// decode time.
macro_rules! string_enum {
    (
       $(#[$meta:meta])*
       $name:ident {
           $(
               $(#[$variant_meta:meta])*
               $variant:ident => $value:literal
           ),+ $(,)?
       }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )+
            /// A value this version does not recognize.
            Unknown(String),
        }

        impl $name {
            /// Every value this version recognizes.
            pub const SUPPORTED: &'static [&'static str] = &[$($value),+];

            /// The wire representation of this value.
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $value,)+
                    $name::Unknown(other) => other.as_str(),
                }
            }

            /// Whether this is one of the recognized values.
            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Unknown(_))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::Unknown(String::new())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($value => $name::$variant,)+
                    _ => $name::Unknown(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
