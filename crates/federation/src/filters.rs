//! Per-kind filter records.
//!
//! Each listing operation takes one of these. Every field is optional, and
//! only supplied fields become predicates. Unknown keys in a deserialized
//! filter object are ignored.

use crate::error::{Error, ErrorKind};
use crate::id::CompositeId;
use crate::models::{Aggregated, Entity};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};

/// What a listing operation needs to know about its filter record.
pub trait Filters: Serialize + Send + Sync {
    type Entity: Entity;

    /// Operation name, used as the cache key prefix.
    const OPERATION: &'static str;

    /// Explicit source scope.
    fn source_alias(&self) -> Option<&str> {
        None
    }

    /// Composite parent ids. The alias part of each one also scopes the query.
    fn parent_ids(&self) -> Vec<&CompositeId> {
        Vec::new()
    }

    /// Append `AND ...` predicates for every supplied filter.
    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>);

    fn limit(&self) -> Option<u32> {
        None
    }

    fn offset(&self) -> Option<u32> {
        None
    }

    /// Post-decode filtering, for predicates SQL cannot express.
    fn retain(&self, _row: &Aggregated<Self::Entity>) -> bool {
        true
    }
}

/// A `LIKE` pattern matching `needle` anywhere, with wildcards in the needle
/// itself escaped. Use with `ESCAPE '\'`.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// A closed set of string values stored as text in a source, like a status.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => exn::bail!(ErrorKind::InvalidFilter(s.to_string())),
                }
            }
        }
    };
}

text_enum! {
    SessionStatus {
        Pending => "pending",
        Active => "active",
        Completed => "completed",
    }
}

text_enum! {
    FeatureStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Passed => "passed",
        Failed => "failed",
        Blocked => "blocked",
    }
}

text_enum! {
    ErrorType {
        TestFailure => "test_failure",
        BuildError => "build_error",
        RuntimeError => "runtime_error",
        Blocked => "blocked",
        Other => "other",
    }
}

text_enum! {
    ReflectionType {
        FeatureComplete => "feature_complete",
        SessionComplete => "session_complete",
        Handoff => "handoff",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("auth", "%auth%")]
    #[case("100%", "%100\\%%")]
    #[case("snake_case", "%snake\\_case%")]
    #[case("back\\slash", "%back\\\\slash%")]
    fn test_like_pattern(#[case] needle: &str, #[case] expected: &str) {
        assert_eq!(like_pattern(needle), expected);
    }

    #[test]
    fn test_text_enum_round_trip() {
        assert_eq!("in_progress".parse::<FeatureStatus>().unwrap(), FeatureStatus::InProgress);
        assert_eq!(FeatureStatus::InProgress.to_string(), "in_progress");
        assert_eq!(serde_json::to_string(&ErrorType::BuildError).unwrap(), r#""build_error""#);
        let err = "done".parse::<SessionStatus>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidFilter(value) if value == "done"));
    }
}
