//! Row types for every aggregated entity kind, and the decoration added to
//! each row once it leaves its source.
//!
//! Row fields serialize with their column names. Decorations are prefixed
//! with an underscore so they can never collide with a column: `_id`,
//! `_sourceDb`, `_sourceAlias`, composite ids of foreign references, and
//! `_parsed*` lists decoded from JSON text columns.

mod commit;
mod feature;
mod feature_error;
mod handoff;
mod memory;
mod project;
mod quality;
mod session;

pub use self::commit::{Commit, CommitDecoration, CommitFilters};
pub use self::feature::{Feature, FeatureDecoration, FeatureFilters};
pub use self::feature_error::{FeatureError, FeatureErrorDecoration, FeatureErrorFilters};
pub use self::handoff::{Handoff, HandoffDecoration, HandoffFilters};
pub use self::memory::{Memory, MemoryDecoration, MemoryFilters};
pub use self::project::{Project, ProjectDecoration, ProjectFilters};
pub use self::quality::{QualityFilters, QualityReflection, QualityReflectionDecoration};
pub use self::session::{Session, SessionDecoration, SessionFilters};

use crate::id::CompositeId;
use serde::Serialize;
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;
use station_source::Connection;
use std::fmt::Debug;
use std::ops::Deref;
use std::path::PathBuf;

/// A table that can be listed across sources.
pub trait Entity:
    for<'r> FromRow<'r, SqliteRow> + Serialize + Clone + Debug + PartialEq + Send + Sync + Unpin + 'static
{
    const TABLE: &'static str;
    /// `ORDER BY` clause applied within each source.
    const ORDER_BY: &'static str;

    type Decoration: Serialize + Clone + Debug + PartialEq + Send + Sync + 'static;

    fn local_id(&self) -> &str;

    fn decorate(&self, alias: &str) -> Self::Decoration;
}

/// A row from one source, decorated with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregated<T: Entity> {
    #[serde(flatten)]
    pub row: T,
    #[serde(rename = "_id")]
    pub id: CompositeId,
    #[serde(flatten)]
    pub decoration: T::Decoration,
    #[serde(rename = "_sourceDb")]
    pub source_db: PathBuf,
    #[serde(rename = "_sourceAlias")]
    pub source_alias: String,
}

impl<T: Entity> Aggregated<T> {
    pub fn new(row: T, connection: &Connection) -> Self {
        let alias = connection.alias();
        Self {
            id: CompositeId::new(alias, row.local_id()),
            decoration: row.decorate(alias),
            source_db: connection.path().to_path_buf(),
            source_alias: alias.to_string(),
            row,
        }
    }
}

impl<T: Entity> Deref for Aggregated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.row
    }
}

/// Decode a JSON list stored in a text column.
///
/// Anything that is not a JSON array decodes to an empty list. String
/// elements are taken as-is; other elements keep their JSON text.
pub fn decode_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(values) => values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Undecodable list column, treating as empty");
            Vec::new()
        },
    }
}

/// Composite id for an optional foreign reference.
pub(crate) fn reference(alias: &str, local: Option<&str>) -> Option<CompositeId> {
    local.map(|local| CompositeId::new(alias, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, &[])]
    #[case(Some(""), &[])]
    #[case(Some(r#"["a","b"]"#), &["a", "b"])]
    #[case(Some(r#"[1, {"k":"v"}]"#), &["1", r#"{"k":"v"}"#])]
    #[case(Some("not json"), &[])]
    #[case(Some(r#"{"not":"a list"}"#), &[])]
    fn test_decode_list(#[case] raw: Option<&str>, #[case] expected: &[&str]) {
        assert_eq!(decode_list(raw), expected);
    }

    #[test]
    fn test_aggregated_serialization_shape() {
        let project = Aggregated {
            row: Project {
                id: "p1".to_string(),
                name: "Selectus".to_string(),
                project_type: "web".to_string(),
                workspace_path: None,
                depends_on: Some(r#"["p0"]"#.to_string()),
                ready_threshold: 30,
                created_at: Some(1_700_000_000),
            },
            id: CompositeId::new("app", "p1"),
            decoration: ProjectDecoration {
                display_name: "Selectus (app)".to_string(),
                parsed_depends_on: vec!["p0".to_string()],
            },
            source_db: PathBuf::from("/work/app/.conductor/conductor.db"),
            source_alias: "app".to_string(),
        };
        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["project_type"], "web");
        assert_eq!(json["_id"], "app:p1");
        assert_eq!(json["_displayName"], "Selectus (app)");
        assert_eq!(json["_parsedDependsOn"][0], "p0");
        assert_eq!(json["_sourceDb"], "/work/app/.conductor/conductor.db");
        assert_eq!(json["_sourceAlias"], "app");
    }
}
