use crate::filters::{Filters, like_pattern};
use crate::models::{Entity, decode_list};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub project_type: String,
    pub workspace_path: Option<String>,
    /// JSON list of project ids.
    pub depends_on: Option<String>,
    pub ready_threshold: i64,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDecoration {
    /// `name (alias)`, unambiguous across sources.
    #[serde(rename = "_displayName")]
    pub display_name: String,
    #[serde(rename = "_parsedDependsOn")]
    pub parsed_depends_on: Vec<String>,
}

impl Entity for Project {
    const TABLE: &'static str = "projects";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = ProjectDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> ProjectDecoration {
        ProjectDecoration {
            display_name: format!("{} ({alias})", self.name),
            parsed_depends_on: decode_list(self.depends_on.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    /// Substring of the project name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl Filters for ProjectFilters {
    type Entity = Project;

    const OPERATION: &'static str = "projects";

    fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(project_type) = &self.project_type {
            query.push(" AND project_type = ").push_bind(project_type.clone());
        }
        if let Some(search) = &self.search {
            query.push(" AND name LIKE ").push_bind(like_pattern(search)).push(" ESCAPE '\\'");
        }
    }
}
