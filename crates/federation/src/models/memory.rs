use crate::filters::Filters;
use crate::id::CompositeId;
use crate::models::{Aggregated, Entity, decode_list, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Memory {
    pub id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub content: String,
    /// JSON list of tags.
    pub tags: Option<String>,
    pub created_at: Option<i64>,
    pub last_accessed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryDecoration {
    #[serde(rename = "_projectId")]
    pub project_id: Option<CompositeId>,
    #[serde(rename = "_parsedTags")]
    pub parsed_tags: Vec<String>,
}

impl Entity for Memory {
    const TABLE: &'static str = "memories";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = MemoryDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> MemoryDecoration {
        MemoryDecoration {
            project_id: reference(alias, self.project_id.as_deref()),
            parsed_tags: decode_list(self.tags.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    /// Keep memories carrying at least one of these tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Applied per source before tag filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for MemoryFilters {
    type Entity = Memory;

    const OPERATION: &'static str = "memories";

    fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    fn parent_ids(&self) -> Vec<&CompositeId> {
        self.project_id.iter().collect()
    }

    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(project) = &self.project_id {
            query.push(" AND project_id = ").push_bind(project.local().to_string());
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }

    fn retain(&self, row: &Aggregated<Memory>) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|tag| row.decoration.parsed_tags.contains(tag))
    }
}
