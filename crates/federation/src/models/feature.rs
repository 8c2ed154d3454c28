use crate::filters::{FeatureStatus, Filters, like_pattern};
use crate::id::CompositeId;
use crate::models::{Entity, decode_list, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Feature {
    pub id: String,
    pub project_id: Option<String>,
    pub category: String,
    pub phase: i64,
    pub description: String,
    /// JSON list of step descriptions.
    pub steps: Option<String>,
    /// JSON list of feature ids.
    pub depends_on: Option<String>,
    pub status: String,
    pub priority: i64,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub updated_at: Option<i64>,
    pub session_id: Option<String>,
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureDecoration {
    #[serde(rename = "_projectId")]
    pub project_id: Option<CompositeId>,
    #[serde(rename = "_sessionId")]
    pub session_id: Option<CompositeId>,
    #[serde(rename = "_parsedSteps")]
    pub parsed_steps: Vec<String>,
    #[serde(rename = "_parsedDependsOn")]
    pub parsed_depends_on: Vec<String>,
}

impl Entity for Feature {
    const TABLE: &'static str = "features";
    const ORDER_BY: &'static str = "phase ASC, priority DESC, updated_at DESC";

    type Decoration = FeatureDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> FeatureDecoration {
        FeatureDecoration {
            project_id: reference(alias, self.project_id.as_deref()),
            session_id: reference(alias, self.session_id.as_deref()),
            parsed_steps: decode_list(self.steps.as_deref()),
            parsed_depends_on: decode_list(self.depends_on.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FeatureStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Substring of the description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl Filters for FeatureFilters {
    type Entity = Feature;

    const OPERATION: &'static str = "features";

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
        if let Some(status) = self.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(phase) = self.phase {
            query.push(" AND phase = ").push_bind(phase);
        }
        if let Some(category) = &self.category {
            query.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(search) = &self.search {
            query.push(" AND description LIKE ").push_bind(like_pattern(search)).push(" ESCAPE '\\'");
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }

    fn offset(&self) -> Option<u32> {
        self.offset
    }
}
