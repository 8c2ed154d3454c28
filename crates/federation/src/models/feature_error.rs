use crate::filters::{ErrorType, Filters};
use crate::id::CompositeId;
use crate::models::{Entity, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct FeatureError {
    pub id: String,
    pub feature_id: Option<String>,
    pub session_id: Option<String>,
    pub error: String,
    pub error_type: String,
    pub stack_trace: Option<String>,
    pub attempt_number: i64,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureErrorDecoration {
    #[serde(rename = "_featureId")]
    pub feature_id: Option<CompositeId>,
    #[serde(rename = "_sessionId")]
    pub session_id: Option<CompositeId>,
}

impl Entity for FeatureError {
    const TABLE: &'static str = "feature_errors";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = FeatureErrorDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> FeatureErrorDecoration {
        FeatureErrorDecoration {
            feature_id: reference(alias, self.feature_id.as_deref()),
            session_id: reference(alias, self.session_id.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureErrorFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    /// Errors raised by any feature of this project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for FeatureErrorFilters {
    type Entity = FeatureError;

    const OPERATION: &'static str = "feature_errors";

    fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    fn parent_ids(&self) -> Vec<&CompositeId> {
        self.project_id.iter().chain(&self.session_id).chain(&self.feature_id).collect()
    }

    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(project) = &self.project_id {
            query
                .push(" AND feature_id IN (SELECT id FROM features WHERE project_id = ")
                .push_bind(project.local().to_string())
                .push(")");
        }
        if let Some(session) = &self.session_id {
            query.push(" AND session_id = ").push_bind(session.local().to_string());
        }
        if let Some(feature) = &self.feature_id {
            query.push(" AND feature_id = ").push_bind(feature.local().to_string());
        }
        if let Some(error_type) = self.error_type {
            query.push(" AND error_type = ").push_bind(error_type.as_str());
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }
}
