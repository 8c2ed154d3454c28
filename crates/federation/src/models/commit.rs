use crate::filters::Filters;
use crate::id::CompositeId;
use crate::models::{Entity, decode_list, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Commit {
    pub id: String,
    pub feature_id: Option<String>,
    pub session_id: Option<String>,
    pub commit_hash: String,
    pub message: Option<String>,
    pub files_changed: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitDecoration {
    #[serde(rename = "_featureId")]
    pub feature_id: Option<CompositeId>,
    #[serde(rename = "_sessionId")]
    pub session_id: Option<CompositeId>,
    #[serde(rename = "_parsedFilesChanged")]
    pub parsed_files_changed: Vec<String>,
}

impl Entity for Commit {
    const TABLE: &'static str = "commits";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = CommitDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> CommitDecoration {
        CommitDecoration {
            feature_id: reference(alias, self.feature_id.as_deref()),
            session_id: reference(alias, self.session_id.as_deref()),
            parsed_files_changed: decode_list(self.files_changed.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    /// Commits made during any session of this project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for CommitFilters {
    type Entity = Commit;

    const OPERATION: &'static str = "commits";

    fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    fn parent_ids(&self) -> Vec<&CompositeId> {
        self.project_id.iter().chain(&self.session_id).chain(&self.feature_id).collect()
    }

    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(project) = &self.project_id {
            query
                .push(" AND session_id IN (SELECT id FROM sessions WHERE project_id = ")
                .push_bind(project.local().to_string())
                .push(")");
        }
        if let Some(session) = &self.session_id {
            query.push(" AND session_id = ").push_bind(session.local().to_string());
        }
        if let Some(feature) = &self.feature_id {
            query.push(" AND feature_id = ").push_bind(feature.local().to_string());
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }
}
