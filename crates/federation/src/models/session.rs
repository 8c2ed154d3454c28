use crate::filters::{Filters, SessionStatus};
use crate::id::CompositeId;
use crate::models::{Entity, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Session {
    pub id: String,
    pub project_id: Option<String>,
    pub session_number: i64,
    pub status: String,
    pub is_initializer: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub progress_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDecoration {
    #[serde(rename = "_projectId")]
    pub project_id: Option<CompositeId>,
}

impl Entity for Session {
    const TABLE: &'static str = "sessions";
    const ORDER_BY: &'static str = "started_at DESC";

    type Decoration = SessionDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> SessionDecoration {
        SessionDecoration {
            project_id: reference(alias, self.project_id.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for SessionFilters {
    type Entity = Session;

    const OPERATION: &'static str = "sessions";

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
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }
}
