use crate::filters::Filters;
use crate::id::CompositeId;
use crate::models::{Entity, decode_list, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Handoff {
    pub id: String,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub current_task: Option<String>,
    pub next_steps: Option<String>,
    pub blockers: Option<String>,
    pub files_modified: Option<String>,
    pub git_commit: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffDecoration {
    #[serde(rename = "_projectId")]
    pub project_id: Option<CompositeId>,
    #[serde(rename = "_sessionId")]
    pub session_id: Option<CompositeId>,
    #[serde(rename = "_parsedNextSteps")]
    pub parsed_next_steps: Vec<String>,
    #[serde(rename = "_parsedBlockers")]
    pub parsed_blockers: Vec<String>,
    #[serde(rename = "_parsedFilesModified")]
    pub parsed_files_modified: Vec<String>,
}

impl Entity for Handoff {
    const TABLE: &'static str = "handoffs";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = HandoffDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> HandoffDecoration {
        HandoffDecoration {
            project_id: reference(alias, self.project_id.as_deref()),
            session_id: reference(alias, self.session_id.as_deref()),
            parsed_next_steps: decode_list(self.next_steps.as_deref()),
            parsed_blockers: decode_list(self.blockers.as_deref()),
            parsed_files_modified: decode_list(self.files_modified.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<CompositeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for HandoffFilters {
    type Entity = Handoff;

    const OPERATION: &'static str = "handoffs";

    fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    fn parent_ids(&self) -> Vec<&CompositeId> {
        self.project_id.iter().chain(&self.session_id).collect()
    }

    fn push_predicates(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(project) = &self.project_id {
            query.push(" AND project_id = ").push_bind(project.local().to_string());
        }
        if let Some(session) = &self.session_id {
            query.push(" AND session_id = ").push_bind(session.local().to_string());
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }
}
