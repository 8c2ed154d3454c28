use crate::filters::{Filters, ReflectionType};
use crate::id::CompositeId;
use crate::models::{Entity, decode_list, reference};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// A self-assessment recorded when a feature, session or handoff completes.
/// Each list column is JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct QualityReflection {
    pub id: String,
    pub project_id: Option<String>,
    pub feature_id: Option<String>,
    pub session_id: Option<String>,
    pub handoff_id: Option<String>,
    pub reflection_type: String,
    pub shortcuts_taken: Option<String>,
    pub tests_skipped: Option<String>,
    pub tests_removed: Option<String>,
    pub known_limitations: Option<String>,
    pub deferred_work: Option<String>,
    pub technical_debt: Option<String>,
    pub resolved: Option<i64>,
    pub resolved_at: Option<i64>,
    pub resolved_notes: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReflectionDecoration {
    #[serde(rename = "_projectId")]
    pub project_id: Option<CompositeId>,
    #[serde(rename = "_featureId")]
    pub feature_id: Option<CompositeId>,
    #[serde(rename = "_sessionId")]
    pub session_id: Option<CompositeId>,
    #[serde(rename = "_handoffId")]
    pub handoff_id: Option<CompositeId>,
    #[serde(rename = "_parsedShortcutsTaken")]
    pub parsed_shortcuts_taken: Vec<String>,
    #[serde(rename = "_parsedTestsSkipped")]
    pub parsed_tests_skipped: Vec<String>,
    #[serde(rename = "_parsedTestsRemoved")]
    pub parsed_tests_removed: Vec<String>,
    #[serde(rename = "_parsedKnownLimitations")]
    pub parsed_known_limitations: Vec<String>,
    #[serde(rename = "_parsedDeferredWork")]
    pub parsed_deferred_work: Vec<String>,
    #[serde(rename = "_parsedTechnicalDebt")]
    pub parsed_technical_debt: Vec<String>,
}

impl Entity for QualityReflection {
    const TABLE: &'static str = "quality_reflections";
    const ORDER_BY: &'static str = "created_at DESC";

    type Decoration = QualityReflectionDecoration;

    fn local_id(&self) -> &str {
        &self.id
    }

    fn decorate(&self, alias: &str) -> QualityReflectionDecoration {
        QualityReflectionDecoration {
            project_id: reference(alias, self.project_id.as_deref()),
            feature_id: reference(alias, self.feature_id.as_deref()),
            session_id: reference(alias, self.session_id.as_deref()),
            handoff_id: reference(alias, self.handoff_id.as_deref()),
            parsed_shortcuts_taken: decode_list(self.shortcuts_taken.as_deref()),
            parsed_tests_skipped: decode_list(self.tests_skipped.as_deref()),
            parsed_tests_removed: decode_list(self.tests_removed.as_deref()),
            parsed_known_limitations: decode_list(self.known_limitations.as_deref()),
            parsed_deferred_work: decode_list(self.deferred_work.as_deref()),
            parsed_technical_debt: decode_list(self.technical_debt.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<CompositeId>,
    /// Unresolved reflections only, unless set.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_type: Option<ReflectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Filters for QualityFilters {
    type Entity = QualityReflection;

    const OPERATION: &'static str = "quality";

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
        if !self.include_resolved {
            query.push(" AND COALESCE(resolved, 0) = 0");
        }
        if let Some(reflection_type) = self.reflection_type {
            query.push(" AND reflection_type = ").push_bind(reflection_type.as_str());
        }
    }

    fn limit(&self) -> Option<u32> {
        self.limit
    }
}
