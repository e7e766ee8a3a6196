use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;

use crate::{
    application::repos::{NodesRepo, RandomNodeQuery, RepoError},
    domain::draw::FilterValue,
    domain::entities::NodeRecord,
    domain::types::NodeId,
};

use super::{PostgresRepositories, map_sqlx_error};

const SOURCE: &str = "infra::db::nodes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Text,
    Bool,
}

/// Node properties a draw may filter on, with their column and type.
const FILTERABLE_COLUMNS: &[(&str, &str, ColumnKind)] = &[
    ("status", "d.status", ColumnKind::Int),
    ("langcode", "d.langcode", ColumnKind::Text),
    ("promote", "d.promote", ColumnKind::Bool),
    ("sticky", "d.sticky", ColumnKind::Bool),
    ("uid", "d.uid", ColumnKind::Int),
    ("title", "d.title", ColumnKind::Text),
    ("type", "d.type", ColumnKind::Text),
];

#[derive(sqlx::FromRow)]
struct NodeRow {
    nid: i64,
    bundle: String,
    langcode: String,
    title: String,
    status: i16,
    promote: bool,
    sticky: bool,
    uid: i64,
    summary: String,
    created: i64,
    changed: i64,
}

impl From<NodeRow> for NodeRecord {
    fn from(row: NodeRow) -> Self {
        Self {
            nid: NodeId(row.nid),
            bundle: row.bundle,
            langcode: row.langcode,
            title: row.title,
            status: row.status,
            promote: row.promote,
            sticky: row.sticky,
            uid: row.uid,
            summary: row.summary,
            created: row.created,
            changed: row.changed,
        }
    }
}

impl PostgresRepositories {
    fn push_filter<'q>(
        qb: &mut QueryBuilder<'q, Postgres>,
        property: &str,
        value: &FilterValue,
    ) -> Result<(), RepoError> {
        let (_, column, kind) = FILTERABLE_COLUMNS
            .iter()
            .find(|(name, _, _)| *name == property)
            .ok_or_else(|| RepoError::invalid_input(format!("unknown node property `{property}`")))?;

        qb.push(" AND ");
        qb.push(*column);
        qb.push(" = ");
        match (kind, value) {
            (ColumnKind::Int, FilterValue::Int(value)) => {
                qb.push_bind(*value);
            }
            (ColumnKind::Bool, FilterValue::Bool(value)) => {
                qb.push_bind(*value);
            }
            (ColumnKind::Bool, FilterValue::Int(value)) if matches!(*value, 0 | 1) => {
                qb.push_bind(*value == 1);
            }
            (ColumnKind::Text, FilterValue::Text(value)) => {
                qb.push_bind(value.clone());
            }
            (_, value) => {
                return Err(RepoError::invalid_input(format!(
                    "value `{value}` does not fit node property `{property}`"
                )));
            }
        }
        Ok(())
    }

    fn build_random_select(query: &RandomNodeQuery) -> Result<QueryBuilder<'static, Postgres>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT n.nid FROM node n ");
        qb.push("INNER JOIN node_field_data d ON d.nid = n.nid ");
        // Opaque access tag; carried for statement logs and access rewriting.
        qb.push(format_args!("/* {} */ ", query.access_tag));
        qb.push("WHERE 1 = 1");

        // One row per node unless a language is picked explicitly.
        if query.filters.get("langcode").is_none() {
            qb.push(" AND d.default_langcode");
        }

        for (property, value) in query.filters.iter() {
            Self::push_filter(&mut qb, property, value)?;
        }

        if !query.bundles.is_empty() {
            qb.push(" AND n.type = ANY(");
            qb.push_bind(query.bundles.clone());
            qb.push(")");
        }

        if !query.exclude.is_empty() {
            let exclude: Vec<i64> = query.exclude.iter().map(|id| id.get()).collect();
            qb.push(" AND NOT (n.nid = ANY(");
            qb.push_bind(exclude);
            qb.push("))");
        }

        qb.push(" ORDER BY random()");

        if let Some(limit) = query.limit {
            let limit = i64::try_from(limit)
                .map_err(|_| RepoError::invalid_input("row limit exceeds supported range"))?;
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }

        Ok(qb)
    }
}

#[async_trait]
impl NodesRepo for PostgresRepositories {
    async fn random_node_ids(&self, query: &RandomNodeQuery) -> Result<Vec<NodeId>, RepoError> {
        let mut qb = Self::build_random_select(query)?;
        debug!(target = SOURCE, sql = qb.sql(), "random node select");

        let ids: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().map(NodeId).collect())
    }

    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<NodeRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT d.nid, d.type AS bundle, d.langcode, d.title, d.status, d.promote,
                   d.sticky, d.uid, d.summary, d.created, d.changed
            FROM node_field_data d
            WHERE d.nid = ANY($1) AND d.default_langcode
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(NodeRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::draw::PropertyFilters;

    #[test]
    fn random_select_covers_every_restriction() {
        let query = RandomNodeQuery::new(
            PropertyFilters::new()
                .with("status", FilterValue::Int(1))
                .with("langcode", FilterValue::Text("en".into())),
        )
        .excluding(&[NodeId(3)])
        .in_bundle("article")
        .range(5);

        let qb = PostgresRepositories::build_random_select(&query).expect("query builds");
        let sql = qb.sql();

        assert!(sql.contains("/* node_access */"));
        assert!(sql.contains("d.langcode = $1"));
        assert!(sql.contains("d.status = $2"));
        assert!(sql.contains("n.type = ANY($3)"));
        assert!(sql.contains("NOT (n.nid = ANY($4))"));
        assert!(sql.ends_with("ORDER BY random() LIMIT $5"));
    }

    #[test]
    fn unknown_property_is_rejected() {
        let query = RandomNodeQuery::new(
            PropertyFilters::new().with("body; DROP TABLE node", FilterValue::Int(1)),
        );

        assert!(matches!(
            PostgresRepositories::build_random_select(&query),
            Err(RepoError::InvalidInput { .. })
        ));
    }

    #[test]
    fn mismatched_filter_type_is_rejected() {
        let query =
            RandomNodeQuery::new(PropertyFilters::new().with("status", FilterValue::Text("x".into())));

        assert!(PostgresRepositories::build_random_select(&query).is_err());
    }

    #[test]
    fn unlimited_query_has_no_limit() {
        let qb = PostgresRepositories::build_random_select(&RandomNodeQuery::new(
            PropertyFilters::new(),
        ))
        .expect("query builds");

        assert!(!qb.sql().contains("LIMIT"));
    }

    #[test]
    fn default_translation_only_without_langcode_filter() {
        let any_language = PostgresRepositories::build_random_select(&RandomNodeQuery::new(
            PropertyFilters::new().with("status", FilterValue::Int(1)),
        ))
        .expect("query builds");
        assert!(any_language.sql().contains("AND d.default_langcode"));

        let english = PostgresRepositories::build_random_select(&RandomNodeQuery::new(
            PropertyFilters::new().with("langcode", FilterValue::Text("en".into())),
        ))
        .expect("query builds");
        assert!(!english.sql().contains("d.default_langcode"));
    }
}
