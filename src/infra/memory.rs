//! In-process node store.
//!
//! Behaves like the Postgres adapter for the subset of node properties it
//! understands and records every query it receives, which makes it useful
//! for tests and the `demo` command.

use std::sync::RwLock;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::application::repos::{NodesRepo, RandomNodeQuery, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::draw::FilterValue;
use crate::domain::entities::NodeRecord;
use crate::domain::types::NodeId;

const SOURCE: &str = "infra::memory::MemoryNodesRepo";

#[derive(Default)]
pub struct MemoryNodesRepo {
    records: RwLock<Vec<NodeRecord>>,
    queries: RwLock<Vec<RandomNodeQuery>>,
    loads: RwLock<Vec<Vec<NodeId>>>,
    failure: RwLock<Option<String>>,
}

impl MemoryNodesRepo {
    pub fn new(records: Vec<NodeRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// `count` published English articles with ids `1..=count`.
    pub fn with_articles(count: i64) -> Self {
        Self::new(
            (1..=count)
                .map(|nid| sample_node(nid, "article", &format!("Article {nid}")))
                .collect(),
        )
    }

    /// A small mixed catalog of articles, pages and events.
    pub fn demo_catalog() -> Self {
        let mut records = Vec::new();
        let mut nid = 0;
        for (bundle, titles) in [
            (
                "article",
                &[
                    "Tides of the northern coast",
                    "A field guide to lichens",
                    "Notes on sourdough",
                    "Why owls turn their heads",
                    "The quiet life of moss",
                ][..],
            ),
            (
                "page",
                &["About this site", "Contact", "Colophon"][..],
            ),
            (
                "event",
                &[
                    "Spring bird count",
                    "Night sky walk",
                    "Harbour cleanup",
                    "Mushroom foray",
                ][..],
            ),
        ] {
            for title in titles {
                nid += 1;
                records.push(sample_node(nid, bundle, title));
            }
        }
        Self::new(records)
    }

    pub fn insert(&self, record: NodeRecord) {
        rw_write(&self.records, SOURCE, "insert").push(record);
    }

    /// Every following call fails with a persistence error carrying `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *rw_write(&self.failure, SOURCE, "fail_with") = Some(message.into());
    }

    pub fn recover(&self) {
        *rw_write(&self.failure, SOURCE, "recover") = None;
    }

    /// Random selects received so far, oldest first.
    pub fn queries(&self) -> Vec<RandomNodeQuery> {
        rw_read(&self.queries, SOURCE, "queries").clone()
    }

    pub fn random_queries(&self) -> usize {
        rw_read(&self.queries, SOURCE, "random_queries").len()
    }

    pub fn load_calls(&self) -> usize {
        rw_read(&self.loads, SOURCE, "load_calls").len()
    }

    fn check_failure(&self) -> Result<(), RepoError> {
        match rw_read(&self.failure, SOURCE, "check_failure").as_ref() {
            Some(message) => Err(RepoError::from_persistence(message)),
            None => Ok(()),
        }
    }
}

pub fn sample_node(nid: i64, bundle: &str, title: &str) -> NodeRecord {
    NodeRecord {
        nid: NodeId(nid),
        bundle: bundle.to_string(),
        langcode: "en".to_string(),
        title: title.to_string(),
        status: 1,
        promote: false,
        sticky: false,
        uid: 1,
        summary: String::new(),
        created: 1_700_000_000 + nid * 3600,
        changed: 1_700_000_000 + nid * 3600,
    }
}

fn matches_filter(
    record: &NodeRecord,
    property: &str,
    value: &FilterValue,
) -> Result<bool, RepoError> {
    let matched = match (property, value) {
        ("status", FilterValue::Int(value)) => i64::from(record.status) == *value,
        ("uid", FilterValue::Int(value)) => record.uid == *value,
        ("promote", FilterValue::Bool(value)) => record.promote == *value,
        ("sticky", FilterValue::Bool(value)) => record.sticky == *value,
        ("promote", FilterValue::Int(value @ (0 | 1))) => record.promote == (*value == 1),
        ("sticky", FilterValue::Int(value @ (0 | 1))) => record.sticky == (*value == 1),
        ("langcode", FilterValue::Text(value)) => record.langcode == *value,
        ("title", FilterValue::Text(value)) => record.title == *value,
        ("type", FilterValue::Text(value)) => record.bundle == *value,
        ("status" | "uid" | "promote" | "sticky" | "langcode" | "title" | "type", value) => {
            return Err(RepoError::invalid_input(format!(
                "value `{value}` does not fit node property `{property}`"
            )));
        }
        _ => {
            return Err(RepoError::invalid_input(format!(
                "unknown node property `{property}`"
            )));
        }
    };
    Ok(matched)
}

#[async_trait]
impl NodesRepo for MemoryNodesRepo {
    async fn random_node_ids(&self, query: &RandomNodeQuery) -> Result<Vec<NodeId>, RepoError> {
        rw_write(&self.queries, SOURCE, "random_node_ids").push(query.clone());
        self.check_failure()?;

        let mut ids = Vec::new();
        for record in rw_read(&self.records, SOURCE, "random_node_ids").iter() {
            if !query.bundles.is_empty() && !query.bundles.contains(&record.bundle) {
                continue;
            }
            if query.exclude.contains(&record.nid) {
                continue;
            }
            let mut keep = true;
            for (property, value) in query.filters.iter() {
                keep &= matches_filter(record, property, value)?;
            }
            if keep {
                ids.push(record.nid);
            }
        }

        ids.shuffle(&mut rand::thread_rng());
        if let Some(limit) = query.limit {
            ids.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(ids)
    }

    async fn load_nodes(&self, ids: &[NodeId]) -> Result<Vec<NodeRecord>, RepoError> {
        rw_write(&self.loads, SOURCE, "load_nodes").push(ids.to_vec());
        self.check_failure()?;

        Ok(rw_read(&self.records, SOURCE, "load_nodes")
            .iter()
            .filter(|record| ids.contains(&record.nid))
            .cloned()
            .collect())
    }
}
