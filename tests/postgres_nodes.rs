use std::collections::HashSet;

use sqlx::PgPool;
use tombola::application::repos::{NodesRepo, RandomNodeQuery, RepoError};
use tombola::domain::draw::{FilterValue, PropertyFilters};
use tombola::domain::types::NodeId;
use tombola::infra::db::PostgresRepositories;

async fn seed_node(
    pool: &PgPool,
    bundle: &str,
    title: &str,
    status: i16,
    translations: &[&str],
) -> NodeId {
    let nid: i64 = sqlx::query_scalar("INSERT INTO node (type, langcode) VALUES ($1, 'en') RETURNING nid")
        .bind(bundle)
        .fetch_one(pool)
        .await
        .expect("insert node");

    for langcode in std::iter::once("en").chain(translations.iter().copied()) {
        sqlx::query(
            "INSERT INTO node_field_data \
             (nid, langcode, type, default_langcode, title, status, created, changed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
        )
        .bind(nid)
        .bind(langcode)
        .bind(bundle)
        .bind(langcode == "en")
        .bind(format!("{title} ({langcode})"))
        .bind(status)
        .bind(1_700_000_000_i64 + nid)
        .execute(pool)
        .await
        .expect("insert field data");
    }

    NodeId(nid)
}

fn published_english() -> PropertyFilters {
    PropertyFilters::new()
        .with("status", FilterValue::Int(1))
        .with("langcode", FilterValue::Text("en".into()))
}

#[sqlx::test(migrations = "./migrations")]
async fn random_ids_honour_bundles_filters_and_exclusion(pool: PgPool) {
    let first = seed_node(&pool, "article", "First", 1, &["de"]).await;
    let second = seed_node(&pool, "article", "Second", 1, &[]).await;
    let _draft = seed_node(&pool, "article", "Draft", 0, &[]).await;
    let _event = seed_node(&pool, "event", "Event", 1, &[]).await;
    let repos = PostgresRepositories::new(pool);

    let query = RandomNodeQuery::new(published_english()).in_bundle("article");
    let ids: HashSet<NodeId> = repos
        .random_node_ids(&query)
        .await
        .expect("random select")
        .into_iter()
        .collect();
    assert_eq!(ids, HashSet::from([first, second]));

    let excluded = repos
        .random_node_ids(&query.clone().excluding(&[first]))
        .await
        .expect("random select with exclusion");
    assert_eq!(excluded, vec![second]);

    let limited = repos
        .random_node_ids(&query.range(1))
        .await
        .expect("limited select");
    assert_eq!(limited.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn load_nodes_returns_default_translation_only(pool: PgPool) {
    let nid = seed_node(&pool, "page", "About", 1, &["fr", "de"]).await;
    let repos = PostgresRepositories::new(pool);

    let records = repos.load_nodes(&[nid, NodeId(9_999)]).await.expect("load");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].nid, nid);
    assert_eq!(records[0].bundle, "page");
    assert_eq!(records[0].langcode, "en");
    assert_eq!(records[0].title, "About (en)");
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_filter_property_is_invalid_input(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let query = RandomNodeQuery::new(
        PropertyFilters::new().with("body", FilterValue::Text("x".into())),
    );

    let err = repos
        .random_node_ids(&query)
        .await
        .expect_err("unknown property");

    assert!(matches!(err, RepoError::InvalidInput { .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn translations_do_not_take_extra_rows_without_langcode(pool: PgPool) {
    let first = seed_node(&pool, "article", "First", 1, &["de", "fr", "it"]).await;
    let second = seed_node(&pool, "article", "Second", 1, &["de"]).await;
    let repos = PostgresRepositories::new(pool);

    let query = RandomNodeQuery::new(PropertyFilters::new().with("status", FilterValue::Int(1)))
        .in_bundle("article")
        .range(2);
    let ids: HashSet<NodeId> = repos
        .random_node_ids(&query)
        .await
        .expect("random select")
        .into_iter()
        .collect();

    assert_eq!(ids, HashSet::from([first, second]));
}
