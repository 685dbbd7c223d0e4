//! The capability catalog.
//!
//! A static, read-only-at-runtime table describing every backend the
//! process knows how to talk about, independent of whether an adapter for
//! it has actually been registered. Registration happens once during
//! process initialization; mutation after that is a misuse the catalog
//! does not attempt to prevent at the type level — see
//! `crate::adapters::register_adapter`, which has the same write-once-
//! read-many contract.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Opaque small string identifying a concrete backend, e.g. `"postgres"`.
pub type BackendId = String;

/// The data-model family a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paradigm {
    Relational,
    Document,
    WideColumn,
    KeyValue,
    Graph,
    Vector,
    Search,
    TimeSeries,
    Columnar,
    Lakehouse,
}

/// Feature flags for one backend, as declared in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub paradigms: Vec<Paradigm>,
    pub supports_arbitrary_query: bool,
    pub supports_schema_ddl: bool,
    pub supports_cdc: bool,
    pub supports_streams: bool,
    pub default_port: Option<u16>,
}

impl CapabilityFlags {
    /// The backend's primary paradigm — the first declared one. Translation
    /// routing only ever needs a single paradigm per backend even though the
    /// catalog allows more than one (e.g. a backend that is both document
    /// and search-capable).
    pub fn primary_paradigm(&self) -> Paradigm {
        self.paradigms[0]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: BackendId,
    pub name: String,
    pub capabilities: CapabilityFlags,
}

type Catalog = HashMap<BackendId, CatalogEntry>;

fn entry(
    id: &str,
    name: &str,
    paradigms: &[Paradigm],
    arbitrary_query: bool,
    schema_ddl: bool,
    cdc: bool,
    streams: bool,
    default_port: Option<u16>,
) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        name: name.to_string(),
        capabilities: CapabilityFlags {
            paradigms: paradigms.to_vec(),
            supports_arbitrary_query: arbitrary_query,
            supports_schema_ddl: schema_ddl,
            supports_cdc: cdc,
            supports_streams: streams,
            default_port,
        },
    }
}

static CATALOG: Lazy<Catalog> = Lazy::new(|| {
    use Paradigm::*;
    let entries = vec![
        entry("postgres", "PostgreSQL", &[Relational], true, true, true, true, Some(5432)),
        entry("mysql", "MySQL", &[Relational], true, true, true, true, Some(3306)),
        entry("sqlite", "SQLite", &[Relational], true, true, false, true, None),
        entry("mongodb", "MongoDB", &[Document], true, true, true, true, Some(27017)),
        entry("redis", "Redis", &[KeyValue], false, false, true, true, Some(6379)),
        entry("neo4j", "Neo4j", &[Graph], true, true, false, true, Some(7687)),
        entry("qdrant", "Qdrant", &[Vector], false, true, false, true, Some(6334)),
        entry("elasticsearch", "Elasticsearch", &[Search], true, true, false, true, Some(9200)),
        entry(
            "prometheus",
            "Prometheus-compatible metrics store",
            &[TimeSeries],
            false,
            false,
            false,
            true,
            Some(9090),
        ),
        entry("clickhouse", "ClickHouse", &[Columnar], true, true, false, true, Some(8123)),
        entry("cassandra", "Cassandra", &[WideColumn], true, true, true, true, Some(9042)),
        entry("lakehouse", "Lakehouse table catalog", &[Lakehouse], false, true, false, true, None),
    ];
    entries.into_iter().map(|e| (e.id.clone(), e)).collect()
});

/// Looks up a backend's catalog entry. `None` if the identifier is unknown to
/// the catalog (distinct from `NotRegistered`, which means no adapter was
/// installed for an identifier the catalog *does* know about).
pub fn lookup(id: &str) -> Option<CatalogEntry> {
    CATALOG.get(id).cloned()
}

/// All catalog entries, sorted by id, for discovery/introspection endpoints.
pub fn list_all() -> Vec<CatalogEntry> {
    let mut entries: Vec<CatalogEntry> = CATALOG.values().cloned().collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_and_mysql_share_relational_paradigm() {
        let pg = lookup("postgres").unwrap();
        let my = lookup("mysql").unwrap();
        assert_eq!(pg.capabilities.primary_paradigm(), Paradigm::Relational);
        assert_eq!(my.capabilities.primary_paradigm(), Paradigm::Relational);
    }

    #[test]
    fn unknown_backend_is_not_in_catalog() {
        assert!(lookup("does-not-exist").is_none());
    }

    #[test]
    fn list_all_is_sorted() {
        let ids: Vec<_> = list_all().into_iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
