use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::TagError;
use crate::graph::{RelationKind, TagGraph};

pub const GRAPH_CACHE_FILE: &str = "danbooru_tag_graph.sqlite3";

const IMPLICATIONS_PREFIX: &str = "implications_";
const ALIASES_PREFIX: &str = "aliases_";
const DEPRECATED_PREFIX: &str = "deprecated_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub tags: usize,
    pub implications: usize,
    pub aliases: usize,
    pub warnings: Vec<ImportWarning>,
}

/// SQLite snapshot of a [`TagGraph`].
pub struct GraphStore {
    path: PathBuf,
    conn: Connection,
}

pub fn graph_path_for_dir(dir: &Path) -> PathBuf {
    dir.join(GRAPH_CACHE_FILE)
}

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self, TagError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| TagError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| database_error(path, source))?;
        let store = Self {
            path: path.to_path_buf(),
            conn,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_dir(dir: &Path) -> Result<Self, TagError> {
        Self::open(&graph_path_for_dir(dir))
    }

    pub fn open_in_memory() -> Result<Self, TagError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| database_error(&path, source))?;
        let store = Self { path, conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<(), TagError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tags (
                    name TEXT PRIMARY KEY NOT NULL,
                    deprecated INTEGER,
                    fetched_at TEXT
                );

                CREATE TABLE IF NOT EXISTS relations (
                    antecedent TEXT NOT NULL,
                    consequent TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    PRIMARY KEY (antecedent, consequent, kind)
                );
                "#,
            )
            .map_err(|source| database_error(&self.path, source))
    }

    pub fn load(&self) -> Result<TagGraph, TagError> {
        let err = |source| database_error(&self.path, source);
        let mut graph = TagGraph::new();

        let mut stmt = self
            .conn
            .prepare("SELECT name, deprecated, fetched_at FROM tags")
            .map_err(err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<bool>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(err)?;
        for row in rows {
            let (name, deprecated, fetched_at) = row.map_err(err)?;
            let node = graph.add_tag(&name);
            node.deprecated = deprecated;
            node.fetched_at = fetched_at.as_deref().and_then(parse_timestamp);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT antecedent, consequent, kind FROM relations")
            .map_err(err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(err)?;
        for row in rows {
            let (antecedent, consequent, kind) = row.map_err(err)?;
            match RelationKind::parse(&kind) {
                Some(kind) => {
                    graph.add_relation(kind, &antecedent, &consequent);
                }
                None => warn!("skipping relation {antecedent} -> {consequent} of unknown kind {kind:?}"),
            }
        }

        Ok(graph)
    }

    /// Replaces the stored snapshot with `graph` in a single transaction.
    pub fn save(&mut self, graph: &TagGraph) -> Result<(), TagError> {
        let path = self.path.clone();
        let err = |source| database_error(&path, source);

        let tx = self.conn.transaction().map_err(err)?;
        tx.execute("DELETE FROM relations", []).map_err(err)?;
        tx.execute("DELETE FROM tags", []).map_err(err)?;
        {
            let mut insert_tag = tx
                .prepare("INSERT INTO tags (name, deprecated, fetched_at) VALUES (?1, ?2, ?3)")
                .map_err(err)?;
            for (name, node) in graph.nodes() {
                let fetched_at = node.fetched_at.map(|at| at.to_rfc3339());
                insert_tag
                    .execute(params![name, node.deprecated, fetched_at])
                    .map_err(err)?;
            }

            let mut insert_relation = tx
                .prepare(
                    "INSERT OR IGNORE INTO relations (antecedent, consequent, kind) VALUES (?1, ?2, ?3)",
                )
                .map_err(err)?;
            for (kind, antecedent, consequent) in graph.relations() {
                insert_relation
                    .execute(params![antecedent, consequent, kind.as_str()])
                    .map_err(err)?;
            }
        }
        tx.commit().map_err(err)
    }

    /// Loads the stored graph. An empty store next to per-tag JSON cache files
    /// is seeded from those files and saved.
    pub fn load_or_migrate(
        &mut self,
        dir: &Path,
    ) -> Result<(TagGraph, Option<ImportReport>), TagError> {
        let mut graph = self.load()?;
        if !graph.is_empty() || !has_legacy_json(dir) {
            return Ok((graph, None));
        }

        info!("migrating JSON cache in {} to graph cache", dir.display());
        let report = import_json_cache(dir, &mut graph);
        for warning in &report.warnings {
            warn!("{}: {}", warning.path.display(), warning.message);
        }
        self.save(&graph)?;
        info!(
            tags = report.tags,
            implications = report.implications,
            aliases = report.aliases,
            "migration complete"
        );
        Ok((graph, Some(report)))
    }
}

pub fn has_legacy_json(dir: &Path) -> bool {
    legacy_json_files(dir).next().is_some()
}

/// Reads `implications_<tag>.json`, `aliases_<tag>.json` and
/// `deprecated_<tag>.json` from `dir` into `graph`. A tag counts as fetched
/// once both its relation files are present, or it is known deprecated.
pub fn import_json_cache(dir: &Path, graph: &mut TagGraph) -> ImportReport {
    #[derive(Default)]
    struct Entry {
        implications: Option<Vec<String>>,
        aliases: Option<Vec<String>>,
        deprecated: Option<bool>,
    }

    let mut report = ImportReport::default();
    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();

    for path in legacy_json_files(dir) {
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(".json") else {
            continue;
        };

        let value = match read_json(&path) {
            Ok(value) => value,
            Err(err) => {
                report.warnings.push(ImportWarning {
                    path: path.clone(),
                    message: format!("{err}"),
                });
                continue;
            }
        };

        let parsed = if let Some(tag) = stem.strip_prefix(IMPLICATIONS_PREFIX) {
            parse_tag_list(&value).map(|list| {
                entries.entry(tag.to_string()).or_default().implications = Some(list);
            })
        } else if let Some(tag) = stem.strip_prefix(ALIASES_PREFIX) {
            parse_tag_list(&value).map(|list| {
                entries.entry(tag.to_string()).or_default().aliases = Some(list);
            })
        } else if let Some(tag) = stem.strip_prefix(DEPRECATED_PREFIX) {
            value
                .as_bool()
                .map(|flag| {
                    entries.entry(tag.to_string()).or_default().deprecated = Some(flag);
                })
                .ok_or_else(|| "expected a boolean".to_string())
        } else {
            Ok(())
        };

        if let Err(message) = parsed {
            report.warnings.push(ImportWarning { path, message });
        }
    }

    let now = Utc::now();
    for (tag, entry) in entries {
        if tag.is_empty() {
            continue;
        }
        graph.add_tag(&tag);
        report.tags += 1;
        if let Some(flag) = entry.deprecated {
            graph.set_deprecated(&tag, flag);
        }
        for implied in entry.implications.iter().flatten() {
            if graph.add_implication(&tag, implied) {
                report.implications += 1;
            }
        }
        for alias in entry.aliases.iter().flatten() {
            if graph.add_alias(&tag, alias) {
                report.aliases += 1;
            }
        }
        let complete = entry.implications.is_some() && entry.aliases.is_some();
        if complete || entry.deprecated == Some(true) {
            graph.mark_fetched(&tag, now);
        }
    }

    report
}

fn legacy_json_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| {
                    name.ends_with(".json")
                        && [IMPLICATIONS_PREFIX, ALIASES_PREFIX, DEPRECATED_PREFIX]
                            .iter()
                            .any(|prefix| name.starts_with(prefix))
                })
        })
}

fn parse_tag_list(value: &Value) -> Result<Vec<String>, String> {
    let arr = value
        .as_array()
        .ok_or_else(|| "expected an array of tags".to_string())?;
    let mut out = Vec::new();
    for item in arr {
        let tag = item
            .as_str()
            .ok_or_else(|| "array contains non-string value".to_string())?;
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

fn read_json(path: &Path) -> Result<Value, TagError> {
    let data = fs::read(path).map_err(|source| TagError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| TagError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn database_error(path: &Path, source: rusqlite::Error) -> TagError {
    TagError::Database {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{has_legacy_json, import_json_cache, GraphStore, GRAPH_CACHE_FILE};
    use crate::graph::TagGraph;

    fn write_json(dir: &std::path::Path, name: &str, value: serde_json::Value) {
        fs::write(dir.join(name), serde_json::to_vec(&value).expect("serialize")).expect("write");
    }

    #[test]
    fn saved_graph_loads_back_with_node_state() {
        let mut store = GraphStore::open_in_memory().expect("open");
        let fetched = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let mut graph = TagGraph::new();
        graph.add_implication("cat_ears", "animal_ears");
        graph.add_alias("nekomimi", "cat_ears");
        graph.mark_fetched("cat_ears", fetched);
        graph.set_deprecated("old_tag", true);
        store.save(&graph).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.stats(), graph.stats());
        assert_eq!(loaded.implications("cat_ears", false), vec!["animal_ears"]);
        assert_eq!(loaded.aliases("nekomimi", false), vec!["cat_ears"]);
        assert_eq!(
            loaded.node("cat_ears").and_then(|n| n.fetched_at),
            Some(fetched)
        );
        assert_eq!(loaded.deprecated_status("old_tag"), Some(true));
        assert_eq!(loaded.deprecated_status("animal_ears"), None);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let mut store = GraphStore::open_in_memory().expect("open");
        let mut graph = TagGraph::new();
        graph.add_alias("a", "b");
        store.save(&graph).expect("save");

        graph.remove_alias("a", "b");
        store.save(&graph).expect("save again");
        assert_eq!(store.load().expect("load").stats().aliases, 0);
    }

    #[test]
    fn open_dir_creates_cache_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("cache");
        let store = GraphStore::open_dir(&nested).expect("open");
        assert_eq!(store.path(), nested.join(GRAPH_CACHE_FILE));
        assert!(nested.join(GRAPH_CACHE_FILE).is_file());
    }

    #[test]
    fn legacy_json_cache_is_imported() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_json(dir.path(), "implications_miniboy.json", json!(["mini_person"]));
        write_json(dir.path(), "aliases_miniboy.json", json!([]));
        write_json(dir.path(), "deprecated_miniboy.json", json!(false));
        write_json(dir.path(), "deprecated_old.json", json!(true));
        write_json(dir.path(), "implications_half.json", json!(["x"]));
        write_json(dir.path(), "aliases_broken.json", json!({"not": "a list"}));
        fs::write(dir.path().join("notes.json"), b"{}").expect("write");

        assert!(has_legacy_json(dir.path()));

        let mut graph = TagGraph::new();
        let report = import_json_cache(dir.path(), &mut graph);
        assert_eq!(report.implications, 2);
        assert_eq!(report.warnings.len(), 1);

        assert!(graph.is_fetched("miniboy"));
        assert_eq!(graph.implications("miniboy", false), vec!["mini_person"]);
        assert!(graph.is_fetched("old"));
        assert!(graph.is_deprecated("old"));
        assert!(!graph.is_fetched("half"));
        assert!(!graph.is_fetched("mini_person"));
    }

    #[test]
    fn load_or_migrate_runs_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_json(dir.path(), "implications_a.json", json!(["b"]));
        write_json(dir.path(), "aliases_a.json", json!([]));

        let mut store = GraphStore::open_dir(dir.path()).expect("open");
        let (graph, report) = store.load_or_migrate(dir.path()).expect("migrate");
        assert!(report.is_some());
        assert!(graph.is_fetched("a"));

        let (graph, report) = store.load_or_migrate(dir.path()).expect("reload");
        assert!(report.is_none());
        assert_eq!(graph.implications("a", false), vec!["b"]);
    }

    #[test]
    fn empty_dir_has_nothing_to_migrate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = GraphStore::open_dir(dir.path()).expect("open");
        let (graph, report) = store.load_or_migrate(dir.path()).expect("load");
        assert!(graph.is_empty());
        assert!(report.is_none());
    }
}
