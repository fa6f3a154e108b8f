use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::client::{RelationRecord, TagSource};
use crate::error::TagError;
use crate::graph::{Expansion, RelationKind, SemanticRelations, TagGraph};
use crate::store::GraphStore;
use crate::tag::normalize_tags;

pub trait ProgressObserver {
    /// More tags were queued for fetching.
    fn inc_length(&self, delta: u64);
    /// Tags finished fetching.
    fn inc(&self, delta: u64);
}

/// Expands tags through a [`TagSource`], caching what it learns in a
/// [`TagGraph`] and, when a store is attached, on disk.
pub struct TagExpander<S> {
    source: S,
    graph: TagGraph,
    store: Option<GraphStore>,
}

impl<S: TagSource> TagExpander<S> {
    pub fn new(source: S) -> Self {
        Self::with_graph(source, TagGraph::new())
    }

    pub fn with_graph(source: S, graph: TagGraph) -> Self {
        Self {
            source,
            graph,
            store: None,
        }
    }

    /// Loads the graph from `store`. With `legacy_dir`, an empty store is first
    /// seeded from the per-tag JSON files in that directory.
    pub fn with_store(
        source: S,
        mut store: GraphStore,
        legacy_dir: Option<&Path>,
    ) -> Result<Self, TagError> {
        let graph = match legacy_dir {
            Some(dir) => store.load_or_migrate(dir)?.0,
            None => store.load()?,
        };
        info!(
            "graph cache {} holds {} tags",
            store.path().display(),
            graph.len()
        );
        Ok(Self {
            source,
            graph,
            store: Some(store),
        })
    }

    pub fn graph(&self) -> &TagGraph {
        &self.graph
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_tag_cached(&self, tag: &str) -> bool {
        self.graph.is_fetched(tag)
    }

    pub fn save(&mut self) -> Result<(), TagError> {
        match &mut self.store {
            Some(store) => store.save(&self.graph),
            None => Ok(()),
        }
    }

    pub fn expand_tags(
        &mut self,
        tags: &[String],
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<Expansion, TagError> {
        self.expand_tags_with(tags, false, progress)
    }

    pub fn expand_tags_with(
        &mut self,
        tags: &[String],
        include_deprecated: bool,
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<Expansion, TagError> {
        let seeds = normalize_tags(tags);
        info!("expanding {} tags", seeds.len());
        self.ensure_fetched(&seeds, progress)?;
        let expansion = self.graph.expand(&seeds, include_deprecated);
        info!("expanded {} tags to {} tags", seeds.len(), expansion.len());
        Ok(expansion)
    }

    /// Expansion over whatever is already cached; never touches the source.
    pub fn expand_cached(&self, tags: &[String], include_deprecated: bool) -> Expansion {
        let seeds = normalize_tags(tags);
        let missing = self.graph.unfetched_tags(&seeds);
        if !missing.is_empty() {
            warn!("not cached, expanding as-is: {}", missing.join(" "));
        }
        self.graph.expand(&seeds, include_deprecated)
    }

    pub fn relations(&self, tag: &str, include_deprecated: bool) -> SemanticRelations {
        self.graph.semantic_relations(tag, include_deprecated)
    }

    /// Fetches every tag reachable from `tags` that is not cached yet and
    /// returns how many were fetched. Each round walks the cached edges from
    /// `tags`, so tags left unfetched by an interrupted run are picked up.
    /// The graph is saved after each round and before an error is returned.
    pub fn ensure_fetched(
        &mut self,
        tags: &[String],
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<usize, TagError> {
        let mut fetched = 0;

        loop {
            let unfetched = self.graph.unfetched_reachable(tags);
            if unfetched.is_empty() {
                break;
            }
            debug!("fetching data for {} unfetched tags", unfetched.len());
            if let Some(progress) = progress {
                progress.inc_length(unfetched.len() as u64);
            }

            match self.fetch_batch(&unfetched, progress) {
                Ok(()) => {
                    fetched += unfetched.len();
                    self.save()?;
                }
                Err(err) => {
                    if let Err(save_err) = self.save() {
                        warn!("failed to save graph cache after fetch error: {save_err}");
                    }
                    return Err(err);
                }
            }
        }

        let fixed = self.graph.fix_bidirectional_aliases();
        if !fixed.is_empty() {
            info!("fixed {} bidirectional aliases", fixed.len());
            self.save()?;
        }
        Ok(fetched)
    }

    fn fetch_batch(
        &mut self,
        tags: &[String],
        progress: Option<&dyn ProgressObserver>,
    ) -> Result<(), TagError> {
        for tag in tags {
            self.fetch_tag(tag).inspect_err(|err| {
                if err.is_rate_limited() {
                    warn!("rate limited while fetching '{tag}', stopping");
                }
            })?;
            if let Some(progress) = progress {
                progress.inc(1);
            }
        }
        Ok(())
    }

    fn fetch_tag(&mut self, tag: &str) -> Result<(), TagError> {
        debug!("fetching data for tag {tag}");
        if self.is_deprecated(tag)? {
            self.graph.mark_fetched(tag, Utc::now());
            return Ok(());
        }

        let records = self.source.implications(tag)?;
        let implied = self.active_consequents(tag, records, RelationKind::Implication)?;
        let records = self.source.aliases(tag)?;
        let redirects = self.active_consequents(tag, records, RelationKind::Alias)?;

        for consequent in &implied {
            self.graph.add_implication(tag, consequent);
        }
        for consequent in &redirects {
            debug!("adding alias {tag} -> {consequent}");
            self.graph.add_alias(tag, consequent);
        }
        self.graph.mark_fetched(tag, Utc::now());
        Ok(())
    }

    fn is_deprecated(&mut self, tag: &str) -> Result<bool, TagError> {
        if let Some(flag) = self.graph.deprecated_status(tag) {
            return Ok(flag);
        }
        let flag = self
            .source
            .tag_info(tag)?
            .is_some_and(|record| record.is_deprecated);
        self.graph.set_deprecated(tag, flag);
        Ok(flag)
    }

    fn active_consequents(
        &mut self,
        tag: &str,
        records: Vec<RelationRecord>,
        kind: RelationKind,
    ) -> Result<Vec<String>, TagError> {
        let mut out: Vec<String> = Vec::new();
        for record in records {
            if !record.is_active() || record.consequent_name.is_empty() {
                continue;
            }
            if !record.antecedent_name.is_empty() && record.antecedent_name != tag {
                warn!(
                    "unexpected {} antecedent: expected {tag}, got {}",
                    kind.as_str(),
                    record.antecedent_name
                );
                continue;
            }
            let consequent = record.consequent_name;
            if out.contains(&consequent) {
                continue;
            }
            if self.is_deprecated(&consequent)? {
                debug!("skipping deprecated {} target {consequent}", kind.as_str());
                continue;
            }
            out.push(consequent);
        }
        debug!("found {} {} targets for {tag}", out.len(), kind.as_str());
        Ok(out)
    }
}
