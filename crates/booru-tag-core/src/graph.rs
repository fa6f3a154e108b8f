use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    Implication,
    Alias,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Implication => "implication",
            RelationKind::Alias => "alias",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "implication" => Some(RelationKind::Implication),
            "alias" => Some(RelationKind::Alias),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagNode {
    /// `None` until the API has been asked about this tag.
    pub deprecated: Option<bool>,
    /// Set once the tag's outgoing implications and aliases are recorded.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TagNode {
    pub fn is_fetched(&self) -> bool {
        self.fetched_at.is_some()
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated.unwrap_or(false)
    }
}

/// Implication and alias edges between tags, plus what is known about each tag.
///
/// Both edge kinds are directed. An implication `a -> b` means every post
/// tagged `a` is also `b`; an alias `a -> b` means `a` redirects to the
/// canonical tag `b`.
#[derive(Clone, Debug, Default)]
pub struct TagGraph {
    nodes: BTreeMap<String, TagNode>,
    implies: BTreeMap<String, BTreeSet<String>>,
    implied_by: BTreeMap<String, BTreeSet<String>>,
    alias_to: BTreeMap<String, BTreeSet<String>>,
    alias_from: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub tags: usize,
    pub fetched: usize,
    pub deprecated: usize,
    pub implications: usize,
    pub aliases: usize,
    pub oldest_fetch: Option<DateTime<Utc>>,
    pub newest_fetch: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SemanticRelations {
    pub tag: String,
    pub direct_implications: Vec<String>,
    pub transitive_implications: BTreeSet<String>,
    pub implied_by: Vec<String>,
    pub direct_aliases: Vec<String>,
    pub aliased_from: Vec<String>,
    pub alias_group: BTreeSet<String>,
    pub is_canonical: bool,
    pub all_related: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub seeds: Vec<String>,
    pub tags: BTreeSet<String>,
    pub frequencies: BTreeMap<String, usize>,
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn frequency(&self, tag: &str) -> usize {
        self.frequencies.get(tag).copied().unwrap_or(0)
    }

    /// Tags ordered by frequency, highest first, ties broken by name.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut out: Vec<(&str, usize)> = self
            .tags
            .iter()
            .map(|tag| (tag.as_str(), self.frequency(tag)))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        out
    }

    pub fn most_common(&self, n: usize) -> Vec<(&str, usize)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }
}

impl TagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.nodes.contains_key(tag)
    }

    pub fn node(&self, tag: &str) -> Option<&TagNode> {
        self.nodes.get(tag)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &TagNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationKind, &str, &str)> {
        let implications = self.implies.iter().flat_map(|(from, targets)| {
            targets
                .iter()
                .map(move |to| (RelationKind::Implication, from.as_str(), to.as_str()))
        });
        let aliases = self.alias_to.iter().flat_map(|(from, targets)| {
            targets
                .iter()
                .map(move |to| (RelationKind::Alias, from.as_str(), to.as_str()))
        });
        implications.chain(aliases)
    }

    pub fn add_tag(&mut self, tag: &str) -> &mut TagNode {
        self.nodes.entry(tag.to_string()).or_default()
    }

    pub fn set_deprecated(&mut self, tag: &str, deprecated: bool) {
        self.add_tag(tag).deprecated = Some(deprecated);
    }

    pub fn mark_fetched(&mut self, tag: &str, at: DateTime<Utc>) {
        self.add_tag(tag).fetched_at = Some(at);
    }

    pub fn add_relation(&mut self, kind: RelationKind, from: &str, to: &str) -> bool {
        match kind {
            RelationKind::Implication => self.add_implication(from, to),
            RelationKind::Alias => self.add_alias(from, to),
        }
    }

    pub fn add_implication(&mut self, antecedent: &str, consequent: &str) -> bool {
        if antecedent == consequent {
            return false;
        }
        self.add_tag(antecedent);
        self.add_tag(consequent);
        insert_edge(&mut self.implies, &mut self.implied_by, antecedent, consequent)
    }

    pub fn add_alias(&mut self, antecedent: &str, consequent: &str) -> bool {
        if antecedent == consequent {
            return false;
        }
        self.add_tag(antecedent);
        self.add_tag(consequent);
        insert_edge(&mut self.alias_to, &mut self.alias_from, antecedent, consequent)
    }

    pub fn remove_alias(&mut self, antecedent: &str, consequent: &str) -> bool {
        remove_edge(&mut self.alias_to, &mut self.alias_from, antecedent, consequent)
    }

    pub fn is_fetched(&self, tag: &str) -> bool {
        self.nodes.get(tag).is_some_and(TagNode::is_fetched)
    }

    pub fn deprecated_status(&self, tag: &str) -> Option<bool> {
        self.nodes.get(tag).and_then(|node| node.deprecated)
    }

    pub fn is_deprecated(&self, tag: &str) -> bool {
        self.deprecated_status(tag).unwrap_or(false)
    }

    /// Returns the tags from `tags` whose relations are not cached yet,
    /// deduplicated in input order.
    pub fn unfetched_tags<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tag in tags {
            let tag = tag.as_ref();
            if !self.is_fetched(tag) && seen.insert(tag.to_string()) {
                out.push(tag.to_string());
            }
        }
        out
    }

    /// Unfetched tags reachable from `tags` over cached implication and alias
    /// edges, `tags` themselves included. Fetched tags are walked through.
    pub fn unfetched_reachable<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let starts: Vec<String> = tags.into_iter().map(|t| t.as_ref().to_string()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::new();
        for tag in &starts {
            if seen.insert(tag.as_str()) {
                queue.push_back(tag.as_str());
            }
        }

        let mut out = Vec::new();
        while let Some(cur) = queue.pop_front() {
            if !self.is_fetched(cur) {
                out.push(cur.to_string());
            }
            let neighbors = self
                .implies
                .get(cur)
                .into_iter()
                .chain(self.alias_to.get(cur))
                .chain(self.alias_from.get(cur))
                .flatten();
            for next in neighbors {
                if seen.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }
        out
    }

    pub fn implications(&self, tag: &str, include_deprecated: bool) -> Vec<String> {
        self.filtered(self.implies.get(tag), include_deprecated)
    }

    /// Tags that directly imply `tag`.
    pub fn implied_by(&self, tag: &str, include_deprecated: bool) -> Vec<String> {
        self.filtered(self.implied_by.get(tag), include_deprecated)
    }

    pub fn transitive_implications(&self, tag: &str, include_deprecated: bool) -> BTreeSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(tag);
        queue.push_back(tag);

        let mut out = BTreeSet::new();
        while let Some(cur) = queue.pop_front() {
            let Some(targets) = self.implies.get(cur) else {
                continue;
            };
            for next in targets {
                if seen.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                    if self.keep(next, include_deprecated) {
                        out.insert(next.clone());
                    }
                }
            }
        }
        out
    }

    /// Canonical tags `tag` redirects to.
    pub fn aliases(&self, tag: &str, include_deprecated: bool) -> Vec<String> {
        self.filtered(self.alias_to.get(tag), include_deprecated)
    }

    /// Tags that redirect to `tag`.
    pub fn aliased_from(&self, tag: &str, include_deprecated: bool) -> Vec<String> {
        self.filtered(self.alias_from.get(tag), include_deprecated)
    }

    /// Every tag connected to `tag` through alias edges in either direction,
    /// `tag` included.
    pub fn alias_group(&self, tag: &str, include_deprecated: bool) -> BTreeSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(tag);
        queue.push_back(tag);

        while let Some(cur) = queue.pop_front() {
            let neighbors = self
                .alias_to
                .get(cur)
                .into_iter()
                .chain(self.alias_from.get(cur))
                .flatten();
            for next in neighbors {
                if seen.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }

        seen.into_iter()
            .filter(|t| self.keep(t, include_deprecated))
            .map(str::to_string)
            .collect()
    }

    /// A tag is canonical when it does not redirect anywhere.
    pub fn is_canonical(&self, tag: &str) -> bool {
        self.alias_to.get(tag).map_or(true, BTreeSet::is_empty)
    }

    pub fn semantic_relations(&self, tag: &str, include_deprecated: bool) -> SemanticRelations {
        let direct_implications = self.implications(tag, include_deprecated);
        let transitive_implications = self.transitive_implications(tag, include_deprecated);
        let implied_by = self.implied_by(tag, include_deprecated);
        let direct_aliases = self.aliases(tag, include_deprecated);
        let aliased_from = self.aliased_from(tag, include_deprecated);
        let alias_group = self.alias_group(tag, include_deprecated);

        let mut all_related = BTreeSet::new();
        all_related.extend(transitive_implications.iter().cloned());
        all_related.extend(direct_aliases.iter().cloned());
        all_related.extend(aliased_from.iter().cloned());
        all_related.extend(alias_group.iter().cloned());
        all_related.remove(tag);

        SemanticRelations {
            tag: tag.to_string(),
            direct_implications,
            transitive_implications,
            implied_by,
            direct_aliases,
            aliased_from,
            alias_group,
            is_canonical: self.is_canonical(tag),
            all_related,
        }
    }

    /// Closes `seeds` under implications and alias groups.
    ///
    /// Each seed contributes 1 to the frequency of every tag it reaches, so an
    /// implied tag counts at least as often as the tags implying it, and all
    /// members of an alias group end up with the same count.
    pub fn expand(&self, seeds: &[String], include_deprecated: bool) -> Expansion {
        let mut seed_list = Vec::new();
        let mut seen_seeds = HashSet::new();
        for seed in seeds {
            if seen_seeds.insert(seed.as_str()) {
                seed_list.push(seed.clone());
            }
        }

        let groups = self.alias_components();
        let mut frequencies: BTreeMap<String, usize> = BTreeMap::new();

        for seed in &seed_list {
            let mut reached: HashSet<&str> = HashSet::new();
            let mut queue = VecDeque::new();
            reached.insert(seed.as_str());
            queue.push_back(seed.as_str());

            while let Some(cur) = queue.pop_front() {
                let group = groups.get(cur).map(|members| members.as_slice()).unwrap_or(&[]);
                let implied = self.implies.get(cur).into_iter().flatten();
                for next in group.iter().copied().chain(implied.map(String::as_str)) {
                    if reached.insert(next) {
                        queue.push_back(next);
                    }
                }
            }

            for tag in reached {
                *frequencies.entry(tag.to_string()).or_default() += 1;
            }
        }

        frequencies.retain(|tag, _| self.keep(tag, include_deprecated));
        let tags = frequencies.keys().cloned().collect();
        debug!(
            seeds = seed_list.len(),
            expanded = frequencies.len(),
            "expanded tag set"
        );
        Expansion {
            seeds: seed_list,
            tags,
            frequencies,
        }
    }

    /// Collapses alias pairs that point at each other into a single edge and
    /// returns the kept `(antecedent, consequent)` directions.
    pub fn fix_bidirectional_aliases(&mut self) -> Vec<(String, String)> {
        let mut pairs = BTreeSet::new();
        for (from, targets) in &self.alias_to {
            for to in targets {
                let reverse = self.alias_to.get(to).is_some_and(|t| t.contains(from));
                if from < to && reverse {
                    pairs.insert((from.clone(), to.clone()));
                }
            }
        }

        let mut fixed = Vec::new();
        for (u, v) in pairs {
            warn!("found bidirectional alias: {u} <-> {v}");
            let (antecedent, consequent) = self.alias_direction(&u, &v);
            self.remove_alias(&u, &v);
            self.remove_alias(&v, &u);
            self.add_alias(&antecedent, &consequent);
            info!("kept alias direction {antecedent} -> {consequent}");
            fixed.push((antecedent, consequent));
        }
        fixed
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            tags: self.nodes.len(),
            implications: self.implies.values().map(BTreeSet::len).sum(),
            aliases: self.alias_to.values().map(BTreeSet::len).sum(),
            ..GraphStats::default()
        };
        for node in self.nodes.values() {
            if node.is_deprecated() {
                stats.deprecated += 1;
            }
            if let Some(at) = node.fetched_at {
                stats.fetched += 1;
                stats.oldest_fetch = Some(stats.oldest_fetch.map_or(at, |cur| cur.min(at)));
                stats.newest_fetch = Some(stats.newest_fetch.map_or(at, |cur| cur.max(at)));
            }
        }
        stats
    }

    /// Picks `(antecedent, consequent)` for a mutual alias pair: deprecated
    /// flag first, then canonical status ignoring the pair itself, then
    /// longer -> shorter, then later -> earlier in lexical order. The first
    /// two steps can override the plain length/lexical rule.
    fn alias_direction(&self, u: &str, v: &str) -> (String, String) {
        let pick = |antecedent: &str, consequent: &str| (antecedent.to_string(), consequent.to_string());

        match (self.is_deprecated(u), self.is_deprecated(v)) {
            (true, false) => return pick(u, v),
            (false, true) => return pick(v, u),
            _ => {}
        }

        let redirects_elsewhere = |tag: &str, partner: &str| {
            self.alias_to
                .get(tag)
                .is_some_and(|targets| targets.iter().any(|t| t != partner))
        };
        match (redirects_elsewhere(u, v), redirects_elsewhere(v, u)) {
            (true, false) => return pick(u, v),
            (false, true) => return pick(v, u),
            _ => {}
        }

        let (u_len, v_len) = (u.chars().count(), v.chars().count());
        if u_len != v_len {
            return if u_len > v_len { pick(u, v) } else { pick(v, u) };
        }
        if u > v {
            pick(u, v)
        } else {
            pick(v, u)
        }
    }

    fn alias_components(&self) -> HashMap<&str, Vec<&str>> {
        let mut sets = AliasSets::default();
        let mut members = BTreeSet::new();
        for (from, targets) in &self.alias_to {
            for to in targets {
                sets.join(from, to);
                members.insert(from.as_str());
                members.insert(to.as_str());
            }
        }

        let mut by_root: HashMap<&str, Vec<&str>> = HashMap::new();
        for tag in members {
            by_root.entry(sets.root(tag)).or_default().push(tag);
        }

        let mut out = HashMap::new();
        for group in by_root.into_values() {
            for tag in &group {
                out.insert(*tag, group.clone());
            }
        }
        out
    }

    fn keep(&self, tag: &str, include_deprecated: bool) -> bool {
        include_deprecated || !self.is_deprecated(tag)
    }

    fn filtered(&self, targets: Option<&BTreeSet<String>>, include_deprecated: bool) -> Vec<String> {
        targets
            .into_iter()
            .flatten()
            .filter(|t| self.keep(t, include_deprecated))
            .cloned()
            .collect()
    }
}

fn insert_edge(
    forward: &mut BTreeMap<String, BTreeSet<String>>,
    backward: &mut BTreeMap<String, BTreeSet<String>>,
    from: &str,
    to: &str,
) -> bool {
    let inserted = forward
        .entry(from.to_string())
        .or_default()
        .insert(to.to_string());
    backward
        .entry(to.to_string())
        .or_default()
        .insert(from.to_string());
    inserted
}

fn remove_edge(
    forward: &mut BTreeMap<String, BTreeSet<String>>,
    backward: &mut BTreeMap<String, BTreeSet<String>>,
    from: &str,
    to: &str,
) -> bool {
    let removed = forward.get_mut(from).is_some_and(|targets| targets.remove(to));
    if forward.get(from).is_some_and(BTreeSet::is_empty) {
        forward.remove(from);
    }
    if let Some(sources) = backward.get_mut(to) {
        sources.remove(from);
        if sources.is_empty() {
            backward.remove(to);
        }
    }
    removed
}

/// Disjoint sets of tag names. Only non-root tags have a parent entry.
#[derive(Default)]
struct AliasSets<'a> {
    parent: HashMap<&'a str, &'a str>,
}

impl<'a> AliasSets<'a> {
    fn root(&mut self, tag: &'a str) -> &'a str {
        let mut cur = tag;
        while let Some(&up) = self.parent.get(cur) {
            match self.parent.get(up).copied() {
                Some(grand) => {
                    self.parent.insert(cur, grand);
                    cur = grand;
                }
                None => cur = up,
            }
        }
        cur
    }

    // The lexically smaller root survives.
    fn join(&mut self, a: &'a str, b: &'a str) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra != rb {
            let (keep, merged) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(merged, keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::{RelationKind, TagGraph};

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn transitive_implications_follow_chains_and_survive_cycles() {
        let mut graph = TagGraph::new();
        graph.add_implication("kitten", "cat");
        graph.add_implication("cat", "animal");
        graph.add_implication("animal", "kitten");

        assert_eq!(graph.implications("kitten", false), vec!["cat"]);
        assert_eq!(
            graph.transitive_implications("kitten", false),
            set(&["cat", "animal"])
        );
    }

    #[test]
    fn self_edges_are_ignored() {
        let mut graph = TagGraph::new();
        assert!(!graph.add_implication("a", "a"));
        assert!(!graph.add_alias("a", "a"));
        assert_eq!(graph.stats().implications, 0);
    }

    #[test]
    fn deprecated_tags_are_filtered_unless_requested() {
        let mut graph = TagGraph::new();
        graph.add_implication("a", "b");
        graph.add_implication("b", "c");
        graph.set_deprecated("b", true);

        assert!(graph.implications("a", false).is_empty());
        assert_eq!(graph.implications("a", true), vec!["b"]);
        // Traversal still passes through the deprecated node.
        assert_eq!(graph.transitive_implications("a", false), set(&["c"]));
    }

    #[test]
    fn alias_directions_and_groups() {
        let mut graph = TagGraph::new();
        graph.add_alias("blonde", "blonde_hair");
        graph.add_alias("yellow_hair", "blonde_hair");

        assert_eq!(graph.aliases("blonde", false), vec!["blonde_hair"]);
        assert_eq!(
            graph.aliased_from("blonde_hair", false),
            vec!["blonde", "yellow_hair"]
        );
        assert_eq!(
            graph.alias_group("yellow_hair", false),
            set(&["blonde", "blonde_hair", "yellow_hair"])
        );
        assert!(graph.is_canonical("blonde_hair"));
        assert!(!graph.is_canonical("blonde"));
        assert!(graph.is_canonical("unknown_tag"));
    }

    #[test]
    fn semantic_relations_exclude_the_tag_itself() {
        let mut graph = TagGraph::new();
        graph.add_alias("kitty", "cat");
        graph.add_implication("cat", "animal");

        let rel = graph.semantic_relations("cat", false);
        assert_eq!(rel.direct_implications, vec!["animal"]);
        assert_eq!(rel.aliased_from, vec!["kitty"]);
        assert!(rel.implied_by.is_empty());
        assert_eq!(graph.implied_by("animal", false), vec!["cat"]);
        assert!(rel.direct_aliases.is_empty());
        assert!(rel.is_canonical);
        assert_eq!(rel.alias_group, set(&["cat", "kitty"]));
        assert_eq!(rel.all_related, set(&["animal", "kitty"]));
    }

    #[test]
    fn expansion_adds_implied_frequencies() {
        let mut graph = TagGraph::new();
        graph.add_implication("cat_ears", "animal_ears");
        graph.add_implication("fox_ears", "animal_ears");
        graph.add_implication("animal_ears", "ears");

        let expansion = graph.expand(&tags(&["cat_ears", "fox_ears", "solo"]), false);
        assert_eq!(
            expansion.tags,
            set(&["animal_ears", "cat_ears", "ears", "fox_ears", "solo"])
        );
        assert_eq!(expansion.frequency("cat_ears"), 1);
        assert_eq!(expansion.frequency("animal_ears"), 2);
        assert_eq!(expansion.frequency("ears"), 2);
        assert_eq!(expansion.frequency("solo"), 1);
        assert_eq!(
            expansion.most_common(2),
            vec![("animal_ears", 2), ("ears", 2)]
        );
    }

    #[test]
    fn expansion_does_not_double_count_diamonds() {
        let mut graph = TagGraph::new();
        graph.add_implication("a", "b");
        graph.add_implication("a", "c");
        graph.add_implication("b", "d");
        graph.add_implication("c", "d");

        let expansion = graph.expand(&tags(&["a", "a"]), false);
        assert_eq!(expansion.seeds, tags(&["a"]));
        assert_eq!(expansion.frequency("d"), 1);
    }

    #[test]
    fn alias_group_members_share_frequency() {
        let mut graph = TagGraph::new();
        graph.add_alias("kitty", "cat");
        graph.add_implication("cat", "animal");
        graph.add_implication("tabby", "cat");

        let expansion = graph.expand(&tags(&["kitty", "tabby"]), false);
        assert_eq!(expansion.frequency("kitty"), 2);
        assert_eq!(expansion.frequency("cat"), 2);
        assert_eq!(expansion.frequency("animal"), 2);
        assert_eq!(expansion.frequency("tabby"), 1);
    }

    #[test]
    fn expansion_drops_deprecated_tags() {
        let mut graph = TagGraph::new();
        graph.set_deprecated("old_tag", true);
        graph.add_implication("new_tag", "parent");

        let expansion = graph.expand(&tags(&["old_tag", "new_tag"]), false);
        assert_eq!(expansion.tags, set(&["new_tag", "parent"]));

        let with_deprecated = graph.expand(&tags(&["old_tag"]), true);
        assert_eq!(with_deprecated.tags, set(&["old_tag"]));
    }

    #[test]
    fn unknown_seeds_expand_to_themselves() {
        let graph = TagGraph::new();
        let expansion = graph.expand(&tags(&["mystery"]), false);
        assert_eq!(expansion.ranked(), vec![("mystery", 1)]);
    }

    #[test]
    fn bidirectional_aliases_prefer_deprecated_antecedent() {
        let mut graph = TagGraph::new();
        graph.add_alias("a", "b");
        graph.add_alias("b", "a");
        graph.set_deprecated("a", true);

        let fixed = graph.fix_bidirectional_aliases();
        assert_eq!(fixed, vec![("a".to_string(), "b".to_string())]);
        assert_eq!(graph.aliases("a", true), vec!["b"]);
        assert!(graph.aliases("b", true).is_empty());
    }

    #[test]
    fn bidirectional_aliases_fall_back_to_length_then_order() {
        let mut graph = TagGraph::new();
        graph.add_alias("long_name", "short");
        graph.add_alias("short", "long_name");
        graph.add_alias("abc", "abd");
        graph.add_alias("abd", "abc");

        let fixed = graph.fix_bidirectional_aliases();
        assert_eq!(
            fixed,
            vec![
                ("abd".to_string(), "abc".to_string()),
                ("long_name".to_string(), "short".to_string()),
            ]
        );
        assert_eq!(graph.stats().aliases, 2);
    }

    #[test]
    fn bidirectional_aliases_prefer_tag_that_redirects_elsewhere() {
        let mut graph = TagGraph::new();
        graph.add_alias("x", "yy");
        graph.add_alias("yy", "x");
        graph.add_alias("yy", "zzz");

        let fixed = graph.fix_bidirectional_aliases();
        assert_eq!(fixed, vec![("yy".to_string(), "x".to_string())]);
    }

    #[test]
    fn unfetched_reachable_walks_through_fetched_tags() {
        let mut graph = TagGraph::new();
        let now = Utc::now();
        graph.add_implication("a", "b");
        graph.add_implication("b", "c");
        graph.add_alias("kitty", "a");
        graph.mark_fetched("a", now);
        graph.mark_fetched("b", now);

        assert_eq!(graph.unfetched_reachable(["a"]), tags(&["kitty", "c"]));
        graph.mark_fetched("c", now);
        graph.mark_fetched("kitty", now);
        assert!(graph.unfetched_reachable(["a"]).is_empty());
        assert_eq!(graph.unfetched_reachable(["z", "z"]), tags(&["z"]));
    }

    #[test]
    fn unfetched_tags_and_stats() {
        let mut graph = TagGraph::new();
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        graph.mark_fetched("a", late);
        graph.mark_fetched("b", early);
        graph.set_deprecated("c", true);
        graph.add_relation(RelationKind::Implication, "a", "b");

        assert_eq!(graph.unfetched_tags(["a", "c", "d", "c"]), tags(&["c", "d"]));

        let stats = graph.stats();
        assert_eq!(stats.tags, 3);
        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.deprecated, 1);
        assert_eq!(stats.implications, 1);
        assert_eq!(stats.oldest_fetch, Some(early));
        assert_eq!(stats.newest_fetch, Some(late));
    }

    #[test]
    fn relation_kind_round_trips_through_names() {
        for kind in [RelationKind::Implication, RelationKind::Alias] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RelationKind::parse("tag"), None);
    }
}
