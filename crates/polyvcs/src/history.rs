//! Backend-independent history ordering.
//!
//! Each backend loads the reachable part of its native history into a
//! [`CommitGraph`]. [`TopoWalk`] then orders it newest first: a commit is
//! only emitted after every included child has been emitted, and among the
//! commits that are ready the one with the highest `(timestamp, revision)`
//! key goes first. The result does not depend on the order in which the
//! native tool reported commits.

use std::{
    collections::{BinaryHeap, HashMap, HashSet},
    sync::Arc,
};

use crate::error::VcsError;
use crate::types::{LogEntry, Revision};

/// One node of the history graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNode {
    pub parents: Vec<Revision>,
    /// Ordering key, normally the commit time in seconds
    pub timestamp: i64,
    /// Fully decoded entry when the native listing already provided it
    pub entry: Option<LogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    nodes: HashMap<Revision, CommitNode>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; inserting a revision twice unions its parents
    pub fn insert(&mut self, revision: Revision, node: CommitNode) {
        match self.nodes.get_mut(&revision) {
            Some(existing) => {
                for parent in node.parents {
                    if !existing.parents.contains(&parent) {
                        existing.parents.push(parent);
                    }
                }
                if existing.entry.is_none() {
                    existing.entry = node.entry;
                }
            }
            None => {
                self.nodes.insert(revision, node);
            }
        }
    }

    pub fn insert_entry(&mut self, entry: LogEntry) {
        let node = CommitNode {
            parents: entry.parents.clone(),
            timestamp: entry.date.timestamp(),
            entry: None,
        };
        let revision = entry.revision.clone();
        self.insert(
            revision,
            CommitNode {
                entry: Some(entry),
                ..node
            },
        );
    }

    pub fn get(&self, revision: &Revision) -> Option<&CommitNode> {
        self.nodes.get(revision)
    }

    pub fn contains(&self, revision: &Revision) -> bool {
        self.nodes.contains_key(revision)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn edges<'a>(&'a self, revision: &Revision, first_parent: bool) -> &'a [Revision] {
        match self.nodes.get(revision) {
            Some(node) if first_parent => &node.parents[..node.parents.len().min(1)],
            Some(node) => &node.parents,
            None => &[],
        }
    }

    /// Revisions reachable from `roots` (inclusive) without entering `blocked`
    fn reachable(
        &self,
        roots: &[Revision],
        first_parent: bool,
        blocked: &HashSet<Revision>,
    ) -> HashSet<Revision> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Revision> = roots
            .iter()
            .filter(|r| self.contains(r) && !blocked.contains(*r))
            .cloned()
            .collect();
        while let Some(rev) = stack.pop() {
            if !seen.insert(rev.clone()) {
                continue;
            }
            for parent in self.edges(&rev, first_parent) {
                if self.contains(parent) && !blocked.contains(parent) && !seen.contains(parent) {
                    stack.push(parent.clone());
                }
            }
        }
        seen
    }

    /// Drop parents that are already reachable through another parent of
    /// the same node. Reachability is unchanged.
    pub fn prune_implied_parents(&mut self) {
        let forks: Vec<Revision> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parents.len() > 1)
            .map(|(rev, _)| rev.clone())
            .collect();
        for rev in forks {
            let Some(parents) = self.nodes.get(&rev).map(|n| n.parents.clone()) else {
                continue;
            };
            let none = HashSet::new();
            let kept: Vec<Revision> = parents
                .iter()
                .filter(|p| {
                    !parents.iter().any(|q| {
                        q != *p && self.reachable(std::slice::from_ref(q), false, &none).contains(*p)
                    })
                })
                .cloned()
                .collect();
            if let Some(node) = self.nodes.get_mut(&rev) {
                node.parents = kept;
            }
        }
    }

    /// Ancestry of every stop is excluded, following all parents.
    pub fn walk(
        self: &Arc<Self>,
        starts: &[Revision],
        stops: &[Revision],
        first_parent: bool,
    ) -> TopoWalk {
        let excluded = self.reachable(stops, false, &HashSet::new());
        let included = self.reachable(starts, first_parent, &excluded);

        let mut pending: HashMap<Revision, usize> =
            included.iter().map(|r| (r.clone(), 0)).collect();
        for rev in &included {
            for parent in self.edges(rev, first_parent) {
                if let Some(count) = pending.get_mut(parent) {
                    *count += 1;
                }
            }
        }

        let ready = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(rev, _)| self.key(rev))
            .collect();

        TopoWalk {
            graph: Arc::clone(self),
            pending,
            ready,
            first_parent,
        }
    }

    fn key(&self, revision: &Revision) -> (i64, Revision) {
        let timestamp = self.nodes.get(revision).map_or(i64::MIN, |n| n.timestamp);
        (timestamp, revision.clone())
    }
}

/// Lazy child-before-parent ordering over a [`CommitGraph`]
#[derive(Debug)]
pub struct TopoWalk {
    graph: Arc<CommitGraph>,
    pending: HashMap<Revision, usize>,
    ready: BinaryHeap<(i64, Revision)>,
    first_parent: bool,
}

impl Iterator for TopoWalk {
    type Item = Revision;

    fn next(&mut self) -> Option<Revision> {
        let (_, rev) = self.ready.pop()?;
        for parent in self.graph.edges(&rev, self.first_parent) {
            if let Some(count) = self.pending.get_mut(parent) {
                *count -= 1;
                if *count == 0 {
                    self.ready.push(self.graph.key(parent));
                }
            }
        }
        Some(rev)
    }
}

/// Supplies entries the graph was loaded without
pub(crate) trait EntrySource: Send + Sync {
    fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError>;
}

/// Which revisions survive a path filter
#[derive(Debug, Clone)]
pub(crate) enum PathFilter {
    Revisions(HashSet<Revision>),
    /// Match on revision number regardless of the path part
    Numbers(HashSet<u64>),
}

impl PathFilter {
    fn matches(&self, revision: &Revision) -> bool {
        match self {
            PathFilter::Revisions(set) => set.contains(revision),
            PathFilter::Numbers(set) => revision.number().is_some_and(|n| set.contains(&n)),
        }
    }
}

/// Lazy, single-pass sequence of log entries.
///
/// Ordering happens first; the path filter, merge filter and limit are
/// applied to the ordered sequence.
pub struct Log<'a> {
    walk: Option<TopoWalk>,
    source: &'a dyn EntrySource,
    filter: Option<PathFilter>,
    merges: Option<bool>,
    remaining: Option<usize>,
    refs: Arc<HashMap<Revision, Vec<String>>>,
    /// Graph key → revision reported to the caller, when they differ
    display: HashMap<Revision, Revision>,
}

impl std::fmt::Debug for Log<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("remaining", &self.remaining)
            .field("merges", &self.merges)
            .finish_non_exhaustive()
    }
}

impl<'a> Log<'a> {
    pub(crate) fn new(
        walk: TopoWalk,
        source: &'a dyn EntrySource,
        filter: Option<PathFilter>,
        merges: Option<bool>,
        limit: Option<usize>,
        refs: Arc<HashMap<Revision, Vec<String>>>,
    ) -> Self {
        Self {
            walk: Some(walk),
            source,
            filter,
            merges,
            remaining: limit,
            refs,
            display: HashMap::new(),
        }
    }

    /// Report graph keys under different revisions
    pub(crate) fn with_display(mut self, display: HashMap<Revision, Revision>) -> Self {
        self.display = display;
        self
    }

    /// A log with no entries
    pub(crate) fn empty(source: &'a dyn EntrySource) -> Self {
        Self {
            walk: None,
            source,
            filter: None,
            merges: None,
            remaining: Some(0),
            refs: Arc::default(),
            display: HashMap::new(),
        }
    }

    fn keep(&self, graph: &CommitGraph, rev: &Revision) -> bool {
        if let Some(filter) = &self.filter {
            if !filter.matches(rev) {
                return false;
            }
        }
        match self.merges {
            Some(want_merges) => {
                let is_merge = graph.get(rev).is_some_and(|n| n.parents.len() > 1);
                is_merge == want_merges
            }
            None => true,
        }
    }
}

impl Iterator for Log<'_> {
    type Item = Result<LogEntry, VcsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        let walk = self.walk.as_mut()?;
        let graph = Arc::clone(&walk.graph);
        let rev = loop {
            let rev = self.walk.as_mut()?.next()?;
            if self.keep(&graph, &rev) {
                break rev;
            }
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        let entry = match graph.get(&rev).and_then(|n| n.entry.clone()) {
            Some(entry) => Ok(entry),
            None => {
                let shown = self.display.get(&rev).unwrap_or(&rev);
                self.source.load_entry(shown)
            }
        };
        Some(entry.map(|mut entry| {
            if let Some(names) = self.refs.get(&entry.revision) {
                entry.refs = names.clone();
            }
            entry
        }))
    }
}

/// Invert name → revision maps into revision → sorted names
pub(crate) fn refs_by_revision<'m, I>(maps: I) -> HashMap<Revision, Vec<String>>
where
    I: IntoIterator<Item = &'m std::collections::BTreeMap<String, Revision>>,
{
    let mut out: HashMap<Revision, Vec<String>> = HashMap::new();
    for map in maps {
        for (name, rev) in map {
            out.entry(rev.clone()).or_default().push(name.clone());
        }
    }
    for names in out.values_mut() {
        names.sort();
        names.dedup();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    struct NoSource;

    impl EntrySource for NoSource {
        fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
            Err(VcsError::unknown_revision(revision))
        }
    }

    fn entry(n: u64, parents: &[u64], timestamp: i64) -> LogEntry {
        LogEntry {
            revision: Revision::Number(n),
            parents: parents.iter().map(|p| Revision::Number(*p)).collect(),
            author: "Test User <test@example.com>".into(),
            date: DateTime::from_timestamp(timestamp, 0).unwrap(),
            message: format!("commit {n}"),
            refs: Vec::new(),
        }
    }

    /// Two histories in one graph. The one reachable from 15 contains a
    /// merge at 10 of 7 and 8, which fork from 4; 1, 3, 6 and 9 form an
    /// unrelated line.
    fn fifteen() -> Arc<CommitGraph> {
        let mut graph = CommitGraph::new();
        for e in [
            entry(1, &[], 1),
            entry(2, &[], 2),
            entry(3, &[1], 3),
            entry(4, &[2], 4),
            entry(5, &[4], 5),
            entry(6, &[3], 6),
            entry(7, &[5], 7),
            entry(8, &[4], 8),
            entry(9, &[6], 9),
            entry(10, &[7, 8], 10),
            entry(11, &[10], 11),
            entry(12, &[11], 12),
            entry(13, &[12], 13),
            entry(14, &[13], 14),
            entry(15, &[14], 15),
        ] {
            graph.insert_entry(e);
        }
        Arc::new(graph)
    }

    fn numbers(walk: impl Iterator<Item = Revision>) -> Vec<u64> {
        walk.filter_map(|r| r.number()).collect()
    }

    #[test]
    fn test_walk_from_tip() {
        let graph = fifteen();
        let order = numbers(graph.walk(&[Revision::Number(15)], &[], false));
        assert_eq!(order, vec![15, 14, 13, 12, 11, 10, 8, 7, 5, 4, 2]);
    }

    #[test]
    fn test_walk_first_parent() {
        let graph = fifteen();
        let order = numbers(graph.walk(&[Revision::Number(15)], &[], true));
        assert_eq!(order, vec![15, 14, 13, 12, 11, 10, 7, 5, 4, 2]);
    }

    #[test]
    fn test_walk_with_stop_excludes_ancestry() {
        let graph = fifteen();
        let order = numbers(graph.walk(&[Revision::Number(15)], &[Revision::Number(7)], false));
        assert_eq!(order, vec![15, 14, 13, 12, 11, 10, 8]);
    }

    #[test]
    fn test_walk_multiple_starts_deduplicates() {
        let graph = fifteen();
        let order = numbers(graph.walk(
            &[Revision::Number(9), Revision::Number(15), Revision::Number(12)],
            &[],
            false,
        ));
        assert_eq!(order, vec![15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_child_precedes_parent_despite_clock_skew() {
        let mut graph = CommitGraph::new();
        graph.insert_entry(entry(1, &[], 100));
        graph.insert_entry(entry(2, &[1], 50));
        graph.insert_entry(entry(3, &[2], 75));
        let order = numbers(Arc::new(graph).walk(&[Revision::Number(3)], &[], false));
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_revision() {
        let mut graph = CommitGraph::new();
        graph.insert_entry(entry(1, &[], 10));
        graph.insert_entry(entry(2, &[1], 20));
        graph.insert_entry(entry(3, &[1], 20));
        graph.insert_entry(entry(4, &[2, 3], 30));
        let graph = Arc::new(graph);
        let first = numbers(graph.walk(&[Revision::Number(4)], &[], false));
        let second = numbers(graph.walk(&[Revision::Number(4)], &[], false));
        assert_eq!(first, vec![4, 3, 2, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_start_yields_nothing() {
        let graph = fifteen();
        assert_eq!(graph.walk(&[Revision::Number(99)], &[], false).count(), 0);
    }

    #[test]
    fn test_log_filters_then_limits() {
        let graph = fifteen();
        let walk = graph.walk(&[Revision::Number(15)], &[], false);
        let filter = PathFilter::Numbers([13, 10, 8, 5, 2].into_iter().collect());
        let log = Log::new(walk, &NoSource, Some(filter), None, Some(3), Arc::default());
        let revs: Vec<u64> = log
            .map(|e| e.unwrap().revision.number().unwrap())
            .collect();
        assert_eq!(revs, vec![13, 10, 8]);
    }

    #[test]
    fn test_log_merge_filter() {
        let graph = fifteen();
        let only_merges: Vec<u64> = Log::new(
            graph.walk(&[Revision::Number(15)], &[], false),
            &NoSource,
            None,
            Some(true),
            None,
            Arc::default(),
        )
        .map(|e| e.unwrap().revision.number().unwrap())
        .collect();
        assert_eq!(only_merges, vec![10]);

        let no_merges = Log::new(
            graph.walk(&[Revision::Number(15)], &[], false),
            &NoSource,
            None,
            Some(false),
            None,
            Arc::default(),
        )
        .count();
        assert_eq!(no_merges, 10);
    }

    #[test]
    fn test_log_attaches_refs_and_loads_missing_entries() {
        let mut graph = CommitGraph::new();
        graph.insert(
            Revision::Number(1),
            CommitNode {
                parents: vec![],
                timestamp: 1,
                entry: None,
            },
        );
        let refs = Arc::new(refs_by_revision([&std::collections::BTreeMap::from([(
            "main".to_string(),
            Revision::Number(1),
        )])]));
        let graph = Arc::new(graph);

        struct One;
        impl EntrySource for One {
            fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
                let mut e = entry(revision.number().unwrap_or(0), &[], 1);
                e.message = "loaded".into();
                Ok(e)
            }
        }

        let entries: Vec<LogEntry> = Log::new(
            graph.walk(&[Revision::Number(1)], &[], false),
            &One,
            None,
            None,
            None,
            refs,
        )
        .collect::<Result<_, _>>()
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "loaded");
        assert_eq!(entries[0].refs, vec!["main".to_string()]);
    }

    #[test]
    fn test_prune_implied_parents() {
        let mut graph = CommitGraph::new();
        graph.insert_entry(entry(1, &[], 1));
        graph.insert_entry(entry(2, &[1], 2));
        graph.insert_entry(entry(3, &[1], 3));
        graph.insert_entry(entry(4, &[1, 2], 4));
        graph.insert_entry(entry(5, &[2, 3], 5));
        graph.prune_implied_parents();
        assert_eq!(graph.get(&Revision::Number(4)).unwrap().parents, vec![Revision::Number(2)]);
        assert_eq!(graph.get(&Revision::Number(5)).unwrap().parents.len(), 2);
    }

    #[test]
    fn test_log_reports_display_revisions() {
        let mut graph = CommitGraph::new();
        for n in 1..=2 {
            graph.insert(
                Revision::Number(n),
                CommitNode {
                    parents: (n > 1).then(|| Revision::Number(n - 1)).into_iter().collect(),
                    timestamp: n as i64,
                    entry: None,
                },
            );
        }
        struct Echo;
        impl EntrySource for Echo {
            fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
                let mut e = entry(revision.number().unwrap_or(0), &[], 1);
                e.revision = revision.clone();
                Ok(e)
            }
        }
        let graph = Arc::new(graph);
        let display = HashMap::from([(Revision::Number(2), Revision::path_at("trunk", 2))]);
        let revs: Vec<Revision> = Log::new(
            graph.walk(&[Revision::Number(2)], &[], false),
            &Echo,
            None,
            None,
            None,
            Arc::default(),
        )
        .with_display(display)
        .map(|e| e.unwrap().revision)
        .collect();
        assert_eq!(revs, vec![Revision::path_at("trunk", 2), Revision::Number(1)]);
    }

    #[test]
    fn test_empty_log() {
        assert_eq!(Log::empty(&NoSource).count(), 0);
    }
}
