//! Memory lineage: which memories were derived from which.
//!
//! Models memories as nodes in a directed acyclic graph. An edge
//! `parent → child` means "child was derived from parent". The graph backs
//! compliance operations: cascade deletion and revocation of a data source.
//!
//! Cycles are rejected at insertion time, so every traversal terminates.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::provenance::Provenance;
use crate::error::{TrustError, TrustResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Track derivations when memories are indexed.
    pub enabled: bool,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Lineage facts about one memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageMetadata {
    pub id: String,
    /// Data sources (sessions, documents) the memory inherits.
    pub source_ids: Vec<String>,
    /// Memories this one was derived from.
    pub derived_from: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LineageMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_ids: Vec::new(),
            derived_from: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_ids = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn derived_from<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_from = parents.into_iter().map(Into::into).collect();
        self
    }
}

/// Aggregate view over the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageStats {
    pub total_memories: usize,
    /// Memories with no parents.
    pub root_memories: usize,
    pub derived_memories: usize,
    pub max_depth: usize,
    pub memories_by_source: HashMap<String, usize>,
}

/// Outcome of [`LineageManager::regenerate_from_source`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationPlan {
    /// Memories whose only source was revoked; removed from the graph.
    pub deleted: Vec<String>,
    /// Memories that keep other sources and must be rebuilt by the caller.
    pub needs_regeneration: Vec<String>,
}

// ---------------------------------------------------------------------------
// LineageGraph
// ---------------------------------------------------------------------------

/// Derivation graph over memory ids.
///
/// Edges are stored twice, as `parent → {children}` and `child → {parents}`.
/// Parents need not be tracked nodes themselves.
#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    nodes: HashMap<String, LineageMetadata>,
    /// `parent_id → {child_id, ...}`
    children: HashMap<String, HashSet<String>>,
    /// `child_id → {parent_id, ...}`
    parents: HashMap<String, HashSet<String>>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a memory and its derivation edges.
    ///
    /// Re-tracking an id replaces its parent set. Duplicate parents collapse
    /// into one edge. Returns [`TrustError::LineageCycle`] if any parent is
    /// the memory itself or one of its descendants; the graph is left
    /// untouched in that case.
    pub fn track_memory(&mut self, mut metadata: LineageMetadata) -> TrustResult<()> {
        if metadata.id.is_empty() {
            return Err(TrustError::invalid("memory id is required"));
        }
        let id = metadata.id.clone();

        let mut seen = HashSet::new();
        metadata.derived_from.retain(|p| seen.insert(p.clone()));
        self.check_parents(&id, &metadata.derived_from)?;

        if let Some(old_parents) = self.parents.remove(&id) {
            for parent in old_parents {
                self.unlink_child(&parent, &id);
            }
        }

        for parent in &metadata.derived_from {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(id.clone());
            self.parents
                .entry(id.clone())
                .or_default()
                .insert(parent.clone());
        }

        self.nodes.insert(id, metadata);
        Ok(())
    }

    /// Validate that deriving `id` from `parents` keeps the graph acyclic.
    pub fn check_parents(&self, id: &str, parents: &[String]) -> TrustResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let descendants: HashSet<String> = self.derived(id).into_iter().collect();
        for parent in parents {
            if parent == id || descendants.contains(parent) {
                return Err(TrustError::LineageCycle {
                    child: id.to_string(),
                    parent: parent.clone(),
                });
            }
        }
        Ok(())
    }

    fn unlink_child(&mut self, parent: &str, child: &str) {
        if let Some(set) = self.children.get_mut(parent) {
            set.remove(child);
            if set.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    /// Drop the `parent → child` edge from both the adjacency map and the
    /// child's recorded `derived_from`.
    fn unlink_parent(&mut self, child: &str, parent: &str) {
        if let Some(set) = self.parents.get_mut(child) {
            set.remove(parent);
            if set.is_empty() {
                self.parents.remove(child);
            }
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.derived_from.retain(|p| p != parent);
        }
    }

    /// Every memory transitively derived from `id`, each once, excluding `id`.
    pub fn derived(&self, id: &str) -> Vec<String> {
        Self::walk(&self.children, id)
    }

    /// Every ancestor of `id`, each once, excluding `id`.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        Self::walk(&self.parents, id)
    }

    fn walk(edges: &HashMap<String, HashSet<String>>, start: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        let mut stack = vec![start];
        visited.insert(start);

        while let Some(current) = stack.pop() {
            if let Some(next) = edges.get(current) {
                for n in next {
                    if visited.insert(n.as_str()) {
                        result.push(n.clone());
                        stack.push(n.as_str());
                    }
                }
            }
        }
        result
    }

    /// Direct children of `id`.
    pub fn children(&self, id: &str) -> Vec<String> {
        self.children
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct parents of `id`.
    pub fn parents(&self, id: &str) -> Vec<String> {
        self.parents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tracked memories citing `source_id`, sorted by id.
    pub fn memories_by_source(&self, source_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|m| m.source_ids.iter().any(|s| s == source_id))
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop a node and every edge touching it. Descendants are not removed.
    pub fn remove_memory(&mut self, id: &str) -> bool {
        let existed = self.nodes.remove(id).is_some();

        if let Some(children) = self.children.remove(id) {
            for child in children {
                self.unlink_parent(&child, id);
            }
        }
        if let Some(parents) = self.parents.remove(id) {
            for parent in parents {
                self.unlink_child(&parent, id);
            }
        }
        existed
    }

    /// Drop `source_id` from a node's source list.
    fn forget_source(&mut self, id: &str, source_id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.source_ids.retain(|s| s != source_id);
        }
    }

    /// Longest parent chain above `id`; 0 for a root.
    pub fn depth(&self, id: &str) -> usize {
        let mut memo = HashMap::new();
        self.depth_memo(id, &mut memo)
    }

    fn depth_memo(&self, id: &str, memo: &mut HashMap<String, usize>) -> usize {
        if let Some(&d) = memo.get(id) {
            return d;
        }
        let depth = match self.parents.get(id) {
            None => 0,
            Some(parents) => {
                let parents: Vec<&String> = parents.iter().collect();
                parents
                    .into_iter()
                    .map(|p| self.depth_memo(p, memo))
                    .max()
                    .map_or(0, |d| d + 1)
            }
        };
        memo.insert(id.to_string(), depth);
        depth
    }

    pub fn stats(&self) -> LineageStats {
        let mut memo = HashMap::new();
        let mut stats = LineageStats {
            total_memories: self.nodes.len(),
            ..Default::default()
        };

        for (id, node) in &self.nodes {
            if self.parents.contains_key(id) {
                stats.derived_memories += 1;
            } else {
                stats.root_memories += 1;
            }
            stats.max_depth = stats.max_depth.max(self.depth_memo(id, &mut memo));
            for source in &node.source_ids {
                *stats.memories_by_source.entry(source.clone()).or_default() += 1;
            }
        }
        stats
    }

    pub fn get(&self, id: &str) -> Option<&LineageMetadata> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// LineageManager
// ---------------------------------------------------------------------------

/// Thread-safe lineage tracker exposing the compliance operations.
///
/// The manager only maintains the graph. Callers delete the corresponding
/// records from the semantic store.
#[derive(Debug, Default)]
pub struct LineageManager {
    graph: RwLock<LineageGraph>,
}

impl LineageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a memory created from `provenance`, derived from `derived_from`.
    pub fn track_memory_creation(
        &self,
        memory_id: &str,
        provenance: &Provenance,
        derived_from: &[String],
    ) -> TrustResult<()> {
        let metadata = LineageMetadata {
            id: memory_id.to_string(),
            source_ids: provenance.sources.clone(),
            derived_from: derived_from.to_vec(),
            created_at: provenance.created_at,
        };
        self.graph.write().track_memory(metadata)
    }

    pub fn track_memory(&self, metadata: LineageMetadata) -> TrustResult<()> {
        self.graph.write().track_memory(metadata)
    }

    /// See [`LineageGraph::check_parents`].
    pub fn check_parents(&self, memory_id: &str, derived_from: &[String]) -> TrustResult<()> {
        self.graph.read().check_parents(memory_id, derived_from)
    }

    pub fn get_derived_memories(&self, memory_id: &str) -> Vec<String> {
        self.graph.read().derived(memory_id)
    }

    pub fn get_parent_memories(&self, memory_id: &str) -> Vec<String> {
        self.graph.read().ancestors(memory_id)
    }

    pub fn get_memories_by_source(&self, source_id: &str) -> Vec<String> {
        self.graph.read().memories_by_source(source_id)
    }

    pub fn remove_memory(&self, memory_id: &str) -> bool {
        self.graph.write().remove_memory(memory_id)
    }

    /// Ids that [`delete_memory_with_lineage`](Self::delete_memory_with_lineage)
    /// would remove, without removing them.
    pub fn deletion_set(&self, memory_id: &str, cascade: bool) -> Vec<String> {
        let graph = self.graph.read();
        Self::collect_deletion(&graph, memory_id, cascade)
    }

    fn collect_deletion(graph: &LineageGraph, memory_id: &str, cascade: bool) -> Vec<String> {
        let mut ids = vec![memory_id.to_string()];
        if cascade {
            ids.extend(graph.derived(memory_id));
        }
        ids
    }

    /// Remove `memory_id` (and with `cascade`, every descendant) from the graph.
    /// Returns the removed ids, starting with `memory_id`.
    pub fn delete_memory_with_lineage(&self, memory_id: &str, cascade: bool) -> Vec<String> {
        let mut graph = self.graph.write();
        let ids = Self::collect_deletion(&graph, memory_id, cascade);
        for id in &ids {
            graph.remove_memory(id);
        }
        ids
    }

    /// Ids that [`revoke_data_source`](Self::revoke_data_source) would remove.
    pub fn revocation_set(&self, source_id: &str) -> Vec<String> {
        let graph = self.graph.read();
        Self::collect_revocation(&graph, source_id)
    }

    fn collect_revocation(graph: &LineageGraph, source_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for memory_id in graph.memories_by_source(source_id) {
            for id in Self::collect_deletion(graph, &memory_id, true) {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Forget everything sourced from `source_id`, cascading to derivations.
    /// Returns every removed id once.
    pub fn revoke_data_source(&self, source_id: &str) -> Vec<String> {
        let mut graph = self.graph.write();
        let ids = Self::collect_revocation(&graph, source_id);
        for id in &ids {
            graph.remove_memory(id);
        }
        ids
    }

    /// Narrower revocation: memories backed only by `source_id` are removed
    /// (without cascade); memories with other sources drop the revoked id and
    /// are reported for regeneration.
    pub fn regenerate_from_source(&self, source_id: &str) -> RegenerationPlan {
        let mut graph = self.graph.write();
        let mut plan = RegenerationPlan::default();

        for memory_id in graph.memories_by_source(source_id) {
            let has_other_sources = graph
                .get(&memory_id)
                .map(|m| m.source_ids.iter().any(|s| s != source_id))
                .unwrap_or(false);

            if has_other_sources {
                graph.forget_source(&memory_id, source_id);
                plan.needs_regeneration.push(memory_id);
            } else {
                graph.remove_memory(&memory_id);
                plan.deleted.push(memory_id);
            }
        }
        plan
    }

    pub fn get_lineage_depth(&self, memory_id: &str) -> usize {
        self.graph.read().depth(memory_id)
    }

    pub fn get_lineage_stats(&self) -> LineageStats {
        self.graph.read().stats()
    }

    pub fn children(&self, memory_id: &str) -> Vec<String> {
        self.graph.read().children(memory_id)
    }

    pub fn parents(&self, memory_id: &str) -> Vec<String> {
        self.graph.read().parents(memory_id)
    }

    pub fn get(&self, memory_id: &str) -> Option<LineageMetadata> {
        self.graph.read().get(memory_id).cloned()
    }

    pub fn contains(&self, memory_id: &str) -> bool {
        self.graph.read().contains(memory_id)
    }

    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, sources: &[&str], parents: &[&str]) -> LineageMetadata {
        LineageMetadata::new(id)
            .with_sources(sources.iter().copied())
            .derived_from(parents.iter().copied())
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    // Diamond: a -> b, a -> c, b -> d, c -> d
    fn diamond() -> LineageGraph {
        let mut g = LineageGraph::new();
        g.track_memory(node("a", &["s1"], &[])).unwrap();
        g.track_memory(node("b", &["s1"], &["a"])).unwrap();
        g.track_memory(node("c", &["s2"], &["a"])).unwrap();
        g.track_memory(node("d", &["s2"], &["b", "c"])).unwrap();
        g
    }

    #[test]
    fn test_diamond_descendants_listed_once() {
        let g = diamond();
        assert_eq!(sorted(g.derived("a")), vec!["b", "c", "d"]);
        assert_eq!(sorted(g.ancestors("d")), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_depth_and_stats() {
        let g = diamond();
        assert_eq!(g.depth("a"), 0);
        assert_eq!(g.depth("d"), 2);

        let stats = g.stats();
        assert_eq!(stats.total_memories, 4);
        assert_eq!(stats.root_memories, 1);
        assert_eq!(stats.derived_memories, 3);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.memories_by_source["s1"], 2);
        assert_eq!(stats.memories_by_source["s2"], 2);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut g = diamond();
        let err = g.track_memory(node("a", &["s1"], &["d"])).unwrap_err();
        assert!(matches!(err, TrustError::LineageCycle { .. }));
        assert!(g.parents("a").is_empty());
        assert_eq!(g.depth("d"), 2);
    }

    #[test]
    fn test_self_derivation_rejected() {
        let mut g = LineageGraph::new();
        assert!(g.track_memory(node("x", &[], &["x"])).is_err());
        assert!(!g.contains("x"));
    }

    #[test]
    fn test_retrack_replaces_parents_without_duplicates() {
        let mut g = diamond();
        g.track_memory(node("d", &["s2"], &["b", "b"])).unwrap();
        assert_eq!(g.parents("d"), vec!["b"]);
        assert!(g.children("c").is_empty());
        assert_eq!(g.children("b"), vec!["d"]);
    }

    #[test]
    fn test_remove_memory_clears_both_directions() {
        let mut g = diamond();
        assert!(g.remove_memory("b"));
        assert!(!g.children("a").contains(&"b".to_string()));
        assert_eq!(g.parents("d"), vec!["c"]);
        assert!(!g.remove_memory("b"));
    }

    #[test]
    fn test_manager_cascade_delete() {
        let m = LineageManager::new();
        for n in [
            node("a", &["s1"], &[]),
            node("b", &["s1"], &["a"]),
            node("c", &["s2"], &["b"]),
        ] {
            m.track_memory(n).unwrap();
        }

        let deleted = m.delete_memory_with_lineage("b", true);
        assert_eq!(deleted[0], "b");
        assert_eq!(sorted(deleted), vec!["b", "c"]);
        assert!(m.contains("a"));
        assert!(m.get_derived_memories("a").is_empty());
    }

    #[test]
    fn test_manager_non_cascade_delete_keeps_children() {
        let m = LineageManager::new();
        m.track_memory(node("a", &[], &[])).unwrap();
        m.track_memory(node("b", &[], &["a"])).unwrap();

        assert_eq!(m.delete_memory_with_lineage("a", false), vec!["a"]);
        assert!(m.contains("b"));
        assert!(m.parents("b").is_empty());
        assert!(m.get("b").unwrap().derived_from.is_empty());
    }

    #[test]
    fn test_remove_parent_keeps_other_parents_in_metadata() {
        let mut g = diamond();
        g.remove_memory("b");
        assert_eq!(g.parents("d"), vec!["c"]);
        assert_eq!(g.get("d").unwrap().derived_from, vec!["c"]);
    }

    #[test]
    fn test_regenerate_from_source() {
        let m = LineageManager::new();
        m.track_memory(node("only", &["rev"], &[])).unwrap();
        m.track_memory(node("shared", &["rev", "keep"], &[])).unwrap();

        let plan = m.regenerate_from_source("rev");
        assert_eq!(plan.deleted, vec!["only"]);
        assert_eq!(plan.needs_regeneration, vec!["shared"]);
        assert!(m.get_memories_by_source("rev").is_empty());
        assert_eq!(m.get("shared").unwrap().source_ids, vec!["keep"]);
    }
}
