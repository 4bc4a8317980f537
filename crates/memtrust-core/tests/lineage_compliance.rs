//! Compliance flows over the lineage manager: right-to-forget revocation,
//! regeneration planning and graph statistics.

use memtrust_core::{LineageManager, LineageMetadata, Provenance, SourceType, TrustError};

fn track(mgr: &LineageManager, id: &str, sources: &[&str], parents: &[&str]) {
    mgr.track_memory(
        LineageMetadata::new(id)
            .with_sources(sources.iter().copied())
            .derived_from(parents.iter().copied()),
    )
    .unwrap();
}

#[test]
fn test_revoke_source_cascades_through_derivations() {
    let mgr = LineageManager::new();
    track(&mgr, "fact-1", &["session-a"], &[]);
    track(&mgr, "fact-2", &["session-a"], &[]);
    track(&mgr, "summary", &["consolidation"], &["fact-1", "fact-2"]);
    track(&mgr, "insight", &["consolidation"], &["summary"]);
    track(&mgr, "other", &["session-b"], &[]);

    let mut removed = mgr.revoke_data_source("session-a");
    removed.sort();

    // "summary" is reachable from both facts but reported once
    assert_eq!(removed, vec!["fact-1", "fact-2", "insight", "summary"]);
    assert_eq!(mgr.len(), 1);
    assert!(mgr.contains("other"));
    assert!(mgr.get_memories_by_source("session-a").is_empty());
}

#[test]
fn test_revocation_set_is_read_only() {
    let mgr = LineageManager::new();
    track(&mgr, "a", &["s"], &[]);
    track(&mgr, "b", &["t"], &["a"]);

    let planned = mgr.revocation_set("s");
    assert_eq!(planned, vec!["a", "b"]);
    assert_eq!(mgr.len(), 2);
}

#[test]
fn test_regeneration_keeps_multi_source_memories() {
    let mgr = LineageManager::new();
    track(&mgr, "only-a", &["a"], &[]);
    track(&mgr, "a-and-b", &["a", "b"], &[]);
    track(&mgr, "only-b", &["b"], &[]);

    let plan = mgr.regenerate_from_source("a");

    assert_eq!(plan.deleted, vec!["only-a"]);
    assert_eq!(plan.needs_regeneration, vec!["a-and-b"]);
    assert!(!mgr.contains("only-a"));
    assert_eq!(mgr.get("a-and-b").unwrap().source_ids, vec!["b"]);
    assert_eq!(mgr.get_memories_by_source("b"), vec!["a-and-b", "only-b"]);
}

#[test]
fn test_track_memory_creation_uses_provenance_sources() {
    let mgr = LineageManager::new();
    let mut p = Provenance::new(SourceType::ToolOutput, "crawler");
    p.add_source("cache");

    mgr.track_memory_creation("m", &p, &[]).unwrap();
    mgr.track_memory_creation("n", &p, &["m".to_string()]).unwrap();

    assert_eq!(mgr.get_memories_by_source("cache"), vec!["m", "n"]);
    assert_eq!(mgr.get_parent_memories("n"), vec!["m"]);
    assert_eq!(mgr.get_lineage_depth("n"), 1);
}

#[test]
fn test_stats_and_cycle_guard() {
    let mgr = LineageManager::new();
    track(&mgr, "root", &["s"], &[]);
    track(&mgr, "mid", &["s"], &["root"]);
    track(&mgr, "leaf", &["s"], &["mid"]);

    let stats = mgr.get_lineage_stats();
    assert_eq!(stats.total_memories, 3);
    assert_eq!(stats.root_memories, 1);
    assert_eq!(stats.derived_memories, 2);
    assert_eq!(stats.max_depth, 2);
    assert_eq!(stats.memories_by_source.get("s"), Some(&3));

    let err = mgr
        .track_memory(LineageMetadata::new("root").derived_from(["leaf"]))
        .unwrap_err();
    assert!(matches!(err, TrustError::LineageCycle { .. }));
    assert_eq!(mgr.get_lineage_depth("leaf"), 2);
    assert!(mgr.get_parent_memories("root").is_empty());
}

/// Every surviving node agrees with the adjacency maps and cites no removed id.
fn assert_no_dangling_parents(mgr: &LineageManager, survivors: &[&str], removed: &[String]) {
    for id in survivors {
        let recorded = mgr.get(id).unwrap().derived_from;
        let mut edges = mgr.parents(id);
        edges.sort();
        let mut sorted_recorded = recorded.clone();
        sorted_recorded.sort();
        assert_eq!(sorted_recorded, edges, "parent lists of {id} disagree");
        for gone in removed {
            assert!(!recorded.contains(gone), "{id} still derives from {gone}");
            assert!(!mgr.children(id).contains(gone), "{id} still lists child {gone}");
        }
    }
}

#[test]
fn test_non_cascade_delete_detaches_children() {
    let mgr = LineageManager::new();
    track(&mgr, "a", &["s1"], &[]);
    track(&mgr, "x", &["s1"], &[]);
    track(&mgr, "b", &["s2"], &["a", "x"]);

    let removed = mgr.delete_memory_with_lineage("a", false);

    assert_eq!(removed, vec!["a"]);
    assert_no_dangling_parents(&mgr, &["b", "x"], &removed);
    assert_eq!(mgr.get("b").unwrap().derived_from, vec!["x"]);
}

#[test]
fn test_revocation_leaves_no_dangling_edges() {
    let mgr = LineageManager::new();
    track(&mgr, "keep", &["session-b"], &[]);
    track(&mgr, "gone", &["session-a"], &[]);
    track(&mgr, "mixed", &["session-b"], &["keep", "gone"]);
    track(&mgr, "sibling", &["session-b"], &["keep"]);

    let removed = mgr.revoke_data_source("session-a");

    // "mixed" derives from a revoked memory and goes with it
    let mut sorted_removed = removed.clone();
    sorted_removed.sort();
    assert_eq!(sorted_removed, vec!["gone", "mixed"]);
    assert_no_dangling_parents(&mgr, &["keep", "sibling"], &removed);
    assert_eq!(mgr.children("keep"), vec!["sibling"]);
}

#[test]
fn test_regeneration_detaches_children_of_deleted_memories() {
    let mgr = LineageManager::new();
    track(&mgr, "a", &["s1"], &[]);
    track(&mgr, "b", &["s1", "s2"], &["a"]);

    let plan = mgr.regenerate_from_source("s1");

    assert_eq!(plan.deleted, vec!["a"]);
    assert_eq!(plan.needs_regeneration, vec!["b"]);
    assert_no_dangling_parents(&mgr, &["b"], &plan.deleted);
    assert!(mgr.get("b").unwrap().derived_from.is_empty());
}
