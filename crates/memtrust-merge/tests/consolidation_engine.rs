//! End-to-end consolidation runs over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use memtrust_core::{
    CancellationToken, ConsolidationConfig, Metadata, Provenance, SemanticMemory,
    SemanticMemoryConfig, SourceType, TrustError,
};
use memtrust_merge::fakes::ScriptedCompletion;
use memtrust_merge::{
    ConsolidationEngine, ConsolidationReason, StrategyKind, CONSOLIDATED_KEY, CONSOLIDATED_TO_KEY,
};
use memtrust_state::fakes::{HashingEmbedder, InMemorySemanticStore};
use memtrust_state::SemanticStore;
use serde_json::{json, Value};

const TEA: &str = "alice drinks green tea every morning";
const FREEZE: &str = "deploy freeze starts on december twentieth";

struct Fixture {
    store: Arc<InMemorySemanticStore>,
    memory: Arc<SemanticMemory>,
    cancel: CancellationToken,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemorySemanticStore::new());
        let memory = SemanticMemory::new(
            store.clone(),
            Arc::new(HashingEmbedder::new(1024)),
            SemanticMemoryConfig::default(),
        );
        Self {
            store,
            memory: Arc::new(memory),
            cancel: CancellationToken::new(),
        }
    }

    async fn add(&self, id: &str, text: &str) {
        self.add_with(id, text, Metadata::new()).await;
    }

    async fn add_with(&self, id: &str, text: &str, metadata: Metadata) {
        self.memory
            .index(id, text, metadata, &self.cancel)
            .await
            .unwrap();
    }

    fn engine(
        &self,
        kind: StrategyKind,
        provider: Arc<ScriptedCompletion>,
        config: ConsolidationConfig,
    ) -> ConsolidationEngine {
        ConsolidationEngine::with_kind(self.memory.clone(), kind, provider, config).unwrap()
    }

    async fn metadata(&self, id: &str) -> Metadata {
        self.store.get(id).await.unwrap().unwrap().metadata
    }
}

fn small_config() -> ConsolidationConfig {
    ConsolidationConfig::default().with_min_memory_count(2)
}

fn source(id: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("source_id".to_string(), json!(id));
    meta
}

#[tokio::test]
async fn test_redundant_pair_is_merged_and_soft_marked() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;
    fx.add("b1", "the build server runs on ubuntu").await;
    fx.add("c1", "quarterly report is due friday").await;

    let provider = Arc::new(ScriptedCompletion::responding("Alice drinks green tea each morning."));
    let engine = fx.engine(StrategyKind::Redundancy, provider.clone(), small_config());

    let result = engine.consolidate(&fx.cancel).await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.strategy, "redundancy");
    assert_eq!(result.new_memory_count, 1);
    assert_eq!(result.merged_count, 2);
    assert_eq!(result.memory_groups.len(), 1);
    assert!(result.end_time >= result.start_time);

    let group = &result.memory_groups[0];
    assert_eq!(group.reason, ConsolidationReason::Redundant);
    let mut members: Vec<_> = group.memories.iter().map(|m| m.id.as_str()).collect();
    members.sort_unstable();
    assert_eq!(members, vec!["a1", "a2"]);

    // sources stay, marked as folded into the new record
    for id in ["a1", "a2"] {
        let meta = fx.metadata(id).await;
        assert_eq!(meta[CONSOLIDATED_KEY], Value::Bool(true));
        assert_eq!(meta[CONSOLIDATED_TO_KEY], json!(group.consolidated_id));
    }
    assert!(!fx.metadata("b1").await.contains_key(CONSOLIDATED_KEY));

    let merged = fx.store.get(&group.consolidated_id).await.unwrap().unwrap();
    assert_eq!(merged.text, "Alice drinks green tea each morning.");
    let provenance = Provenance::from_metadata(&merged.metadata).unwrap().unwrap();
    assert_eq!(provenance.source_type, SourceType::Agent);
    assert_eq!(provenance.corroboration_count, 2);
    assert_eq!(merged.metadata["consolidation_strategy"], json!("redundancy"));

    let mut parents = fx.memory.lineage().get_parent_memories(&group.consolidated_id);
    parents.sort();
    assert_eq!(parents, vec!["a1", "a2"]);

    assert_eq!(provider.call_count(), 1);
    let stats = engine.get_stats();
    assert_eq!(stats.consolidation_count, 1);
    assert_eq!(stats.merged_memories_count, 2);
}

#[tokio::test]
async fn test_second_run_ignores_consolidated_sources() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;
    fx.add("b1", "the build server runs on ubuntu").await;

    let provider = Arc::new(ScriptedCompletion::responding("Alice has green tea daily."));
    let engine = fx.engine(StrategyKind::Redundancy, provider.clone(), small_config());

    let first = engine.consolidate(&fx.cancel).await.unwrap();
    assert_eq!(first.new_memory_count, 1);

    let second = engine.consolidate(&fx.cancel).await.unwrap();
    assert!(second.success);
    assert_eq!(second.new_memory_count, 0);
    assert!(second.memory_groups.is_empty());
    assert_eq!(provider.call_count(), 1);
    assert_eq!(engine.get_stats().consolidation_count, 2);
}

#[tokio::test]
async fn test_sources_deleted_when_not_preserved() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;

    let provider = Arc::new(ScriptedCompletion::responding("Alice drinks green tea."));
    let engine = fx.engine(
        StrategyKind::Redundancy,
        provider,
        small_config().with_preserve_original(false),
    );

    let result = engine.consolidate(&fx.cancel).await.unwrap();
    assert!(result.success);

    let new_id = &result.memory_groups[0].consolidated_id;
    assert!(!fx.store.contains("a1"));
    assert!(!fx.store.contains("a2"));
    assert!(fx.store.contains(new_id));
    assert_eq!(fx.store.len(), 1);
    assert!(!fx.memory.lineage().contains("a1"));
}

#[tokio::test]
async fn test_failing_group_does_not_stop_the_run() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;
    fx.add("d1", FREEZE).await;
    fx.add("d2", FREEZE).await;

    let provider = Arc::new(
        ScriptedCompletion::responding("Deploy freeze begins December 20.")
            .then_fail("rate limited"),
    );
    let engine = fx.engine(StrategyKind::Redundancy, provider.clone(), small_config());

    let result = engine.consolidate(&fx.cancel).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("failed to consolidate group"));
    assert!(result.errors[0].contains("rate limited"));
    assert_eq!(result.new_memory_count, 1);
    assert_eq!(provider.call_count(), 2);

    // the failed group is untouched
    assert!(!fx.metadata("a1").await.contains_key(CONSOLIDATED_KEY));
    assert_eq!(fx.metadata("d1").await[CONSOLIDATED_KEY], Value::Bool(true));
}

#[tokio::test]
async fn test_conflicting_pair_is_resolved() {
    let fx = Fixture::new();
    fx.add("o1", "the team office is on floor three near the kitchen")
        .await;
    fx.add("o2", "actually the team office is on floor four near the kitchen")
        .await;

    let provider = Arc::new(ScriptedCompletion::responding("The team office is on floor four."));
    let engine = fx.engine(StrategyKind::ConflictResolution, provider.clone(), small_config());

    let result = engine.consolidate(&fx.cancel).await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.strategy, "conflict-resolution");
    assert_eq!(result.memory_groups.len(), 1);
    assert_eq!(result.memory_groups[0].reason, ConsolidationReason::Conflict);

    let merged = fx.metadata(&result.memory_groups[0].consolidated_id).await;
    let provenance = Provenance::from_metadata(&merged).unwrap().unwrap();
    assert!(provenance.tags.contains("conflict-resolved"));
    assert_eq!(provenance.source_type, SourceType::UserInput);

    let prompt = &provider.calls()[0].prompt;
    assert!(prompt.contains("Conflicting Memories:"));
    assert!(prompt.contains("(Confidence: 0.70)"));
}

#[tokio::test]
async fn test_summarization_waits_for_group_size() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;

    let provider = Arc::new(ScriptedCompletion::responding("summary"));
    let engine = fx.engine(
        StrategyKind::Summarization { max_per_group: 3 },
        provider.clone(),
        small_config(),
    );
    let result = engine.consolidate(&fx.cancel).await.unwrap();
    assert!(result.success);
    assert_eq!(result.new_memory_count, 0);
    assert_eq!(provider.call_count(), 0);

    fx.add("a3", TEA).await;
    let result = engine.consolidate(&fx.cancel).await.unwrap();
    assert_eq!(result.new_memory_count, 1);
    assert_eq!(result.merged_count, 3);
    assert_eq!(result.memory_groups[0].reason, ConsolidationReason::Summary);
}

#[tokio::test]
async fn test_summarization_larger_than_neighbour_query_is_rejected() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedCompletion::responding("summary"));
    let mut config = small_config();
    config.neighbours_per_memory = 3;

    let err = ConsolidationEngine::with_kind(
        fx.memory.clone(),
        StrategyKind::Summarization { max_per_group: 4 },
        provider.clone(),
        config.clone(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, TrustError::InvalidInput(_)));

    for id in ["a1", "a2", "a3"] {
        fx.add(id, TEA).await;
    }
    let engine = fx.engine(StrategyKind::Summarization { max_per_group: 3 }, provider, config);
    let result = engine.consolidate(&fx.cancel).await.unwrap();
    assert_eq!(result.new_memory_count, 1);
    assert_eq!(result.merged_count, 3);
}

#[tokio::test]
async fn test_skips_below_min_memory_count() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;

    let provider = Arc::new(ScriptedCompletion::responding("x"));
    let engine = fx.engine(
        StrategyKind::Redundancy,
        provider.clone(),
        ConsolidationConfig::default(),
    );

    let result = engine.consolidate(&fx.cancel).await.unwrap();
    assert!(result.success);
    assert_eq!(
        result.message.as_deref(),
        Some("memory count 2 below threshold 10")
    );
    assert!(result.memory_groups.is_empty());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run_returns_cancelled() {
    let fx = Fixture::new();
    fx.add("a1", TEA).await;
    fx.add("a2", TEA).await;

    let provider = Arc::new(ScriptedCompletion::responding("x"));
    let engine = fx.engine(StrategyKind::Redundancy, provider.clone(), small_config());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.consolidate(&cancel).await.unwrap_err();
    assert!(matches!(err, TrustError::Cancelled));
    assert_eq!(provider.call_count(), 0);
    assert_eq!(engine.get_stats().consolidation_count, 0);
}

#[tokio::test]
async fn test_auto_consolidate_interval() {
    let fx = Fixture::new();
    let provider = Arc::new(ScriptedCompletion::responding("x"));
    let engine = fx.engine(
        StrategyKind::Redundancy,
        provider,
        small_config().with_auto_consolidate_interval(Duration::from_secs(3600)),
    );

    assert!(!engine.should_auto_consolidate());
    assert!(engine.should_auto_consolidate_at(Utc::now() + chrono::Duration::hours(2)));

    engine.consolidate(&fx.cancel).await.unwrap();
    assert!(!engine.should_auto_consolidate());
}

#[tokio::test]
async fn test_revoking_a_source_reaches_merged_records() {
    let fx = Fixture::new();
    fx.add_with("a1", TEA, source("chat-9")).await;
    fx.add_with("a2", TEA, source("chat-9")).await;
    fx.add_with("b1", "the build server runs on ubuntu", source("wiki"))
        .await;

    let provider = Arc::new(ScriptedCompletion::responding("Alice drinks green tea."));
    let engine = fx.engine(StrategyKind::Redundancy, provider, small_config());
    let result = engine.consolidate(&fx.cancel).await.unwrap();
    let new_id = result.memory_groups[0].consolidated_id.clone();

    let report = fx
        .memory
        .revoke_data_source("chat-9", &fx.cancel)
        .await
        .unwrap();

    assert!(report.is_complete());
    let mut deleted = report.deleted.clone();
    deleted.sort();
    let mut expected = vec!["a1".to_string(), "a2".to_string(), new_id.clone()];
    expected.sort();
    assert_eq!(deleted, expected);
    assert!(!fx.store.contains(&new_id));
    assert!(fx.store.contains("b1"));
}
