//! End-to-end scenarios S1-S6 (spec.md §8), run against in-memory test
//! doubles for every external collaborator.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use noema_core::prelude::*;
use noema_core::{
    BackgroundTrainer, Feedback, GnnEnhancer, LearnerHandle, NewCausalLink, NodeKind,
    OnlineLearner, PatternMatch, PatternQuery, PatternStore, TrainingHistory, TrainingSample,
    TrajectoryConfig, VectorHit, VectorIndex, WeightUpdateResult,
};

fn uniform_embedding(value: f32) -> Embedding {
    Embedding::new(vec![value; noema_core::D]).unwrap()
}

struct FakePatternStore {
    patterns: Mutex<Vec<PatternMatch>>,
}

impl FakePatternStore {
    fn new(patterns: Vec<PatternMatch>) -> Self {
        Self {
            patterns: Mutex::new(patterns),
        }
    }
}

#[async_trait]
impl PatternStore for FakePatternStore {
    async fn find_patterns(&self, query: PatternQuery) -> Result<Vec<PatternMatch>> {
        Ok(self
            .patterns
            .lock()
            .iter()
            .filter(|p| p.confidence >= query.min_confidence)
            .cloned()
            .collect())
    }

    async fn create_pattern(&self, template: String, task_type: String, confidence: f32) -> Result<String> {
        let id = format!("p{}", self.patterns.lock().len() + 1);
        self.patterns.lock().push(PatternMatch {
            pattern_id: id.clone(),
            confidence,
            template,
            task_type,
            l_score: 0.5,
        });
        Ok(id)
    }
}

struct FakeVectorIndex {
    hits: Mutex<Vec<VectorHit>>,
}

impl FakeVectorIndex {
    fn new(hits: Vec<VectorHit>) -> Self {
        Self {
            hits: Mutex::new(hits),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn search(&self, _query: &Embedding, k: usize) -> Result<Vec<VectorHit>> {
        let hits = self.hits.lock();
        Ok(hits.iter().take(k).cloned().collect())
    }

    async fn add(&self, id: &str, _embedding: &Embedding, _metadata: Option<Value>) -> Result<()> {
        self.hits.lock().push(VectorHit {
            id: id.to_string(),
            similarity: 1.0,
            metadata: None,
        });
        Ok(())
    }
}

#[derive(Default)]
struct RecordingOnlineLearner {
    feedback_calls: AtomicUsize,
}

#[async_trait]
impl OnlineLearner for RecordingOnlineLearner {
    async fn create_trajectory_with_id(
        &self,
        _id: &str,
        _route: &str,
        _pattern_ids: &[String],
        _context_ids: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn provide_feedback(&self, trajectory_id: &str, quality: f32) -> Result<WeightUpdateResult> {
        self.feedback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WeightUpdateResult {
            pattern_id: Some(trajectory_id.to_string()),
            previous_weight: 0.5,
            new_weight: quality,
            applied: true,
        })
    }

    async fn get_weight(&self, _pattern_id: &str, _route: &str) -> Result<f32> {
        Ok(0.5)
    }

    async fn get_trajectory(&self, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn has_trajectory_in_storage(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn get_trajectory_in_storage(&self, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}

fn orchestrator(
    hypergraph: Arc<CausalHypergraph>,
    vector_index: Arc<dyn VectorIndex>,
    pattern_store: Arc<dyn PatternStore>,
    tracker: Arc<TrajectoryTracker>,
) -> ReasoningOrchestrator {
    ReasoningOrchestrator::new(
        Default::default(),
        hypergraph,
        vector_index,
        pattern_store,
        Arc::new(GnnEnhancer::new(2)),
        tracker,
    )
}

fn request(embedding: Embedding, mode: Mode) -> ReasoningRequest {
    ReasoningRequest {
        query_embedding: embedding,
        mode: Some(mode),
        max_results: Some(5),
        confidence_threshold: Some(0.5),
        min_l_score: Some(0.0),
        enhance_with_gnn: None,
        task_type: None,
    }
}

/// S1: pattern recall.
#[tokio::test]
async fn s1_pattern_recall() {
    let hypergraph = Arc::new(CausalHypergraph::new());
    let pattern_store = Arc::new(FakePatternStore::new(vec![PatternMatch {
        pattern_id: "P1".to_string(),
        confidence: 0.99,
        template: "seeded".to_string(),
        task_type: "default".to_string(),
        l_score: 0.5,
    }]));
    let vector_index = Arc::new(FakeVectorIndex::empty());
    let tracker = Arc::new(TrajectoryTracker::new(
        TrajectoryConfig::default(),
        LearnerHandle::unbound(),
        hypergraph.clone(),
        None,
    ));
    let engine = orchestrator(hypergraph, vector_index, pattern_store, tracker);

    let response = engine
        .reason(request(uniform_embedding(0.01), Mode::Pattern))
        .await
        .unwrap();

    assert_eq!(response.patterns.len(), 1);
    assert!(response.patterns[0].confidence >= 0.99);
    assert!(response.causal_inferences.is_empty());
    assert!((response.provenance.combined_l_score - 0.5).abs() < 1e-6);
}

/// S2: causal chain traversal.
#[tokio::test]
async fn s2_causal_chain() {
    let hypergraph = Arc::new(CausalHypergraph::new());
    let a = hypergraph.add_node("A".into(), NodeKind::Concept, json!({}));
    let b = hypergraph.add_node("B".into(), NodeKind::Concept, json!({}));
    let c = hypergraph.add_node("C".into(), NodeKind::Concept, json!({}));
    hypergraph
        .add_causal_link(NewCausalLink {
            causes: BTreeSet::from([a.id.clone()]),
            effects: BTreeSet::from([b.id.clone()]),
            confidence: 0.9,
            strength: 0.9,
            metadata: json!({}),
        })
        .unwrap();
    hypergraph
        .add_causal_link(NewCausalLink {
            causes: BTreeSet::from([b.id.clone()]),
            effects: BTreeSet::from([c.id.clone()]),
            confidence: 0.8,
            strength: 0.8,
            metadata: json!({}),
        })
        .unwrap();

    let vector_index = Arc::new(FakeVectorIndex::new(vec![VectorHit {
        id: a.id.clone(),
        similarity: 1.0,
        metadata: None,
    }]));
    let pattern_store = Arc::new(FakePatternStore::new(Vec::new()));
    let tracker = Arc::new(TrajectoryTracker::new(
        TrajectoryConfig::default(),
        LearnerHandle::unbound(),
        hypergraph.clone(),
        None,
    ));
    let engine = orchestrator(hypergraph.clone(), vector_index, pattern_store, tracker);

    let mut req = request(uniform_embedding(0.02), Mode::Causal);
    req.confidence_threshold = Some(0.0);
    let response = engine.reason(req).await.unwrap();

    let reached_c = response
        .causal_inferences
        .iter()
        .find(|e| e.node_id == c.id)
        .expect("C should be reachable through A->B->C");
    assert!((reached_c.confidence - 0.5832).abs() < 1e-3);
}

/// S3: hybrid mode over empty stores never errors.
#[tokio::test]
async fn s3_hybrid_empty_stores() {
    let hypergraph = Arc::new(CausalHypergraph::new());
    let vector_index = Arc::new(FakeVectorIndex::empty());
    let pattern_store = Arc::new(FakePatternStore::new(Vec::new()));
    let tracker = Arc::new(TrajectoryTracker::new(
        TrajectoryConfig::default(),
        LearnerHandle::unbound(),
        hypergraph.clone(),
        None,
    ));
    let engine = orchestrator(hypergraph, vector_index, pattern_store, tracker);

    let response = engine
        .reason(request(uniform_embedding(0.03), Mode::Hybrid))
        .await
        .unwrap();

    assert!(response.patterns.is_empty());
    assert!(response.causal_inferences.is_empty());
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.provenance.combined_l_score, 0.0);
}

/// S4: the GNN enhancer's read-through cache hits on a repeat call.
#[tokio::test]
async fn s4_cache_hit_on_repeat_enhancement() {
    let enhancer = GnnEnhancer::new(2);
    let embedding = uniform_embedding(0.04);
    let neighborhood = vec!["n1".to_string(), "n2".to_string()];

    let first = enhancer.enhance(&embedding, &neighborhood);
    assert!(!first.from_cache);

    let second = enhancer.enhance(&embedding, &neighborhood);
    assert!(second.from_cache);
    assert_eq!(first.enhanced, second.enhanced);
}

/// S5: feedback at or above the distillation threshold on a trajectory
/// with at least one pattern and one causal inference produces exactly
/// one new hyperedge, and the online learner sees one feedback update.
#[tokio::test]
async fn s5_high_quality_feedback_distills_hyperedge() {
    let hypergraph = Arc::new(CausalHypergraph::new());
    let a = hypergraph.add_node("A".into(), NodeKind::Concept, json!({}));
    let b = hypergraph.add_node("B".into(), NodeKind::Concept, json!({}));
    hypergraph
        .add_causal_link(NewCausalLink {
            causes: BTreeSet::from([a.id.clone()]),
            effects: BTreeSet::from([b.id.clone()]),
            confidence: 0.9,
            strength: 0.9,
            metadata: json!({}),
        })
        .unwrap();

    let pattern_store = Arc::new(FakePatternStore::new(vec![PatternMatch {
        pattern_id: "P1".to_string(),
        confidence: 0.9,
        template: "seeded".to_string(),
        task_type: "default".to_string(),
        l_score: 0.8,
    }]));
    let vector_index = Arc::new(FakeVectorIndex::new(vec![VectorHit {
        id: a.id.clone(),
        similarity: 1.0,
        metadata: None,
    }]));

    let learner_impl = Arc::new(RecordingOnlineLearner::default());
    let learner = LearnerHandle::unbound();
    learner.bind(learner_impl.clone());

    let tracker = Arc::new(TrajectoryTracker::new(
        TrajectoryConfig::default(),
        learner,
        hypergraph.clone(),
        None,
    ));
    let engine = orchestrator(hypergraph.clone(), vector_index, pattern_store, tracker.clone());

    let mut req = request(uniform_embedding(0.05), Mode::Hybrid);
    req.confidence_threshold = Some(0.0);
    let response = engine.reason(req).await.unwrap();
    assert!(!response.patterns.is_empty());
    assert!(!response.causal_inferences.is_empty());

    let before = hypergraph.list_hyperedges().len();
    let applied = tracker
        .update_feedback(
            &response.trajectory_id,
            Feedback {
                quality: 0.9,
                outcome: None,
                free_text: None,
            },
        )
        .await;
    assert!(applied);

    let after_edges = hypergraph.list_hyperedges();
    assert_eq!(after_edges.len() - before, 1);
    let distilled = after_edges
        .iter()
        .find(|e| e.metadata.get("source").and_then(Value::as_str) == Some("high-quality-feedback"))
        .expect("distilled edge should be tagged source=high-quality-feedback");
    assert_eq!(distilled.confidence, 0.9);

    assert_eq!(learner_impl.feedback_calls.load(Ordering::SeqCst), 1);
}

/// S6: the training trigger fires at 50 buffered samples, not 49, and a
/// background training run emits progress and persists batch history.
#[tokio::test]
async fn s6_training_trigger_at_fifty_samples() {
    let (trigger, mut fire_rx) = noema_core::TrainingTrigger::new(50);

    for i in 0..49 {
        let fired = trigger.append(noema_core::BufferedSample {
            trajectory_id: format!("traj_{i}"),
            embedding: vec![0.1; 8],
            enhanced_embedding: None,
            quality: if i % 2 == 0 { 0.9 } else { 0.2 },
        });
        assert!(!fired, "must not fire before the 50th sample");
    }
    assert!(!trigger.should_trigger());

    let fired = trigger.append(noema_core::BufferedSample {
        trajectory_id: "traj_49".to_string(),
        embedding: vec![0.1; 8],
        enhanced_embedding: None,
        quality: 0.9,
    });
    assert!(fired, "must fire on the 50th sample");

    let batch = fire_rx.try_recv().expect("fired batch should be on the channel");
    assert_eq!(batch.len(), 50);

    let samples: Vec<TrainingSample> = batch
        .into_iter()
        .map(|s| TrainingSample {
            embedding: s.embedding,
            quality: s.quality,
        })
        .collect();

    let trainer = noema_core::ContrastiveTrainer::new(Default::default(), 8, 1);
    let background = BackgroundTrainer::new(Default::default());
    let history = Arc::new(TrainingHistory::in_memory().unwrap());
    let (_owner, observer) = background.cancel_handle();

    let mut rx = background.train(trainer, samples, 1, Some(history.clone()), observer);

    let mut saw_progress = false;
    let mut epoch_results = 0usize;
    while let Some(message) = rx.recv().await {
        match message {
            noema_core::TrainingMessage::Progress { .. } => saw_progress = true,
            noema_core::TrainingMessage::Epoch(_) => epoch_results += 1,
            noema_core::TrainingMessage::Complete(_) => break,
            noema_core::TrainingMessage::Error(e) => panic!("training run failed: {e}"),
            noema_core::TrainingMessage::Batch(_) => {}
        }
    }

    assert!(saw_progress, "should emit at least one progress event");
    assert!(epoch_results >= 1);
    assert!(history.get_stats().unwrap().count > 0);
}
