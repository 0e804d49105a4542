//! The domain layer: a typed, bitemporal property graph with learned
//! dual-view weights, a membership fabric, and stimulus injection,
//! built on top of the generic kernel (`model`/`cypher`/`planner`/
//! `execution`/`storage`/`tx`/`index`).
//!
//! `Substrate` is the top-level handle: a process-wide singleton owning
//! the graph connection and the embedding model, with every mutator
//! routed through a per-namespace `WriteGate`.

pub mod namespace;
pub mod write_gate;
pub mod graph_store;
pub mod record;
pub mod trace_parser;
pub mod reinforcement;
pub mod formation_router;
pub mod embedding;
pub mod weight_learner;
pub mod entity_context;
pub mod membership;
pub mod coactivation;
pub mod stimulus;
pub mod health;
pub mod telemetry;
pub mod config;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::substrate::coactivation::CoactivationUpdater;
use crate::substrate::embedding::{Embedder, HashProjectionEmbedder};
use crate::substrate::entity_context::EntityContextResolver;
use crate::substrate::formation_router::FormationRouter;
use crate::substrate::graph_store::{GraphStore, MemoryGraphStore};
use crate::substrate::health::{HealthMonitor, HealthSnapshot};
use crate::substrate::membership::{MembershipRole, MembershipRow, MembershipStore};
use crate::substrate::namespace::Namespace;
use crate::substrate::reinforcement::ReinforcementAggregator;
use crate::substrate::stimulus::{StimulusFrameResult, StimulusInjector};
use crate::substrate::telemetry::{EventSink, Heartbeat, NoOpSink, QaTask, QaTaskQueue};
use crate::substrate::weight_learner::{NodeLearningItem, WeightLearner};
use crate::substrate::write_gate::WriteGate;
use crate::{Error, Result};

pub use crate::substrate::config::SubstrateConfig;

/// Outcome of one `process_trace` call: counts useful for callers that
/// want to report progress without inspecting the event stream.
#[derive(Debug, Clone, Default)]
pub struct TraceOutcome {
    pub reinforcements_applied: usize,
    pub node_formations_created: usize,
    pub link_formations_created: usize,
    pub qa_tasks_raised: usize,
    pub entity_context: Vec<String>,
}

/// The process-wide substrate handle. One `Substrate` owns one
/// `GraphStore` (backed by one or more physical graphs keyed by name)
/// and one embedding model; `WriteGate`s are minted per namespace and
/// are cheap to construct since they only borrow the shared `Arc`s.
pub struct Substrate {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn EventSink>,
    config: SubstrateConfig,
    qa: QaTaskQueue,
    heartbeat: Heartbeat,
    entity_context: EntityContextResolver,
    /// Per-namespace gates, minted once and reused.
    gates: Mutex<HashMap<String, Arc<WriteGate>>>,
}

impl Substrate {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>, sink: Arc<dyn EventSink>, config: SubstrateConfig) -> Self {
        Self {
            store,
            embedder,
            sink,
            config,
            qa: QaTaskQueue::new(),
            heartbeat: Heartbeat::new(),
            entity_context: EntityContextResolver::new(),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Open an in-memory substrate with the deterministic hash-projection
    /// embedder and a no-op telemetry sink — the reference configuration
    /// used by tests and single-process deployments.
    pub fn open_memory(config: SubstrateConfig) -> Self {
        Self::new(
            Arc::new(MemoryGraphStore::new()),
            Arc::new(HashProjectionEmbedder),
            Arc::new(NoOpSink),
            config,
        )
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn qa_tasks(&self) -> &QaTaskQueue {
        &self.qa
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Record a fresh working-memory selection (top priority signal for
    /// `EntityContextResolver`) and drive the co-activation update for
    /// it in the same call, matching  "on every WM-selection
    /// event" trigger.
    pub async fn set_wm_entities(&self, graph_name: &str, entities: Vec<String>) -> Result<usize> {
        self.entity_context.set_wm_entities(entities.clone());
        let gate = self.gate_for(graph_name)?;
        let updater = CoactivationUpdater::new(self.config.coactivation_alpha, self.config.coactivation_epsilon);
        updater.on_wm_event(graph_name, &gate, &entities).await
    }

    /// A write gate bound to `graph_name`'s derived namespace, minted
    /// once per graph name and cached thereafter.
    fn gate_for(&self, graph_name: &str) -> Result<Arc<WriteGate>> {
        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get(graph_name) {
            return Ok(gate.clone());
        }
        let namespace = Namespace::for_graph(graph_name);
        let gate = Arc::new(WriteGate::new(namespace, self.store.clone(), self.sink.clone()));
        gates.insert(graph_name.to_string(), gate.clone());
        Ok(gate)
    }

    /// Process one TRACE of raw text against `graph_name`: parse, route
    /// formations, aggregate reinforcements into seats, run weight
    /// learning, and (for personal-scope formations) update membership.
    /// Ordering follows : reinforcement learning precedes
    /// new-node creation precedes new-link creation precedes
    /// sub-entity-activation update precedes stimulus injection — the
    /// last of those is a separate call (`inject_stimulus`), not part of
    /// `process_trace` itself.
    pub async fn process_trace(&self, graph_name: &str, frame_id: &str, text: &str) -> Result<TraceOutcome> {
        let gate = self.gate_for(graph_name)?;
        let parsed = crate::substrate::trace_parser::TraceParser::parse(text);
        let entity_ctx = self.entity_context.resolve(&parsed.entity_marks, &self.store).await?;
        let scope = Namespace::for_graph(graph_name).scope().map(|s| s.to_string()).unwrap_or_default();

        let reinforcement = ReinforcementAggregator::aggregate(&parsed.reinforcements);
        if !reinforcement.seats.is_empty() {
            let items: Vec<NodeLearningItem> = {
                let mut items = Vec::with_capacity(reinforcement.seats.len());
                for (id, seats) in &reinforcement.seats {
                    let props = self.store.get_node_properties(id).await?;
                    let Some(props) = props else { continue };
                    let label = props
                        .get("label")
                        .and_then(crate::model::Value::as_str)
                        .unwrap_or("Concept")
                        .to_string();
                    items.push(NodeLearningItem { id: id.clone(), label, seats: *seats as f64, formation_quality: None });
                }
                items
            };
            let learner = WeightLearner::new(&self.config, self.sink.as_ref());
            learner.learn_nodes(graph_name, &gate, frame_id, &scope, &entity_ctx, items).await?;
        }

        let router = FormationRouter::new(&self.config, self.embedder.as_ref(), &self.qa);
        let mut node_formations_created = 0;
        let mut link_formations_created = 0;
        let mut membership_rows = Vec::new();

        for formation in &parsed.formations {
            match router.process(&gate, formation, &entity_ctx).await {
                Ok(id) => {
                    if formation.is_link {
                        link_formations_created += 1;
                    } else {
                        node_formations_created += 1;
                        for entity in &entity_ctx {
                            membership_rows.push(MembershipRow {
                                content_id: id.clone(),
                                entity_id: entity.clone(),
                                weight: if Some(entity) == entity_ctx.first() { 1.0 } else { 0.5 },
                                role: if Some(entity) == entity_ctx.first() { MembershipRole::Primary } else { MembershipRole::Secondary },
                                activation_signal: 1.0,
                            });
                        }
                    }
                }
                Err(e @ Error::CrossLayerWriteDenied { .. }) => return Err(e),
                Err(_) => continue, // already queued as a QA task by the router
            }
        }

        if !membership_rows.is_empty() {
            let membership = MembershipStore::new(self.config.alpha);
            membership.flush_memberships(graph_name, &gate, membership_rows.clone()).await?;
            let mut touched: Vec<String> = membership_rows.iter().map(|r| r.content_id.clone()).collect();
            touched.sort();
            touched.dedup();
            for content_id in touched {
                membership.rebuild_cache(graph_name, &gate, &content_id, self.config.membership_cache_k).await?;
            }
        }

        self.heartbeat.record_trace_processing();
        let qa_tasks_raised = self.qa.len();

        Ok(TraceOutcome {
            reinforcements_applied: reinforcement.seats.len(),
            node_formations_created,
            link_formations_created,
            qa_tasks_raised,
            entity_context: entity_ctx,
        })
    }

    /// Drain and return all QA tasks raised so far (schema violations,
    /// incomplete link metadata, unconfirmed writes surfaced by
    /// formation processing).
    pub fn drain_qa_tasks(&self) -> Vec<QaTask> {
        self.qa.drain()
    }

    /// Run one stimulus-injection frame against
    /// `graph_name`.
    pub async fn inject_stimulus(&self, graph_name: &str, stimulus_text: &str) -> Result<StimulusFrameResult> {
        let gate = self.gate_for(graph_name)?;
        let injector = StimulusInjector::new(&self.config, self.embedder.as_ref());
        injector.inject(graph_name, &gate, stimulus_text).await
    }

    /// Run one health-monitor tick against `graph_name`.
    /// Read-only: no `WriteGate` is involved.
    pub async fn health_tick(&self, graph_name: &str) -> Result<HealthSnapshot> {
        let monitor = HealthMonitor::new(self.sink.as_ref());
        monitor.tick(graph_name, &self.store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_trace_writes_node_and_applies_reinforcement() {
        let substrate = Substrate::open_memory(SubstrateConfig::default());
        let graph_name = substrate.config().scope_to_graph["personal"].clone();

        substrate
            .process_trace(
                &graph_name,
                "frame-1",
                "[NODE_FORMATION: Principle]\nscope: personal\nid: p1\nname: Least privilege\ndescription: Grant minimum access\n",
            )
            .await
            .unwrap();

        assert!(substrate.store().node_exists("p1").await.unwrap());

        let outcome = substrate
            .process_trace(&graph_name, "frame-2", "[p1: very useful]")
            .await
            .unwrap();
        assert_eq!(outcome.reinforcements_applied, 1);

        let props = substrate.store().get_node_properties("p1").await.unwrap().unwrap();
        let log_weight = props.get("log_weight").and_then(crate::model::Value::as_float).unwrap();
        assert!(log_weight > 0.0);
    }

    #[tokio::test]
    async fn cross_namespace_trace_is_denied() {
        let substrate = Substrate::open_memory(SubstrateConfig::default());
        // Deliberately target the organizational graph with a personal-scope formation.
        let org_graph = substrate.config().scope_to_graph["organizational"].clone();
        let err = substrate
            .process_trace(&org_graph, "frame-1", "[NODE_FORMATION: Principle]\nscope: personal\nid: p1\nname: X\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CrossLayerWriteDenied { .. }));
    }

    #[tokio::test]
    async fn stimulus_and_health_ticks_run_without_prior_state() {
        let substrate = Substrate::open_memory(SubstrateConfig::default());
        let graph_name = substrate.config().scope_to_graph["personal"].clone();
        let frame = substrate.inject_stimulus(&graph_name, "a stimulus with nothing to match yet").await.unwrap();
        assert_eq!(frame.matches_considered, 0);

        let snapshot = substrate.health_tick(&graph_name).await.unwrap();
        assert!(snapshot.metrics.contains_key("density"));
    }

    #[tokio::test]
    async fn wm_entities_drive_coactivation() {
        let substrate = Substrate::open_memory(SubstrateConfig::default());
        let graph_name = substrate.config().scope_to_graph["personal"].clone();
        substrate.store().upsert_node("SubEntity", "e1", crate::model::PropertyMap::new()).await.unwrap();
        substrate.store().upsert_node("SubEntity", "e2", crate::model::PropertyMap::new()).await.unwrap();

        let updated = substrate.set_wm_entities(&graph_name, vec!["e1".into(), "e2".into()]).await.unwrap();
        assert_eq!(updated, 1);
    }
}
