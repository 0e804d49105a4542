//! Stimulus injection: embed a stimulus, match it
//! against existing nodes per label through the vector index, compute a
//! connectivity-modulated energy budget, and distribute it to matches
//! with a per-node headroom cap.

use crate::model::{PropertyMap, Value};
use crate::substrate::config::SubstrateConfig;
use crate::substrate::embedding::Embedder;
use crate::substrate::graph_store::GraphStore;
use crate::substrate::write_gate::WriteGate;
use crate::Result;

const STIMULUS_TRUNCATE_CHARS: usize = 500;

/// One node the stimulus matched, with enough state to compute and
/// apply a capped energy deposit.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionMatch {
    pub id: String,
    pub similarity: f64,
    pub current_energy: f64,
    pub threshold: f64,
}

impl InjectionMatch {
    pub fn headroom(&self) -> f64 {
        (self.threshold - self.current_energy).max(0.0)
    }
}

/// Per-frame outcome recorded to the learning sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StimulusFrameResult {
    pub matches_considered: usize,
    pub matches_deposited: usize,
    pub total_energy_distributed: f64,
    pub connectivity_rho: f64,
    pub budget: f64,
    pub max_degree: usize,
    pub mean_link_weight: f64,
    pub active_node_count: usize,
    pub activation_entropy: f64,
    pub level_crossings: usize,
}

pub struct StimulusInjector<'a> {
    config: &'a SubstrateConfig,
    embedder: &'a dyn Embedder,
}

impl<'a> StimulusInjector<'a> {
    pub fn new(config: &'a SubstrateConfig, embedder: &'a dyn Embedder) -> Self {
        Self { config, embedder }
    }

    /// Run one stimulus-injection frame against `write_gate`'s bound
    /// graph. Zero matches is a normal, non-error outcome; a failing
    /// vector query for one label degrades that label to zero matches
    /// rather than aborting the whole frame.
    pub async fn inject(&self, graph_name: &str, write_gate: &WriteGate, stimulus_text: &str) -> Result<StimulusFrameResult> {
        let truncated: String = stimulus_text.chars().take(STIMULUS_TRUNCATE_CHARS).collect();
        let query_vector = self.embedder.embed(&truncated);

        let mut matches: Vec<InjectionMatch> = Vec::new();
        for label in &self.config.stimulus_search_labels {
            let hits = match write_gate
                .store()
                .vector_query_nodes(label, "content_embedding", self.config.stimulus_vector_k, &query_vector, self.config.stimulus_similarity_floor)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "stimulus vector query failed, degrading to zero matches for this label");
                    Vec::new()
                }
            };
            for (id, similarity) in hits {
                let props = write_gate.store().get_node_properties(&id).await?.unwrap_or_default();
                let current_energy = props.get("energy").and_then(Value::as_float).unwrap_or(0.0);
                let threshold = props.get("threshold").and_then(Value::as_float).unwrap_or(0.0);
                matches.push(InjectionMatch { id, similarity, current_energy, threshold });
            }
        }

        let (max_degree, mean_link_weight, active_node_count) = self.connectivity_aggregates(write_gate.store()).await?;
        let rho = connectivity_proxy(max_degree, mean_link_weight, active_node_count);
        let budget = stimulus_budget(self.config.stimulus_base_budget, rho, truncated.chars().count());

        let similarity_sum: f64 = matches.iter().map(|m| m.similarity.max(0.0)).sum();
        let mut deposited = 0usize;
        let mut total_distributed = 0.0;
        let mut post_energies = Vec::with_capacity(matches.len());
        let mut level_crossings = 0usize;

        for m in &matches {
            let share = if similarity_sum > 0.0 { budget * (m.similarity.max(0.0) / similarity_sum) } else { 0.0 };
            let deposit = share.min(m.headroom()).max(0.0);
            let new_energy = m.current_energy + deposit;
            if deposit > 0.0 {
                let mut props = PropertyMap::new();
                props.insert("energy".into(), Value::Float(new_energy));
                let outcome = write_gate.upsert_node(graph_name, "Concept", &m.id, props).await?;
                outcome.into_result(&format!("stimulus energy deposit {}", m.id))?;
                deposited += 1;
                total_distributed += deposit;
            }
            if m.current_energy < m.threshold && new_energy >= m.threshold {
                level_crossings += 1;
            }
            post_energies.push(new_energy);
        }

        Ok(StimulusFrameResult {
            matches_considered: matches.len(),
            matches_deposited: deposited,
            total_energy_distributed: total_distributed,
            connectivity_rho: rho,
            budget,
            max_degree,
            mean_link_weight,
            active_node_count,
            activation_entropy: activation_entropy(&post_energies),
            level_crossings,
        })
    }

    /// Cheap aggregate queries backing the connectivity proxy:
    /// `(max_degree, mean_link_weight, active_node_count)` over the
    /// graph's current node population.
    async fn connectivity_aggregates(&self, store: &std::sync::Arc<dyn GraphStore>) -> Result<(usize, f64, usize)> {
        let ids = store.all_node_ids().await?;
        let active_node_count = ids.len();
        if active_node_count == 0 {
            return Ok((0, 0.0, 0));
        }

        let mut max_degree = 0usize;
        for id in &ids {
            let d = store.degree(id).await?;
            if d > max_degree {
                max_degree = d;
            }
        }

        let mut weight_sum = 0.0;
        let mut weight_count = 0usize;
        for link_type in ["ENABLES", "REQUIRES", "CONTRADICTS", "SUPPORTS", "CAUSES", "RELATES_TO", "FOLLOWS_FROM", "REFINES"] {
            for (_, _, props) in store.edges_by_type(link_type).await? {
                if let Some(w) = props.get("weight").and_then(Value::as_float) {
                    weight_sum += w;
                    weight_count += 1;
                }
            }
        }
        let mean_link_weight = if weight_count > 0 { weight_sum / weight_count as f64 } else { 0.0 };

        Ok((max_degree, mean_link_weight, active_node_count))
    }
}

/// `ρ ≈ (max_degree · mean_link_weight) / active_node_count`.
fn connectivity_proxy(max_degree: usize, mean_link_weight: f64, active_node_count: usize) -> f64 {
    if active_node_count == 0 {
        return 0.0;
    }
    (max_degree as f64 * mean_link_weight) / active_node_count as f64
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `B = base_budget · σ(−ρ) · (1 + ln(1 + context_size) / 10)`. Strictly
/// decreasing in `ρ` (a hot graph receives less stimulus), bounded above
/// by `base_budget · (1 + ln(1+ctx)/10)`.
fn stimulus_budget(base_budget: f64, rho: f64, context_size: usize) -> f64 {
    base_budget * sigmoid(-rho) * (1.0 + (1.0 + context_size as f64).ln() / 10.0)
}

/// Shannon entropy (natural log, nats) over the post-injection energy
/// distribution, normalized to sum to 1. Zero when all mass is at one
/// node, or when there is nothing to distribute.
fn activation_entropy(energies: &[f64]) -> f64 {
    let total: f64 = energies.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    -energies
        .iter()
        .filter(|e| **e > 0.0)
        .map(|e| {
            let p = e / total;
            p * p.ln()
        })
        .sum::<f64>()
}
