//! Tunables left as defaults/policy, gathered into one config struct
//! loaded from JSON (see DESIGN.md for why JSON rather than TOML).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// EMA decay rate for `ema_trace_seats` / `ema_formation_quality`.
    pub alpha: f64,
    /// Minimum cohort size before falling back to raw-EMA z-scores.
    pub min_cohort_size: usize,
    /// Fraction of signal routed to per-entity overlays.
    pub alpha_local: f64,
    /// Fraction of signal routed to the global log-weight.
    pub alpha_global: f64,
    /// Overlay clamp bound.
    pub overlay_cap: f64,
    /// Membership cache top-K size.
    pub membership_cache_k: usize,
    /// Health monitor tick interval, seconds.
    pub health_interval_seconds: u64,
    /// Stimulus base budget `B₀`.
    pub stimulus_base_budget: f64,
    /// Minimum cosine similarity for a stimulus match to count.
    pub stimulus_similarity_floor: f64,
    /// Vector-query fan-out per stimulus injection.
    pub stimulus_vector_k: usize,
    /// Labels searched during stimulus injection, in order.
    pub stimulus_search_labels: Vec<String>,
    /// EMA rate for co-activation edges.
    pub coactivation_alpha: f64,
    /// Epsilon below which `either_ema` is treated as zero for `u_jaccard`.
    pub coactivation_epsilon: f64,
    /// Scope → physical graph name bindings.
    pub scope_to_graph: HashMap<String, String>,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        let mut scope_to_graph = HashMap::new();
        scope_to_graph.insert("personal".to_string(), "ecosystem_org_citizen".to_string());
        scope_to_graph.insert("organizational".to_string(), "ecosystem_org".to_string());
        scope_to_graph.insert("ecosystem".to_string(), "ecosystem".to_string());

        Self {
            alpha: 0.1,
            min_cohort_size: 3,
            alpha_local: 0.8,
            alpha_global: 0.2,
            overlay_cap: 2.0,
            membership_cache_k: 10,
            health_interval_seconds: 60,
            stimulus_base_budget: 10.0,
            stimulus_similarity_floor: 0.5,
            stimulus_vector_k: 20,
            stimulus_search_labels: vec![
                "Realization".into(),
                "Principle".into(),
                "Mechanism".into(),
                "Concept".into(),
                "Personal_Pattern".into(),
            ],
            coactivation_alpha: 0.1,
            coactivation_epsilon: 1e-9,
            scope_to_graph,
        }
    }
}

impl SubstrateConfig {
    pub fn from_json(s: &str) -> crate::Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| crate::Error::SchemaViolation(format!("invalid config: {e}")))
    }
}
