//! `COACTIVATES_WITH(SubEntity — SubEntity)` EMA updates from
//! working-memory co-selection.

use chrono::Utc;
use tracing::warn;

use crate::model::{PropertyMap, Value};
use crate::substrate::write_gate::WriteGate;
use crate::Result;

pub struct CoactivationUpdater {
    alpha: f64,
    epsilon: f64,
}

impl CoactivationUpdater {
    pub fn new(alpha: f64, epsilon: f64) -> Self {
        Self { alpha, epsilon }
    }

    /// Process one WM-selection event over `entities`: every unordered
    /// pair `(A, B)` with `A < B` gets its `COACTIVATES_WITH` edge
    /// created (if absent) or updated, and every entity's own
    /// `ema_wm_presence` is pulled toward 1.0. A pair whose endpoint doesn't exist yet
    /// fails independently — logged and skipped — rather than aborting
    /// the rest of the event's pairs.
    pub async fn on_wm_event(&self, graph_name: &str, write_gate: &WriteGate, entities: &[String]) -> Result<usize> {
        let mut updated = 0;
        for (a, b) in unordered_pairs(entities) {
            match self.update_pair(graph_name, write_gate, &a, &b).await {
                Ok(()) => updated += 1,
                Err(e) => warn!(pair = %format!("{a}/{b}"), error = %e, "coactivation update failed, skipping pair"),
            }
        }
        for entity in entities {
            if let Err(e) = self.bump_presence(graph_name, write_gate, entity).await {
                warn!(entity = %entity, error = %e, "wm presence update failed, skipping entity");
            }
        }
        Ok(updated)
    }

    async fn bump_presence(&self, graph_name: &str, write_gate: &WriteGate, entity_id: &str) -> Result<()> {
        let Some(existing) = write_gate.store().get_node_properties(entity_id).await? else {
            return Ok(());
        };
        let prior = existing.get("ema_wm_presence").and_then(Value::as_float).unwrap_or(0.0);
        let ema_wm_presence = self.alpha * 1.0 + (1.0 - self.alpha) * prior;

        let mut props = PropertyMap::new();
        props.insert("ema_wm_presence".into(), Value::Float(ema_wm_presence));
        let outcome = write_gate.upsert_node(graph_name, "SubEntity", entity_id, props).await?;
        outcome.into_result("ema_wm_presence update")
    }

    async fn update_pair(&self, graph_name: &str, write_gate: &WriteGate, a: &str, b: &str) -> Result<()> {
        let existing = write_gate.store().edge_properties(a, b, "COACTIVATES_WITH").await?;

        let prev_both = existing.as_ref().and_then(|p| p.get("both_ema")).and_then(Value::as_float).unwrap_or(0.0);
        let prev_either = existing.as_ref().and_then(|p| p.get("either_ema")).and_then(Value::as_float).unwrap_or(0.0);
        let prev_count = existing.as_ref().and_then(|p| p.get("count")).and_then(Value::as_int).unwrap_or(0);

        let both_ema = self.alpha * 1.0 + (1.0 - self.alpha) * prev_both;
        let either_ema = self.alpha * 1.0 + (1.0 - self.alpha) * prev_either;
        let u_jaccard = if either_ema > self.epsilon { both_ema / either_ema } else { 0.0 };

        let mut props = PropertyMap::new();
        props.insert("both_ema".into(), Value::Float(both_ema));
        props.insert("either_ema".into(), Value::Float(either_ema));
        props.insert("u_jaccard".into(), Value::Float(u_jaccard));
        props.insert("count".into(), Value::Int(prev_count + 1));
        props.insert("last_ts".into(), Value::DateTime(Utc::now()));
        props.insert("alpha".into(), Value::Float(self.alpha));

        let outcome = write_gate.upsert_edge(graph_name, "COACTIVATES_WITH", a, b, props).await?;
        outcome.into_result("COACTIVATES_WITH upsert")
    }
}

/// `C(k,2)` unordered pairs with deterministic `A<B` endpoint ordering.
fn unordered_pairs(entities: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for i in 0..entities.len() {
        for j in (i + 1)..entities.len() {
            let (a, b) = if entities[i] < entities[j] {
                (entities[i].clone(), entities[j].clone())
            } else {
                (entities[j].clone(), entities[i].clone())
            };
            pairs.push((a, b));
        }
    }
    pairs
}
