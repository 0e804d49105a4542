//! `MEMBER_OF` edge truth plus the derived top-K `entity_activations`
//! cache on content nodes.

use chrono::Utc;
use serde::Serialize;

use crate::model::{PropertyMap, Value};
use crate::substrate::record::MembershipCacheEntry;
use crate::substrate::write_gate::WriteGate;
use crate::Result;

/// One pending membership touch, as produced by a TRACE's formation or
/// activation processing. Mirrors the fields the `MEMBER_OF` edge
/// carries.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipRow {
    pub content_id: String,
    pub entity_id: String,
    pub weight: f64,
    pub role: MembershipRole,
    /// EMA presence signal this touch contributes, usually `1.0` for "was
    /// active this trace".
    pub activation_signal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Primary,
    Secondary,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Primary => "primary",
            MembershipRole::Secondary => "secondary",
        }
    }
}

pub struct MembershipStore {
    alpha: f64,
}

impl MembershipStore {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Batched `MEMBER_OF` upsert. Each row's `activation_ema` is updated
    /// by the usual EMA recurrence (`α·signal + (1-α)·previous`),
    /// `activation_count` incremented by 1, `last_activated_ts` bumped to
    /// now, and `weight` merged as `max(existing, row.weight)` — a
    /// membership never regresses just because a later touch carried a
    /// lower declared weight.
    pub async fn flush_memberships(&self, graph_name: &str, write_gate: &WriteGate, rows: Vec<MembershipRow>) -> Result<usize> {
        let mut flushed = 0;
        for row in rows {
            let existing = write_gate
                .store()
                .edge_properties(&row.content_id, &row.entity_id, "MEMBER_OF")
                .await?;

            let prev_ema = existing
                .as_ref()
                .and_then(|p| p.get("activation_ema"))
                .and_then(Value::as_float)
                .unwrap_or(0.0);
            let prev_count = existing
                .as_ref()
                .and_then(|p| p.get("activation_count"))
                .and_then(Value::as_int)
                .unwrap_or(0);
            let prev_weight = existing
                .as_ref()
                .and_then(|p| p.get("weight"))
                .and_then(Value::as_float)
                .unwrap_or(0.0);

            let new_ema = self.alpha * row.activation_signal + (1.0 - self.alpha) * prev_ema;
            let mut props = PropertyMap::new();
            props.insert("activation_ema".into(), Value::Float(new_ema));
            props.insert("activation_count".into(), Value::Int(prev_count + 1));
            props.insert("last_activated_ts".into(), Value::DateTime(Utc::now()));
            props.insert("weight".into(), Value::Float(row.weight.max(prev_weight)));
            props.insert("role".into(), Value::from(row.role.as_str()));

            let outcome = write_gate
                .upsert_edge(graph_name, "MEMBER_OF", &row.content_id, &row.entity_id, props)
                .await?;
            outcome.into_result("MEMBER_OF upsert")?;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Rebuild `entity_activations` for `node_id` from the top-`k`
    /// `MEMBER_OF` edges by `activation_ema desc`. The cache is always
    /// derived; this is its only writer.
    pub async fn rebuild_cache(&self, graph_name: &str, write_gate: &WriteGate, node_id: &str, k: usize) -> Result<Vec<MembershipCacheEntry>> {
        let edges = write_gate.store().outgoing_edges(node_id, "MEMBER_OF").await?;

        let mut entries: Vec<MembershipCacheEntry> = edges
            .into_iter()
            .map(|(entity_id, props)| MembershipCacheEntry {
                entity_id,
                activation_ema: props.get("activation_ema").and_then(Value::as_float).unwrap_or(0.0),
                last_activated_ts: props
                    .get("last_activated_ts")
                    .and_then(|v| match v {
                        Value::DateTime(dt) => Some(*dt),
                        _ => None,
                    })
                    .unwrap_or_else(Utc::now),
                weight: props.get("weight").and_then(Value::as_float).unwrap_or(0.0),
            })
            .collect();

        entries.sort_by(|a, b| b.activation_ema.partial_cmp(&a.activation_ema).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(k);

        let mut props = PropertyMap::new();
        props.insert(
            "entity_activations".into(),
            Value::from(serde_json::to_string(&entries).unwrap_or_default()),
        );
        props.insert("entity_activations_updated_at".into(), Value::DateTime(Utc::now()));

        // The cache rebuild is a scalar-only SET on an already-existing
        // node; the label passed here is never consulted for an existing
        // id (see `MemoryGraphStore::upsert_node`).
        let outcome = write_gate.upsert_node(graph_name, "Concept", node_id, props).await?;
        outcome.into_result("entity_activations cache rebuild")?;

        Ok(entries)
    }

    /// Membership weight of an edge (as opposed to a node) w.r.t. entity
    /// `e`, per the link-membership derivation:
    /// `min(source_membership, target_membership)`, zero entries dropped.
    pub fn link_membership_weight(source_weight: f64, target_weight: f64) -> f64 {
        if source_weight <= 0.0 || target_weight <= 0.0 {
            0.0
        } else {
            source_weight.min(target_weight)
        }
    }
}
