//! The domain-level graph contract: idempotent
//! identity-keyed upsert with read-back confirmation and bounded
//! retries, batched scalar updates, and brute-force cosine vector search
//! layered over the kernel's `StorageBackend`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::model::{Direction, NodeId, PropertyMap, Value};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, Result};

/// Fields passed to the backend's inline vector constructor rather than
/// bound as ordinary scalar parameters.
pub const VECTOR_FIELDS: &[&str] = &["content_embedding", "relationship_embedding", "centroid_embedding"];

const READBACK_RETRIES: u32 = 2;

/// Result of an upsert attempt. `confirmed=false` after exhausting
/// retries is returned, never panicked on — callers decide whether to
/// raise a QA task or abort.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub confirmed: bool,
    pub retries: u32,
    pub error: Option<String>,
}

impl UpsertOutcome {
    fn confirmed(retries: u32) -> Self {
        Self { confirmed: true, retries, error: None }
    }

    fn failed(retries: u32, error: impl Into<String>) -> Self {
        Self { confirmed: false, retries, error: Some(error.into()) }
    }

    pub fn into_result(self, retry_item: &str) -> Result<()> {
        if self.confirmed {
            Ok(())
        } else {
            Err(Error::WriteNotConfirmed {
                retries: self.retries,
                reason: self.error.unwrap_or_else(|| format!("{retry_item} not confirmed")),
            })
        }
    }
}

/// A single row for `batch_upsert`: scalar field updates for one
/// already-existing node, applied in one amortized round-trip.
#[derive(Debug, Clone)]
pub struct BatchUpsertRow {
    pub node_id: String,
    pub scalar_fields: PropertyMap,
}

/// The domain-level graph store contract. Implementors back onto any
/// `StorageBackend`; `MemoryGraphStore` is the reference implementation.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, label: &str, id: &str, properties: PropertyMap) -> Result<UpsertOutcome>;

    async fn upsert_edge(
        &self,
        link_type: &str,
        source_id: &str,
        target_id: &str,
        properties: PropertyMap,
    ) -> Result<UpsertOutcome>;

    async fn batch_upsert(&self, rows: Vec<BatchUpsertRow>) -> Result<usize>;

    async fn vector_query_nodes(
        &self,
        label: &str,
        field: &str,
        k: usize,
        query_vector: &[f32],
        min_similarity: f64,
    ) -> Result<Vec<(String, f64)>>;

    async fn get_node_properties(&self, id: &str) -> Result<Option<PropertyMap>>;

    async fn node_exists(&self, id: &str) -> Result<bool>;

    /// Parameterized Cypher-like read escape hatch, for callers that need arbitrary graph access the typed
    /// methods above don't cover. None of the substrate's own components
    /// call this — they only ever need label/property scans and the
    /// other typed methods — but the contract point itself is part of
    ///  `GraphStore`.
    async fn query(&self, cypher_like: &str, params: PropertyMap) -> Result<crate::execution::QueryResult>;

    async fn nodes_by_label(&self, label: &str) -> Result<Vec<PropertyMap>>;

    /// All edges of `link_type` whose source is `source_id`, as
    /// `(target_id, properties)`. Used by `MembershipStore::rebuild_cache`
    /// and `CoactivationUpdater`.
    async fn outgoing_edges(&self, source_id: &str, link_type: &str) -> Result<Vec<(String, PropertyMap)>>;

    /// Properties of a single identity-keyed edge, if present.
    async fn edge_properties(&self, source_id: &str, target_id: &str, link_type: &str) -> Result<Option<PropertyMap>>;

    /// Every edge of `link_type` in the graph, as
    /// `(source_id, target_id, properties)`. Used by `HealthMonitor`'s
    /// structural metrics.
    async fn edges_by_type(&self, link_type: &str) -> Result<Vec<(String, String, PropertyMap)>>;

    /// Total (both-direction) relationship count touching `id`. Used by
    /// `StimulusInjector`'s connectivity proxy and `HealthMonitor`'s
    /// density metric.
    async fn degree(&self, id: &str) -> Result<usize>;

    async fn node_count(&self) -> Result<u64>;

    async fn edge_count(&self) -> Result<u64>;

    async fn all_node_ids(&self) -> Result<Vec<String>>;
}

/// Reference `GraphStore` over the in-memory kernel backend. Maintains
/// its own `id → NodeId` index since the domain model's identity (a
/// stable string `id`/`name`) is coarser than the kernel's numeric
/// `NodeId`.
pub struct MemoryGraphStore {
    backend: Arc<MemoryBackend>,
    index: RwLock<HashMap<String, NodeId>>,
    /// `(source_id, target_id, type)` → kernel `RelId`, for edge
    /// idempotency.
    edge_index: RwLock<HashMap<(String, String, String), crate::model::RelId>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            index: RwLock::new(HashMap::new()),
            edge_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    async fn write_scalar_properties(&self, node_id: NodeId, mut props: PropertyMap) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        // "id" is the domain identity key and always present as a scalar prop.
        for (key, value) in props.drain() {
            self.backend.set_node_property(&mut tx, node_id, &key, value).await?;
        }
        self.backend.commit_tx(tx).await
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, label: &str, id: &str, properties: PropertyMap) -> Result<UpsertOutcome> {
        let existing = self.index.read().get(id).copied();

        let node_id = match existing {
            Some(nid) => nid,
            None => {
                let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
                let mut base_props = PropertyMap::new();
                base_props.insert("id".into(), Value::from(id.to_string()));
                let nid = self.backend.create_node(&mut tx, &[label], base_props).await?;
                self.backend.commit_tx(tx).await?;
                self.index.write().insert(id.to_string(), nid);
                nid
            }
        };

        self.write_scalar_properties(node_id, properties).await?;

        // Read-back confirmation, up to READBACK_RETRIES additional attempts.
        let mut retries = 0;
        loop {
            let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
            let node = self.backend.get_node(&tx, node_id).await?;
            if let Some(node) = node {
                if node.get("id").and_then(Value::as_str) == Some(id) {
                    return Ok(UpsertOutcome::confirmed(retries));
                }
            }
            if retries >= READBACK_RETRIES {
                return Ok(UpsertOutcome::failed(retries, format!("node {id} not confirmed after read-back")));
            }
            retries += 1;
        }
    }

    async fn upsert_edge(
        &self,
        link_type: &str,
        source_id: &str,
        target_id: &str,
        properties: PropertyMap,
    ) -> Result<UpsertOutcome> {
        let src = self.index.read().get(source_id).copied();
        let dst = self.index.read().get(target_id).copied();
        let (src, dst) = match (src, dst) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Ok(UpsertOutcome::failed(
                    0,
                    format!("missing endpoint: {source_id} or {target_id}"),
                ));
            }
        };

        let key = (source_id.to_string(), target_id.to_string(), link_type.to_string());
        let rel_id = self.edge_index.read().get(&key).copied();

        let rel_id = match rel_id {
            Some(rid) => rid,
            None => {
                let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
                let rid = self
                    .backend
                    .create_relationship(&mut tx, src, dst, link_type, PropertyMap::new())
                    .await?;
                self.backend.commit_tx(tx).await?;
                self.edge_index.write().insert(key, rid);
                rid
            }
        };

        {
            let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
            for (k, v) in properties {
                self.backend.set_relationship_property(&mut tx, rel_id, &k, v).await?;
            }
            self.backend.commit_tx(tx).await?;
        }

        let mut retries = 0;
        loop {
            let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
            if self.backend.get_relationship(&tx, rel_id).await?.is_some() {
                return Ok(UpsertOutcome::confirmed(retries));
            }
            if retries >= READBACK_RETRIES {
                return Ok(UpsertOutcome::failed(retries, "edge not confirmed after read-back"));
            }
            retries += 1;
        }
    }

    async fn batch_upsert(&self, rows: Vec<BatchUpsertRow>) -> Result<usize> {
        let mut count = 0;
        for row in rows {
            if let Some(node_id) = self.index.read().get(&row.node_id).copied() {
                self.write_scalar_properties(node_id, row.scalar_fields).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn vector_query_nodes(
        &self,
        label: &str,
        field: &str,
        k: usize,
        query_vector: &[f32],
        min_similarity: f64,
    ) -> Result<Vec<(String, f64)>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let nodes = self.backend.nodes_by_label(&tx, label).await?;

        let mut scored: Vec<(String, f64)> = Vec::new();
        for node in nodes {
            let Some(id) = node.get("id").and_then(Value::as_str) else { continue };
            let Some(Value::List(raw)) = node.get(field) else { continue };
            let vec: Vec<f32> = raw.iter().filter_map(|v| v.as_float()).map(|f| f as f32).collect();
            if vec.is_empty() {
                continue;
            }
            let sim = cosine_similarity(query_vector, &vec);
            if sim >= min_similarity {
                scored.push((id.to_string(), sim));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn get_node_properties(&self, id: &str) -> Result<Option<PropertyMap>> {
        let Some(node_id) = self.index.read().get(id).copied() else {
            return Ok(None);
        };
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        Ok(self.backend.get_node(&tx, node_id).await?.map(|n| n.properties))
    }

    async fn node_exists(&self, id: &str) -> Result<bool> {
        Ok(self.index.read().contains_key(id))
    }

    async fn query(&self, cypher_like: &str, params: PropertyMap) -> Result<crate::execution::QueryResult> {
        let graph = crate::Graph::with_backend(self.backend.as_ref().clone());
        graph.execute(cypher_like, params).await
    }

    async fn nodes_by_label(&self, label: &str) -> Result<Vec<PropertyMap>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        Ok(self
            .backend
            .nodes_by_label(&tx, label)
            .await?
            .into_iter()
            .map(|n| n.properties)
            .collect())
    }

    async fn outgoing_edges(&self, source_id: &str, link_type: &str) -> Result<Vec<(String, PropertyMap)>> {
        let Some(node_id) = self.index.read().get(source_id).copied() else {
            return Ok(Vec::new());
        };
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let rels = self
            .backend
            .get_relationships(&tx, node_id, Direction::Outgoing, Some(link_type))
            .await?;
        let reverse: HashMap<NodeId, String> =
            self.index.read().iter().map(|(id, nid)| (*nid, id.clone())).collect();
        Ok(rels
            .into_iter()
            .filter_map(|r| reverse.get(&r.dst).map(|target| (target.clone(), r.properties)))
            .collect())
    }

    async fn edge_properties(&self, source_id: &str, target_id: &str, link_type: &str) -> Result<Option<PropertyMap>> {
        let key = (source_id.to_string(), target_id.to_string(), link_type.to_string());
        let Some(rel_id) = self.edge_index.read().get(&key).copied() else {
            return Ok(None);
        };
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        Ok(self.backend.get_relationship(&tx, rel_id).await?.map(|r| r.properties))
    }

    async fn edges_by_type(&self, link_type: &str) -> Result<Vec<(String, String, PropertyMap)>> {
        let matching: Vec<(String, String, crate::model::RelId)> = self
            .edge_index
            .read()
            .iter()
            .filter(|(key, _)| key.2 == link_type)
            .map(|((src, dst, _), rel_id)| (src.clone(), dst.clone(), *rel_id))
            .collect();

        let mut out = Vec::with_capacity(matching.len());
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        for (src, dst, rel_id) in matching {
            if let Some(rel) = self.backend.get_relationship(&tx, rel_id).await? {
                out.push((src, dst, rel.properties));
            }
        }
        Ok(out)
    }

    async fn degree(&self, id: &str) -> Result<usize> {
        let Some(node_id) = self.index.read().get(id).copied() else {
            return Ok(0);
        };
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        Ok(self.backend.get_relationships(&tx, node_id, Direction::Both, None).await?.len())
    }

    async fn node_count(&self) -> Result<u64> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        self.backend.node_count(&tx).await
    }

    async fn edge_count(&self) -> Result<u64> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        self.backend.relationship_count(&tx).await
    }

    async fn all_node_ids(&self) -> Result<Vec<String>> {
        Ok(self.index.read().keys().cloned().collect())
    }
}

impl MemoryGraphStore {
    /// Convenience alias kept for the kernel-style naming the existing
    /// tests use; identical to `GraphStore::edge_count`.
    pub async fn relationship_count(&self) -> Result<u64> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        self.backend.relationship_count(&tx).await
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_node_is_idempotent() {
        let store = MemoryGraphStore::new();
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("Alpha"));
        let first = store.upsert_node("Concept", "n1", props.clone()).await.unwrap();
        assert!(first.confirmed);

        let mut props2 = PropertyMap::new();
        props2.insert("name".into(), Value::from("Alpha renamed"));
        let second = store.upsert_node("Concept", "n1", props2).await.unwrap();
        assert!(second.confirmed);

        assert_eq!(store.node_count().await.unwrap(), 1);
        let got = store.get_node_properties("n1").await.unwrap().unwrap();
        assert_eq!(got.get("name"), Some(&Value::from("Alpha renamed")));
    }

    #[tokio::test]
    async fn upsert_edge_requires_both_endpoints() {
        let store = MemoryGraphStore::new();
        store.upsert_node("Concept", "a", PropertyMap::new()).await.unwrap();
        let outcome = store.upsert_edge("RELATES_TO", "a", "missing", PropertyMap::new()).await.unwrap();
        assert!(!outcome.confirmed);
    }

    #[tokio::test]
    async fn upsert_edge_is_idempotent_under_endpoint_type_key() {
        let store = MemoryGraphStore::new();
        store.upsert_node("Concept", "a", PropertyMap::new()).await.unwrap();
        store.upsert_node("Concept", "b", PropertyMap::new()).await.unwrap();

        store.upsert_edge("RELATES_TO", "a", "b", PropertyMap::new()).await.unwrap();
        store.upsert_edge("RELATES_TO", "a", "b", PropertyMap::new()).await.unwrap();

        assert_eq!(store.relationship_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn vector_query_orders_by_descending_similarity() {
        let store = MemoryGraphStore::new();
        for (id, vec) in [("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1]), ("c", vec![-1.0, 0.0])] {
            let mut props = PropertyMap::new();
            props.insert(
                "content_embedding".into(),
                Value::List(vec.into_iter().map(Value::Float).collect()),
            );
            store.upsert_node("Concept", id, props).await.unwrap();
        }

        let results = store
            .vector_query_nodes("Concept", "content_embedding", 10, &[1.0, 0.0], -1.0)
            .await
            .unwrap();

        assert_eq!(results[0].0, "a");
        assert!(results[0].1 > results[1].1);
    }

    #[tokio::test]
    async fn vector_query_respects_similarity_floor() {
        let store = MemoryGraphStore::new();
        let mut props = PropertyMap::new();
        props.insert(
            "content_embedding".into(),
            Value::List(vec![Value::Float(-1.0), Value::Float(0.0)]),
        );
        store.upsert_node("Concept", "opposite", props).await.unwrap();

        let results = store
            .vector_query_nodes("Concept", "content_embedding", 10, &[1.0, 0.0], 0.5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn query_delegates_to_the_cypher_engine_on_a_clone_of_the_backend() {
        // The kernel's planner is a stub (see `planner::plan`), so this
        // escape hatch currently surfaces a PlanError rather than rows —
        // the point of this test is that the call reaches the Cypher
        // engine at all, not that it returns results.
        let store = MemoryGraphStore::new();
        store.upsert_node("Concept", "n1", PropertyMap::new()).await.unwrap();
        let err = store.query("MATCH (n:Concept) RETURN n", PropertyMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::PlanError(_)));
    }
}
