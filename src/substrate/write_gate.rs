//! Namespace write authorization.

use std::sync::Arc;

use crate::substrate::graph_store::{GraphStore, UpsertOutcome};
use crate::substrate::namespace::Namespace;
use crate::substrate::telemetry::{Event, EventSink};
use crate::model::PropertyMap;
use crate::{Error, Result};

/// Bound to exactly one namespace for its lifetime. A writer is minted
/// once per logical caller (one per citizen session, one per org
/// ingestion job, one for the ecosystem-wide learner) and reused across
/// calls rather than reconstructed per write.
pub struct WriteGate {
    namespace: Namespace,
    store: Arc<dyn GraphStore>,
    sink: Arc<dyn EventSink>,
}

impl WriteGate {
    pub fn new(namespace: Namespace, store: Arc<dyn GraphStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { namespace, store, sink }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Authorize a write targeting `graph_name`, raising
    /// `Error::CrossLayerWriteDenied` (and emitting `telemetry.write.denied`)
    /// on mismatch rather than ever silently downgrading scope.
    fn authorize(&self, graph_name: &str, op: &str) -> Result<()> {
        let target = Namespace::for_graph(graph_name);
        if target == self.namespace {
            return Ok(());
        }
        self.sink.emit(Event::TelemetryWriteDenied {
            expected: self.namespace.to_string(),
            got: target.to_string(),
            function: op.to_string(),
            ctx: None,
        });
        Err(Error::CrossLayerWriteDenied {
            expected: self.namespace.to_string(),
            got: target.to_string(),
            op: op.to_string(),
        })
    }

    pub async fn upsert_node(
        &self,
        graph_name: &str,
        label: &str,
        id: &str,
        properties: PropertyMap,
    ) -> Result<UpsertOutcome> {
        self.authorize(graph_name, "upsert_node")?;
        self.store.upsert_node(label, id, properties).await
    }

    pub async fn upsert_edge(
        &self,
        graph_name: &str,
        link_type: &str,
        source_id: &str,
        target_id: &str,
        properties: PropertyMap,
    ) -> Result<UpsertOutcome> {
        self.authorize(graph_name, "upsert_edge")?;
        self.store.upsert_edge(link_type, source_id, target_id, properties).await
    }

    pub async fn batch_upsert(
        &self,
        graph_name: &str,
        rows: Vec<crate::substrate::graph_store::BatchUpsertRow>,
    ) -> Result<usize> {
        self.authorize(graph_name, "batch_upsert")?;
        self.store.batch_upsert(rows).await
    }
}
