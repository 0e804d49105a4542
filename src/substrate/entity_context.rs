//! Active-entity-set resolution: the priority logic that
//! decides which sub-entities a given TRACE is "happening inside of",
//! consumed by `WeightLearner`, `MembershipStore`, and `FormationRouter`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::substrate::graph_store::GraphStore;
use crate::substrate::trace_parser::EntityMark;
use crate::Result;

const CACHE_TTL: Duration = Duration::from_secs(60);

struct WmState {
    entities: Vec<String>,
    set_at: Instant,
    consumed: bool,
}

/// Resolves the ordered active-entity list.7's priority
/// chain. Holds the most recent working-memory selection as interior
/// state, set by `set_wm_entities` (typically called once per
/// `COACTIVATES_WITH`-triggering WM event) and consumed at most once as
/// the top-priority signal; a consumed-but-still-fresh (<60s) set
/// remains available as the step-4 fallback.
pub struct EntityContextResolver {
    wm: Mutex<Option<WmState>>,
}

impl EntityContextResolver {
    pub fn new() -> Self {
        Self { wm: Mutex::new(None) }
    }

    /// Record a fresh working-memory selection set. An empty set clears
    /// the cached state outright (there is nothing to prioritize or to
    /// fall back to).
    pub fn set_wm_entities(&self, entities: Vec<String>) {
        let mut guard = self.wm.lock();
        if entities.is_empty() {
            *guard = None;
        } else {
            *guard = Some(WmState { entities, set_at: Instant::now(), consumed: false });
        }
    }

    /// Resolve the active-entity list for one TRACE.
    ///
    /// Priority: (1) the freshest unconsumed WM selection, if non-empty;
    /// (2) explicit `[entity: X]` marks from the trace text, in order of
    /// appearance; (3) a single dominant `SubEntity` by `energy/threshold`
    /// descending, only if that ratio exceeds 1; (4) the same WM
    /// selection, now just as a <60s-old cache even though step 1 already
    /// consumed it; (5) empty (global-only learning).
    pub async fn resolve(
        &self,
        entity_marks: &[EntityMark],
        store: &Arc<dyn GraphStore>,
    ) -> Result<Vec<String>> {
        {
            let mut guard = self.wm.lock();
            if let Some(state) = guard.as_mut() {
                if !state.consumed && !state.entities.is_empty() {
                    state.consumed = true;
                    return Ok(state.entities.clone());
                }
            }
        }

        if !entity_marks.is_empty() {
            return Ok(entity_marks.iter().map(|m| m.entity_id.clone()).collect());
        }

        if let Some(dominant) = self.dominant_entity(store).await? {
            return Ok(vec![dominant]);
        }

        {
            let guard = self.wm.lock();
            if let Some(state) = guard.as_ref() {
                if state.set_at.elapsed() < CACHE_TTL {
                    return Ok(state.entities.clone());
                }
            }
        }

        Ok(Vec::new())
    }

    /// The single `SubEntity` with the highest `energy/threshold` ratio,
    /// returned only when that ratio exceeds 1 (i.e. the entity is
    /// currently "over-firing" relative to its own threshold).
    async fn dominant_entity(&self, store: &Arc<dyn GraphStore>) -> Result<Option<String>> {
        let nodes = store.nodes_by_label("SubEntity").await?;
        let mut best: Option<(String, f64)> = None;
        for props in nodes {
            let Some(id) = props.get("id").and_then(crate::model::Value::as_str) else { continue };
            let energy = props.get("energy").and_then(crate::model::Value::as_float).unwrap_or(0.0);
            let threshold = props.get("threshold").and_then(crate::model::Value::as_float).unwrap_or(0.0);
            if threshold <= 0.0 {
                continue;
            }
            let ratio = energy / threshold;
            if ratio > 1.0 && best.as_ref().map(|(_, r)| ratio > *r).unwrap_or(true) {
                best = Some((id.to_string(), ratio));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}

impl Default for EntityContextResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::graph_store::MemoryGraphStore;
    use crate::model::{PropertyMap, Value};

    #[tokio::test]
    async fn fresh_wm_set_wins_first() {
        let resolver = EntityContextResolver::new();
        resolver.set_wm_entities(vec!["e1".into(), "e2".into()]);
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let resolved = resolver.resolve(&[], &store).await.unwrap();
        assert_eq!(resolved, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[tokio::test]
    async fn entity_marks_used_once_wm_is_consumed() {
        let resolver = EntityContextResolver::new();
        resolver.set_wm_entities(vec!["e1".into()]);
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        resolver.resolve(&[], &store).await.unwrap(); // consumes
        let marks = vec![EntityMark { entity_id: "e2".into() }];
        let resolved = resolver.resolve(&marks, &store).await.unwrap();
        assert_eq!(resolved, vec!["e2".to_string()]);
    }

    #[tokio::test]
    async fn dominant_entity_requires_ratio_above_one() {
        let resolver = EntityContextResolver::new();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let mut props = PropertyMap::new();
        props.insert("id".into(), Value::from("dominant"));
        props.insert("energy".into(), Value::Float(5.0));
        props.insert("threshold".into(), Value::Float(2.0));
        store.upsert_node("SubEntity", "dominant", props).await.unwrap();

        let resolved = resolver.resolve(&[], &store).await.unwrap();
        assert_eq!(resolved, vec!["dominant".to_string()]);
    }

    #[tokio::test]
    async fn no_signal_yields_empty_context() {
        let resolver = EntityContextResolver::new();
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let resolved = resolver.resolve(&[], &store).await.unwrap();
        assert!(resolved.is_empty());
    }
}
