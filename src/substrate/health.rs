//! Graph health monitoring: ten structural metrics,
//! judged against a rolling 30-day percentile history, emitting a
//! snapshot event every tick and an alert event on status transitions.
//! Read-only — never mutates the graph it observes.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::model::Value;
use crate::substrate::graph_store::GraphStore;
use crate::substrate::telemetry::{Event, EventSink};
use crate::Result;

/// Rolling window length for percentile history (30 days of hourly
/// snapshots is the deployment default; this crate only cares about the
/// sample count, not wall-clock spacing).
const HISTORY_WINDOW: usize = 30 * 24;
/// Below this many samples the percentile bands fall back to a fixed,
/// maximally-permissive shape per `HealthHistoryStore.compute_percentiles`.
const MIN_SAMPLES_FOR_PERCENTILES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Green,
    Amber,
    Red,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Green => "GREEN",
            Status::Amber => "AMBER",
            Status::Red => "RED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileBand {
    pub q10: f64,
    pub q20: f64,
    pub q80: f64,
    pub q90: f64,
}

impl PercentileBand {
    /// A value inside `[q20,q80]` is GREEN; inside `[q10,q90]` but
    /// outside the inner band is AMBER; outside `[q10,q90]` is RED.
    pub fn judge(&self, value: f64) -> Status {
        if value >= self.q20 && value <= self.q80 {
            Status::Green
        } else if value >= self.q10 && value <= self.q90 {
            Status::Amber
        } else {
            Status::Red
        }
    }
}

/// The ten named structural metrics. Four (`density`, `membership_overlap`,
/// `subentity_size_gini`, `weighted_orphan_ratio`) are computed directly
/// from live graph structure; the remaining six are derived from the
/// EMA/co-activation state this crate already tracks in-process, per
///  supplement (no external telemetry bus is modeled
/// here, so metrics the original sourced from one are computed from the
/// fields this crate owns instead).
pub const METRIC_NAMES: &[&str] = &[
    "density",
    "membership_overlap",
    "subentity_size_gini",
    "weighted_orphan_ratio",
    "coherence",
    "wm_health",
    "reconstruction",
    "learning_flux",
    "sector_connectivity",
    "highway_weight",
];

/// One health tick's full output for a graph.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub graph: String,
    pub metrics: HashMap<String, (f64, Status)>,
    pub trend_slopes: HashMap<String, f64>,
}

/// Rolling per-metric history, keyed by graph name then metric name.
#[derive(Default)]
struct HistoryStore {
    series: HashMap<(String, String), Vec<f64>>,
    last_status: HashMap<(String, String), Status>,
}

impl HistoryStore {
    fn push(&mut self, graph: &str, metric: &str, value: f64) {
        let key = (graph.to_string(), metric.to_string());
        let series = self.series.entry(key).or_default();
        series.push(value);
        if series.len() > HISTORY_WINDOW {
            let overflow = series.len() - HISTORY_WINDOW;
            series.drain(0..overflow);
        }
    }

    fn band(&self, graph: &str, metric: &str) -> PercentileBand {
        let key = (graph.to_string(), metric.to_string());
        let Some(series) = self.series.get(&key) else {
            return PercentileBand { q10: 0.0, q20: 0.0, q80: 1.0, q90: 1.0 };
        };
        if series.len() < MIN_SAMPLES_FOR_PERCENTILES {
            return PercentileBand { q10: 0.0, q20: 0.0, q80: 1.0, q90: 1.0 };
        }
        let mut sorted = series.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        PercentileBand {
            q10: percentile(&sorted, 0.10),
            q20: percentile(&sorted, 0.20),
            q80: percentile(&sorted, 0.80),
            q90: percentile(&sorted, 0.90),
        }
    }

    /// Simple linear-regression slope over the series' last N samples.
    fn trend_slope(&self, graph: &str, metric: &str) -> f64 {
        let key = (graph.to_string(), metric.to_string());
        let Some(series) = self.series.get(&key) else { return 0.0 };
        linear_regression_slope(series)
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn linear_regression_slope(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = series.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(series) {
        num += (x - x_mean) * (y - y_mean);
        den += (x - x_mean).powi(2);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

pub struct HealthMonitor<'a> {
    sink: &'a dyn EventSink,
    history: Mutex<HistoryStore>,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self { sink, history: Mutex::new(HistoryStore::default()) }
    }

    /// Run one tick for `graph_name`: compute all ten metrics, push each
    /// into its rolling history, judge against the (possibly-fallback)
    /// percentile band, emit a snapshot event, and emit an alert event
    /// for every metric whose status changed since the previous tick.
    pub async fn tick(&self, graph_name: &str, store: &std::sync::Arc<dyn GraphStore>) -> Result<HealthSnapshot> {
        let raw = self.compute_metrics(store).await?;

        let mut metrics = HashMap::new();
        let mut trend_slopes = HashMap::new();
        let mut alerts = Vec::new();

        {
            let mut history = self.history.lock();
            for (name, value) in &raw {
                history.push(graph_name, name, *value);
                let band = history.band(graph_name, name);
                let status = band.judge(*value);
                let key = (graph_name.to_string(), name.to_string());
                let prev = history.last_status.get(&key).copied();
                if prev != Some(status) {
                    if let Some(prev) = prev {
                        alerts.push((name.clone(), prev, status));
                    }
                    history.last_status.insert(key, status);
                }
                let slope = history.trend_slope(graph_name, name);
                metrics.insert(name.clone(), (*value, status));
                trend_slopes.insert(name.clone(), slope);
            }
        }

        let snapshot_json = serde_json::json!({
            "metrics": metrics.iter().map(|(k, (v, s))| (k.clone(), serde_json::json!({"value": v, "status": s.as_str()}))).collect::<serde_json::Map<_, _>>(),
            "trend_slopes": trend_slopes,
        });
        self.sink.emit(Event::GraphHealthSnapshot { graph: graph_name.to_string(), snapshot: snapshot_json });

        for (metric, from, to) in alerts {
            self.sink.emit(Event::GraphHealthAlert {
                graph: graph_name.to_string(),
                metric,
                from_status: from.as_str().to_string(),
                to_status: to.as_str().to_string(),
            });
        }

        Ok(HealthSnapshot { graph: graph_name.to_string(), metrics, trend_slopes })
    }

    async fn compute_metrics(&self, store: &std::sync::Arc<dyn GraphStore>) -> Result<Vec<(String, f64)>> {
        let node_count = store.node_count().await? as f64;
        let edge_count = store.edge_count().await? as f64;

        let density = if node_count > 0.0 { edge_count / node_count } else { 0.0 };

        let memberships = store.edges_by_type("MEMBER_OF").await?;
        let membership_overlap = weighted_jaccard_overlap(&memberships);

        let sub_entities = store.nodes_by_label("SubEntity").await?;
        let subentity_size_gini = {
            let mut sizes: HashMap<String, usize> = HashMap::new();
            for (_, entity_id, _) in &memberships {
                *sizes.entry(entity_id.clone()).or_insert(0) += 1;
            }
            for props in &sub_entities {
                if let Some(id) = props.get("id").and_then(Value::as_str) {
                    sizes.entry(id.to_string()).or_insert(0);
                }
            }
            gini_coefficient(&sizes.values().map(|v| *v as f64).collect::<Vec<_>>())
        };

        let all_nodes = {
            let mut nodes = Vec::new();
            for label in ["Concept", "Principle", "Mechanism", "Realization", "Personal_Pattern"] {
                nodes.extend(store.nodes_by_label(label).await?);
            }
            nodes
        };
        let weighted_orphan_ratio = {
            let mut orphans = 0usize;
            let mut total = 0usize;
            for props in &all_nodes {
                total += 1;
                let log_weight = props.get("log_weight").and_then(Value::as_float).unwrap_or(0.0);
                let threshold = props.get("threshold").and_then(Value::as_float).unwrap_or(1.0);
                let max_w_eff = log_weight.exp();
                if max_w_eff < threshold {
                    orphans += 1;
                }
            }
            if total > 0 { orphans as f64 / total as f64 } else { 0.0 }
        };

        let coactivations = store.edges_by_type("COACTIVATES_WITH").await?;
        let coherence = mean_edge_field(&coactivations, "u_jaccard");
        let wm_health = mean_node_field(&sub_entities, "coherence_ema");
        let reconstruction = if node_count > 0.0 { all_nodes.iter().filter(|p| !p.get("content_embedding").map(|_| true).unwrap_or(false)).count() as f64 / node_count } else { 0.0 };
        let learning_flux = mean_node_field(&all_nodes, "ema_trace_seats").abs();
        let sector_connectivity = if sub_entities.is_empty() { 0.0 } else { coactivations.len() as f64 / sub_entities.len() as f64 };
        let highway_weight = {
            let mut weights: Vec<f64> = coactivations.iter().filter_map(|(_, _, p)| p.get("both_ema").and_then(Value::as_float)).collect();
            weights.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            weights.first().copied().unwrap_or(0.0)
        };

        Ok(vec![
            ("density".into(), density),
            ("membership_overlap".into(), membership_overlap),
            ("subentity_size_gini".into(), subentity_size_gini),
            ("weighted_orphan_ratio".into(), weighted_orphan_ratio),
            ("coherence".into(), coherence),
            ("wm_health".into(), wm_health),
            ("reconstruction".into(), reconstruction),
            ("learning_flux".into(), learning_flux),
            ("sector_connectivity".into(), sector_connectivity),
            ("highway_weight".into(), highway_weight),
        ])
    }
}

/// Weighted-Jaccard membership overlap: mean of `min(w)/max(w)` over
/// every `MEMBER_OF` edge weight pair sharing the same content node (a
/// stand-in proxy for true pairwise set overlap, using the weight field
/// already present on each edge).
fn weighted_jaccard_overlap(memberships: &[(String, String, crate::model::PropertyMap)]) -> f64 {
    let mut by_content: HashMap<&str, Vec<f64>> = HashMap::new();
    for (content_id, _, props) in memberships {
        let w = props.get("weight").and_then(Value::as_float).unwrap_or(0.0);
        by_content.entry(content_id.as_str()).or_default().push(w);
    }
    let mut ratios = Vec::new();
    for weights in by_content.values() {
        if weights.len() < 2 {
            continue;
        }
        let max = weights.iter().cloned().fold(f64::MIN, f64::max);
        let min = weights.iter().cloned().fold(f64::MAX, f64::min);
        if max > 0.0 {
            ratios.push(min / max);
        }
    }
    if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

fn gini_coefficient(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let sum: f64 = sorted.iter().sum();
    if sum == 0.0 {
        return 0.0;
    }
    let mut cumulative = 0.0;
    for (i, v) in sorted.iter().enumerate() {
        cumulative += (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v;
    }
    cumulative / (n as f64 * sum)
}

fn mean_edge_field(rows: &[(String, String, crate::model::PropertyMap)], field: &str) -> f64 {
    let values: Vec<f64> = rows.iter().filter_map(|(_, _, p)| p.get(field).and_then(Value::as_float)).collect();
    mean(&values)
}

fn mean_node_field(rows: &[crate::model::PropertyMap], field: &str) -> f64 {
    let values: Vec<f64> = rows.iter().filter_map(|p| p.get(field).and_then(Value::as_float)).collect();
    mean(&values)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyMap;
    use crate::substrate::graph_store::MemoryGraphStore;
    use crate::substrate::telemetry::NoOpSink;
    use std::sync::Arc;

    #[test]
    fn band_judgement_is_monotone() {
        let band = PercentileBand { q10: 0.0, q20: 0.04, q80: 0.06, q90: 0.10 };
        assert_eq!(band.judge(0.05), Status::Green);
        assert_eq!(band.judge(0.07), Status::Amber);
        assert_eq!(band.judge(0.20), Status::Red);
    }

    #[test]
    fn fallback_band_before_min_samples_is_wide_open() {
        let mut history = HistoryStore::default();
        history.push("g1", "density", 0.05);
        let band = history.band("g1", "density");
        assert_eq!(band.q80, 1.0);
    }

    #[test]
    fn gini_of_equal_distribution_is_zero() {
        assert!(gini_coefficient(&[4.0, 4.0, 4.0]).abs() < 1e-9);
    }

    #[test]
    fn gini_of_maximal_inequality_approaches_one() {
        let g = gini_coefficient(&[0.0, 0.0, 0.0, 100.0]);
        assert!(g > 0.5);
    }

    #[tokio::test]
    async fn density_metric_matches_edge_over_node_count() {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        store.upsert_node("Concept", "a", PropertyMap::new()).await.unwrap();
        store.upsert_node("Concept", "b", PropertyMap::new()).await.unwrap();
        store.upsert_edge("RELATES_TO", "a", "b", PropertyMap::new()).await.unwrap();

        let sink = NoOpSink;
        let monitor = HealthMonitor::new(&sink);
        let snapshot = monitor.tick("g1", &store).await.unwrap();
        let (density, _) = snapshot.metrics["density"];
        assert!((density - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_transition_emits_alert() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSink(AtomicUsize);
        impl EventSink for CountingSink {
            fn emit(&self, event: Event) {
                if matches!(event, Event::GraphHealthAlert { .. }) {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let sink = CountingSink(AtomicUsize::new(0));
        let monitor = HealthMonitor::new(&sink);

        store.upsert_node("Concept", "a", PropertyMap::new()).await.unwrap();
        monitor.tick("g1", &store).await.unwrap();

        // Seed a long flat history so the bands become tight, then break out of it.
        for _ in 0..20 {
            monitor.tick("g1", &store).await.unwrap();
        }
        for i in 0..50 {
            let id = format!("extra{i}");
            store.upsert_node("Concept", &id, PropertyMap::new()).await.unwrap();
            store.upsert_edge("RELATES_TO", "a", &id, PropertyMap::new()).await.unwrap();
        }
        monitor.tick("g1", &store).await.unwrap();

        assert!(sink.0.load(Ordering::SeqCst) > 0);
    }
}
