//! Dual-view, entity-aware weight learning: cohort EMA
//! updates, rank-based van-der-Waerden z-scores, an adaptive time-decayed
//! learning rate, and the global/overlay dual-view update.

use std::collections::HashMap;

use chrono::Utc;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::model::{PropertyMap, Value};
use crate::substrate::config::SubstrateConfig;
use crate::substrate::graph_store::BatchUpsertRow;
use crate::substrate::telemetry::{Event, EventSink, OverlayReport, WeightUpdateReport};
use crate::substrate::write_gate::WriteGate;
use crate::Result;

const TAU_SECONDS: f64 = 86_400.0;

/// One candidate node for this TRACE's learning pass: its cohort label,
/// the `reinforcement_seats` it was given (0 if none), and the quality
/// scalar of a same-TRACE formation, if one touched it.
#[derive(Debug, Clone)]
pub struct NodeLearningItem {
    pub id: String,
    pub label: String,
    pub seats: f64,
    pub formation_quality: Option<f64>,
}

/// Link analog of `NodeLearningItem`; `link_type` both names the cohort
/// and selects the edge for `GraphStore::edge_properties`.
#[derive(Debug, Clone)]
pub struct LinkLearningItem {
    pub source_id: String,
    pub target_id: String,
    pub link_type: String,
    pub seats: f64,
    pub formation_quality: Option<f64>,
}

pub struct WeightLearner<'a> {
    config: &'a SubstrateConfig,
    sink: &'a dyn EventSink,
}

impl<'a> WeightLearner<'a> {
    pub fn new(config: &'a SubstrateConfig, sink: &'a dyn EventSink) -> Self {
        Self { config, sink }
    }

    /// Run one TRACE's node learning pass: group `items` by label, learn
    /// each cohort independently, persist via `batch_upsert`, emit one
    /// `weights.updated.trace` event per cohort.
    pub async fn learn_nodes(
        &self,
        graph_name: &str,
        write_gate: &WriteGate,
        frame_id: &str,
        scope: &str,
        entity_contexts: &[String],
        items: Vec<NodeLearningItem>,
    ) -> Result<()> {
        let mut cohorts: HashMap<String, Vec<NodeLearningItem>> = HashMap::new();
        for item in items {
            cohorts.entry(item.label.clone()).or_default().push(item);
        }

        for (cohort_label, cohort_items) in cohorts {
            self.learn_node_cohort(graph_name, write_gate, frame_id, scope, entity_contexts, &cohort_label, cohort_items)
                .await?;
        }
        Ok(())
    }

    async fn learn_node_cohort(
        &self,
        graph_name: &str,
        write_gate: &WriteGate,
        frame_id: &str,
        scope: &str,
        entity_contexts: &[String],
        cohort_label: &str,
        items: Vec<NodeLearningItem>,
    ) -> Result<()> {
        let n = items.len();
        let now_ms = Utc::now().timestamp_millis();

        let mut prior = Vec::with_capacity(n);
        for item in &items {
            let props = write_gate.store().get_node_properties(&item.id).await?.unwrap_or_default();
            prior.push(read_weight_state(&props));
        }

        let mut new_ema_seats = Vec::with_capacity(n);
        let mut new_ema_form = Vec::with_capacity(n);
        for (item, state) in items.iter().zip(&prior) {
            new_ema_seats.push(self.config.alpha * item.seats + (1.0 - self.config.alpha) * state.ema_trace_seats);
            new_ema_form.push(match item.formation_quality {
                Some(q) => self.config.alpha * q + (1.0 - self.config.alpha) * state.ema_formation_quality,
                None => state.ema_formation_quality,
            });
        }

        let z_rein = self.cohort_z_scores(&new_ema_seats, 10.0);
        let z_form = self.cohort_z_scores(&new_ema_form, 1.0);

        let mut updates = Vec::with_capacity(n);
        let mut deltas_global = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);

        for (i, item) in items.iter().enumerate() {
            let state = &prior[i];
            let eta = adaptive_eta(state.last_update_ms, now_ms);
            let z_total = z_rein[i] + z_form[i];
            let delta_global = self.config.alpha_global * eta * z_total;
            let new_log_weight = state.log_weight + delta_global;

            let mut overlays = state.overlays.clone();
            let mut overlay_reports = Vec::with_capacity(entity_contexts.len());
            for entity in entity_contexts {
                let membership_weight = write_gate
                    .store()
                    .edge_properties(&item.id, entity, "MEMBER_OF")
                    .await?
                    .and_then(|p| p.get("weight").and_then(Value::as_float))
                    .unwrap_or(0.0);
                let delta_e = self.config.alpha_local * eta * z_total * membership_weight;
                let before = *overlays.get(entity).unwrap_or(&0.0);
                let after = (before + delta_e).clamp(-self.config.overlay_cap, self.config.overlay_cap);
                overlays.insert(entity.clone(), after);
                overlay_reports.push(OverlayReport {
                    entity: entity.clone(),
                    delta: delta_e,
                    overlay_after: after,
                    membership_weight,
                });
            }

            deltas_global.push(delta_global);
            updates.push(WeightUpdateReport {
                item_id: item.id.clone(),
                delta_global,
                log_weight_new: new_log_weight,
                local_overlays: overlay_reports,
            });

            let mut scalar_fields = PropertyMap::new();
            scalar_fields.insert("log_weight".into(), Value::Float(new_log_weight));
            scalar_fields.insert("log_weight_overlays".into(), Value::from(serde_json::to_string(&overlays).unwrap_or_default()));
            scalar_fields.insert("ema_trace_seats".into(), Value::Float(new_ema_seats[i]));
            scalar_fields.insert("ema_formation_quality".into(), Value::Float(new_ema_form[i]));
            scalar_fields.insert("last_update_timestamp".into(), Value::Int(now_ms));
            rows.push(BatchUpsertRow { node_id: item.id.clone(), scalar_fields });
        }

        write_gate.batch_upsert(graph_name, rows).await?;

        let d_mu = mean(&deltas_global);
        let d_sigma = population_stddev(&deltas_global, d_mu);

        self.sink.emit(Event::WeightsUpdatedTrace {
            frame_id: frame_id.to_string(),
            scope: scope.to_string(),
            cohort: cohort_label.to_string(),
            entity_contexts: entity_contexts.to_vec(),
            global_context: entity_contexts.is_empty(),
            n,
            d_mu,
            d_sigma,
            updates,
        });

        Ok(())
    }

    /// Link analog of `learn_nodes`. `GraphStore` has no batched edge
    /// writer, so persistence here is one `upsert_edge` per item rather
    /// than a single `batch_upsert` round-trip.
    pub async fn learn_links(
        &self,
        graph_name: &str,
        write_gate: &WriteGate,
        frame_id: &str,
        scope: &str,
        entity_contexts: &[String],
        items: Vec<LinkLearningItem>,
    ) -> Result<()> {
        let mut cohorts: HashMap<String, Vec<LinkLearningItem>> = HashMap::new();
        for item in items {
            cohorts.entry(item.link_type.clone()).or_default().push(item);
        }

        for (cohort_label, cohort_items) in cohorts {
            self.learn_link_cohort(graph_name, write_gate, frame_id, scope, entity_contexts, &cohort_label, cohort_items)
                .await?;
        }
        Ok(())
    }

    async fn learn_link_cohort(
        &self,
        graph_name: &str,
        write_gate: &WriteGate,
        frame_id: &str,
        scope: &str,
        entity_contexts: &[String],
        cohort_label: &str,
        items: Vec<LinkLearningItem>,
    ) -> Result<()> {
        let n = items.len();
        let now_ms = Utc::now().timestamp_millis();

        let mut prior = Vec::with_capacity(n);
        for item in &items {
            let props = write_gate
                .store()
                .edge_properties(&item.source_id, &item.target_id, &item.link_type)
                .await?
                .unwrap_or_default();
            prior.push(read_weight_state(&props));
        }

        let mut new_ema_seats = Vec::with_capacity(n);
        let mut new_ema_form = Vec::with_capacity(n);
        for (item, state) in items.iter().zip(&prior) {
            new_ema_seats.push(self.config.alpha * item.seats + (1.0 - self.config.alpha) * state.ema_trace_seats);
            new_ema_form.push(match item.formation_quality {
                Some(q) => self.config.alpha * q + (1.0 - self.config.alpha) * state.ema_formation_quality,
                None => state.ema_formation_quality,
            });
        }

        let z_rein = self.cohort_z_scores(&new_ema_seats, 10.0);
        let z_form = self.cohort_z_scores(&new_ema_form, 1.0);

        let mut updates = Vec::with_capacity(n);
        let mut deltas_global = Vec::with_capacity(n);

        for (i, item) in items.iter().enumerate() {
            let state = &prior[i];
            let eta = adaptive_eta(state.last_update_ms, now_ms);
            let z_total = z_rein[i] + z_form[i];
            let delta_global = self.config.alpha_global * eta * z_total;
            let new_log_weight = state.log_weight + delta_global;

            let mut overlays = state.overlays.clone();
            let mut overlay_reports = Vec::with_capacity(entity_contexts.len());
            for entity in entity_contexts {
                let target_membership = write_gate
                    .store()
                    .edge_properties(&item.target_id, entity, "MEMBER_OF")
                    .await?
                    .and_then(|p| p.get("weight").and_then(Value::as_float))
                    .unwrap_or(0.0);
                let source_membership_e = write_gate
                    .store()
                    .edge_properties(&item.source_id, entity, "MEMBER_OF")
                    .await?
                    .and_then(|p| p.get("weight").and_then(Value::as_float))
                    .unwrap_or(0.0);
                let membership_weight = crate::substrate::membership::MembershipStore::link_membership_weight(source_membership_e, target_membership);

                let delta_e = self.config.alpha_local * eta * z_total * membership_weight;
                let before = *overlays.get(entity).unwrap_or(&0.0);
                let after = (before + delta_e).clamp(-self.config.overlay_cap, self.config.overlay_cap);
                overlays.insert(entity.clone(), after);
                overlay_reports.push(OverlayReport {
                    entity: entity.clone(),
                    delta: delta_e,
                    overlay_after: after,
                    membership_weight,
                });
            }

            deltas_global.push(delta_global);
            let item_id = format!("{}->{}", item.source_id, item.target_id);
            updates.push(WeightUpdateReport { item_id: item_id.clone(), delta_global, log_weight_new: new_log_weight, local_overlays: overlay_reports });

            let mut props = PropertyMap::new();
            props.insert("log_weight".into(), Value::Float(new_log_weight));
            props.insert("log_weight_overlays".into(), Value::from(serde_json::to_string(&overlays).unwrap_or_default()));
            props.insert("ema_trace_seats".into(), Value::Float(new_ema_seats[i]));
            props.insert("ema_formation_quality".into(), Value::Float(new_ema_form[i]));
            props.insert("last_update_timestamp".into(), Value::Int(now_ms));
            let outcome = write_gate.upsert_edge(graph_name, &item.link_type, &item.source_id, &item.target_id, props).await?;
            outcome.into_result(&format!("weight update {item_id}"))?;
        }

        let d_mu = mean(&deltas_global);
        let d_sigma = population_stddev(&deltas_global, d_mu);

        self.sink.emit(Event::WeightsUpdatedTrace {
            frame_id: frame_id.to_string(),
            scope: scope.to_string(),
            cohort: cohort_label.to_string(),
            entity_contexts: entity_contexts.to_vec(),
            global_context: entity_contexts.is_empty(),
            n,
            d_mu,
            d_sigma,
            updates,
        });

        Ok(())
    }

    /// Rank-based van-der-Waerden normal scores, falling back to
    /// `ema / fallback_divisor` for cohorts below `min_cohort_size`.
    fn cohort_z_scores(&self, values: &[f64], fallback_divisor: f64) -> Vec<f64> {
        let n = values.len();
        if n < self.config.min_cohort_size {
            return values.iter().map(|v| v / fallback_divisor).collect();
        }
        let ranks = average_ranks(values);
        let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are always valid");
        ranks.iter().map(|r| normal.inverse_cdf(r / (n as f64 + 1.0))).collect()
    }
}

struct WeightState {
    ema_trace_seats: f64,
    ema_formation_quality: f64,
    log_weight: f64,
    overlays: HashMap<String, f64>,
    last_update_ms: Option<i64>,
}

fn read_weight_state(props: &PropertyMap) -> WeightState {
    WeightState {
        ema_trace_seats: props.get("ema_trace_seats").and_then(Value::as_float).unwrap_or(0.0),
        ema_formation_quality: props.get("ema_formation_quality").and_then(Value::as_float).unwrap_or(0.0),
        log_weight: props.get("log_weight").and_then(Value::as_float).unwrap_or(0.0),
        overlays: props
            .get("log_weight_overlays")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        last_update_ms: props.get("last_update_timestamp").and_then(Value::as_int),
    }
}

fn adaptive_eta(last_update_ms: Option<i64>, now_ms: i64) -> f64 {
    match last_update_ms {
        None => 1.0,
        Some(last) => {
            let dt_seconds = ((now_ms - last).max(0) as f64) / 1000.0;
            (1.0 - (-dt_seconds / TAU_SECONDS).exp()).clamp(0.01, 1.0)
        }
    }
}

/// Average-rank assignment (ties share the mean of their positions),
/// reproducing `scipy.stats.rankdata(..., method='average')`.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg_rank = ((i + 1) + (j + 1)) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
