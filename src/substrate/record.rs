//! Typed records for the substrate data model: closed label enums with
//! an escape hatch, bitemporal axes, dual-view weight fields, and the
//! JSON-at-the-boundary coercion for map-valued fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value};

/// Closed node label schema (non-exhaustive — unrecognized-but-plausible
/// labels round-trip via `Other` rather than panicking; `FormationRouter`
/// is what actually rejects truly unknown formation types).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Principle,
    Mechanism,
    Realization,
    Concept,
    PersonalPattern,
    Decision,
    Event,
    EmotionState,
    Goal,
    Question,
    Hypothesis,
    Constraint,
    Struggle,
    Preference,
    Value,
    RelationshipNode,
    Resource,
    Capability,
    Risk,
    Commitment,
    SubEntity,
    Other(String),
}

impl NodeLabel {
    pub fn as_str(&self) -> &str {
        match self {
            NodeLabel::Principle => "Principle",
            NodeLabel::Mechanism => "Mechanism",
            NodeLabel::Realization => "Realization",
            NodeLabel::Concept => "Concept",
            NodeLabel::PersonalPattern => "Personal_Pattern",
            NodeLabel::Decision => "Decision",
            NodeLabel::Event => "Event",
            NodeLabel::EmotionState => "Emotion_State",
            NodeLabel::Goal => "Goal",
            NodeLabel::Question => "Question",
            NodeLabel::Hypothesis => "Hypothesis",
            NodeLabel::Constraint => "Constraint",
            NodeLabel::Struggle => "Struggle",
            NodeLabel::Preference => "Preference",
            NodeLabel::Value => "Value",
            NodeLabel::RelationshipNode => "Relationship_Node",
            NodeLabel::Resource => "Resource",
            NodeLabel::Capability => "Capability",
            NodeLabel::Risk => "Risk",
            NodeLabel::Commitment => "Commitment",
            NodeLabel::SubEntity => "SubEntity",
            NodeLabel::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> NodeLabel {
        match s {
            "Principle" => NodeLabel::Principle,
            "Mechanism" => NodeLabel::Mechanism,
            "Realization" => NodeLabel::Realization,
            "Concept" => NodeLabel::Concept,
            "Personal_Pattern" => NodeLabel::PersonalPattern,
            "Decision" => NodeLabel::Decision,
            "Event" => NodeLabel::Event,
            "Emotion_State" => NodeLabel::EmotionState,
            "Goal" => NodeLabel::Goal,
            "Question" => NodeLabel::Question,
            "Hypothesis" => NodeLabel::Hypothesis,
            "Constraint" => NodeLabel::Constraint,
            "Struggle" => NodeLabel::Struggle,
            "Preference" => NodeLabel::Preference,
            "Value" => NodeLabel::Value,
            "Relationship_Node" => NodeLabel::RelationshipNode,
            "Resource" => NodeLabel::Resource,
            "Capability" => NodeLabel::Capability,
            "Risk" => NodeLabel::Risk,
            "Commitment" => NodeLabel::Commitment,
            "SubEntity" => NodeLabel::SubEntity,
            other => NodeLabel::Other(other.to_string()),
        }
    }
}

/// Closed link label schema, same `Other` escape hatch as `NodeLabel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkLabel {
    Enables,
    Requires,
    Contradicts,
    Supports,
    Causes,
    RelatesTo,
    FollowsFrom,
    Refines,
    MemberOf,
    CoactivatesWith,
    Other(String),
}

impl LinkLabel {
    pub fn as_str(&self) -> &str {
        match self {
            LinkLabel::Enables => "ENABLES",
            LinkLabel::Requires => "REQUIRES",
            LinkLabel::Contradicts => "CONTRADICTS",
            LinkLabel::Supports => "SUPPORTS",
            LinkLabel::Causes => "CAUSES",
            LinkLabel::RelatesTo => "RELATES_TO",
            LinkLabel::FollowsFrom => "FOLLOWS_FROM",
            LinkLabel::Refines => "REFINES",
            LinkLabel::MemberOf => "MEMBER_OF",
            LinkLabel::CoactivatesWith => "COACTIVATES_WITH",
            LinkLabel::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> LinkLabel {
        match s {
            "ENABLES" => LinkLabel::Enables,
            "REQUIRES" => LinkLabel::Requires,
            "CONTRADICTS" => LinkLabel::Contradicts,
            "SUPPORTS" => LinkLabel::Supports,
            "CAUSES" => LinkLabel::Causes,
            "RELATES_TO" => LinkLabel::RelatesTo,
            "FOLLOWS_FROM" => LinkLabel::FollowsFrom,
            "REFINES" => LinkLabel::Refines,
            "MEMBER_OF" => LinkLabel::MemberOf,
            "COACTIVATES_WITH" => LinkLabel::CoactivatesWith,
            other => LinkLabel::Other(other.to_string()),
        }
    }

    /// Required `meta` fields per the per-type link metadata contract.
    /// Every type requires at least `confidence` and `context`; a few
    /// add a type-specific field.
    pub fn required_meta_fields(&self) -> Vec<&'static str> {
        let mut fields = vec!["confidence", "context"];
        match self {
            LinkLabel::Enables => fields.push("strength"),
            LinkLabel::Causes => fields.push("trigger"),
            LinkLabel::Contradicts => fields.push("severity"),
            _ => {}
        }
        fields
    }
}

/// The bitemporal axes every node and link carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bitemporal {
    pub valid_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Bitemporal {
    pub fn new_now() -> Self {
        let now = Utc::now();
        Self {
            valid_at: now,
            invalidated_at: None,
            created_at: now,
            expired_at: None,
        }
    }

    /// `invalidated_at`, when present, strictly follows `valid_at`.
    /// `valid_at ≤ created_at` is NOT required — the axes are independent.
    pub fn is_well_formed(&self) -> bool {
        match self.invalidated_at {
            Some(inv) => inv > self.valid_at,
            None => true,
        }
    }
}

/// Three EMA scalars carried by both nodes and links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmaScalars {
    pub ema_trace_seats: f64,
    pub ema_wm_presence: f64,
    pub ema_formation_quality: f64,
}

/// The dual-view weight: one global scalar plus bounded per-entity
/// overlays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DualViewWeight {
    pub log_weight: f64,
    pub log_weight_overlays: HashMap<String, f64>,
    /// Milliseconds since epoch of the last weight-learning touch; `None`
    /// means "never updated" (learning rate `η = 1.0`).
    pub last_update_timestamp_ms: Option<i64>,
}

impl DualViewWeight {
    /// Effective weight at read time for a given entity (or the global
    /// view when `entity` is `None`).
    pub fn effective_weight(&self, entity: Option<&str>) -> f64 {
        let overlay = entity
            .and_then(|e| self.log_weight_overlays.get(e))
            .copied()
            .unwrap_or(0.0);
        (self.log_weight + overlay).exp()
    }

    pub fn overlay_within_bounds(&self, overlay_cap: f64) -> bool {
        self.log_weight_overlays
            .values()
            .all(|v| v.abs() <= overlay_cap + 1e-9)
    }
}

/// One entry in the `entity_activations` top-K derived cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipCacheEntry {
    pub entity_id: String,
    pub activation_ema: f64,
    pub last_activated_ts: DateTime<Utc>,
    pub weight: f64,
}

/// A fully typed node record as carried in-process. Serialized to/from a
/// `PropertyMap` at the `GraphStore` boundary — vector fields excluded
/// from the scalar property bag and passed through the vector field set
/// instead (see `graph_store::VECTOR_FIELDS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: NodeLabel,
    pub name: String,
    pub description: String,
    pub energy: f64,
    pub threshold: f64,
    pub weight: DualViewWeight,
    pub ema: EmaScalars,
    pub embeddable_text: String,
    pub content_embedding: Vec<f32>,
    pub bitemporal: Bitemporal,
    pub vid: u64,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
    pub properties: PropertyMap,
    pub entity_activations: Vec<MembershipCacheEntry>,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, label: NodeLabel, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label,
            name: name.into(),
            description: String::new(),
            energy: 0.0,
            threshold: 0.0,
            weight: DualViewWeight::default(),
            ema: EmaScalars::default(),
            embeddable_text: String::new(),
            content_embedding: Vec::new(),
            bitemporal: Bitemporal::new_now(),
            vid: 1,
            supersedes: None,
            superseded_by: None,
            properties: PropertyMap::new(),
            entity_activations: Vec::new(),
        }
    }

    /// Serialize the scalar (non-vector) fields to a `PropertyMap` for
    /// `GraphStore::upsert_node`. `log_weight_overlays` and
    /// `entity_activations` are JSON-encoded strings at this boundary per
    /// .
    pub fn to_scalar_properties(&self) -> PropertyMap {
        let mut props = self.properties.clone();
        props.insert("label".into(), Value::from(self.label.as_str()));
        props.insert("name".into(), Value::from(self.name.clone()));
        props.insert("description".into(), Value::from(self.description.clone()));
        props.insert("energy".into(), Value::Float(self.energy));
        props.insert("threshold".into(), Value::Float(self.threshold));
        props.insert("log_weight".into(), Value::Float(self.weight.log_weight));
        props.insert(
            "log_weight_overlays".into(),
            Value::from(serde_json::to_string(&self.weight.log_weight_overlays).unwrap_or_default()),
        );
        props.insert("ema_trace_seats".into(), Value::Float(self.ema.ema_trace_seats));
        props.insert("ema_wm_presence".into(), Value::Float(self.ema.ema_wm_presence));
        props.insert(
            "ema_formation_quality".into(),
            Value::Float(self.ema.ema_formation_quality),
        );
        props.insert("embeddable_text".into(), Value::from(self.embeddable_text.clone()));
        props.insert("vid".into(), Value::Int(self.vid as i64));
        if let Some(s) = &self.supersedes {
            props.insert("supersedes".into(), Value::from(s.clone()));
        }
        props.insert(
            "entity_activations".into(),
            Value::from(serde_json::to_string(&self.entity_activations).unwrap_or_default()),
        );
        if let Some(ts) = self.weight.last_update_timestamp_ms {
            props.insert("last_update_timestamp".into(), Value::Int(ts));
        }
        props
    }
}

/// A fully typed link record, analogous to `NodeRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source_id: String,
    pub target_id: String,
    pub label: LinkLabel,
    pub weight: f64,
    pub confidence: f64,
    pub energy: f64,
    pub meta: HashMap<String, Value>,
    pub dual_view: DualViewWeight,
    pub ema: EmaScalars,
    pub bitemporal: Bitemporal,
    pub relationship_embedding: Option<Vec<f32>>,
    pub goal: Option<String>,
    pub mindstate: Option<String>,
    pub felt_as: Option<String>,
    pub struggle: Option<String>,
}

impl LinkRecord {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, label: LinkLabel) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            label,
            weight: 0.5,
            confidence: 0.5,
            energy: 0.0,
            meta: HashMap::new(),
            dual_view: DualViewWeight::default(),
            ema: EmaScalars::default(),
            bitemporal: Bitemporal::new_now(),
            relationship_embedding: None,
            goal: None,
            mindstate: None,
            felt_as: None,
            struggle: None,
        }
    }

    /// Which of the label's required `meta` fields are missing. Empty
    /// means the contract is satisfied.
    pub fn missing_meta_fields(&self) -> Vec<String> {
        self.label
            .required_meta_fields()
            .into_iter()
            .filter(|f| !self.meta.contains_key(*f))
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_round_trips_through_parse() {
        assert_eq!(NodeLabel::parse("Principle"), NodeLabel::Principle);
        assert_eq!(NodeLabel::parse("Principle").as_str(), "Principle");
        assert!(matches!(NodeLabel::parse("Widget"), NodeLabel::Other(_)));
    }

    #[test]
    fn link_contract_requires_confidence_and_context() {
        let link = LinkRecord::new("a", "b", LinkLabel::RelatesTo);
        let missing = link.missing_meta_fields();
        assert_eq!(missing, vec!["confidence".to_string(), "context".to_string()]);
    }

    #[test]
    fn enables_link_additionally_requires_strength() {
        let link = LinkRecord::new("a", "b", LinkLabel::Enables);
        let missing = link.missing_meta_fields();
        assert!(missing.contains(&"strength".to_string()));
    }

    #[test]
    fn overlay_bound_check() {
        let mut w = DualViewWeight::default();
        w.log_weight_overlays.insert("e1".into(), 1.9);
        assert!(w.overlay_within_bounds(2.0));
        w.log_weight_overlays.insert("e2".into(), 2.5);
        assert!(!w.overlay_within_bounds(2.0));
    }

    #[test]
    fn effective_weight_combines_global_and_overlay() {
        let mut w = DualViewWeight::default();
        w.log_weight = 0.0;
        w.log_weight_overlays.insert("e1".into(), 1.0);
        assert!((w.effective_weight(Some("e1")) - std::f64::consts::E).abs() < 1e-9);
        assert_eq!(w.effective_weight(None), 1.0);
        assert_eq!(w.effective_weight(Some("unknown")), 1.0);
    }

    #[test]
    fn bitemporal_invalidated_at_must_follow_valid_at() {
        let mut bt = Bitemporal::new_now();
        assert!(bt.is_well_formed());
        bt.invalidated_at = Some(bt.valid_at - chrono::Duration::seconds(1));
        assert!(!bt.is_well_formed());
    }
}
