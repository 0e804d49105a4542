//! Text embedding contract plus the per-label
//! `embeddable_text` templates used to build the text that gets embedded.

use std::hash::{Hash, Hasher};

use crate::substrate::record::{LinkLabel, NodeLabel};

pub const EMBEDDING_DIM: usize = 768;

/// Text → vector. Implementations must be infallible in practice: on
/// empty input or internal failure, return a zero vector rather than
/// raising, since a missing embedding should degrade vector search
/// (nothing matches) rather than abort a formation or reinforcement
/// pass.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Deterministic hash-projection embedder: tokenizes on whitespace,
/// hashes each token into a fixed number of buckets with a sign
/// determined by a second hash (a minimal feature-hashing / "hashing
/// trick" encoder), then L2-normalizes. Same text always yields the
/// same vector; unrelated texts are (weakly) discriminated by their
/// token sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashProjectionEmbedder;

impl Embedder for HashProjectionEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; EMBEDDING_DIM];
        if text.trim().is_empty() {
            return vec;
        }

        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h as usize) % EMBEDDING_DIM;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vec.iter_mut() {
                *x /= norm;
            }
        }
        vec
    }
}

/// Build the text that gets embedded for a node, per label. Mirrors the
/// per-type template catalog in `embedding_service.py`: each label
/// contributes its most semantically load-bearing fields in a fixed
/// order so that embeddings for the same label are comparable.
pub fn node_embeddable_text(label: &NodeLabel, name: &str, description: &str, properties: &crate::model::PropertyMap) -> String {
    let extra = |key: &str| -> String {
        properties
            .get(key)
            .and_then(crate::model::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match label {
        NodeLabel::Principle | NodeLabel::Mechanism | NodeLabel::Realization | NodeLabel::Concept => {
            format!("{name}. {description}")
        }
        NodeLabel::PersonalPattern => {
            let trigger = extra("trigger");
            format!("{name}: {description} (trigger: {trigger})")
        }
        NodeLabel::Decision => {
            let rationale = extra("rationale");
            format!("Decision: {name}. {description}. Rationale: {rationale}")
        }
        NodeLabel::Event => format!("Event: {name}. {description}"),
        NodeLabel::EmotionState => {
            let valence = extra("valence");
            format!("Emotion: {name} ({valence}). {description}")
        }
        NodeLabel::Goal => format!("Goal: {name}. {description}"),
        NodeLabel::Question => format!("Question: {name}. {description}"),
        NodeLabel::Hypothesis => format!("Hypothesis: {name}. {description}"),
        NodeLabel::Constraint => format!("Constraint: {name}. {description}"),
        NodeLabel::Struggle => format!("Struggle: {name}. {description}"),
        NodeLabel::Preference => format!("Preference: {name}. {description}"),
        NodeLabel::Value => format!("Value: {name}. {description}"),
        NodeLabel::RelationshipNode => format!("Relationship: {name}. {description}"),
        NodeLabel::Resource => format!("Resource: {name}. {description}"),
        NodeLabel::Capability => format!("Capability: {name}. {description}"),
        NodeLabel::Risk => format!("Risk: {name}. {description}"),
        NodeLabel::Commitment => format!("Commitment: {name}. {description}"),
        NodeLabel::SubEntity => format!("Sub-entity: {name}. {description}"),
        NodeLabel::Other(kind) => format!("{kind}: {name}. {description}"),
    }
}

/// Build the text embedded for a relationship, used for
/// `relationship_embedding`.
pub fn link_embeddable_text(label: &LinkLabel, source_name: &str, target_name: &str, context: &str) -> String {
    format!("{source_name} {} {target_name}. {context}", label.as_str())
}
