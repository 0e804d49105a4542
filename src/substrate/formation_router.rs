//! Formation-block processing: scope → graph binding,
//! universal defaults, embedding attachment, stub auto-creation for
//! missing link endpoints, and the primary-membership edge for
//! personal-scope formations.

use tracing::warn;

use crate::model::{PropertyMap, Value};
use crate::substrate::config::SubstrateConfig;
use crate::substrate::embedding::{node_embeddable_text, Embedder};
use crate::substrate::namespace::Scope;
use crate::substrate::record::{LinkLabel, LinkRecord, NodeLabel, NodeRecord};
use crate::substrate::telemetry::{QaTask, QaTaskQueue};
use crate::substrate::trace_parser::FormationBlock;
use crate::substrate::write_gate::WriteGate;
use crate::{Error, Result};

/// Confidence and trigger recorded on an auto-created stub endpoint
///.
const STUB_CONFIDENCE: f64 = 0.3;
const STUB_TRIGGER: &str = "automated_recognition";

pub struct FormationRouter<'a> {
    config: &'a SubstrateConfig,
    embedder: &'a dyn Embedder,
    qa: &'a QaTaskQueue,
}

impl<'a> FormationRouter<'a> {
    pub fn new(config: &'a SubstrateConfig, embedder: &'a dyn Embedder, qa: &'a QaTaskQueue) -> Self {
        Self { config, embedder, qa }
    }

    /// Route and write one formation block. Returns the new node/edge
    /// identity on success; schema violations and unconfirmed writes are
    /// queued as QA tasks and returned as `Err` so the caller can skip
    /// this one formation without aborting the rest of the TRACE.
    pub async fn process(
        &self,
        write_gate: &WriteGate,
        block: &FormationBlock,
        entity_context: &[String],
    ) -> Result<String> {
        if block.is_link {
            self.process_link(write_gate, block).await
        } else {
            self.process_node(write_gate, block, entity_context).await
        }
    }

    fn target_graph(&self, scope: Scope) -> Result<String> {
        let key = match scope {
            Scope::Personal => "personal",
            Scope::Organizational => "organizational",
            Scope::Ecosystem => "ecosystem",
        };
        self.config
            .scope_to_graph
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SchemaViolation(format!("no graph bound for scope {key:?}")))
    }

    fn read_scope(&self, block: &FormationBlock) -> Result<Scope> {
        let raw = match block.fields.get("scope") {
            Some(raw) => raw,
            None => {
                self.qa.push(QaTask::new("missing_scope", block.kind.clone(), "formation has no scope field"));
                return Err(Error::SchemaViolation("formation missing scope".into()));
            }
        };
        raw.parse::<Scope>().map_err(|e| {
            self.qa.push(QaTask::new("unknown_scope", block.kind.clone(), raw.clone()));
            e
        })
    }

    async fn process_node(&self, write_gate: &WriteGate, block: &FormationBlock, entity_context: &[String]) -> Result<String> {
        let scope = self.read_scope(block)?;
        let graph_name = self.target_graph(scope)?;

        let label = NodeLabel::parse(&block.kind);
        if matches!(label, NodeLabel::Other(_)) {
            self.qa.push(QaTask::new("schema_violation", block.kind.clone(), "unknown node formation type"));
            return Err(Error::SchemaViolation(format!("unknown node type {:?}", block.kind)));
        }

        let id = block
            .fields
            .get("id")
            .or_else(|| block.fields.get("name"))
            .cloned()
            .ok_or_else(|| Error::SchemaViolation("node formation missing id/name".into()))?;
        let name = block.fields.get("name").cloned().unwrap_or_else(|| id.clone());
        let description = block.fields.get("description").cloned().unwrap_or_default();

        let mut record = NodeRecord::new(&id, label.clone(), &name);
        record.description = description;
        for (key, value) in &block.fields {
            if matches!(key.as_str(), "scope" | "id" | "name" | "description") {
                continue;
            }
            record.properties.insert(key.clone(), Value::from(value.clone()));
        }

        record.embeddable_text = node_embeddable_text(&label, &record.name, &record.description, &record.properties);
        record.content_embedding = self.embedder.embed(&record.embeddable_text);

        let mut props = record.to_scalar_properties();
        props.insert(
            "content_embedding".into(),
            Value::List(record.content_embedding.iter().map(|f| Value::Float(*f as f64)).collect()),
        );

        let outcome = write_gate.upsert_node(&graph_name, label.as_str(), &id, props).await?;
        outcome.into_result(&format!("node formation {id}"))?;

        if scope == Scope::Personal && !entity_context.is_empty() {
            let primary = &entity_context[0];
            let mut edge_props = PropertyMap::new();
            edge_props.insert("weight".into(), Value::Float(1.0));
            edge_props.insert("role".into(), Value::from("primary"));
            edge_props.insert("activation_ema".into(), Value::Float(0.0));
            edge_props.insert("activation_count".into(), Value::Int(0));
            let member_outcome = write_gate.upsert_edge(&graph_name, "MEMBER_OF", &id, primary, edge_props).await?;
            if !member_outcome.confirmed {
                warn!(node = %id, entity = %primary, "primary MEMBER_OF edge not confirmed");
            }
        }

        Ok(id)
    }

    async fn process_link(&self, write_gate: &WriteGate, block: &FormationBlock) -> Result<String> {
        let scope = self.read_scope(block)?;
        let graph_name = self.target_graph(scope)?;

        let label = LinkLabel::parse(&block.kind);
        if matches!(label, LinkLabel::Other(_)) {
            self.qa.push(QaTask::new("schema_violation", block.kind.clone(), "unknown link formation type"));
            return Err(Error::SchemaViolation(format!("unknown link type {:?}", block.kind)));
        }

        let source = block.fields.get("source").cloned().ok_or_else(|| Error::SchemaViolation("link formation missing source".into()))?;
        let target = block.fields.get("target").cloned().ok_or_else(|| Error::SchemaViolation("link formation missing target".into()))?;

        for endpoint in [&source, &target] {
            if !write_gate.store().node_exists(endpoint).await? {
                self.create_stub(write_gate, &graph_name, endpoint).await?;
            }
        }

        let mut link = LinkRecord::new(&source, &target, label.clone());
        if let Some(confidence) = block.fields.get("confidence").and_then(|s| s.parse::<f64>().ok()) {
            link.confidence = confidence;
        }
        for (key, value) in &block.fields {
            if matches!(key.as_str(), "scope" | "source" | "target") {
                continue;
            }
            link.meta.insert(key.clone(), Value::from(value.clone()));
        }

        let missing = link.missing_meta_fields();

        let mut props = PropertyMap::new();
        props.insert("weight".into(), Value::Float(link.weight));
        props.insert("confidence".into(), Value::Float(link.confidence));
        props.insert("energy".into(), Value::Float(link.energy));
        for (k, v) in &link.meta {
            props.insert(format!("meta_{k}"), v.clone());
        }

        let outcome = write_gate.upsert_edge(&graph_name, label.as_str(), &source, &target, props).await?;
        outcome.into_result(&format!("link formation {source} -> {target}"))?;

        if !missing.is_empty() {
            self.qa.push(QaTask::new(
                "incomplete_metadata",
                format!("{source}->{target}:{}", label.as_str()),
                format!("missing required meta fields: {missing:?}"),
            ));
        }

        Ok(format!("{source}->{target}"))
    }

    async fn create_stub(&self, write_gate: &WriteGate, graph_name: &str, id: &str) -> Result<()> {
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from(id.to_string()));
        props.insert("description".into(), Value::from(String::new()));
        props.insert("confidence".into(), Value::Float(STUB_CONFIDENCE));
        props.insert("formation_trigger".into(), Value::from(STUB_TRIGGER));
        props.insert("log_weight".into(), Value::Float(0.0));
        let outcome = write_gate.upsert_node(graph_name, "Concept", id, props).await?;
        outcome.into_result(&format!("stub node {id}"))
    }
}
