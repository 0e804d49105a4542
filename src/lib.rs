//! # mind-substrate — Consciousness Substrate Write-and-Learn Engine
//!
//! A typed, bitemporal property graph that ingests free-form text and
//! maintains learned importance weights, entity-local overlays, semantic
//! embeddings, and a membership fabric linking content nodes to
//! functional "sub-entities". Queried by downstream agents through
//! vector search and graph traversal.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the query
//!    engine and storage; `GraphStore` is the contract between the domain
//!    layer and the graph.
//! 2. **WriteGate is the only door**: no mutator reaches the backend
//!    without a namespace check.
//! 3. **Dual-view weights**: every learned scalar is a global view plus
//!    per-entity overlays, reconciled at read time.
//! 4. **Caches are derived, never authoritative**: `entity_activations`
//!    is rebuilt from `MEMBER_OF` edges, never trusted on its own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mind_substrate::{Substrate, SubstrateConfig};
//!
//! # async fn example() -> mind_substrate::Result<()> {
//! let substrate = Substrate::open_memory(SubstrateConfig::default());
//! substrate.process_trace(
//!     "ecosystem_org_citizen",
//!     "frame-1",
//!     "[n1: very useful] Reflecting on recent progress.",
//! ).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod planner;
pub mod execution;
pub mod storage;
pub mod tx;
pub mod index;
pub mod substrate;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Path, Value, PropertyMap,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{
    StorageBackend, BackendConfig, ConstraintType,
    BackendCapabilities, ProcedureResult,
};

// ============================================================================
// Re-exports: Transactions
// ============================================================================

pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Execution
// ============================================================================

pub use execution::{QueryResult, ResultRow};

// ============================================================================
// Re-exports: Substrate domain layer
// ============================================================================

pub use substrate::{Substrate, SubstrateConfig};

// ============================================================================
// Top-level Graph handle (raw Cypher access, unchanged from the kernel)
// ============================================================================

/// The low-level entry point for raw Cypher execution against a
/// `StorageBackend`. `Substrate` is the domain-level handle built on top
/// of `GraphStore`; `Graph` remains available for direct query-engine
/// access (used by the kernel's own test suite and by anything that
/// needs arbitrary Cypher rather than the typed substrate operations).
pub struct Graph<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> Graph<B> {
    /// Create a Graph with the given backend.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Execute a Cypher query with parameters.
    pub async fn execute<P>(&self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        let ast = cypher::parse(query)?;
        let logical = planner::plan(&ast, &params.into())?;
        let optimized = planner::optimize(logical)?;

        let mut tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let result = execution::execute(&self.backend, &mut tx, optimized).await?;
        self.backend.commit_tx(tx).await?;

        Ok(result)
    }

    /// Execute a write query (CREATE, MERGE, DELETE, SET, etc.)
    pub async fn mutate<P>(&self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        let ast = cypher::parse(query)?;
        let logical = planner::plan(&ast, &params.into())?;
        let optimized = planner::optimize(logical)?;

        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let result = execution::execute(&self.backend, &mut tx, optimized).await?;
        self.backend.commit_tx(tx).await?;

        Ok(result)
    }

    /// Begin an explicit transaction.
    pub async fn begin(&self, mode: TxMode) -> Result<ExplicitTx<'_, B>> {
        let tx = self.backend.begin_tx(mode).await?;
        Ok(ExplicitTx { graph: self, tx })
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl Graph<storage::MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        let backend = storage::MemoryBackend::new();
        Ok(Self::with_backend(backend))
    }
}

/// Explicit transaction handle with auto-rollback on drop.
pub struct ExplicitTx<'g, B: StorageBackend> {
    graph: &'g Graph<B>,
    tx: B::Tx,
}

impl<'g, B: StorageBackend> ExplicitTx<'g, B> {
    pub async fn execute<P>(&mut self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        let ast = cypher::parse(query)?;
        let logical = planner::plan(&ast, &params.into())?;
        let optimized = planner::optimize(logical)?;
        execution::execute(&self.graph.backend, &mut self.tx, optimized).await
    }

    pub async fn commit(self) -> Result<()> {
        self.graph.backend.commit_tx(self.tx).await
    }

    pub async fn rollback(self) -> Result<()> {
        self.graph.backend.rollback_tx(self.tx).await
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cypher syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Semantic error: {0}")]
    SemanticError(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Planning error: {0}")]
    PlanError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ------------------------------------------------------------------
    // Substrate error kinds
    // ------------------------------------------------------------------
    /// Raised by WriteGate on namespace mismatch. Never recovered; the
    /// caller must abort the containing unit of work.
    #[error("cross-layer write denied: expected namespace {expected}, got {got} (in {op})")]
    CrossLayerWriteDenied {
        expected: String,
        got: String,
        op: String,
    },

    /// A write could not be confirmed by read-back after the retry budget
    /// was exhausted.
    #[error("write not confirmed after {retries} retries: {reason}")]
    WriteNotConfirmed { retries: u32, reason: String },

    /// Unknown node/link type, or a formation missing its scope.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A link was written but is missing required contract metadata
    /// fields. Non-fatal: the link still exists.
    #[error("link {link_label} missing required metadata fields: {missing:?}")]
    IncompleteMetadata {
        link_label: String,
        missing: Vec<String>,
    },

    /// The embedding encoder failed; a zero vector was substituted.
    /// Non-fatal, logged as a warning at the call site.
    #[error("embedding generation failed: {0}")]
    EmbeddingFailure(String),

    /// A vector-index query failed. Non-fatal: the caller degrades to
    /// zero matches for the affected label.
    #[error("vector query failed for label {label}: {reason}")]
    VectorQueryFailure { label: String, reason: String },

    /// An edge referenced an endpoint that does not exist and could not
    /// be auto-stubbed.
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),
}

pub type Result<T> = std::result::Result<T, Error>;
