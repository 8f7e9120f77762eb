//! Operation kinds and their result handles

use crate::handle::Handle;
use crate::store::{BulkSummary, WriteRequest};
use bson::{Bson, Document};
use convoy_common::ConvoyError;
use parking_lot::Mutex;

/// Unique operation identifier using UUID v7 (time-ordered)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    /// Create a new operation ID
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result produced by one resolved operation
pub type OpResult = std::result::Result<OpOutput, ConvoyError>;

/// Value carried by a resolved operation handle
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    /// Ids of inserted documents, in submission order
    Inserted(Vec<Bson>),
    /// Documents returned by a find or aggregate
    Documents(Vec<Document>),
    /// Count result
    Count(u64),
    /// Whole-batch summary shared by every operation folded into one bulk
    /// write call
    Bulk(BulkSummary),
    /// Free-form value produced by a block body or a custom operator
    Value(Bson),
}

/// Body of a block operation, run once all dependencies have resolved
type BlockBody = Box<dyn FnOnce(Vec<OpResult>) -> OpResult + Send>;

/// Fan-in primitive: a list of dependency handles plus a body producing
/// the block's own result from their caught outcomes.
///
/// Dependencies are observed via "catch the outcome", not "fail fast":
/// the body always receives every dependency's result, successes and
/// errors alike. A block is itself an operation, so its handle can be the
/// dependency of another block, forming an acyclic graph resolved
/// breadth-first by the round loop.
pub struct BlockSpec {
    dependencies: Vec<Handle<OpOutput>>,
    body: Mutex<Option<BlockBody>>,
}

impl std::fmt::Debug for BlockSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSpec")
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

impl BlockSpec {
    /// True once every dependency carries a value or an error
    pub fn ready(&self) -> bool {
        self.dependencies.iter().all(|d| d.is_resolved())
    }

    /// Caught outcomes of all dependencies, in declaration order.
    ///
    /// Only meaningful once [`BlockSpec::ready`] is true; unresolved
    /// dependencies surface as internal errors.
    pub fn outcomes(&self) -> Vec<OpResult> {
        self.dependencies
            .iter()
            .map(|d| {
                d.peek().unwrap_or_else(|| {
                    Err(ConvoyError::Internal(
                        "block dependency still pending".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Take the body for execution; `None` if it already ran
    pub fn take_body(&self) -> Option<BlockBody> {
        self.body.lock().take()
    }
}

/// Closed set of coarse-grained operation kinds
#[derive(Debug)]
pub enum OpKind {
    /// Insert documents into a collection
    Insert {
        /// Target collection
        collection: String,
        /// Documents to insert
        documents: Vec<Document>,
    },
    /// Update matching documents
    Update {
        /// Target collection
        collection: String,
        /// Match filter
        filter: Document,
        /// Update document
        update: Document,
        /// Update every match instead of the first
        many: bool,
    },
    /// Delete matching documents
    Delete {
        /// Target collection
        collection: String,
        /// Match filter
        filter: Document,
        /// Delete every match instead of the first
        many: bool,
    },
    /// Find matching documents
    Find {
        /// Target collection
        collection: String,
        /// Match filter
        filter: Document,
    },
    /// Run an aggregation pipeline
    Aggregate {
        /// Target collection
        collection: String,
        /// Pipeline stages
        pipeline: Vec<Document>,
    },
    /// Count matching documents
    Count {
        /// Target collection
        collection: String,
        /// Match filter
        filter: Document,
    },
    /// Execute a pre-built write batch
    BulkWrite {
        /// Target collection
        collection: String,
        /// Batch entries
        writes: Vec<WriteRequest>,
    },
    /// Fan-in over other operations' handles
    Block(BlockSpec),
    /// Extension point claimed by caller-registered operators
    Custom {
        /// Operator-facing kind name
        name: String,
        /// Opaque payload interpreted by the claiming operator
        payload: Document,
    },
}

impl OpKind {
    /// Target collection, if this kind addresses one
    pub fn collection(&self) -> Option<&str> {
        match self {
            OpKind::Insert { collection, .. }
            | OpKind::Update { collection, .. }
            | OpKind::Delete { collection, .. }
            | OpKind::Find { collection, .. }
            | OpKind::Aggregate { collection, .. }
            | OpKind::Count { collection, .. }
            | OpKind::BulkWrite { collection, .. } => Some(collection),
            OpKind::Block(_) | OpKind::Custom { .. } => None,
        }
    }

    /// Short label used in error messages and trace output
    pub fn label(&self) -> String {
        match self {
            OpKind::Insert { collection, .. } => format!("insert into {}", collection),
            OpKind::Update { collection, .. } => format!("update on {}", collection),
            OpKind::Delete { collection, .. } => format!("delete on {}", collection),
            OpKind::Find { collection, .. } => format!("find on {}", collection),
            OpKind::Aggregate { collection, .. } => format!("aggregate on {}", collection),
            OpKind::Count { collection, .. } => format!("count on {}", collection),
            OpKind::BulkWrite { collection, .. } => format!("bulk write on {}", collection),
            OpKind::Block(spec) => format!("block over {} dependencies", spec.dependencies.len()),
            OpKind::Custom { name, .. } => format!("custom:{}", name),
        }
    }
}

/// One submitted unit of store work plus its result handle
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    kind: OpKind,
    handle: Handle<OpOutput>,
}

impl Operation {
    /// Create an operation from a raw kind
    pub fn new(kind: OpKind) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            handle: Handle::new(),
        }
    }

    /// Insert operation
    pub fn insert(collection: impl Into<String>, documents: Vec<Document>) -> Self {
        Self::new(OpKind::Insert {
            collection: collection.into(),
            documents,
        })
    }

    /// Update operation
    pub fn update(
        collection: impl Into<String>,
        filter: Document,
        update: Document,
        many: bool,
    ) -> Self {
        Self::new(OpKind::Update {
            collection: collection.into(),
            filter,
            update,
            many,
        })
    }

    /// Delete operation
    pub fn delete(collection: impl Into<String>, filter: Document, many: bool) -> Self {
        Self::new(OpKind::Delete {
            collection: collection.into(),
            filter,
            many,
        })
    }

    /// Find operation
    pub fn find(collection: impl Into<String>, filter: Document) -> Self {
        Self::new(OpKind::Find {
            collection: collection.into(),
            filter,
        })
    }

    /// Aggregation operation
    pub fn aggregate(collection: impl Into<String>, pipeline: Vec<Document>) -> Self {
        Self::new(OpKind::Aggregate {
            collection: collection.into(),
            pipeline,
        })
    }

    /// Count operation
    pub fn count(collection: impl Into<String>, filter: Document) -> Self {
        Self::new(OpKind::Count {
            collection: collection.into(),
            filter,
        })
    }

    /// Bulk write operation
    pub fn bulk_write(collection: impl Into<String>, writes: Vec<WriteRequest>) -> Self {
        Self::new(OpKind::BulkWrite {
            collection: collection.into(),
            writes,
        })
    }

    /// Custom operation, claimed by a caller-registered operator
    pub fn custom(name: impl Into<String>, payload: Document) -> Self {
        Self::new(OpKind::Custom {
            name: name.into(),
            payload,
        })
    }

    /// Block operation: run `body` once every dependency has resolved
    pub fn block<F>(dependencies: Vec<Handle<OpOutput>>, body: F) -> Self
    where
        F: FnOnce(Vec<OpResult>) -> OpResult + Send + 'static,
    {
        Self::new(OpKind::Block(BlockSpec {
            dependencies,
            body: Mutex::new(Some(Box::new(body))),
        }))
    }

    /// Unique id of this operation
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// The kind this operation carries
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// A shared reference to the result handle
    pub fn handle(&self) -> Handle<OpOutput> {
        self.handle.clone()
    }
}
