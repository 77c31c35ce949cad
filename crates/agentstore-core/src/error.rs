use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Error taxonomy surfaced at the resolver boundary.
///
/// Permission and invalid-argument failures are never retried internally;
/// backend errors bubble through `Backend` as-is so upper layers can wrap
/// them with their own retry policy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unauthorized: {opr} on {entity}")]
    Unauthorized { opr: String, entity: String },

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("a transaction is already active on this resolver")]
    TransactionAlreadyActive,

    #[error("invalid join reference: {0}")]
    InvalidJoinReference(String),

    #[error("relationship {0} cannot drive a join")]
    UnsupportedRelationshipForJoin(String),

    #[error("operator {0} cannot compare against null")]
    InvalidNullComparison(String),

    #[error("duplicate identifier: {0}")]
    DuplicateId(String),

    #[error("foreign constraint: {0}")]
    ForeignConstraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("query-by-join requires a projection (into-spec)")]
    MissingProjection,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn unauthorized(opr: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::Unauthorized {
            opr: opr.into(),
            entity: entity.into(),
        }
    }

    /// True for failures the caller can fix by changing the request.
    pub fn is_caller_fault(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}
