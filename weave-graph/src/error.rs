use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("missing required field {0}")]
    MissingRequired(String),
    #[error("field {field} has wrong type, expected {expected}")]
    InvalidType { field: String, expected: String },
    #[error("field {field} has invalid value: {detail}")]
    InvalidValue { field: String, detail: String },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrorKind),

    #[error("observation layer is rejected for node writes")]
    LayerRejected,

    #[error("edge source and target must be distinct (self-loop rejected)")]
    SelfLoop,

    #[error("node not found: {0}")]
    NodeNotFound(weave_ids::Id),

    #[error("edge endpoint does not exist: {0}")]
    EdgeEndpointMissing(weave_ids::Id),

    #[error("a non-deleted node with layer={layer} type={node_type} name={name} already exists")]
    DuplicateName {
        layer: String,
        node_type: String,
        name: String,
    },

    #[error("name exceeds 255 characters")]
    NameTooLong,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation timed out")]
    Timeout,
}
