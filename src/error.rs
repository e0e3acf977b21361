//! Error types for rust-lwm2m

use thiserror::Error;

/// Main error type for LWM2M client operations
#[derive(Debug, Error)]
pub enum Lwm2mError {
    /// Malformed CoAP option or request content (maps to CoAP 4.00)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No tree node matches the given path or message id (maps to CoAP 4.04)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A sibling with the same id already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation not permitted on this node (maps to CoAP 4.05)
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Requested content format cannot be produced (maps to CoAP 4.06)
    #[error("Not acceptable: content format {0}")]
    NotAcceptable(u16),

    /// Payload content format not supported (maps to CoAP 4.15)
    #[error("Unsupported content format")]
    UnsupportedContentFormat,

    /// Payload exceeds what the client will buffer (maps to CoAP 4.13)
    #[error("Request entity too large: {0} bytes")]
    EntityTooLarge(usize),

    /// Allocation or buffering failure (maps to CoAP 5.00 locally)
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// IO error from persistent credential storage
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport or secure-handshake failure reported by the collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Credential storage has no usable bootstrap/registration credentials
    #[error("Credential error: {0}")]
    Credential(String),

    /// Payload codec failed to encode a node or node list
    #[error("Encode error: {0}")]
    Encode(String),

    /// Payload codec failed to decode a payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value does not match the resource's declared data type
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

/// Result type alias for LWM2M operations
pub type Result<T> = std::result::Result<T, Lwm2mError>;
