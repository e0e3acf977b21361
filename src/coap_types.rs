//! LWM2M-specific CoAP types and constants
//!
//! This module defines transport-agnostic CoAP types for the LWM2M client.
//! These abstractions allow the library to work with any CoAP implementation;
//! message framing and retransmission stay in the transport layer.

/// CoAP Content-Format identifiers used by LWM2M
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContentFormat {
    /// text/plain
    TextPlain = 0,
    /// application/link-format (registration object list)
    LinkFormat = 40,
    /// application/octet-stream
    Opaque = 42,
    /// application/vnd.oma.lwm2m+tlv
    Tlv = 11542,
    /// application/vnd.oma.lwm2m+json
    Json = 11543,
    /// application/vnd.oma.lwm2m+cbor
    Cbor = 11544,
}

impl ContentFormat {
    /// Convert from raw content-format ID
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::TextPlain),
            40 => Some(Self::LinkFormat),
            42 => Some(Self::Opaque),
            11542 => Some(Self::Tlv),
            11543 => Some(Self::Json),
            11544 => Some(Self::Cbor),
            _ => None,
        }
    }

    /// Get the raw content-format ID
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// CoAP request methods routed by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read a node or start/stop an observation
    Get,
    /// Write a value or write-attributes
    Put,
    /// Create an instance or execute a resource
    Post,
    /// Remove an object instance
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Put => f.write_str("PUT"),
            Method::Post => f.write_str("POST"),
            Method::Delete => f.write_str("DELETE"),
        }
    }
}

/// CoAP response codes used by the LWM2M dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    // Success codes
    /// 2.01 Created
    Created,
    /// 2.02 Deleted
    Deleted,
    /// 2.04 Changed
    Changed,
    /// 2.05 Content
    Content,

    // Client error codes
    /// 4.00 Bad Request
    BadRequest,
    /// 4.04 Not Found
    NotFound,
    /// 4.05 Method Not Allowed
    MethodNotAllowed,
    /// 4.06 Not Acceptable
    NotAcceptable,
    /// 4.13 Request Entity Too Large
    RequestEntityTooLarge,
    /// 4.15 Unsupported Content-Format
    UnsupportedContentFormat,

    // Server error codes
    /// 5.00 Internal Server Error
    InternalServerError,
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (class, detail) = self.to_code_pair();
        write!(f, "{}.{:02}", class, detail)
    }
}

impl ResponseCode {
    /// Convert to CoAP response code format (class.detail)
    pub fn to_code_pair(self) -> (u8, u8) {
        match self {
            Self::Created => (2, 1),
            Self::Deleted => (2, 2),
            Self::Changed => (2, 4),
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::NotAcceptable => (4, 6),
            Self::RequestEntityTooLarge => (4, 13),
            Self::UnsupportedContentFormat => (4, 15),
            Self::InternalServerError => (5, 0),
        }
    }

    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Deleted | Self::Changed | Self::Content
        )
    }
}

/// CoAP Observe option values recognized by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observe {
    /// Observe=0, start observation
    Register,
    /// Observe=1, cancel observation
    Deregister,
}

impl Observe {
    /// Parse a raw Observe option value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Register),
            1 => Some(Self::Deregister),
            _ => None,
        }
    }
}

/// Maximum CoAP token length in bytes
pub const MAX_TOKEN_LEN: usize = 8;

/// Observation sequence numbers wrap at the 24-bit Observe option width
pub const OBSERVATION_SEQ_MAX: u32 = 0x00FF_FFFF;

/// An incoming CoAP request (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method
    pub method: Method,
    /// URI path, e.g. "3/0/1"
    pub path: String,
    /// URI query string, e.g. "pmin=5&pmax=60" (write-attributes on PUT)
    pub query: Option<String>,
    /// Request payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Content format the client accepts in the response
    pub accept: Option<ContentFormat>,
    /// Observe option, if present
    pub observe: Option<Observe>,
    /// CoAP token (at most [`MAX_TOKEN_LEN`] bytes)
    pub token: Vec<u8>,
    /// CoAP message id
    pub message_id: u16,
}

impl Request {
    /// Create a new request for the given method and path
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: None,
            payload: Vec::new(),
            content_format: None,
            accept: None,
            observe: None,
            token: Vec::new(),
            message_id: 0,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Vec<u8>, format: ContentFormat) -> Self {
        self.payload = payload;
        self.content_format = Some(format);
        self
    }

    /// Set the query string
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    /// Set the Observe option
    pub fn with_observe(mut self, observe: Observe) -> Self {
        self.observe = Some(observe);
        self
    }

    /// Set the token, keeping at most [`MAX_TOKEN_LEN`] bytes
    pub fn with_token(mut self, token: &[u8]) -> Self {
        self.token = token[..token.len().min(MAX_TOKEN_LEN)].to_vec();
        self
    }

    /// Set the message id
    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = message_id;
        self
    }
}

/// An outgoing CoAP response (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Response {
    /// Response code
    pub code: ResponseCode,
    /// Response payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Observe option echoed on observation responses (sequence number)
    pub observe: Option<u32>,
    /// Location-Path option on 2.01 Created
    pub location_path: Option<String>,
    /// Max-Age option
    pub max_age: Option<u32>,
    /// Transport should pre-acknowledge with an empty ACK and deliver this
    /// response separately (long-running execute actions)
    pub separate: bool,
}

impl Response {
    /// Create a success response with content
    pub fn content(payload: Vec<u8>, format: ContentFormat) -> Self {
        Self {
            code: ResponseCode::Content,
            payload,
            content_format: Some(format),
            observe: None,
            location_path: None,
            max_age: None,
            separate: false,
        }
    }

    /// Create a changed response (successful write)
    pub fn changed() -> Self {
        Self::empty(ResponseCode::Changed)
    }

    /// Create a deleted response
    pub fn deleted() -> Self {
        Self::empty(ResponseCode::Deleted)
    }

    /// Create a created response with a Location-Path option
    pub fn created(location_path: &str) -> Self {
        Self {
            location_path: Some(location_path.to_string()),
            ..Self::empty(ResponseCode::Created)
        }
    }

    /// Create an empty response with the given code
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
            content_format: None,
            observe: None,
            location_path: None,
            max_age: None,
            separate: false,
        }
    }

    /// Create an error response with a diagnostic payload
    pub fn error(code: ResponseCode, message: &str) -> Self {
        Self {
            payload: message.as_bytes().to_vec(),
            ..Self::empty(code)
        }
    }

    /// Create a not found error
    pub fn not_found(path: &str) -> Self {
        Self::error(ResponseCode::NotFound, &format!("no such node: {}", path))
    }

    /// Create a method not allowed error
    pub fn method_not_allowed(method: Method) -> Self {
        Self::error(
            ResponseCode::MethodNotAllowed,
            &format!("method {} not allowed", method),
        )
    }
}

/// An outgoing client-initiated CoAP request (registration, notification)
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Exchange this message belongs to
    pub kind: OutboundKind,
    /// URI path on the server
    pub path: String,
    /// URI query string (endpoint parameters on register)
    pub query: Option<String>,
    /// Payload (object list, notification value)
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Observe option carrying the notification sequence number
    pub observe: Option<u32>,
    /// Token (observation notifications reuse the observation token)
    pub token: Vec<u8>,
    /// Message id to correlate the asynchronous response
    pub message_id: u16,
}

/// Kinds of client-initiated exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Bootstrap request on "/bs"
    Bootstrap,
    /// Initial registration on "/rd"
    Register,
    /// Registration update
    Update,
    /// Unregistration
    Unregister,
    /// Observation notification
    Notification,
}
