//! rust-lwm2m - LWM2M client core for constrained devices
//!
//! This library provides the device-side building blocks of a Lightweight
//! M2M client: a typed resource tree, a CoAP request dispatcher, an
//! observation engine with write-attribute filtering (pmin/pmax/gt/lt/st),
//! and a registration/bootstrap state machine. Transport, DTLS, and timers
//! stay outside; the caller feeds in decoded CoAP requests and the current
//! time in seconds, and drains outbound messages from the outbox.
//!
//! # Example
//!
//! ```no_run
//! use rust_lwm2m::{EndpointDescriptor, Lwm2mClient, MemoryStore, ResourceValue};
//! use rust_lwm2m::coap_types::{Method, Request};
//!
//! // Client with pre-provisioned registration credentials
//! let store = MemoryStore::provisioned("coaps://server:5684", b"psk");
//! let endpoint = EndpointDescriptor::new("device-1", 3600);
//! let mut client = Lwm2mClient::new(endpoint, Box::new(store));
//!
//! // Build the resource tree: Device object, instance 0, battery level
//! let instance = client
//!     .tree_mut()
//!     .create_object(3)
//!     .unwrap()
//!     .create_instance(0)
//!     .unwrap();
//! instance.create_resource(9, ResourceValue::Integer(100)).unwrap();
//!
//! // Start the session and hand queued messages to the transport
//! client.start(0).unwrap();
//! for message in client.take_outbox() {
//!     // send over CoAP
//! }
//!
//! // Serve an incoming device-management request
//! let request = Request::new(Method::Get, "3/0/9");
//! let response = client.handle_request(&request, 1);
//! ```

pub mod base;
pub mod client;
pub mod coap_types;
pub mod codec;
pub mod dispatcher;
mod error;
pub mod object;
pub mod object_instance;
pub mod observation;
pub mod registration;
pub mod resource;
pub mod storage;
pub mod timer;
pub mod value;

pub use base::{AllowedOps, BaseType, Mode, NodePath};
pub use client::Lwm2mClient;
pub use dispatcher::Dispatcher;
pub use error::{Lwm2mError, Result};
pub use object::ObjectTree;
pub use observation::WriteAttributes;
pub use registration::{ClientEvent, EndpointDescriptor, RegistrationMachine};
pub use storage::{CredentialStore, FileStore, MemoryStore};
pub use value::{DataType, ResourceValue};
