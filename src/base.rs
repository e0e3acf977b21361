//! Shared resource-node contract
//!
//! Every addressable node in the tree (object class, object instance,
//! resource, resource instance) carries the same base data: identity,
//! access mode, allowed operations, observability, data type. The path of
//! a node is never stored; it is rendered on demand from ancestor ids.

use bitflags::bitflags;

use crate::error::{Lwm2mError, Result};
use crate::observation::ReportHandler;
use crate::value::DataType;

/// The four closed node kinds, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    ObjectClass,
    ObjectInstance,
    Resource,
    ResourceInstance,
}

/// Access mode of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Value fixed at creation time
    Static,
    /// Value updated at runtime
    #[default]
    Dynamic,
    /// Container node without a value of its own
    Directory,
}

bitflags! {
    /// Operations a node accepts, one bit per CoAP method
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllowedOps: u8 {
        const GET = 0b0001;
        const PUT = 0b0010;
        const POST = 0b0100;
        const DELETE = 0b1000;
    }
}

impl Default for AllowedOps {
    fn default() -> Self {
        AllowedOps::GET | AllowedOps::PUT
    }
}

/// Base data shared by every tree node
#[derive(Debug)]
pub struct NodeInfo {
    base_type: BaseType,
    /// Numeric name id, 0-65535
    pub name_id: u16,
    pub mode: Mode,
    pub allowed: AllowedOps,
    pub observable: bool,
    pub data_type: DataType,
    /// Preferred CoAP content format for GET responses
    pub content_format: Option<u16>,
    /// Whether this node appears in the registration object list
    pub register_on_endpoint: bool,
    /// CoAP Max-Age carried in GET responses
    pub max_age: u32,
    /// Message id of the last sent notification, for ACK correlation
    pub last_notification_msg_id: u16,
    /// Attached when observation or write-attributes are set
    pub report: Option<ReportHandler>,
}

impl NodeInfo {
    /// Create base data for a node of the given kind
    pub fn new(base_type: BaseType, name_id: u16, data_type: DataType) -> Self {
        Self {
            base_type,
            name_id,
            mode: Mode::default(),
            allowed: AllowedOps::default(),
            observable: true,
            data_type,
            content_format: None,
            register_on_endpoint: true,
            max_age: 0,
            last_notification_msg_id: 0,
            report: None,
        }
    }

    /// The node kind, immutable after construction
    pub fn base_type(&self) -> BaseType {
        self.base_type
    }

    /// Report handler, created on first use
    pub fn report_mut(&mut self) -> &mut ReportHandler {
        self.report.get_or_insert_with(ReportHandler::new)
    }

    /// Whether the given operation bit is set
    pub fn allows(&self, op: AllowedOps) -> bool {
        self.allowed.contains(op)
    }
}

/// A parsed tree address: `{object}/{instance}/{resource}[/{resource-instance}]`
///
/// This is the short-lived render-buffer form of a path; nodes themselves
/// never hold one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePath {
    pub object: u16,
    pub instance: Option<u16>,
    pub resource: Option<u16>,
    pub resource_instance: Option<u16>,
}

impl NodePath {
    /// Address of an object class
    pub fn object(object: u16) -> Self {
        Self {
            object,
            instance: None,
            resource: None,
            resource_instance: None,
        }
    }

    /// Address of an object instance
    pub fn instance(object: u16, instance: u16) -> Self {
        Self {
            instance: Some(instance),
            ..Self::object(object)
        }
    }

    /// Address of a resource
    pub fn resource(object: u16, instance: u16, resource: u16) -> Self {
        Self {
            resource: Some(resource),
            ..Self::instance(object, instance)
        }
    }

    /// Address of a resource instance
    pub fn resource_instance(object: u16, instance: u16, resource: u16, ri: u16) -> Self {
        Self {
            resource_instance: Some(ri),
            ..Self::resource(object, instance, resource)
        }
    }

    /// Parse a URI path like "3/0/1" (leading slash tolerated)
    pub fn parse(path: &str) -> Result<Self> {
        let mut ids = [None::<u16>; 4];
        let mut count = 0;
        for part in path.split('/').filter(|s| !s.is_empty()) {
            if count == 4 {
                return Err(Lwm2mError::Protocol(format!("path too deep: {}", path)));
            }
            let id = part
                .parse()
                .map_err(|_| Lwm2mError::Protocol(format!("bad path segment '{}'", part)))?;
            ids[count] = Some(id);
            count += 1;
        }
        match ids {
            [Some(object), instance, resource, resource_instance] => Ok(Self {
                object,
                instance,
                resource,
                resource_instance,
            }),
            _ => Err(Lwm2mError::Protocol(format!("empty path: '{}'", path))),
        }
    }

    /// Depth of the address (1 = object, 4 = resource instance)
    pub fn depth(&self) -> usize {
        1 + self.instance.is_some() as usize
            + self.resource.is_some() as usize
            + self.resource_instance.is_some() as usize
    }

    /// Render as a URI path string
    pub fn render(&self) -> String {
        let mut out = self.object.to_string();
        for id in [self.instance, self.resource, self.resource_instance]
            .into_iter()
            .flatten()
        {
            out.push('/');
            out.push_str(&id.to_string());
        }
        out
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
