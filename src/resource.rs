//! Resource and resource-instance nodes
//!
//! A single-instance resource holds its value directly; a multi-instance
//! resource owns an ordered list of resource instances instead. Writes go
//! through [`Resource::set_value`], which detects real content changes so
//! that unchanged writes never trigger notifications.

use crate::base::{AllowedOps, BaseType, NodeInfo};
use crate::error::{Lwm2mError, Result};
use crate::value::{DataType, ResourceValue};

/// Callback bound to an executable resource, invoked on POST with the
/// request payload as arguments
pub type ExecuteCallback = Box<dyn FnMut(&[u8]) -> Result<()> + Send>;

/// A resource instance inside a multi-instance resource
#[derive(Debug)]
pub struct ResourceInstance {
    pub info: NodeInfo,
    value: ResourceValue,
}

impl ResourceInstance {
    pub fn new(id: u16, value: ResourceValue) -> Self {
        Self {
            info: NodeInfo::new(BaseType::ResourceInstance, id, value.data_type()),
            value,
        }
    }

    pub fn value(&self) -> &ResourceValue {
        &self.value
    }

    /// Replace the value; returns true when the content actually changed
    pub fn set_value(&mut self, value: ResourceValue) -> Result<bool> {
        check_type(self.info.data_type, &value)?;
        if self.value == value {
            return Ok(false);
        }
        self.value = value;
        Ok(true)
    }
}

/// Value storage of a resource
enum Content {
    Single(ResourceValue),
    Multi(Vec<ResourceInstance>),
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(value) => f.debug_tuple("Single").field(value).finish(),
            Self::Multi(instances) => f.debug_tuple("Multi").field(instances).finish(),
        }
    }
}

/// A resource node
pub struct Resource {
    pub info: NodeInfo,
    content: Content,
    execute: Option<ExecuteCallback>,
    /// Pre-acknowledge POST with an empty ACK before running the action
    pub delayed_response: bool,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("info", &self.info)
            .field("content", &self.content)
            .field("executable", &self.execute.is_some())
            .field("delayed_response", &self.delayed_response)
            .finish()
    }
}

impl Resource {
    /// Create a single-instance resource holding the given value
    pub fn new(id: u16, value: ResourceValue) -> Self {
        Self {
            info: NodeInfo::new(BaseType::Resource, id, value.data_type()),
            content: Content::Single(value),
            execute: None,
            delayed_response: false,
        }
    }

    /// Create an empty multi-instance resource
    pub fn new_multi(id: u16, data_type: DataType) -> Self {
        Self {
            info: NodeInfo::new(BaseType::Resource, id, data_type),
            content: Content::Multi(Vec::new()),
            execute: None,
            delayed_response: false,
        }
    }

    /// Create an executable resource bound to an action callback
    pub fn new_executable(id: u16, callback: ExecuteCallback) -> Self {
        let mut info = NodeInfo::new(BaseType::Resource, id, DataType::Opaque);
        info.allowed = AllowedOps::POST;
        info.observable = false;
        Self {
            info,
            content: Content::Single(ResourceValue::Opaque(Vec::new())),
            execute: Some(callback),
            delayed_response: false,
        }
    }

    pub fn id(&self) -> u16 {
        self.info.name_id
    }

    pub fn is_multi_instance(&self) -> bool {
        matches!(self.content, Content::Multi(_))
    }

    pub fn is_executable(&self) -> bool {
        self.execute.is_some()
    }

    /// Run the bound action callback with the given arguments
    pub fn execute(&mut self, arguments: &[u8]) -> Result<()> {
        match self.execute.as_mut() {
            Some(callback) => callback(arguments),
            None => Err(Lwm2mError::MethodNotAllowed(format!(
                "resource {} is not executable",
                self.info.name_id
            ))),
        }
    }

    /// Current value of a single-instance resource
    pub fn value(&self) -> Option<&ResourceValue> {
        match &self.content {
            Content::Single(value) => Some(value),
            Content::Multi(_) => None,
        }
    }

    /// Replace the value of a single-instance resource; returns true when
    /// the content actually changed
    pub fn set_value(&mut self, value: ResourceValue) -> Result<bool> {
        match &mut self.content {
            Content::Single(current) => {
                check_type(self.info.data_type, &value)?;
                if *current == value {
                    return Ok(false);
                }
                *current = value;
                Ok(true)
            }
            Content::Multi(_) => Err(Lwm2mError::MethodNotAllowed(format!(
                "resource {} is multi-instance",
                self.info.name_id
            ))),
        }
    }

    /// Instances of a multi-instance resource (empty for single-instance)
    pub fn instances(&self) -> &[ResourceInstance] {
        match &self.content {
            Content::Multi(instances) => instances,
            Content::Single(_) => &[],
        }
    }

    /// Look up a resource instance by id, linear in sibling count
    pub fn instance(&self, id: u16) -> Option<&ResourceInstance> {
        self.instances().iter().find(|ri| ri.info.name_id == id)
    }

    pub fn instance_mut(&mut self, id: u16) -> Option<&mut ResourceInstance> {
        match &mut self.content {
            Content::Multi(instances) => instances.iter_mut().find(|ri| ri.info.name_id == id),
            Content::Single(_) => None,
        }
    }

    /// Add a resource instance; creating over an existing id fails and
    /// leaves the sibling list unchanged
    pub fn create_instance(&mut self, id: u16, value: ResourceValue) -> Result<&mut ResourceInstance> {
        let Content::Multi(instances) = &mut self.content else {
            return Err(Lwm2mError::MethodNotAllowed(format!(
                "resource {} is single-instance",
                self.info.name_id
            )));
        };
        if instances.iter().any(|ri| ri.info.name_id == id) {
            return Err(Lwm2mError::AlreadyExists(format!("resource instance {}", id)));
        }
        instances.push(ResourceInstance::new(id, value));
        Ok(instances.last_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Detach and destroy a resource instance. Returns true when this was
    /// the last instance; the caller then removes the resource itself.
    pub fn remove_instance(&mut self, id: u16) -> Result<bool> {
        let Content::Multi(instances) = &mut self.content else {
            return Err(Lwm2mError::NotFound(format!("resource instance {}", id)));
        };
        let position = instances
            .iter()
            .position(|ri| ri.info.name_id == id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("resource instance {}", id)))?;
        instances.remove(position);
        Ok(instances.is_empty())
    }
}

fn check_type(expected: DataType, value: &ResourceValue) -> Result<()> {
    if value.data_type() == expected {
        Ok(())
    } else {
        Err(Lwm2mError::TypeConversion(format!(
            "expected {:?}, got {:?}",
            expected,
            value.data_type()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value_detects_change() {
        let mut resource = Resource::new(1, ResourceValue::String("v1".into()));
        assert!(resource.set_value(ResourceValue::String("v2".into())).unwrap());
        assert!(!resource.set_value(ResourceValue::String("v2".into())).unwrap());
        assert_eq!(resource.value(), Some(&ResourceValue::String("v2".into())));
    }

    #[test]
    fn test_set_value_rejects_wrong_type() {
        let mut resource = Resource::new(1, ResourceValue::Integer(0));
        assert!(resource.set_value(ResourceValue::String("x".into())).is_err());
    }

    #[test]
    fn test_opaque_content_equality() {
        let mut resource = Resource::new(2, ResourceValue::Opaque(vec![1, 2]));
        // same length, different content: must count as a change
        assert!(resource.set_value(ResourceValue::Opaque(vec![1, 3])).unwrap());
    }

    #[test]
    fn test_create_instance_duplicate_fails() {
        let mut resource = Resource::new_multi(5, DataType::Integer);
        resource.create_instance(0, ResourceValue::Integer(1)).unwrap();
        let err = resource.create_instance(0, ResourceValue::Integer(2));
        assert!(matches!(err, Err(Lwm2mError::AlreadyExists(_))));
        assert_eq!(resource.instances().len(), 1);
        assert_eq!(resource.instance(0).unwrap().value(), &ResourceValue::Integer(1));
    }

    #[test]
    fn test_remove_last_instance_flags_empty() {
        let mut resource = Resource::new_multi(5, DataType::Integer);
        resource.create_instance(0, ResourceValue::Integer(1)).unwrap();
        resource.create_instance(1, ResourceValue::Integer(2)).unwrap();
        assert!(!resource.remove_instance(0).unwrap());
        assert!(resource.remove_instance(1).unwrap());
    }

    #[test]
    fn test_execute_callback() {
        let mut resource = Resource::new_executable(4, Box::new(|args| {
            assert_eq!(args, b"reboot");
            Ok(())
        }));
        assert!(resource.is_executable());
        resource.execute(b"reboot").unwrap();

        let mut plain = Resource::new(1, ResourceValue::Integer(0));
        assert!(plain.execute(b"").is_err());
    }
}
