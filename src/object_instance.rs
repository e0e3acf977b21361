//! Object-instance nodes

use crate::base::{AllowedOps, BaseType, Mode, NodeInfo};
use crate::error::{Lwm2mError, Result};
use crate::resource::{ExecuteCallback, Resource, ResourceInstance};
use crate::value::{DataType, ResourceValue};

/// An object instance owning an ordered list of resources
#[derive(Debug)]
pub struct ObjectInstance {
    pub info: NodeInfo,
    resources: Vec<Resource>,
}

impl ObjectInstance {
    pub fn new(id: u16) -> Self {
        let mut info = NodeInfo::new(BaseType::ObjectInstance, id, DataType::Opaque);
        info.mode = Mode::Directory;
        info.allowed = AllowedOps::all();
        Self {
            info,
            resources: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.info.name_id
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut [Resource] {
        &mut self.resources
    }

    /// Look up a resource by id, linear in sibling count
    pub fn resource(&self, id: u16) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn resource_mut(&mut self, id: u16) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id() == id)
    }

    /// Add a single-instance resource; creating over an existing id fails
    /// and leaves the sibling list unchanged
    pub fn create_resource(&mut self, id: u16, value: ResourceValue) -> Result<&mut Resource> {
        self.insert_resource(Resource::new(id, value))
    }

    /// Add an empty multi-instance resource
    pub fn create_multi_resource(&mut self, id: u16, data_type: DataType) -> Result<&mut Resource> {
        self.insert_resource(Resource::new_multi(id, data_type))
    }

    /// Add an executable resource bound to an action callback
    pub fn create_executable_resource(
        &mut self,
        id: u16,
        callback: ExecuteCallback,
    ) -> Result<&mut Resource> {
        self.insert_resource(Resource::new_executable(id, callback))
    }

    fn insert_resource(&mut self, resource: Resource) -> Result<&mut Resource> {
        let id = resource.id();
        if self.resources.iter().any(|r| r.id() == id) {
            return Err(Lwm2mError::AlreadyExists(format!("resource {}", id)));
        }
        self.resources.push(resource);
        Ok(self.resources.last_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Detach a resource and destroy its subtree
    pub fn remove_resource(&mut self, id: u16) -> Result<()> {
        let position = self
            .resources
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("resource {}", id)))?;
        self.resources.remove(position);
        Ok(())
    }

    /// Remove a resource instance; removing the last one removes the
    /// resource itself
    pub fn remove_resource_instance(&mut self, resource_id: u16, instance_id: u16) -> Result<()> {
        let resource = self
            .resource_mut(resource_id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("resource {}", resource_id)))?;
        if resource.remove_instance(instance_id)? {
            self.remove_resource(resource_id)?;
        }
        Ok(())
    }

    /// Write a value into a single-instance resource; returns true when the
    /// content actually changed
    pub fn set_resource_value(&mut self, id: u16, value: ResourceValue) -> Result<bool> {
        self.resource_mut(id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("resource {}", id)))?
            .set_value(value)
    }

    /// Read the value of a single-instance resource
    pub fn resource_value(&self, id: u16) -> Option<&ResourceValue> {
        self.resource(id).and_then(|r| r.value())
    }

    /// Look up a resource instance by resource and instance id
    pub fn resource_instance(&self, resource_id: u16, instance_id: u16) -> Option<&ResourceInstance> {
        self.resource(resource_id).and_then(|r| r.instance(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resource_duplicate_fails() {
        let mut instance = ObjectInstance::new(0);
        instance.create_resource(1, ResourceValue::Integer(5)).unwrap();
        let err = instance.create_resource(1, ResourceValue::Integer(9));
        assert!(matches!(err, Err(Lwm2mError::AlreadyExists(_))));
        // failed creation leaves the existing sibling untouched
        assert_eq!(instance.resource_value(1), Some(&ResourceValue::Integer(5)));
        assert_eq!(instance.resources().len(), 1);
    }

    #[test]
    fn test_remove_last_resource_instance_removes_resource() {
        let mut instance = ObjectInstance::new(0);
        let resource = instance.create_multi_resource(6, DataType::Float).unwrap();
        resource.create_instance(0, ResourceValue::Float(1.5)).unwrap();

        instance.remove_resource_instance(6, 0).unwrap();
        assert!(instance.resource(6).is_none());
    }

    #[test]
    fn test_remove_resource_keeps_siblings() {
        let mut instance = ObjectInstance::new(0);
        instance.create_resource(1, ResourceValue::Integer(1)).unwrap();
        instance.create_resource(2, ResourceValue::Integer(2)).unwrap();
        instance.remove_resource(1).unwrap();
        assert!(instance.resource(1).is_none());
        assert_eq!(instance.resource_value(2), Some(&ResourceValue::Integer(2)));
    }
}
