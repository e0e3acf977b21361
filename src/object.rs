//! Object classes and the object tree
//!
//! The tree root owns object classes; each class owns its instances.
//! Ownership is strictly parent to child, so destroying a parent destroys
//! the whole subtree. Lookups are linear in sibling count; trees stay in
//! the tens of nodes.

use crate::base::{AllowedOps, BaseType, Mode, NodeInfo, NodePath};
use crate::error::{Lwm2mError, Result};
use crate::object_instance::ObjectInstance;
use crate::value::{DataType, ResourceValue};

/// An object class owning an ordered list of object instances
#[derive(Debug)]
pub struct ObjectClass {
    pub info: NodeInfo,
    instances: Vec<ObjectInstance>,
}

impl ObjectClass {
    pub fn new(id: u16) -> Self {
        let mut info = NodeInfo::new(BaseType::ObjectClass, id, DataType::Opaque);
        info.mode = Mode::Directory;
        info.allowed = AllowedOps::GET | AllowedOps::POST;
        Self {
            info,
            instances: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.info.name_id
    }

    pub fn instances(&self) -> &[ObjectInstance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [ObjectInstance] {
        &mut self.instances
    }

    /// Look up an instance by id, linear in sibling count
    pub fn instance(&self, id: u16) -> Option<&ObjectInstance> {
        self.instances.iter().find(|i| i.id() == id)
    }

    pub fn instance_mut(&mut self, id: u16) -> Option<&mut ObjectInstance> {
        self.instances.iter_mut().find(|i| i.id() == id)
    }

    /// Add an instance; creating over an existing id fails and leaves the
    /// sibling list unchanged
    pub fn create_instance(&mut self, id: u16) -> Result<&mut ObjectInstance> {
        if self.instances.iter().any(|i| i.id() == id) {
            return Err(Lwm2mError::AlreadyExists(format!("object instance {}", id)));
        }
        self.instances.push(ObjectInstance::new(id));
        Ok(self.instances.last_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Detach an instance and destroy its subtree
    pub fn remove_instance(&mut self, id: u16) -> Result<()> {
        let position = self
            .instances
            .iter()
            .position(|i| i.id() == id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("object instance {}", id)))?;
        self.instances.remove(position);
        Ok(())
    }
}

/// The root of the resource tree
#[derive(Debug, Default)]
pub struct ObjectTree {
    objects: Vec<ObjectClass>,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[ObjectClass] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [ObjectClass] {
        &mut self.objects
    }

    pub fn object(&self, id: u16) -> Option<&ObjectClass> {
        self.objects.iter().find(|o| o.id() == id)
    }

    pub fn object_mut(&mut self, id: u16) -> Option<&mut ObjectClass> {
        self.objects.iter_mut().find(|o| o.id() == id)
    }

    /// Add an object class; creating over an existing id fails
    pub fn create_object(&mut self, id: u16) -> Result<&mut ObjectClass> {
        if self.objects.iter().any(|o| o.id() == id) {
            return Err(Lwm2mError::AlreadyExists(format!("object {}", id)));
        }
        self.objects.push(ObjectClass::new(id));
        Ok(self.objects.last_mut().unwrap_or_else(|| unreachable!()))
    }

    /// Detach an object class and destroy its subtree
    pub fn remove_object(&mut self, id: u16) -> Result<()> {
        let position = self
            .objects
            .iter()
            .position(|o| o.id() == id)
            .ok_or_else(|| Lwm2mError::NotFound(format!("object {}", id)))?;
        self.objects.remove(position);
        Ok(())
    }

    /// Check that a parsed path resolves to an existing node
    pub fn contains(&self, path: &NodePath) -> bool {
        let Some(object) = self.object(path.object) else {
            return false;
        };
        let Some(instance_id) = path.instance else {
            return true;
        };
        let Some(instance) = object.instance(instance_id) else {
            return false;
        };
        let Some(resource_id) = path.resource else {
            return true;
        };
        let Some(resource) = instance.resource(resource_id) else {
            return false;
        };
        match path.resource_instance {
            None => true,
            Some(ri) => resource.instance(ri).is_some(),
        }
    }

    /// Read a leaf value at the given path
    pub fn get_value(&self, path: &NodePath) -> Option<&ResourceValue> {
        let instance = self.object(path.object)?.instance(path.instance?)?;
        let resource = instance.resource(path.resource?)?;
        match path.resource_instance {
            None => resource.value(),
            Some(ri) => resource.instance(ri).map(|i| i.value()),
        }
    }

    /// Write a leaf value at the given path; returns true when the content
    /// actually changed
    pub fn set_value(&mut self, path: &NodePath, value: ResourceValue) -> Result<bool> {
        let instance_id = path
            .instance
            .ok_or_else(|| Lwm2mError::Protocol("value write needs an instance path".into()))?;
        let resource_id = path
            .resource
            .ok_or_else(|| Lwm2mError::Protocol("value write needs a resource path".into()))?;
        let resource = self
            .object_mut(path.object)
            .and_then(|o| o.instance_mut(instance_id))
            .and_then(|i| i.resource_mut(resource_id))
            .ok_or_else(|| Lwm2mError::NotFound(path.render()))?;
        match path.resource_instance {
            None => resource.set_value(value),
            Some(ri) => resource
                .instance_mut(ri)
                .ok_or_else(|| Lwm2mError::NotFound(path.render()))?
                .set_value(value),
        }
    }

    /// Base data of the node at the given path
    pub fn node_info(&self, path: &NodePath) -> Option<&NodeInfo> {
        let object = self.object(path.object)?;
        let Some(instance_id) = path.instance else {
            return Some(&object.info);
        };
        let instance = object.instance(instance_id)?;
        let Some(resource_id) = path.resource else {
            return Some(&instance.info);
        };
        let resource = instance.resource(resource_id)?;
        match path.resource_instance {
            None => Some(&resource.info),
            Some(ri) => resource.instance(ri).map(|i| &i.info),
        }
    }

    pub fn node_info_mut(&mut self, path: &NodePath) -> Option<&mut NodeInfo> {
        let object = self.object_mut(path.object)?;
        let Some(instance_id) = path.instance else {
            return Some(&mut object.info);
        };
        let instance = object.instance_mut(instance_id)?;
        let Some(resource_id) = path.resource else {
            return Some(&mut instance.info);
        };
        let resource = instance.resource_mut(resource_id)?;
        match path.resource_instance {
            None => Some(&mut resource.info),
            Some(ri) => resource.instance_mut(ri).map(|i| &mut i.info),
        }
    }

    /// Render the registration object list in CoRE link format, skipping
    /// nodes flagged off the endpoint
    pub fn registration_links(&self) -> String {
        let mut links = Vec::new();
        for object in &self.objects {
            if !object.info.register_on_endpoint {
                continue;
            }
            if object.instances.is_empty() {
                links.push(format!("</{}>", object.id()));
                continue;
            }
            for instance in &object.instances {
                if instance.info.register_on_endpoint {
                    links.push(format!("</{}/{}>", object.id(), instance.id()));
                }
            }
        }
        links.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ObjectTree {
        let mut tree = ObjectTree::new();
        let object = tree.create_object(3).unwrap();
        let instance = object.create_instance(0).unwrap();
        instance
            .create_resource(1, ResourceValue::String("v1".into()))
            .unwrap();
        tree
    }

    #[test]
    fn test_create_object_duplicate_fails() {
        let mut tree = sample_tree();
        assert!(matches!(
            tree.create_object(3),
            Err(Lwm2mError::AlreadyExists(_))
        ));
        assert_eq!(tree.objects().len(), 1);
    }

    #[test]
    fn test_remove_instance_is_isolated() {
        let mut tree = sample_tree();
        let object = tree.object_mut(3).unwrap();
        object.create_instance(1).unwrap();

        object.remove_instance(0).unwrap();
        assert!(object.instance(0).is_none());
        assert!(object.instance(1).is_some());
    }

    #[test]
    fn test_get_set_value_by_path() {
        let mut tree = sample_tree();
        let path = NodePath::resource(3, 0, 1);

        let changed = tree
            .set_value(&path, ResourceValue::String("v2".into()))
            .unwrap();
        assert!(changed);
        assert_eq!(
            tree.get_value(&path),
            Some(&ResourceValue::String("v2".into()))
        );

        // byte-identical write is not a change
        let changed = tree
            .set_value(&path, ResourceValue::String("v2".into()))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_contains_tracks_every_level() {
        let tree = sample_tree();
        assert!(tree.contains(&NodePath::object(3)));
        assert!(tree.contains(&NodePath::resource(3, 0, 1)));
        assert!(!tree.contains(&NodePath::resource(3, 0, 2)));
        assert!(!tree.contains(&NodePath::object(4)));
    }

    #[test]
    fn test_registration_links() {
        let mut tree = sample_tree();
        tree.create_object(4).unwrap();
        assert_eq!(tree.registration_links(), "</3/0>,</4>");

        tree.object_mut(3).unwrap().instance_mut(0).unwrap().info.register_on_endpoint = false;
        assert_eq!(tree.registration_links(), "</4>");
    }
}
