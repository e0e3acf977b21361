//! CoAP request dispatcher
//!
//! Routes incoming GET/PUT/POST/DELETE requests to tree nodes, runs the per
//! base-type handlers, and renders outgoing observation notifications.
//! Asynchronous ACK/RESET correlation goes through a pending-message-id
//! table instead of the URI path.

use log::{debug, warn};

use crate::base::{AllowedOps, BaseType, NodePath};
use crate::coap_types::{
    ContentFormat, Method, Observe, OutboundKind, OutboundMessage, Request, Response, ResponseCode,
};
use crate::codec::{DecodeMode, Decoded, JsonCodec, NodeView, PayloadCodec, value_from_json};
use crate::error::{Lwm2mError, Result};
use crate::object::ObjectTree;
use crate::observation::{ObservationLevel, ReportAction, WriteAttributes};
use crate::timer::{TimerKind, TimerQueue};
use crate::value::ResourceValue;

/// A sent notification awaiting its ACK or RESET
#[derive(Debug, Clone, Copy)]
struct PendingNotification {
    message_id: u16,
    path: NodePath,
}

/// Request router and notification renderer over the object tree
pub struct Dispatcher {
    tree: ObjectTree,
    codec: Box<dyn PayloadCodec + Send>,
    pending: Vec<PendingNotification>,
    outbox: Vec<OutboundMessage>,
    next_message_id: u16,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tree", &self.tree)
            .field("pending", &self.pending)
            .field("outbox", &self.outbox)
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_codec(Box::new(JsonCodec::new()))
    }

    /// Use an external payload codec instead of the reference one
    pub fn with_codec(codec: Box<dyn PayloadCodec + Send>) -> Self {
        Self {
            tree: ObjectTree::new(),
            codec,
            pending: Vec::new(),
            outbox: Vec::new(),
            next_message_id: 0,
        }
    }

    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        &mut self.tree
    }

    /// Take the notifications queued since the last call
    pub fn take_outbox(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Allocate a fresh CoAP message id (never 0)
    pub fn allocate_message_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id == 0 {
            self.next_message_id = 1;
        }
        self.next_message_id
    }

    /// Resolve a stored message id back to a node path
    pub fn route_message_id(&self, message_id: u16) -> Option<NodePath> {
        self.pending
            .iter()
            .find(|p| p.message_id == message_id)
            .map(|p| p.path)
    }

    /// Handle an incoming server request against the tree
    pub fn handle_request(&mut self, request: &Request, timers: &mut TimerQueue, now: u64) -> Response {
        let path = match NodePath::parse(&request.path) {
            Ok(path) => path,
            Err(e) => return Self::error_response(&e),
        };
        if !self.tree.contains(&path) {
            debug!("route miss: {} {}", request.method, path);
            return Response::not_found(&path.render());
        }
        let allowed = match request.method {
            Method::Get => AllowedOps::GET,
            Method::Put => AllowedOps::PUT,
            Method::Post => AllowedOps::POST,
            Method::Delete => AllowedOps::DELETE,
        };
        // container nodes always answer GET; value access control applies
        // to the leaf bits set at creation time
        let info = self
            .tree
            .node_info(&path)
            .unwrap_or_else(|| unreachable!("contains() checked"));
        if !info.allows(allowed) {
            return Response::method_not_allowed(request.method);
        }

        match request.method {
            Method::Get => self.handle_get(request, &path, timers, now),
            Method::Put => self.handle_put(request, &path, timers, now),
            Method::Post => self.handle_post(request, &path),
            Method::Delete => self.handle_delete(&path, timers),
        }
    }

    /// Map the error taxonomy to CoAP response codes
    fn error_response(error: &Lwm2mError) -> Response {
        let code = match error {
            Lwm2mError::NotFound(_) => ResponseCode::NotFound,
            Lwm2mError::MethodNotAllowed(_) => ResponseCode::MethodNotAllowed,
            Lwm2mError::NotAcceptable(_) => ResponseCode::NotAcceptable,
            Lwm2mError::UnsupportedContentFormat => ResponseCode::UnsupportedContentFormat,
            Lwm2mError::EntityTooLarge(_) => ResponseCode::RequestEntityTooLarge,
            Lwm2mError::Capacity(_) | Lwm2mError::Encode(_) => ResponseCode::InternalServerError,
            Lwm2mError::Protocol(_)
            | Lwm2mError::AlreadyExists(_)
            | Lwm2mError::Decode(_)
            | Lwm2mError::TypeConversion(_) => ResponseCode::BadRequest,
            Lwm2mError::Network(_) | Lwm2mError::Credential(_) | Lwm2mError::Io(_) => {
                ResponseCode::InternalServerError
            }
        };
        Response::error(code, &error.to_string())
    }

    // ---- GET ----

    fn handle_get(
        &mut self,
        request: &Request,
        path: &NodePath,
        timers: &mut TimerQueue,
        now: u64,
    ) -> Response {
        let format = match self.response_format(request, path) {
            Ok(format) => format,
            Err(e) => return Self::error_response(&e),
        };
        let view = match self.view_at(path) {
            Some(view) => view,
            None => return Response::not_found(&path.render()),
        };
        let payload = match self.codec.serialize(&view, format) {
            Ok(payload) => payload,
            Err(e) => return Self::error_response(&e),
        };

        let mut response = Response::content(payload, format);
        let info = self
            .tree
            .node_info(path)
            .unwrap_or_else(|| unreachable!("contains() checked"));
        if info.max_age > 0 {
            response.max_age = Some(info.max_age);
        }

        match request.observe {
            Some(Observe::Register) => {
                if !info.observable {
                    return Response::method_not_allowed(Method::Get);
                }
                let level = level_for(info.base_type());
                let info = self
                    .tree
                    .node_info_mut(path)
                    .unwrap_or_else(|| unreachable!("contains() checked"));
                let handler = info.report_mut();
                let sequence = handler.start_observation(&request.token, now, level);
                if let Some(deadline) = handler.pmax_deadline() {
                    timers.schedule(TimerKind::PmaxElapsed, Some(*path), deadline);
                }
                response.observe = Some(sequence);
            }
            Some(Observe::Deregister) => {
                self.cancel_observation(path, timers);
            }
            None => {}
        }
        response
    }

    /// Content format for a GET response: requested Accept, then the node's
    /// preferred format, then a default by node shape
    fn response_format(&self, request: &Request, path: &NodePath) -> Result<ContentFormat> {
        if let Some(accept) = request.accept {
            return Ok(accept);
        }
        let info = self
            .tree
            .node_info(path)
            .ok_or_else(|| Lwm2mError::NotFound(path.render()))?;
        if let Some(preferred) = info.content_format
            && let Some(format) = ContentFormat::from_u16(preferred)
        {
            return Ok(format);
        }
        let leaf = path.depth() == 4
            || (path.depth() == 3
                && !self
                    .tree
                    .object(path.object)
                    .and_then(|o| o.instance(path.instance.unwrap_or(0)))
                    .and_then(|i| i.resource(path.resource.unwrap_or(0)))
                    .map(|r| r.is_multi_instance())
                    .unwrap_or(false));
        Ok(if leaf {
            ContentFormat::TextPlain
        } else {
            ContentFormat::Json
        })
    }

    /// Build a serialization view of the subtree at the given path
    fn view_at(&self, path: &NodePath) -> Option<NodeView> {
        let object = self.tree.object(path.object)?;
        let Some(instance_id) = path.instance else {
            let instances = object
                .instances()
                .iter()
                .map(|i| (i.id(), instance_view(i)))
                .collect();
            return Some(NodeView::Entries(instances));
        };
        let instance = object.instance(instance_id)?;
        let Some(resource_id) = path.resource else {
            return Some(instance_view(instance));
        };
        let resource = instance.resource(resource_id)?;
        match path.resource_instance {
            None => Some(resource_view(resource)),
            Some(ri) => resource
                .instance(ri)
                .map(|i| NodeView::Value(i.value().clone())),
        }
    }

    // ---- PUT ----

    fn handle_put(
        &mut self,
        request: &Request,
        path: &NodePath,
        timers: &mut TimerQueue,
        now: u64,
    ) -> Response {
        // a query string carries write-attributes instead of a payload
        if let Some(query) = request.query.as_deref()
            && !query.is_empty()
        {
            return match self.apply_write_attributes(path, query, timers) {
                Ok(()) => Response::changed(),
                Err(e) => Self::error_response(&e),
            };
        }
        if path.instance.is_none() {
            // value writes stop at instance granularity
            return Response::method_not_allowed(Method::Put);
        }
        match self.write_payload(request, path, timers, now) {
            Ok(()) => Response::changed(),
            Err(e) => Self::error_response(&e),
        }
    }

    fn apply_write_attributes(
        &mut self,
        path: &NodePath,
        query: &str,
        timers: &mut TimerQueue,
    ) -> Result<()> {
        // a malformed query must leave prior attributes untouched, so parse
        // and validate before touching the handler
        let attributes = WriteAttributes::parse(query)?;
        let current = self
            .tree
            .get_value(path)
            .and_then(ResourceValue::as_numeric);
        let info = self
            .tree
            .node_info_mut(path)
            .ok_or_else(|| Lwm2mError::NotFound(path.render()))?;
        let handler = info.report_mut();
        handler.set_attributes(attributes, current);
        if handler.is_observed()
            && let Some(deadline) = handler.pmax_deadline()
        {
            timers.schedule(TimerKind::PmaxElapsed, Some(*path), deadline);
        } else {
            timers.cancel(TimerKind::PmaxElapsed, Some(*path));
        }
        Ok(())
    }

    fn write_payload(
        &mut self,
        request: &Request,
        path: &NodePath,
        timers: &mut TimerQueue,
        now: u64,
    ) -> Result<()> {
        if path.resource.is_none() {
            return self.write_instance_payload(request, path, timers, now);
        }
        let format = request
            .content_format
            .ok_or(Lwm2mError::UnsupportedContentFormat)?;
        let decoded = self.codec.deserialize(&request.payload, format, DecodeMode::Put)?;
        let target_type = self
            .tree
            .node_info(path)
            .ok_or_else(|| Lwm2mError::NotFound(path.render()))?
            .data_type;

        match decoded {
            Decoded::Bytes(bytes) => {
                let value = ResourceValue::from_bytes(&bytes, target_type)?;
                let changed = self.tree.set_value(path, value)?;
                if changed {
                    self.schedule_change_reports(path, timers, now);
                }
                Ok(())
            }
            Decoded::Entries(entries) => {
                // structured write against a multi-instance resource
                let mut changed_any = false;
                for (id, json) in &entries {
                    let ri_path = NodePath {
                        resource_instance: Some(*id),
                        ..*path
                    };
                    if !self.tree.contains(&ri_path) {
                        return Err(Lwm2mError::NotFound(ri_path.render()));
                    }
                    let value = value_from_json(json, target_type)?;
                    changed_any |= self.tree.set_value(&ri_path, value)?;
                }
                if changed_any {
                    self.schedule_change_reports(path, timers, now);
                }
                Ok(())
            }
        }
    }

    /// Structured PUT on an object instance: replace the values of existing
    /// resources named by the payload
    fn write_instance_payload(
        &mut self,
        request: &Request,
        path: &NodePath,
        timers: &mut TimerQueue,
        now: u64,
    ) -> Result<()> {
        let format = request
            .content_format
            .ok_or(Lwm2mError::UnsupportedContentFormat)?;
        let decoded = self.codec.deserialize(&request.payload, format, DecodeMode::Put)?;
        let Decoded::Entries(entries) = decoded else {
            return Err(Lwm2mError::Decode("instance write needs a structured payload".into()));
        };
        // validate every target before mutating anything
        let mut writes = Vec::with_capacity(entries.len());
        for (id, json) in &entries {
            let target = NodePath {
                resource: Some(*id),
                ..*path
            };
            let info = self
                .tree
                .node_info(&target)
                .ok_or_else(|| Lwm2mError::NotFound(target.render()))?;
            writes.push((target, value_from_json(json, info.data_type)?));
        }
        for (target, value) in writes {
            if self.tree.set_value(&target, value)? {
                self.schedule_change_reports(&target, timers, now);
            }
        }
        Ok(())
    }

    // ---- POST ----

    fn handle_post(&mut self, request: &Request, path: &NodePath) -> Response {
        let base_type = self
            .tree
            .node_info(path)
            .map(|i| i.base_type())
            .unwrap_or_else(|| unreachable!("contains() checked"));
        match base_type {
            BaseType::ObjectClass | BaseType::ObjectInstance => {
                match self.create_from_payload(request, path) {
                    Ok(location) => Response::created(&location),
                    Err(e) => Self::error_response(&e),
                }
            }
            BaseType::Resource => self.execute_resource(request, path),
            BaseType::ResourceInstance => Response::method_not_allowed(Method::Post),
        }
    }

    /// Create nodes under `path` from a structured payload.
    ///
    /// The payload is decoded in full before any node is created, and a
    /// partial creation failure rolls the created nodes back, so a corrupt
    /// payload never leaves an orphaned subtree.
    fn create_from_payload(&mut self, request: &Request, path: &NodePath) -> Result<String> {
        let format = request
            .content_format
            .ok_or(Lwm2mError::UnsupportedContentFormat)?;
        let decoded = self
            .codec
            .deserialize(&request.payload, format, DecodeMode::Post)?;
        let Decoded::Entries(entries) = decoded else {
            return Err(Lwm2mError::Decode("create needs a structured payload".into()));
        };
        if entries.is_empty() {
            return Err(Lwm2mError::Decode("create payload names no ids".into()));
        }

        match path.instance {
            // POST on an object class creates object instances
            None => self.create_instances(path.object, entries),
            // POST on an object instance creates resources
            Some(instance_id) => self.create_resources(path.object, instance_id, entries),
        }
    }

    fn create_instances(
        &mut self,
        object_id: u16,
        entries: Vec<(u16, serde_json::Value)>,
    ) -> Result<String> {
        // coerce everything up front so failure cannot strand partial nodes
        let mut staged = Vec::with_capacity(entries.len());
        for (instance_id, json) in &entries {
            let serde_json::Value::Object(resources) = json else {
                return Err(Lwm2mError::Decode(format!(
                    "instance {} payload is not a resource map",
                    instance_id
                )));
            };
            let mut values = Vec::with_capacity(resources.len());
            for (key, value) in resources {
                let resource_id: u16 = key
                    .parse()
                    .map_err(|_| Lwm2mError::Decode(format!("bad resource id '{}'", key)))?;
                values.push((resource_id, infer_value(value)?));
            }
            staged.push((*instance_id, values));
        }

        let object = self
            .tree
            .object_mut(object_id)
            .ok_or_else(|| Lwm2mError::NotFound(object_id.to_string()))?;
        let mut created = Vec::new();
        let mut result = Ok(());
        'outer: for (instance_id, values) in staged {
            let instance = match object.create_instance(instance_id) {
                Ok(instance) => instance,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            created.push(instance_id);
            for (resource_id, value) in values {
                if let Err(e) = instance.create_resource(resource_id, value) {
                    result = Err(e);
                    break 'outer;
                }
            }
        }
        if let Err(e) = result {
            for instance_id in created {
                let _ = object.remove_instance(instance_id);
            }
            return Err(e);
        }

        Ok(match created_location(&entries) {
            Some(id) => NodePath::instance(object_id, id).render(),
            None => NodePath::object(object_id).render(),
        })
    }

    fn create_resources(
        &mut self,
        object_id: u16,
        instance_id: u16,
        entries: Vec<(u16, serde_json::Value)>,
    ) -> Result<String> {
        let mut staged = Vec::with_capacity(entries.len());
        for (resource_id, json) in &entries {
            staged.push((*resource_id, infer_value(json)?));
        }

        let instance = self
            .tree
            .object_mut(object_id)
            .and_then(|o| o.instance_mut(instance_id))
            .ok_or_else(|| {
                Lwm2mError::NotFound(NodePath::instance(object_id, instance_id).render())
            })?;
        let mut created = Vec::new();
        let mut result = Ok(());
        for (resource_id, value) in staged {
            match instance.create_resource(resource_id, value) {
                Ok(_) => created.push(resource_id),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if let Err(e) = result {
            for resource_id in created {
                let _ = instance.remove_resource(resource_id);
            }
            return Err(e);
        }

        Ok(match created_location(&entries) {
            Some(id) => NodePath::resource(object_id, instance_id, id).render(),
            None => NodePath::instance(object_id, instance_id).render(),
        })
    }

    fn execute_resource(&mut self, request: &Request, path: &NodePath) -> Response {
        let resource = self
            .tree
            .object_mut(path.object)
            .and_then(|o| o.instance_mut(path.instance.unwrap_or(0)))
            .and_then(|i| i.resource_mut(path.resource.unwrap_or(0)));
        let Some(resource) = resource else {
            return Response::not_found(&path.render());
        };
        if !resource.is_executable() {
            return Response::method_not_allowed(Method::Post);
        }
        let separate = resource.delayed_response;
        match resource.execute(&request.payload) {
            Ok(()) => {
                let mut response = Response::changed();
                response.separate = separate;
                response
            }
            Err(e) => Self::error_response(&e),
        }
    }

    // ---- DELETE ----

    fn handle_delete(&mut self, path: &NodePath, timers: &mut TimerQueue) -> Response {
        let base_type = self
            .tree
            .node_info(path)
            .map(|i| i.base_type())
            .unwrap_or_else(|| unreachable!("contains() checked"));
        if base_type != BaseType::ObjectInstance {
            return Response::method_not_allowed(Method::Delete);
        }
        // evict every back-reference into the subtree before the nodes go
        self.evict_subtree(path, timers);
        let instance_id = path.instance.unwrap_or_else(|| unreachable!());
        let result = self
            .tree
            .object_mut(path.object)
            .ok_or_else(|| Lwm2mError::NotFound(path.render()))
            .and_then(|o| o.remove_instance(instance_id));
        match result {
            Ok(()) => Response::deleted(),
            Err(e) => Self::error_response(&e),
        }
    }

    /// Drop timers and pending-notification entries referencing nodes under
    /// `path`; called before the subtree is destroyed
    fn evict_subtree(&mut self, path: &NodePath, timers: &mut TimerQueue) {
        timers.cancel_node(path);
        let covers = |p: &NodePath| {
            p.object == path.object
                && path
                    .instance
                    .is_none_or(|instance| p.instance == Some(instance))
        };
        self.pending.retain(|entry| !covers(&entry.path));
    }

    // ---- observation plumbing ----

    /// Cancel observation on the node and its whole subtree
    pub fn cancel_observation(&mut self, path: &NodePath, timers: &mut TimerQueue) {
        let mut paths = vec![*path];
        if let Some(object) = self.tree.object(path.object) {
            for instance in object.instances() {
                if path.instance.is_some() && path.instance != Some(instance.id()) {
                    continue;
                }
                if path.resource.is_none() {
                    paths.push(NodePath::instance(path.object, instance.id()));
                }
                for resource in instance.resources() {
                    if path.resource.is_some() && path.resource != Some(resource.id()) {
                        continue;
                    }
                    if path.resource_instance.is_none() {
                        paths.push(NodePath::resource(path.object, instance.id(), resource.id()));
                    }
                    for ri in resource.instances() {
                        if path.resource_instance.is_some()
                            && path.resource_instance != Some(ri.info.name_id)
                        {
                            continue;
                        }
                        paths.push(NodePath::resource_instance(
                            path.object,
                            instance.id(),
                            resource.id(),
                            ri.info.name_id,
                        ));
                    }
                }
            }
        }
        for node_path in paths {
            if let Some(info) = self.tree.node_info_mut(&node_path)
                && let Some(handler) = info.report.as_mut()
                && handler.is_observed()
                && handler.stop_observation(ObservationLevel::all())
            {
                timers.cancel(TimerKind::PminElapsed, Some(node_path));
                timers.cancel(TimerKind::PmaxElapsed, Some(node_path));
                self.pending.retain(|entry| entry.path != node_path);
            }
        }
    }

    /// After a confirmed value change, fan out to every observed ancestor
    /// level and schedule or send its notification
    pub fn schedule_change_reports(&mut self, path: &NodePath, timers: &mut TimerQueue, now: u64) {
        let numeric = self
            .tree
            .get_value(path)
            .and_then(ResourceValue::as_numeric);
        for level_path in ancestor_levels(path) {
            let Some(info) = self.tree.node_info_mut(&level_path) else {
                continue;
            };
            let Some(handler) = info.report.as_mut() else {
                continue;
            };
            if !handler.is_observed() {
                continue;
            }
            match handler.value_changed(numeric, now) {
                ReportAction::NotifyNow => self.send_notification(&level_path, timers, now),
                ReportAction::NotifyAt(deadline) => {
                    timers.schedule(TimerKind::PminElapsed, Some(level_path), deadline);
                }
                ReportAction::None => {}
            }
        }
    }

    /// A pmin or pmax timer fired for an observed node
    pub fn handle_report_timer(
        &mut self,
        kind: TimerKind,
        path: &NodePath,
        timers: &mut TimerQueue,
        now: u64,
    ) {
        let Some(info) = self.tree.node_info_mut(path) else {
            return;
        };
        let Some(handler) = info.report.as_mut() else {
            return;
        };
        let action = match kind {
            TimerKind::PminElapsed => handler.pmin_elapsed(),
            TimerKind::PmaxElapsed => handler.pmax_elapsed(),
            _ => ReportAction::None,
        };
        if action == ReportAction::NotifyNow {
            self.send_notification(path, timers, now);
        }
    }

    /// Serialize and queue one notification for an observed node.
    /// A serialization failure aborts this notification only; the
    /// observation stays up.
    fn send_notification(&mut self, path: &NodePath, timers: &mut TimerQueue, now: u64) {
        let Some(view) = self.view_at(path) else {
            return;
        };
        let format = match &view {
            NodeView::Value(_) => ContentFormat::TextPlain,
            NodeView::Entries(_) => ContentFormat::Json,
        };
        let payload = match self.codec.serialize(&view, format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("notification for {} dropped: {}", path, e);
                return;
            }
        };
        let message_id = self.allocate_message_id();
        let Some(info) = self.tree.node_info_mut(path) else {
            return;
        };
        let Some(handler) = info.report.as_mut() else {
            return;
        };
        let sequence = handler.next_sequence();
        let token = handler.token().to_vec();
        handler.notification_sent(now);
        let pmax_deadline = handler.pmax_deadline();
        info.last_notification_msg_id = message_id;

        self.pending.push(PendingNotification {
            message_id,
            path: *path,
        });
        if let Some(deadline) = pmax_deadline {
            timers.schedule(TimerKind::PmaxElapsed, Some(*path), deadline);
        }
        self.outbox.push(OutboundMessage {
            kind: OutboundKind::Notification,
            path: path.render(),
            query: None,
            payload,
            content_format: Some(format),
            observe: Some(sequence),
            token,
            message_id,
        });
    }

    /// ACK received for a sent notification
    pub fn handle_notification_ack(&mut self, message_id: u16) {
        let Some(position) = self
            .pending
            .iter()
            .position(|p| p.message_id == message_id)
        else {
            debug!("ack for unknown message id {}", message_id);
            return;
        };
        let path = self.pending.remove(position).path;
        if let Some(info) = self.tree.node_info_mut(&path)
            && let Some(handler) = info.report.as_mut()
        {
            handler.notification_acknowledged();
        }
    }

    /// RESET received for a sent notification: the server dropped the
    /// observation
    pub fn handle_notification_reset(&mut self, message_id: u16, timers: &mut TimerQueue) {
        let Some(path) = self.route_message_id(message_id) else {
            debug!("reset for unknown message id {}", message_id);
            return;
        };
        self.cancel_observation(&path, timers);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Observation level bit for a node kind
fn level_for(base_type: BaseType) -> ObservationLevel {
    match base_type {
        BaseType::ObjectClass => ObservationLevel::OBJECT,
        BaseType::ObjectInstance => ObservationLevel::OBJECT_INSTANCE,
        BaseType::Resource => ObservationLevel::RESOURCE,
        BaseType::ResourceInstance => ObservationLevel::RESOURCE_INSTANCE,
    }
}

/// The changed node plus each ancestor granularity that can be observed
fn ancestor_levels(path: &NodePath) -> Vec<NodePath> {
    let mut levels = vec![*path];
    if path.resource_instance.is_some() {
        levels.push(NodePath {
            resource_instance: None,
            ..*path
        });
    }
    if path.resource.is_some() {
        levels.push(NodePath {
            resource: None,
            resource_instance: None,
            ..*path
        });
    }
    if path.instance.is_some() {
        levels.push(NodePath::object(path.object));
    }
    levels.dedup();
    levels
}

/// Location-Path target: the single created id, when there is only one
fn created_location(entries: &[(u16, serde_json::Value)]) -> Option<u16> {
    match entries {
        [(id, _)] => Some(*id),
        _ => None,
    }
}

/// Infer a typed value from a bare JSON value (create payloads carry no
/// schema)
fn infer_value(json: &serde_json::Value) -> Result<ResourceValue> {
    match json {
        serde_json::Value::String(s) => Ok(ResourceValue::String(s.clone())),
        serde_json::Value::Bool(b) => Ok(ResourceValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(ResourceValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(ResourceValue::Float(f))
            } else {
                Err(Lwm2mError::Decode(format!("unrepresentable number {}", n)))
            }
        }
        other => Err(Lwm2mError::Decode(format!(
            "cannot infer a resource value from {}",
            other
        ))),
    }
}

fn instance_view(instance: &crate::object_instance::ObjectInstance) -> NodeView {
    NodeView::Entries(
        instance
            .resources()
            .iter()
            .filter(|r| !r.is_executable())
            .map(|r| (r.id(), resource_view(r)))
            .collect(),
    )
}

fn resource_view(resource: &crate::resource::Resource) -> NodeView {
    if resource.is_multi_instance() {
        NodeView::Entries(
            resource
                .instances()
                .iter()
                .map(|ri| (ri.info.name_id, NodeView::Value(ri.value().clone())))
                .collect(),
        )
    } else {
        match resource.value() {
            Some(value) => NodeView::Value(value.clone()),
            None => NodeView::Entries(Vec::new()),
        }
    }
}
