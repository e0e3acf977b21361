//! Client façade
//!
//! Owns the dispatcher, the registration machine, the timer queue, and the
//! credential store, and wires them together. The transport collaborator
//! feeds inbound CoAP messages in and drains outbound ones from the outbox;
//! the application drives time with [`Lwm2mClient::tick`] and reads
//! lifecycle events from [`Lwm2mClient::take_events`].

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::coap_types::{ContentFormat, OutboundKind, OutboundMessage, Request, Response, ResponseCode};
use crate::base::NodePath;
use crate::dispatcher::Dispatcher;
use crate::error::{Lwm2mError, Result};
use crate::object::ObjectTree;
use crate::registration::{
    Action, ClientEvent, EndpointDescriptor, Event, ExchangeKind, RegistrationMachine, State,
};
use crate::storage::{CredentialKey, CredentialStore};
use crate::timer::{TimerKind, TimerQueue};
use crate::value::ResourceValue;

/// Well-known path of the bootstrap interface
const BOOTSTRAP_PATH: &str = "bs";
/// Registration interface root used until the server assigns a location
const REGISTER_PATH: &str = "rd";

/// LWM2M client core: resource tree, dispatcher, observation engine, and
/// registration machine behind one synchronous API
pub struct Lwm2mClient {
    dispatcher: Dispatcher,
    machine: RegistrationMachine,
    timers: TimerQueue,
    store: Box<dyn CredentialStore + Send>,
    outbox: Vec<OutboundMessage>,
    events: VecDeque<ClientEvent>,
}

impl Lwm2mClient {
    pub fn new(endpoint: EndpointDescriptor, store: Box<dyn CredentialStore + Send>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            machine: RegistrationMachine::new(endpoint),
            timers: TimerQueue::new(),
            store,
            outbox: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn tree(&self) -> &ObjectTree {
        self.dispatcher.tree()
    }

    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        self.dispatcher.tree_mut()
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn is_registered(&self) -> bool {
        self.machine.is_registered()
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        self.machine.endpoint()
    }

    /// Begin the session. Registers directly when registration credentials
    /// are provisioned, bootstraps when only bootstrap credentials exist,
    /// and fails before any network traffic when neither is available.
    pub fn start(&mut self, now: u64) -> Result<()> {
        let event = if self.store.has_registration_credentials() {
            Event::StartRegistration
        } else if self.store.has_bootstrap_credentials() {
            Event::StartBootstrap
        } else {
            return Err(Lwm2mError::Credential(
                "neither registration nor bootstrap credentials provisioned".into(),
            ));
        };
        info!("starting session for endpoint {}", self.machine.endpoint().name);
        let actions = self.machine.handle(event);
        self.run_actions(actions, now);
        Ok(())
    }

    /// Force a new bootstrap exchange, e.g. after a bootstrap-request
    /// trigger from the server
    pub fn rebootstrap(&mut self, now: u64) {
        let actions = self.machine.handle(Event::StartBootstrap);
        self.run_actions(actions, now);
    }

    /// Deregister from the server. Safe to call repeatedly; a second call
    /// while the unregister exchange is in flight is a no-op.
    pub fn unregister(&mut self, now: u64) {
        let actions = self.machine.handle(Event::Unregister);
        self.run_actions(actions, now);
    }

    /// Inbound device-management request from the server
    pub fn handle_request(&mut self, request: &Request, now: u64) -> Response {
        self.dispatcher.handle_request(request, &mut self.timers, now)
    }

    /// Response to one of our own exchanges (bootstrap, register, update,
    /// unregister) or a piggybacked ACK for a notification
    pub fn handle_server_response(
        &mut self,
        message_id: u16,
        code: ResponseCode,
        payload: &[u8],
        location: Option<String>,
        max_age: Option<u32>,
        now: u64,
    ) {
        let Some(kind) = self.machine.match_exchange(message_id) else {
            self.dispatcher.handle_notification_ack(message_id);
            return;
        };
        let event = match kind {
            ExchangeKind::Bootstrap => {
                if code.is_success() {
                    match parse_bootstrap_credentials(payload) {
                        Ok(credentials) => Event::BootstrapGranted { credentials },
                        Err(e) => {
                            warn!("bootstrap payload rejected: {}", e);
                            Event::BootstrapRejected { security: false }
                        }
                    }
                } else {
                    Event::BootstrapRejected {
                        security: code == ResponseCode::BadRequest,
                    }
                }
            }
            ExchangeKind::Register => {
                if code.is_success() {
                    Event::RegistrationGranted { max_age, location }
                } else {
                    Event::RegistrationRejected
                }
            }
            ExchangeKind::Update => {
                if code.is_success() {
                    Event::UpdateGranted
                } else {
                    Event::UpdateRejected
                }
            }
            // 2.02 and 4.04 both mean the registration is gone
            ExchangeKind::Unregister => Event::UnregisterAck,
        };
        let actions = self.machine.handle(event);
        self.run_actions(actions, now);
    }

    /// Empty ACK for a sent notification
    pub fn handle_ack(&mut self, message_id: u16) {
        self.dispatcher.handle_notification_ack(message_id);
    }

    /// RESET for a sent notification: the server dropped the observation
    pub fn handle_reset(&mut self, message_id: u16) {
        self.dispatcher.handle_notification_reset(message_id, &mut self.timers);
    }

    /// Transport failure reported by the network collaborator
    pub fn handle_network_failure(&mut self, reason: &str, now: u64) {
        let actions = self.machine.handle(Event::NetworkFailure(reason.to_string()));
        self.run_actions(actions, now);
    }

    /// Set a resource value from the application side; a confirmed change
    /// fans out notifications to every observed level
    pub fn set_value(&mut self, path: &NodePath, value: ResourceValue, now: u64) -> Result<()> {
        if self.dispatcher.tree_mut().set_value(path, value)? {
            self.dispatcher.schedule_change_reports(path, &mut self.timers, now);
        }
        Ok(())
    }

    /// Advance time: fire every due timer
    pub fn tick(&mut self, now: u64) {
        for event in self.timers.poll(now) {
            match event.kind {
                TimerKind::RegistrationUpdate => {
                    let actions = self.machine.handle(Event::UpdateDue);
                    self.run_actions(actions, now);
                }
                TimerKind::Rebootstrap => {
                    let actions = self.machine.handle(Event::RebootstrapDue);
                    self.run_actions(actions, now);
                }
                TimerKind::PminElapsed | TimerKind::PmaxElapsed => {
                    if let Some(path) = event.path {
                        self.dispatcher
                            .handle_report_timer(event.kind, &path, &mut self.timers, now);
                    }
                }
            }
        }
    }

    /// Earliest pending timer deadline, for the caller's sleep loop
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Drain queued outbound messages for the transport to send
    pub fn take_outbox(&mut self) -> Vec<OutboundMessage> {
        let mut messages = std::mem::take(&mut self.outbox);
        messages.extend(self.dispatcher.take_outbox());
        messages
    }

    /// Drain queued lifecycle events for the application
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }

    fn run_actions(&mut self, actions: Vec<Action>, now: u64) {
        for action in actions {
            match action {
                Action::SendBootstrap => {
                    let message_id = self.dispatcher.allocate_message_id();
                    self.machine.exchange_sent(ExchangeKind::Bootstrap, message_id);
                    self.outbox.push(OutboundMessage {
                        kind: OutboundKind::Bootstrap,
                        path: BOOTSTRAP_PATH.to_string(),
                        query: Some(format!("ep={}", self.machine.endpoint().name)),
                        payload: Vec::new(),
                        content_format: None,
                        observe: None,
                        token: Vec::new(),
                        message_id,
                    });
                }
                Action::SendRegister => {
                    let links = self.dispatcher.tree().registration_links();
                    let message_id = self.dispatcher.allocate_message_id();
                    self.machine.exchange_sent(ExchangeKind::Register, message_id);
                    self.outbox.push(OutboundMessage {
                        kind: OutboundKind::Register,
                        path: REGISTER_PATH.to_string(),
                        query: Some(self.machine.endpoint().registration_query()),
                        payload: links.into_bytes(),
                        content_format: Some(ContentFormat::LinkFormat),
                        observe: None,
                        token: Vec::new(),
                        message_id,
                    });
                }
                Action::SendUpdate => {
                    let message_id = self.dispatcher.allocate_message_id();
                    self.machine.exchange_sent(ExchangeKind::Update, message_id);
                    let path = self
                        .machine
                        .location()
                        .unwrap_or(REGISTER_PATH)
                        .to_string();
                    self.outbox.push(OutboundMessage {
                        kind: OutboundKind::Update,
                        path,
                        query: Some(format!("lt={}", self.machine.effective_lifetime())),
                        payload: Vec::new(),
                        content_format: None,
                        observe: None,
                        token: Vec::new(),
                        message_id,
                    });
                }
                Action::SendUnregister => {
                    let message_id = self.dispatcher.allocate_message_id();
                    self.machine.exchange_sent(ExchangeKind::Unregister, message_id);
                    let path = self
                        .machine
                        .location()
                        .unwrap_or(REGISTER_PATH)
                        .to_string();
                    self.outbox.push(OutboundMessage {
                        kind: OutboundKind::Unregister,
                        path,
                        query: None,
                        payload: Vec::new(),
                        content_format: None,
                        observe: None,
                        token: Vec::new(),
                        message_id,
                    });
                }
                Action::PersistCredentials(entries) => {
                    for (key, value) in entries {
                        if let Err(e) = self.store.set(key, &value) {
                            warn!("failed to persist credential {}: {}", key.as_str(), e);
                        }
                    }
                }
                Action::WipeRegistrationCredentials => {
                    if let Err(e) = self.store.wipe_registration_credentials() {
                        warn!("failed to wipe registration credentials: {}", e);
                    }
                }
                Action::ScheduleUpdate(secs) => {
                    self.timers
                        .schedule(TimerKind::RegistrationUpdate, None, now + secs);
                }
                Action::ScheduleRebootstrap(secs) => {
                    self.timers.schedule(TimerKind::Rebootstrap, None, now + secs);
                }
                Action::CancelUpdateTimer => {
                    self.timers.cancel(TimerKind::RegistrationUpdate, None);
                }
                Action::ClearPendingExchanges => {
                    // unsent registration traffic is stale after a forced
                    // re-register
                    self.outbox.retain(|m| {
                        !matches!(m.kind, OutboundKind::Register | OutboundKind::Update)
                    });
                    self.machine.clear_exchanges();
                }
                Action::Notify(event) => {
                    debug!("client event {:?}", event);
                    self.events.push_back(event);
                }
            }
        }
    }
}

impl std::fmt::Debug for Lwm2mClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lwm2mClient")
            .field("state", &self.machine.state())
            .field("endpoint", &self.machine.endpoint().name)
            .finish_non_exhaustive()
    }
}

/// Bootstrap payloads are JSON maps of credential key to string value
fn parse_bootstrap_credentials(payload: &[u8]) -> Result<Vec<(CredentialKey, Vec<u8>)>> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)
        .map_err(|e| Lwm2mError::Decode(format!("bootstrap payload: {}", e)))?;
    let known = [
        CredentialKey::AccountId,
        CredentialKey::InternalEndpointName,
        CredentialKey::BootstrapUri,
        CredentialKey::ServerUri,
        CredentialKey::DeviceCertificate,
        CredentialKey::DeviceKey,
        CredentialKey::ServerCertificate,
    ];
    let mut entries = Vec::new();
    for (name, value) in map {
        let Some(key) = known.iter().copied().find(|k| k.as_str() == name) else {
            debug!("ignoring unknown bootstrap credential {}", name);
            continue;
        };
        let Some(text) = value.as_str() else {
            return Err(Lwm2mError::Decode(format!(
                "bootstrap credential {} is not a string",
                name
            )));
        };
        entries.push((key, text.as_bytes().to_vec()));
    }
    if entries.is_empty() {
        return Err(Lwm2mError::Decode("bootstrap payload carried no credentials".into()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_types::{Method, Observe};
    use crate::storage::MemoryStore;

    fn provisioned_client() -> Lwm2mClient {
        let store = MemoryStore::provisioned("coaps://server:5684", b"psk-key");
        let mut client = Lwm2mClient::new(
            EndpointDescriptor::new("device-1", 3600),
            Box::new(store),
        );
        let tree = client.tree_mut();
        let object = tree.create_object(3).unwrap();
        let instance = object.create_instance(0).unwrap();
        instance
            .create_resource(9, ResourceValue::Integer(100))
            .unwrap();
        client
    }

    #[test]
    fn test_start_without_credentials_fails_before_network() {
        let mut client = Lwm2mClient::new(
            EndpointDescriptor::new("device-1", 3600),
            Box::new(MemoryStore::new()),
        );
        assert!(matches!(
            client.start(0),
            Err(Lwm2mError::Credential(_))
        ));
        assert!(client.take_outbox().is_empty());
    }

    #[test]
    fn test_start_registers_with_provisioned_credentials() {
        let mut client = provisioned_client();
        client.start(0).unwrap();

        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        let register = &outbox[0];
        assert_eq!(register.kind, OutboundKind::Register);
        assert_eq!(register.path, "rd");
        assert_eq!(register.query.as_deref(), Some("ep=device-1&lt=3600&b=U"));
        assert_eq!(register.content_format, Some(ContentFormat::LinkFormat));
        assert_eq!(register.payload, b"</3/0>".to_vec());

        client.handle_server_response(
            register.message_id,
            ResponseCode::Created,
            &[],
            Some("rd/5a3f".into()),
            None,
            0,
        );
        assert!(client.is_registered());
        assert_eq!(client.take_events(), vec![ClientEvent::Registered]);
        // update timer armed with the reduced lifetime
        assert_eq!(client.next_deadline(), Some(2700));
    }

    #[test]
    fn test_update_goes_to_assigned_location() {
        let mut client = provisioned_client();
        client.start(0).unwrap();
        let register = client.take_outbox().remove(0);
        client.handle_server_response(
            register.message_id,
            ResponseCode::Created,
            &[],
            Some("rd/5a3f".into()),
            None,
            0,
        );
        client.take_events();

        client.tick(2700);
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, OutboundKind::Update);
        assert_eq!(outbox[0].path, "rd/5a3f");
        assert_eq!(outbox[0].query.as_deref(), Some("lt=3600"));

        client.handle_server_response(
            outbox[0].message_id,
            ResponseCode::Changed,
            &[],
            None,
            None,
            2700,
        );
        assert_eq!(client.take_events(), vec![ClientEvent::RegistrationUpdated]);
        assert_eq!(client.next_deadline(), Some(2700 + 2700));
    }

    #[test]
    fn test_bootstrap_then_register() {
        let mut store = MemoryStore::new();
        store
            .set(CredentialKey::BootstrapUri, b"coaps://bootstrap:5684")
            .unwrap();
        let mut client = Lwm2mClient::new(
            EndpointDescriptor::new("device-1", 3600),
            Box::new(store),
        );
        client.start(0).unwrap();

        let outbox = client.take_outbox();
        assert_eq!(outbox[0].kind, OutboundKind::Bootstrap);
        assert_eq!(outbox[0].path, "bs");
        assert_eq!(outbox[0].query.as_deref(), Some("ep=device-1"));

        let payload =
            br#"{"server_uri": "coaps://server:5684", "device_key": "secret"}"#;
        client.handle_server_response(
            outbox[0].message_id,
            ResponseCode::Changed,
            payload,
            None,
            None,
            1,
        );
        // bootstrap chains straight into registration
        assert_eq!(client.take_events(), vec![ClientEvent::BootstrapDone]);
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, OutboundKind::Register);
    }

    #[test]
    fn test_application_value_change_notifies_observer() {
        let mut client = provisioned_client();
        let request = Request::new(Method::Get, "3/0/9")
            .with_observe(Observe::Register)
            .with_token(&[0xAA]);
        let response = client.handle_request(&request, 10);
        assert_eq!(response.observe, Some(0));

        client
            .set_value(&NodePath::resource(3, 0, 9), ResourceValue::Integer(42), 11)
            .unwrap();
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, OutboundKind::Notification);
        assert_eq!(outbox[0].observe, Some(1));
        assert_eq!(outbox[0].token, vec![0xAA]);
        assert_eq!(outbox[0].payload, b"42".to_vec());
    }

    #[test]
    fn test_unregister_roundtrip() {
        let mut client = provisioned_client();
        client.start(0).unwrap();
        let register = client.take_outbox().remove(0);
        client.handle_server_response(
            register.message_id,
            ResponseCode::Created,
            &[],
            Some("rd/5a3f".into()),
            None,
            0,
        );
        client.take_events();

        client.unregister(5);
        let outbox = client.take_outbox();
        assert_eq!(outbox[0].kind, OutboundKind::Unregister);
        assert_eq!(outbox[0].path, "rd/5a3f");
        // update timer cancelled along the way
        assert_eq!(client.next_deadline(), None);

        client.handle_server_response(
            outbox[0].message_id,
            ResponseCode::Deleted,
            &[],
            None,
            None,
            6,
        );
        assert_eq!(client.take_events(), vec![ClientEvent::Unregistered]);
        assert_eq!(client.state(), State::Unregistered);
    }

    #[test]
    fn test_bad_bootstrap_payload_is_a_failure() {
        let mut store = MemoryStore::new();
        store
            .set(CredentialKey::BootstrapUri, b"coaps://bootstrap:5684")
            .unwrap();
        let mut client = Lwm2mClient::new(
            EndpointDescriptor::new("device-1", 3600),
            Box::new(store),
        );
        client.start(0).unwrap();
        let outbox = client.take_outbox();
        client.handle_server_response(
            outbox[0].message_id,
            ResponseCode::Changed,
            b"not json",
            None,
            None,
            1,
        );
        assert!(matches!(
            client.take_events().as_slice(),
            [ClientEvent::BootstrapFailed(_)]
        ));
    }

    #[test]
    fn test_parse_bootstrap_credentials_filters_unknown_keys() {
        let payload = br#"{"server_uri": "coaps://s", "vendor_extra": "x"}"#;
        let entries = parse_bootstrap_credentials(payload).unwrap();
        assert_eq!(
            entries,
            vec![(CredentialKey::ServerUri, b"coaps://s".to_vec())]
        );
    }

    #[test]
    fn test_tick_fires_pmax_keepalive() {
        let mut client = provisioned_client();
        let put = Request::new(Method::Put, "3/0/9").with_query("pmax=60");
        client.handle_request(&put, 0);
        let request = Request::new(Method::Get, "3/0/9")
            .with_observe(Observe::Register)
            .with_token(&[0x01]);
        let response = client.handle_request(&request, 0);
        assert_eq!(response.observe, Some(0));
        assert_eq!(client.next_deadline(), Some(60));

        // initial notification unacknowledged: pmax does not fire
        client.tick(60);
        assert!(client.take_outbox().is_empty());
    }

    #[test]
    fn test_acked_pmax_keepalive_repeats_each_interval() {
        let mut client = provisioned_client();
        let put = Request::new(Method::Put, "3/0/9").with_query("pmax=60");
        client.handle_request(&put, 0);
        let observe = Request::new(Method::Get, "3/0/9")
            .with_observe(Observe::Register)
            .with_token(&[0x01]);
        client.handle_request(&observe, 0);

        client
            .set_value(&NodePath::resource(3, 0, 9), ResourceValue::Integer(42), 5)
            .unwrap();
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].observe, Some(1));
        client.handle_ack(outbox[0].message_id);

        // unchanged value: pmax keeps the observation alive
        client.tick(65);
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, OutboundKind::Notification);
        assert_eq!(outbox[0].observe, Some(2));
        assert_eq!(outbox[0].payload, b"42".to_vec());

        // timer re-arms for the interval after each keepalive
        client.handle_ack(outbox[0].message_id);
        assert_eq!(client.next_deadline(), Some(125));
        client.tick(125);
        let outbox = client.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].observe, Some(3));
    }
}
