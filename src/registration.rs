//! Registration and bootstrap state machine
//!
//! Drives an endpoint from unregistered to registered and keeps it alive
//! with periodic registration updates. Transitions are queued and drained
//! by a run-to-completion loop, so a transition triggered from inside
//! another transition's handler never recurses. The machine emits
//! [`Action`]s; the owning client executes them against the dispatcher,
//! timer queue, and credential store.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::error::Lwm2mError;
use crate::storage::CredentialKey;

/// Server Max-Age below this floor is ignored
pub const MINIMUM_REGISTRATION_TIME: u32 = 60;
/// Lifetimes at or above this get a fixed margin subtracted
pub const OPTIMUM_LIFETIME: u32 = 3600;
/// Fixed margin subtracted from long lifetimes
pub const REDUCE_LIFETIME: u32 = 900;
/// Short lifetimes are scaled by this factor instead
pub const REDUCTION_FACTOR: f64 = 0.75;
/// Fixed backoff before a scheduled re-bootstrap, in seconds
pub const REBOOTSTRAP_BACKOFF: u64 = 100;

/// Update interval derived from the effective lifetime, leaving margin for
/// network jitter
pub fn registration_update_interval(lifetime: u32) -> u64 {
    if lifetime >= OPTIMUM_LIFETIME {
        (lifetime - REDUCE_LIFETIME) as u64
    } else {
        (lifetime as f64 * REDUCTION_FACTOR) as u64
    }
}

/// Transport binding of the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    #[default]
    Udp,
    UdpQueue,
    Tcp,
    TcpQueue,
}

impl BindingMode {
    /// Queue bindings treat update failures as transient network errors
    pub fn is_queue(self) -> bool {
        matches!(self, Self::UdpQueue | Self::TcpQueue)
    }

    /// Wire form used in the registration query
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "U",
            Self::UdpQueue => "UQ",
            Self::Tcp => "T",
            Self::TcpQueue => "TQ",
        }
    }
}

/// Endpoint identity and registration parameters
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub name: String,
    pub endpoint_type: String,
    pub domain: String,
    /// Requested lifetime in seconds
    pub lifetime: u32,
    pub binding: BindingMode,
    /// Server-assigned name returned by the registration exchange
    pub internal_name: Option<String>,
}

impl EndpointDescriptor {
    pub fn new(name: &str, lifetime: u32) -> Self {
        Self {
            name: name.to_string(),
            endpoint_type: String::new(),
            domain: String::new(),
            lifetime,
            binding: BindingMode::default(),
            internal_name: None,
        }
    }

    /// Query string for the initial registration request
    pub fn registration_query(&self) -> String {
        let mut query = format!("ep={}&lt={}&b={}", self.name, self.lifetime, self.binding.as_str());
        if !self.endpoint_type.is_empty() {
            query.push_str(&format!("&et={}", self.endpoint_type));
        }
        if !self.domain.is_empty() {
            query.push_str(&format!("&d={}", self.domain));
        }
        query
    }
}

/// State of the registration/bootstrap machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    BootstrapStarted,
    BootstrapSuccess,
    BootstrapFailure,
    RegistrationStarted,
    RegistrationSuccess,
    RegistrationFailure,
    Unregistering,
    Unregistered,
}

/// Input events, queued and drained run-to-completion
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartBootstrap,
    StartRegistration,
    /// Bootstrap exchange finished; carries the delivered credentials
    BootstrapGranted {
        credentials: Vec<(CredentialKey, Vec<u8>)>,
    },
    /// Bootstrap rejected; `security` marks handshake/rejection errors
    BootstrapRejected { security: bool },
    RegistrationGranted {
        max_age: Option<u32>,
        location: Option<String>,
    },
    RegistrationRejected,
    UpdateGranted,
    UpdateRejected,
    /// Registration-update timer fired
    UpdateDue,
    /// Re-bootstrap backoff timer fired
    RebootstrapDue,
    Unregister,
    UnregisterAck,
    /// Transport or handshake failure from the network collaborator
    NetworkFailure(String),
}

/// Side effects for the owning client to execute
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendBootstrap,
    SendRegister,
    SendUpdate,
    SendUnregister,
    /// Persist the credentials delivered by a bootstrap exchange
    PersistCredentials(Vec<(CredentialKey, Vec<u8>)>),
    /// Wipe stored registration credentials ahead of a re-bootstrap
    WipeRegistrationCredentials,
    /// Arm the registration-update timer for this many seconds from now
    ScheduleUpdate(u64),
    /// Arm the re-bootstrap timer for this many seconds from now
    ScheduleRebootstrap(u64),
    CancelUpdateTimer,
    /// Clear pending retransmissions before a forced re-register
    ClearPendingExchanges,
    Notify(ClientEvent),
}

/// Application-facing lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    BootstrapDone,
    BootstrapFailed(String),
    Registered,
    RegistrationUpdated,
    RegistrationFailed(String),
    Unregistered,
}

/// Which in-flight exchange a stored message id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Bootstrap,
    Register,
    Update,
    Unregister,
}

/// The registration/bootstrap state machine
#[derive(Debug)]
pub struct RegistrationMachine {
    state: State,
    endpoint: EndpointDescriptor,
    effective_lifetime: u32,
    /// Pending message ids per exchange
    pending_bootstrap: Option<u16>,
    pending_register: Option<u16>,
    pending_update: Option<u16>,
    pending_unregister: Option<u16>,
    /// Registration location returned by the server ("rd/<id>")
    location: Option<String>,
    /// Registered at least once in this session; a security failure during
    /// bootstrap then wipes credentials and re-bootstraps
    was_registered: bool,
    queue: VecDeque<Event>,
    draining: bool,
}

impl RegistrationMachine {
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        let effective_lifetime = endpoint.lifetime;
        Self {
            state: State::Idle,
            endpoint,
            effective_lifetime,
            pending_bootstrap: None,
            pending_register: None,
            pending_update: None,
            pending_unregister: None,
            location: None,
            was_registered: false,
            queue: VecDeque::new(),
            draining: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut EndpointDescriptor {
        &mut self.endpoint
    }

    pub fn effective_lifetime(&self) -> u32 {
        self.effective_lifetime
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.state == State::RegistrationSuccess
    }

    /// Record the message id of a sent exchange for response correlation
    pub fn exchange_sent(&mut self, kind: ExchangeKind, message_id: u16) {
        match kind {
            ExchangeKind::Bootstrap => self.pending_bootstrap = Some(message_id),
            ExchangeKind::Register => self.pending_register = Some(message_id),
            ExchangeKind::Update => self.pending_update = Some(message_id),
            ExchangeKind::Unregister => self.pending_unregister = Some(message_id),
        }
    }

    /// Drop all pending exchange correlations, for a forced re-register
    pub fn clear_exchanges(&mut self) {
        self.pending_bootstrap = None;
        self.pending_register = None;
        self.pending_update = None;
        self.pending_unregister = None;
    }

    /// Match a response message id to its pending exchange, clearing it
    pub fn match_exchange(&mut self, message_id: u16) -> Option<ExchangeKind> {
        let slots = [
            (ExchangeKind::Bootstrap, &mut self.pending_bootstrap),
            (ExchangeKind::Register, &mut self.pending_register),
            (ExchangeKind::Update, &mut self.pending_update),
            (ExchangeKind::Unregister, &mut self.pending_unregister),
        ];
        for (kind, slot) in slots {
            if *slot == Some(message_id) {
                *slot = None;
                return Some(kind);
            }
        }
        None
    }

    /// Feed an event; internal transitions are queued and the whole queue
    /// is drained before returning, so re-entrant transitions run
    /// iteratively rather than recursively
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        self.queue.push_back(event);
        if self.draining {
            // already inside the drain loop; the queued event will be
            // picked up by it
            return Vec::new();
        }
        self.draining = true;
        let mut actions = Vec::new();
        while let Some(event) = self.queue.pop_front() {
            self.transition(event, &mut actions);
        }
        self.draining = false;
        actions
    }

    fn transition(&mut self, event: Event, actions: &mut Vec<Action>) {
        debug!("registration event {:?} in state {:?}", event, self.state);
        match event {
            Event::StartBootstrap => {
                self.state = State::BootstrapStarted;
                actions.push(Action::SendBootstrap);
            }
            Event::StartRegistration => {
                self.state = State::RegistrationStarted;
                actions.push(Action::SendRegister);
            }
            Event::BootstrapGranted { credentials } => {
                self.state = State::BootstrapSuccess;
                actions.push(Action::PersistCredentials(credentials));
                actions.push(Action::Notify(ClientEvent::BootstrapDone));
                // bootstrapped credentials feed straight into registration
                self.queue.push_back(Event::StartRegistration);
            }
            Event::BootstrapRejected { security } => {
                self.state = State::BootstrapFailure;
                if security && self.was_registered {
                    // stale credentials from an earlier session; wipe them
                    // and come back after the fixed backoff
                    warn!("bootstrap security failure, scheduling re-bootstrap");
                    actions.push(Action::WipeRegistrationCredentials);
                    actions.push(Action::ScheduleRebootstrap(REBOOTSTRAP_BACKOFF));
                } else {
                    actions.push(Action::Notify(ClientEvent::BootstrapFailed(
                        "bootstrap rejected by server".into(),
                    )));
                }
            }
            Event::RegistrationGranted { max_age, location } => {
                self.state = State::RegistrationSuccess;
                self.was_registered = true;
                self.location = location;
                if let Some(max_age) = max_age
                    && max_age >= MINIMUM_REGISTRATION_TIME
                {
                    self.effective_lifetime = max_age;
                } else {
                    self.effective_lifetime = self.endpoint.lifetime;
                }
                actions.push(Action::ScheduleUpdate(registration_update_interval(
                    self.effective_lifetime,
                )));
                actions.push(Action::Notify(ClientEvent::Registered));
            }
            Event::RegistrationRejected => {
                self.state = State::RegistrationFailure;
                actions.push(Action::CancelUpdateTimer);
                actions.push(Action::Notify(ClientEvent::RegistrationFailed(
                    "registration rejected by server".into(),
                )));
            }
            Event::UpdateDue => {
                if self.state == State::RegistrationSuccess {
                    actions.push(Action::SendUpdate);
                }
            }
            Event::UpdateGranted => {
                actions.push(Action::ScheduleUpdate(registration_update_interval(
                    self.effective_lifetime,
                )));
                actions.push(Action::Notify(ClientEvent::RegistrationUpdated));
            }
            Event::UpdateRejected => {
                if self.endpoint.binding.is_queue() {
                    // transient on queue bindings; the next update retries
                    debug!("update rejected on queue binding, treating as transient");
                    actions.push(Action::ScheduleUpdate(registration_update_interval(
                        self.effective_lifetime,
                    )));
                } else {
                    // full re-register after clearing retransmissions
                    actions.push(Action::ClearPendingExchanges);
                    self.queue.push_back(Event::StartRegistration);
                }
            }
            Event::RebootstrapDue => {
                self.queue.push_back(Event::StartBootstrap);
            }
            Event::Unregister => {
                match self.state {
                    State::Unregistering => {
                        // already in flight: idempotent no-op success
                    }
                    State::RegistrationSuccess => {
                        self.state = State::Unregistering;
                        actions.push(Action::CancelUpdateTimer);
                        actions.push(Action::SendUnregister);
                    }
                    _ => {
                        self.state = State::Unregistered;
                        actions.push(Action::Notify(ClientEvent::Unregistered));
                    }
                }
            }
            Event::UnregisterAck => {
                self.state = State::Unregistered;
                self.location = None;
                actions.push(Action::Notify(ClientEvent::Unregistered));
            }
            Event::NetworkFailure(reason) => {
                let failed = Lwm2mError::Network(reason).to_string();
                match self.state {
                    State::BootstrapStarted => {
                        self.state = State::BootstrapFailure;
                        if self.was_registered {
                            // handshake failed against stale credentials;
                            // same recovery as a security rejection
                            warn!("bootstrap handshake failure, scheduling re-bootstrap");
                            actions.push(Action::WipeRegistrationCredentials);
                            actions.push(Action::ScheduleRebootstrap(REBOOTSTRAP_BACKOFF));
                        } else {
                            actions.push(Action::Notify(ClientEvent::BootstrapFailed(failed)));
                        }
                    }
                    _ => {
                        self.state = State::RegistrationFailure;
                        actions.push(Action::CancelUpdateTimer);
                        actions.push(Action::Notify(ClientEvent::RegistrationFailed(failed)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(lifetime: u32) -> RegistrationMachine {
        RegistrationMachine::new(EndpointDescriptor::new("device-1", lifetime))
    }

    fn registered_machine() -> RegistrationMachine {
        let mut m = machine(86400);
        m.handle(Event::StartRegistration);
        m.handle(Event::RegistrationGranted {
            max_age: None,
            location: Some("rd/abc".into()),
        });
        m
    }

    #[test]
    fn test_update_interval_math() {
        assert_eq!(registration_update_interval(86400), 86400 - 900);
        assert_eq!(registration_update_interval(3600), 2700);
        assert_eq!(registration_update_interval(30), 22);
    }

    #[test]
    fn test_registration_flow() {
        let mut m = machine(86400);
        let actions = m.handle(Event::StartRegistration);
        assert_eq!(actions, vec![Action::SendRegister]);
        assert_eq!(m.state(), State::RegistrationStarted);

        let actions = m.handle(Event::RegistrationGranted {
            max_age: Some(86400),
            location: Some("rd/abc".into()),
        });
        assert!(m.is_registered());
        assert_eq!(m.location(), Some("rd/abc"));
        assert!(actions.contains(&Action::ScheduleUpdate(86400 - 900)));
        assert!(actions.contains(&Action::Notify(ClientEvent::Registered)));
    }

    #[test]
    fn test_max_age_negotiation() {
        let mut m = machine(600);
        m.handle(Event::StartRegistration);
        // below the floor: keep the requested lifetime
        m.handle(Event::RegistrationGranted {
            max_age: Some(30),
            location: None,
        });
        assert_eq!(m.effective_lifetime(), 600);

        let mut m = machine(600);
        m.handle(Event::StartRegistration);
        let actions = m.handle(Event::RegistrationGranted {
            max_age: Some(120),
            location: None,
        });
        assert_eq!(m.effective_lifetime(), 120);
        assert!(actions.contains(&Action::ScheduleUpdate(90)));
    }

    #[test]
    fn test_short_lifetime_uses_reduction_factor() {
        let mut m = machine(86400);
        m.handle(Event::StartRegistration);
        let actions = m.handle(Event::RegistrationGranted {
            max_age: Some(30),
            location: None,
        });
        // 30 is below the Max-Age floor; requested lifetime 86400 governs
        assert!(actions.contains(&Action::ScheduleUpdate(86400 - 900)));

        let mut m = machine(30);
        m.handle(Event::StartRegistration);
        let actions = m.handle(Event::RegistrationGranted {
            max_age: None,
            location: None,
        });
        assert!(actions.contains(&Action::ScheduleUpdate(22)));
    }

    #[test]
    fn test_bootstrap_success_chains_into_registration() {
        let mut m = machine(3600);
        m.handle(Event::StartBootstrap);
        assert_eq!(m.state(), State::BootstrapStarted);

        let creds = vec![(CredentialKey::ServerUri, b"coaps://server".to_vec())];
        let actions = m.handle(Event::BootstrapGranted {
            credentials: creds.clone(),
        });
        // run-to-completion: the chained registration start is drained in
        // the same call, not recursively
        assert_eq!(
            actions,
            vec![
                Action::PersistCredentials(creds),
                Action::Notify(ClientEvent::BootstrapDone),
                Action::SendRegister,
            ]
        );
        assert_eq!(m.state(), State::RegistrationStarted);
    }

    #[test]
    fn test_bootstrap_security_failure_while_registered() {
        let mut m = registered_machine();
        m.handle(Event::StartBootstrap);
        let actions = m.handle(Event::BootstrapRejected { security: true });
        assert_eq!(
            actions,
            vec![
                Action::WipeRegistrationCredentials,
                Action::ScheduleRebootstrap(REBOOTSTRAP_BACKOFF),
            ]
        );
        assert_eq!(m.state(), State::BootstrapFailure);

        // backoff fires: a fresh bootstrap goes out
        let actions = m.handle(Event::RebootstrapDue);
        assert_eq!(actions, vec![Action::SendBootstrap]);
    }

    #[test]
    fn test_bootstrap_handshake_failure_while_registered() {
        let mut m = registered_machine();
        m.handle(Event::StartBootstrap);
        let actions = m.handle(Event::NetworkFailure("dtls handshake failed".into()));
        assert_eq!(
            actions,
            vec![
                Action::WipeRegistrationCredentials,
                Action::ScheduleRebootstrap(REBOOTSTRAP_BACKOFF),
            ]
        );
        assert_eq!(m.state(), State::BootstrapFailure);
    }

    #[test]
    fn test_bootstrap_handshake_failure_on_first_contact() {
        let mut m = machine(3600);
        m.handle(Event::StartBootstrap);
        let actions = m.handle(Event::NetworkFailure("dtls handshake failed".into()));
        // never registered: nothing to wipe, report the failure
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            Action::Notify(ClientEvent::BootstrapFailed(_))
        ));
    }

    #[test]
    fn test_bootstrap_failure_before_first_registration() {
        let mut m = machine(3600);
        m.handle(Event::StartBootstrap);
        let actions = m.handle(Event::BootstrapRejected { security: true });
        // never registered: surfaced to the application, no credential wipe
        assert!(matches!(
            actions.as_slice(),
            [Action::Notify(ClientEvent::BootstrapFailed(_))]
        ));
    }

    #[test]
    fn test_update_failure_non_queue_reregisters() {
        let mut m = registered_machine();
        let actions = m.handle(Event::UpdateRejected);
        assert_eq!(
            actions,
            vec![Action::ClearPendingExchanges, Action::SendRegister]
        );
        assert_eq!(m.state(), State::RegistrationStarted);
    }

    #[test]
    fn test_update_failure_queue_binding_is_transient() {
        let mut m = registered_machine();
        m.endpoint_mut().binding = BindingMode::UdpQueue;
        let actions = m.handle(Event::UpdateRejected);
        assert_eq!(actions, vec![Action::ScheduleUpdate(86400 - 900)]);
        assert!(m.is_registered());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut m = registered_machine();
        let actions = m.handle(Event::Unregister);
        assert_eq!(
            actions,
            vec![Action::CancelUpdateTimer, Action::SendUnregister]
        );

        // second call while in flight: no duplicate request
        let actions = m.handle(Event::Unregister);
        assert!(actions.is_empty());

        let actions = m.handle(Event::UnregisterAck);
        assert_eq!(actions, vec![Action::Notify(ClientEvent::Unregistered)]);
        assert_eq!(m.state(), State::Unregistered);
    }

    #[test]
    fn test_exchange_correlation() {
        let mut m = machine(3600);
        m.exchange_sent(ExchangeKind::Register, 17);
        m.exchange_sent(ExchangeKind::Update, 18);
        assert_eq!(m.match_exchange(18), Some(ExchangeKind::Update));
        assert_eq!(m.match_exchange(18), None);
        assert_eq!(m.match_exchange(17), Some(ExchangeKind::Register));
        assert_eq!(m.match_exchange(99), None);
    }

    #[test]
    fn test_registration_query() {
        let mut endpoint = EndpointDescriptor::new("device-1", 3600);
        endpoint.endpoint_type = "sensor".into();
        assert_eq!(
            endpoint.registration_query(),
            "ep=device-1&lt=3600&b=U&et=sensor"
        );
    }
}
