//! Observation engine: write-attributes and notification scheduling
//!
//! Each observed node carries a [`ReportHandler`] that holds its
//! write-attributes (pmin/pmax/gt/lt/st), the observation token and sequence
//! number, and the pending-notification state. The handler decides on every
//! value mutation whether a notification should go out now, later (pmin not
//! yet elapsed), or not at all (thresholds unsatisfied).

use bitflags::bitflags;

use crate::coap_types::OBSERVATION_SEQ_MAX;
use crate::error::{Lwm2mError, Result};

bitflags! {
    /// Which tree levels are under observation; a notification fans out at
    /// the union of the levels set on a node and its ancestors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObservationLevel: u8 {
        const OBJECT = 0b0001;
        const OBJECT_INSTANCE = 0b0010;
        const RESOURCE = 0b0100;
        const RESOURCE_INSTANCE = 0b1000;
    }
}

/// Write-attributes carried in a PUT query string
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WriteAttributes {
    pub pmin: Option<u32>,
    pub pmax: Option<u32>,
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    pub st: Option<f64>,
}

impl WriteAttributes {
    /// Parse from a query string like "pmin=5&pmax=60&gt=25.5".
    ///
    /// Unrelated query keys are ignored; a known key with an unparseable
    /// value is an error and must leave any previously stored attributes
    /// untouched (the caller only applies a fully parsed set).
    pub fn parse(query: &str) -> Result<Self> {
        let mut attributes = Self::default();
        for part in query.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Lwm2mError::Protocol(format!("bad attribute '{}'", part)))?;
            match key {
                "pmin" => attributes.pmin = Some(parse_seconds(key, value)?),
                "pmax" => attributes.pmax = Some(parse_seconds(key, value)?),
                "gt" => attributes.gt = Some(parse_threshold(key, value)?),
                "lt" => attributes.lt = Some(parse_threshold(key, value)?),
                "st" => attributes.st = Some(parse_threshold(key, value)?),
                _ => {}
            }
        }
        attributes.validate()?;
        Ok(attributes)
    }

    /// Consistency rules: pmin <= pmax, lt < gt, and lt + 2*st <= gt
    fn validate(&self) -> Result<()> {
        if let (Some(pmin), Some(pmax)) = (self.pmin, self.pmax)
            && pmin > pmax
        {
            return Err(Lwm2mError::Protocol("pmin greater than pmax".into()));
        }
        if let (Some(lt), Some(gt)) = (self.lt, self.gt) {
            if lt >= gt {
                return Err(Lwm2mError::Protocol("lt not below gt".into()));
            }
            if let Some(st) = self.st
                && lt + 2.0 * st > gt
            {
                return Err(Lwm2mError::Protocol("lt + 2*st exceeds gt".into()));
            }
        }
        Ok(())
    }

    /// Whether any numeric threshold is configured
    pub fn has_thresholds(&self) -> bool {
        self.gt.is_some() || self.lt.is_some() || self.st.is_some()
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Lwm2mError::Protocol(format!("bad {} value '{}'", key, value)))
}

fn parse_threshold(key: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Lwm2mError::Protocol(format!("bad {} value '{}'", key, value)))
}

/// Per-node observation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    /// Not under observation
    Idle,
    /// Under observation, nothing to send
    Observed,
    /// A notification is due once pmin allows it
    Pending,
    /// A notification went out and awaits its ACK
    Notified,
}

/// What the engine wants done after a value update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportAction {
    /// Nothing to send
    None,
    /// Send a notification immediately
    NotifyNow,
    /// Send once the pmin window closes, at the given time
    NotifyAt(u64),
}

/// Observation and write-attribute state attached to a tree node
#[derive(Debug)]
pub struct ReportHandler {
    state: ReportState,
    attributes: WriteAttributes,
    /// Step bands derived from st around the last reported value
    high_step: Option<f64>,
    low_step: Option<f64>,
    last_reported: Option<f64>,
    last_report_time: u64,
    sequence: u32,
    token: Vec<u8>,
    /// Set once the server has acknowledged any notification; pmax stays
    /// silent until then
    acknowledged: bool,
    level: ObservationLevel,
}

impl ReportHandler {
    pub fn new() -> Self {
        Self {
            state: ReportState::Idle,
            attributes: WriteAttributes::default(),
            high_step: None,
            low_step: None,
            last_reported: None,
            last_report_time: 0,
            sequence: 0,
            token: Vec::new(),
            acknowledged: false,
            level: ObservationLevel::empty(),
        }
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    pub fn attributes(&self) -> &WriteAttributes {
        &self.attributes
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn level(&self) -> ObservationLevel {
        self.level
    }

    pub fn is_observed(&self) -> bool {
        self.state != ReportState::Idle
    }

    /// Replace the stored write-attributes with a validated set and rebuild
    /// the step bands around the current value
    pub fn set_attributes(&mut self, attributes: WriteAttributes, current: Option<f64>) {
        self.attributes = attributes;
        self.rebuild_step_bands(current.or(self.last_reported));
    }

    fn rebuild_step_bands(&mut self, around: Option<f64>) {
        match (self.attributes.st, around) {
            (Some(st), Some(value)) => {
                self.high_step = Some(value + st);
                self.low_step = Some(value - st);
            }
            _ => {
                self.high_step = None;
                self.low_step = None;
            }
        }
    }

    /// Start observation with the given token at the given time.
    /// The response to Observe=0 echoes sequence number 0.
    pub fn start_observation(&mut self, token: &[u8], now: u64, level: ObservationLevel) -> u32 {
        self.state = ReportState::Observed;
        self.token = token.to_vec();
        self.sequence = 0;
        self.acknowledged = false;
        self.last_report_time = now;
        self.level.insert(level);
        self.next_sequence()
    }

    /// Stop observation at the given level; returns true when no level
    /// remains and the node left observation entirely
    pub fn stop_observation(&mut self, level: ObservationLevel) -> bool {
        self.level.remove(level);
        if self.level.is_empty() {
            self.state = ReportState::Idle;
            self.token.clear();
            self.acknowledged = false;
            true
        } else {
            false
        }
    }

    /// Current sequence number, post-incremented with 24-bit wrap
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = (self.sequence + 1) & OBSERVATION_SEQ_MAX;
        seq
    }

    /// React to a confirmed value change.
    ///
    /// Thresholds (gt/lt/st) gate the notification when configured; pmin
    /// gates when it goes out. Unchanged values never reach this method:
    /// the tree's `set_value` only reports content-inequality.
    pub fn value_changed(&mut self, value: Option<f64>, now: u64) -> ReportAction {
        if !self.is_observed() {
            return ReportAction::None;
        }
        if let Some(value) = value
            && self.attributes.has_thresholds()
            && !self.thresholds_satisfied(value)
        {
            return ReportAction::None;
        }
        self.last_reported = value;
        self.state = ReportState::Pending;

        let pmin = self.attributes.pmin.unwrap_or(0) as u64;
        let earliest = self.last_report_time + pmin;
        if now >= earliest {
            ReportAction::NotifyNow
        } else {
            ReportAction::NotifyAt(earliest)
        }
    }

    fn thresholds_satisfied(&self, value: f64) -> bool {
        if let Some(gt) = self.attributes.gt
            && value > gt
        {
            return true;
        }
        if let Some(lt) = self.attributes.lt
            && value < lt
        {
            return true;
        }
        if let (Some(high), Some(low)) = (self.high_step, self.low_step)
            && (value >= high || value <= low)
        {
            return true;
        }
        false
    }

    /// pmin timer fired: a deferred notification becomes sendable
    pub fn pmin_elapsed(&mut self) -> ReportAction {
        if self.state == ReportState::Pending {
            ReportAction::NotifyNow
        } else {
            ReportAction::None
        }
    }

    /// pmax timer fired: force a notification on an unchanged value, but
    /// only for an observation the server has acknowledged at least once
    pub fn pmax_elapsed(&mut self) -> ReportAction {
        if self.is_observed() && self.acknowledged {
            self.state = ReportState::Pending;
            ReportAction::NotifyNow
        } else {
            ReportAction::None
        }
    }

    /// A notification for this node was handed to the transport
    pub fn notification_sent(&mut self, now: u64) {
        self.state = ReportState::Notified;
        self.last_report_time = now;
        self.rebuild_step_bands(self.last_reported);
    }

    /// The transport confirmed delivery of the last notification
    pub fn notification_acknowledged(&mut self) {
        if self.state == ReportState::Notified {
            self.state = ReportState::Observed;
        }
        self.acknowledged = true;
    }

    /// Deadline of the next forced notification, when pmax is set
    pub fn pmax_deadline(&self) -> Option<u64> {
        self.attributes
            .pmax
            .map(|pmax| self.last_report_time + pmax as u64)
    }
}

impl Default for ReportHandler {
    fn default() -> Self {
        Self::new()
    }
}
