//! Hysteresis rules, one per actuator.
//!
//! A circuit only answers "should this node switch now". Forced mode,
//! dwell time and missing sensors are handled by the engine before any
//! rule is consulted.

use std::{collections::BTreeMap, fmt};

use crate::{
    config::Thresholds,
    registry::NodeRegistry,
    sensors::{SensorCache, UNKNOWN_SENSOR_VALUE},
    types::{NodeId, NodeVariant, SensorId, Timestamp},
};

pub mod boiler;
pub mod central;
pub mod heater_reset;
pub mod ventilation;

/// Read-only view handed to a circuit for one evaluation.
pub struct CircuitContext<'a> {
    pub now: Timestamp,
    pub node: NodeId,
    since_switch: Option<u64>,
    registry: &'a NodeRegistry,
    sensors: &'a SensorCache,
    thresholds: &'a BTreeMap<SensorId, i16>,
    room_validity_ms: u64,
}

impl<'a> CircuitContext<'a> {
    pub fn new(
        now: Timestamp,
        node: NodeId,
        since_switch: Option<u64>,
        registry: &'a NodeRegistry,
        sensors: &'a SensorCache,
        thresholds: &'a BTreeMap<SensorId, i16>,
        room_validity_ms: u64,
    ) -> Self {
        Self {
            now,
            node,
            since_switch,
            registry,
            sensors,
            thresholds,
            room_validity_ms,
        }
    }

    pub fn value(&self, id: SensorId) -> Option<i16> {
        self.sensors.average(id)
    }

    /// Value with the wire sentinel for unknown readings. Only meaningful
    /// for required sensors or where the sentinel compares sensibly.
    pub fn temp(&self, id: SensorId) -> i16 {
        self.value(id).unwrap_or(UNKNOWN_SENSOR_VALUE)
    }

    /// Value younger than the room validity window.
    pub fn fresh(&self, id: SensorId) -> Option<i16> {
        self.sensors
            .fresh_value(id, self.room_validity_ms, self.now)
    }

    pub fn is_on(&self, node: NodeId) -> bool {
        self.registry.state(node)
    }

    pub fn is_forced(&self, node: NodeId) -> bool {
        self.registry.forced(node)
    }

    pub fn threshold(&self, id: SensorId, fallback: i16) -> i16 {
        self.thresholds.get(&id).copied().unwrap_or(fallback)
    }

    /// Time in the current state; `None` if the node never switched.
    pub fn since_switch(&self) -> Option<u64> {
        self.since_switch
    }

    /// True once the node has held its state for `period_ms`.
    pub fn held_for(&self, period_ms: u64) -> bool {
        self.since_switch.map_or(true, |held| held >= period_ms)
    }
}

pub trait Circuit: fmt::Debug + Send {
    fn node(&self) -> NodeId;

    fn name(&self) -> &'static str;

    /// Sensors that must be known before the rule runs in the given state.
    fn required_sensors(&self, on: bool) -> &[SensorId];

    /// Replaces the node's dwell time for leaving the given state.
    fn min_dwell_ms(&self, _on: bool) -> Option<u64> {
        None
    }

    /// Runs every control pass, including while the node is forced.
    fn observe(&mut self, _ctx: &CircuitContext<'_>) {}

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool;

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool;

    /// Called after the engine flipped the node automatically, with how
    /// long it had held the previous state.
    fn switched(&mut self, _on: bool, _held_ms: Option<u64>) {}
}

/// Circuits of a variant in evaluation order.
pub fn build(variant: NodeVariant, thresholds: &Thresholds) -> Vec<Box<dyn Circuit>> {
    match variant {
        NodeVariant::CentralUnit => central::circuits(&thresholds.central),
        NodeVariant::Ventilation => ventilation::circuits(&thresholds.ventilation),
        NodeVariant::HeaterReset => heater_reset::circuits(&thresholds.heater_reset),
        NodeVariant::Boiler => boiler::circuits(&thresholds.boiler),
    }
}
