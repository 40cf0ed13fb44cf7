//! Control engine shared by every node variant.
//!
//! The engine performs no I/O. Every entry point returns the actuator
//! drives and outbound messages the host has to carry out, in order.

use std::collections::BTreeMap;

use crate::{
    circuits::{self, Circuit, CircuitContext},
    clock::Clock,
    config::{EngineConfig, Thresholds},
    error::{ActuatorFault, StoreError},
    message::{Message, SensorSample},
    ports::{Actuator, SensorSource},
    profile::NodeProfile,
    registry::NodeRegistry,
    sensors::{Recorded, SensorCache, SensorKind},
    store::{ConfigStore, NetworkField, NetworkSettings, NodeStore},
    types::{NodeId, SensorId, Timestamp},
};

mod dispatch;
mod overrides;
mod report;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Drive the output; feed the result back through [`Engine::drive`] or
    /// the `record_actuator_*` methods.
    Drive { node: NodeId, on: bool },
    Publish(Message),
    /// Only for links on the node's own side (serial console, access point).
    PublishLocal(Message),
    NetworkUpdated(NetworkField),
    /// A store access failed and the engine carried on with defaults.
    StoreFailed(StoreError),
}

#[derive(Debug)]
pub struct Engine<S: ConfigStore> {
    config: EngineConfig,
    profile: NodeProfile,
    clock: Clock,
    registry: NodeRegistry,
    sensors: SensorCache,
    store: NodeStore<S>,
    thresholds: BTreeMap<SensorId, i16>,
    circuits: Vec<Box<dyn Circuit>>,

    last_sensor_read: Option<Timestamp>,
    last_control: Option<Timestamp>,
    last_status_report: Option<Timestamp>,
    report_cursor: usize,
}

impl<S: ConfigStore> Engine<S> {
    pub fn new(
        config: EngineConfig,
        profile: NodeProfile,
        circuits: Vec<Box<dyn Circuit>>,
        backend: S,
    ) -> Self {
        let mut sensors = SensorCache::new();
        for (id, kind) in &profile.sensors {
            sensors.register(*id, *kind);
        }
        let thresholds = profile.threshold_defaults.iter().copied().collect();

        Self {
            clock: Clock::new(config.tick_modulus_ms),
            registry: NodeRegistry::new(&profile.nodes),
            store: NodeStore::new(backend, profile.calibrated, profile.thresholds),
            config,
            profile,
            sensors,
            thresholds,
            circuits,
            last_sensor_read: None,
            last_control: None,
            last_status_report: None,
            report_cursor: 0,
        }
    }

    pub fn for_variant(config: EngineConfig, thresholds: &Thresholds, backend: S) -> Self {
        let profile = NodeProfile::for_variant(config.variant, thresholds);
        let circuits = circuits::build(config.variant, thresholds);
        Self::new(config, profile, circuits, backend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self) -> &NodeProfile {
        &self.profile
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn sensors(&self) -> &SensorCache {
        &self.sensors
    }

    /// Name of the rule that drives `id` automatically.
    pub fn circuit_name(&self, id: NodeId) -> Option<&'static str> {
        self.circuits
            .iter()
            .find(|circuit| circuit.node() == id)
            .map(|circuit| circuit.name())
    }

    pub fn threshold(&self, id: SensorId) -> Option<i16> {
        self.thresholds.get(&id).copied()
    }

    pub fn store(&self) -> &NodeStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut NodeStore<S> {
        &mut self.store
    }

    pub fn network(&self) -> Result<NetworkSettings, StoreError> {
        self.store.network()
    }

    /// Writes factory defaults. Used once for a blank image.
    pub fn format_store(&mut self) -> Result<(), StoreError> {
        self.store.format(&self.profile.threshold_defaults)
    }

    /// Restores persisted state and re-drives every output.
    pub fn boot(&mut self, raw_tick: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let now = self.clock.observe(raw_tick).now;

        let (state, forced) = self.store.registers().unwrap_or_else(|err| {
            actions.push(EngineAction::StoreFailed(err));
            (0, 0)
        });
        self.registry.restore(state, forced);

        let calibrated = self.profile.calibrated;
        for id in calibrated {
            match self.store.calibration(*id) {
                Ok(factor) => self.sensors.set_calibration(*id, factor),
                Err(err) => actions.push(EngineAction::StoreFailed(err)),
            }
        }
        let threshold_slots = self.profile.thresholds;
        for id in threshold_slots {
            match self.store.threshold(*id) {
                Ok(value) => {
                    self.thresholds.insert(*id, value);
                }
                Err(err) => actions.push(EngineAction::StoreFailed(err)),
            }
        }

        actions.extend(self.registry.iter().map(|node| EngineAction::Drive {
            node: node.id,
            on: node.state,
        }));
        actions.extend(self.report_all());
        self.last_status_report = Some(now);
        actions
    }

    /// One pass of the main loop. `raw_tick` is the free-running counter.
    pub fn tick(&mut self, raw_tick: u64, source: &mut dyn SensorSource) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let reading = self.clock.observe(raw_tick);

        if reading.wrapped {
            self.registry.clear_overflow_continuation();
            actions.push(EngineAction::Publish(self.clock_sync()));
        }

        if self.is_due(self.last_sensor_read, self.config.sensor_read_interval_ms) {
            self.last_sensor_read = Some(reading.now);
            self.read_sensors(source, &mut actions);
        }

        if self.is_due(self.last_control, self.config.control_interval_ms) {
            self.last_control = Some(reading.now);
            self.run_circuits(&mut actions);
        }

        self.retry_faulted_actuators(&mut actions);

        if self.is_due(self.last_status_report, self.config.status_report_interval_ms) {
            self.last_status_report = Some(reading.now);
            self.report_periodic(&mut actions);
        }

        actions
    }

    pub fn drive(&mut self, actuator: &mut dyn Actuator, node: NodeId, on: bool) -> Vec<EngineAction> {
        match actuator.drive(node, on) {
            Ok(()) => self.record_actuator_ok(node),
            Err(fault) => self.record_actuator_fault(&fault),
        }
    }

    /// Flags the node in error. The flag is reported once when raised.
    pub fn record_actuator_fault(&mut self, fault: &ActuatorFault) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let now = self.clock.now();
        let Some(node) = self.registry.get_mut(fault.node) else {
            return actions;
        };
        if node.error_since.is_none() {
            node.error_since = Some(now);
            self.report_node(fault.node, &mut actions);
        }
        actions
    }

    pub fn record_actuator_ok(&mut self, id: NodeId) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let cleared = self
            .registry
            .get_mut(id)
            .is_some_and(|node| node.error_since.take().is_some());
        if cleared {
            self.report_node(id, &mut actions);
        }
        actions
    }

    fn is_due(&self, last: Option<Timestamp>, interval_ms: u64) -> bool {
        last.map_or(true, |at| self.clock.since(at) >= interval_ms)
    }

    fn since_switch(&self, id: NodeId) -> Option<u64> {
        self.registry
            .get(id)
            .and_then(|node| node.last_switch)
            .map(|at| self.clock.since(at))
    }

    fn read_sensors(&mut self, source: &mut dyn SensorSource, actions: &mut Vec<EngineAction>) {
        let now = self.clock.now();
        let wired: Vec<(SensorId, SensorKind)> = self
            .profile
            .sensors
            .iter()
            .copied()
            .filter(|(_, kind)| *kind != SensorKind::Remote)
            .collect();

        for (id, kind) in wired {
            match source.sample(id) {
                Some(raw) => {
                    let recorded = self.sensors.record(id, raw, now);
                    if kind == SensorKind::Binary && recorded == (Recorded::Accepted { changed: true }) {
                        self.report_sensor(id, actions);
                    }
                }
                None => self.sensors.record_unknown(id),
            }
        }
    }

    fn run_circuits(&mut self, actions: &mut Vec<EngineAction>) {
        let now = self.clock.now();
        for index in 0..self.circuits.len() {
            let id = self.circuits[index].node();
            let since_switch = self.since_switch(id);
            {
                let ctx = CircuitContext::new(
                    now,
                    id,
                    since_switch,
                    &self.registry,
                    &self.sensors,
                    &self.thresholds,
                    self.config.room_validity_ms,
                );
                self.circuits[index].observe(&ctx);
            }

            if self.is_in_forced_mode(id, actions) {
                continue;
            }
            let Some(state) = self.registry.get(id).map(|node| node.state) else {
                continue;
            };

            let circuit = &self.circuits[index];
            let dwell_ms = circuit
                .min_dwell_ms(state)
                .unwrap_or(self.config.min_dwell_ms);
            if !since_switch.map_or(true, |held| held >= dwell_ms) {
                continue;
            }

            // every required reading must be known and fresh, and becomes the evidence
            let evidence: Option<Vec<SensorSample>> = circuit
                .required_sensors(state)
                .iter()
                .map(|sensor| {
                    let max_age_ms = match self.sensors.kind(*sensor) {
                        Some(SensorKind::Remote) => self.config.room_validity_ms,
                        _ => self.config.sensor_validity_ms,
                    };
                    if !self.sensors.is_valid(*sensor, max_age_ms, now) {
                        return None;
                    }
                    self.sensors
                        .average(*sensor)
                        .map(|value| SensorSample { id: *sensor, value })
                })
                .collect();
            let Some(evidence) = evidence else {
                continue;
            };

            let ctx = CircuitContext::new(
                now,
                id,
                since_switch,
                &self.registry,
                &self.sensors,
                &self.thresholds,
                self.config.room_validity_ms,
            );
            let switch = if state {
                circuit.should_turn_off(&ctx)
            } else {
                circuit.should_turn_on(&ctx)
            };

            if switch && self.flip(id, evidence, actions) {
                self.circuits[index].switched(!state, since_switch);
            }
        }
    }

    fn retry_faulted_actuators(&mut self, actions: &mut Vec<EngineAction>) {
        let now = self.clock.now();
        let retry_ms = self.config.actuator_retry_ms;
        let due: Vec<(NodeId, bool)> = self
            .registry
            .iter()
            .filter(|node| {
                node.error_since
                    .is_some_and(|at| self.clock.since(at) >= retry_ms)
            })
            .map(|node| (node.id, node.state))
            .collect();

        for (id, on) in due {
            if let Some(node) = self.registry.get_mut(id) {
                node.error_since = Some(now);
            }
            actions.push(EngineAction::Drive { node: id, on });
        }
    }

    /// Toggles the node, persists the state register and queues the drive
    /// plus a state-change report carrying `evidence`.
    fn flip(
        &mut self,
        id: NodeId,
        evidence: Vec<SensorSample>,
        actions: &mut Vec<EngineAction>,
    ) -> bool {
        let Some(outcome) = self.registry.flip(id, self.clock.now()) else {
            return false;
        };
        self.persist_state(actions);
        actions.push(EngineAction::Drive {
            node: id,
            on: outcome.state,
        });
        if let Some(node) = self.node_status(id) {
            actions.push(EngineAction::Publish(Message::NodeStateChanged {
                node,
                sensors: evidence,
            }));
        }
        true
    }

    fn persist_state(&mut self, actions: &mut Vec<EngineAction>) {
        if let Err(err) = self.store.save_state_register(self.registry.state_register()) {
            actions.push(EngineAction::StoreFailed(err));
        }
    }

    fn persist_forced(&mut self, actions: &mut Vec<EngineAction>) {
        if let Err(err) = self
            .store
            .save_forced_register(self.registry.permanent_register())
        {
            actions.push(EngineAction::StoreFailed(err));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::{error::ActuatorFault, store::MemoryStore};
    use pretty_assertions::assert_eq;

    #[test]
    fn switches_once_and_then_holds_for_the_dwell() {
        let mut engine = engine();
        engine.boot(0);
        assert!(drives(&engine.tick(0, &mut reading(35.0))).is_empty());

        let actions = engine.tick(5_000, &mut reading(41.0));
        assert_eq!(drives(&actions), vec![(NODE, true)]);
        assert!(actions.iter().any(|action| matches!(
            action,
            EngineAction::Publish(Message::NodeStateChanged { node, sensors })
                if node.state && sensors == &vec![SensorSample { id: GAUGE, value: 41 }]
        )));

        // falls below the off threshold right away but must wait 60 s
        for t in (6_000..65_000).step_by(1_000) {
            assert!(drives(&engine.tick(t, &mut reading(25.0))).is_empty(), "flipped at {t}");
        }
        assert_eq!(drives(&engine.tick(65_000, &mut reading(25.0))), vec![(NODE, false)]);
    }

    #[test]
    fn unknown_sensor_skips_the_rule() {
        let mut engine = engine();
        engine.boot(0);
        let mut silent = |_: SensorId| None;
        assert!(drives(&engine.tick(1_000, &mut silent)).is_empty());
        assert!(!engine.registry().state(NODE));
    }

    #[test]
    fn flip_persists_the_state_register() {
        let mut engine = engine();
        engine.boot(0);
        engine.tick(1_000, &mut reading(45.0));
        assert_eq!(engine.store().registers().unwrap(), (0b1000, 0));
    }

    #[test]
    fn boot_restores_only_permanent_overrides() {
        let mut store = MemoryStore::default();
        {
            let mut engine = Engine::new(config(), profile(), vec![Box::new(GaugeCircuit)], store.clone());
            engine.boot(0);
            engine.force(NODE, true, 0);
            store = engine.store().backend().clone();
        }
        let mut engine = Engine::new(config(), profile(), vec![Box::new(GaugeCircuit)], store);
        let actions = engine.boot(0);
        assert!(engine.registry().permanently_forced(NODE));
        assert_eq!(drives(&actions), vec![(NODE, true)]);
    }

    #[test]
    fn boot_loads_calibration() {
        let mut engine = engine();
        engine.store_mut().save_calibration(GAUGE, 1.1).unwrap();
        engine.boot(0);
        engine.tick(0, &mut reading(40.0));
        assert_eq!(engine.sensors().value(GAUGE), Some(44));
    }

    #[test]
    fn wrap_emits_clock_sync_and_clears_continuations() {
        let mut engine = engine_with(EngineConfig {
            tick_modulus_ms: 100_000,
            ..config()
        });
        engine.boot(0);
        engine.tick(90_000, &mut reading(35.0));
        engine.registry.get_mut(NODE).unwrap().overflow_continuation = true;

        let actions = engine.tick(2_000, &mut reading(35.0));
        assert!(actions.contains(&EngineAction::Publish(Message::ClockSync {
            now: 102_000,
            epoch: 1
        })));
        assert!(!engine.registry().get(NODE).unwrap().overflow_continuation);
    }

    #[test]
    fn faulted_actuator_is_retried_on_interval() {
        let mut engine = engine();
        engine.boot(0);
        engine.tick(1_000, &mut reading(45.0));

        let fault = ActuatorFault {
            node: NODE,
            commanded: true,
        };
        assert_eq!(node_reports(&engine.record_actuator_fault(&fault)), 1);
        assert_eq!(node_reports(&engine.record_actuator_fault(&fault)), 0);

        assert!(drives(&engine.tick(30_000, &mut reading(45.0))).is_empty());
        assert_eq!(drives(&engine.tick(31_000, &mut reading(45.0))), vec![(NODE, true)]);
        assert!(drives(&engine.tick(32_000, &mut reading(45.0))).is_empty());

        assert_eq!(node_reports(&engine.record_actuator_ok(NODE)), 1);
        assert!(engine.registry().get(NODE).unwrap().error_since.is_none());
    }

    #[test]
    fn faulted_actuator_is_retried_while_forced() {
        let mut engine = engine();
        engine.boot(0);
        engine.force(NODE, true, 0);
        engine.record_actuator_fault(&ActuatorFault {
            node: NODE,
            commanded: true,
        });
        assert_eq!(drives(&engine.tick(30_000, &mut reading(20.0))), vec![(NODE, true)]);
    }

    #[test]
    fn drive_feeds_the_outcome_back() {
        struct Stuck;
        impl Actuator for Stuck {
            fn drive(&mut self, node: NodeId, on: bool) -> Result<(), ActuatorFault> {
                Err(ActuatorFault { node, commanded: on })
            }
        }

        let mut engine = engine();
        engine.boot(0);
        engine.drive(&mut Stuck, NODE, true);
        assert!(engine.registry().get(NODE).unwrap().error_since.is_some());
    }

    #[test]
    fn binary_sensor_change_is_reported_immediately() {
        let mut profile = profile();
        profile.sensors.push((SensorId(60), SensorKind::Binary));
        let mut engine = Engine::new(config(), profile, vec![Box::new(GaugeCircuit)], MemoryStore::default());
        engine.boot(0);

        let mut pump = 0.0;
        let mut source = |id: SensorId| match id {
            GAUGE => Some(35.0),
            SensorId(60) => Some(pump),
            _ => None,
        };
        engine.tick(1_000, &mut source);
        let quiet = engine.tick(2_000, &mut source);
        assert!(!quiet
            .iter()
            .any(|action| matches!(action, EngineAction::Publish(Message::SensorStatus(_)))));

        pump = 1.0;
        let mut source = |id: SensorId| match id {
            GAUGE => Some(35.0),
            SensorId(60) => Some(pump),
            _ => None,
        };
        let actions = engine.tick(3_000, &mut source);
        assert!(actions.iter().any(|action| matches!(
            action,
            EngineAction::Publish(Message::SensorStatus(status))
                if status.id == SensorId(60) && status.value == Some(1) && status.ts == Some(3_000)
        )));
    }

    #[test]
    fn stale_filtered_reading_is_not_evidence() {
        let mut profile = profile();
        profile.sensors = vec![(
            GAUGE,
            SensorKind::Filtered {
                noise_threshold: crate::sensors::DEFAULT_NOISE_THRESHOLD,
            },
        )];
        let mut engine = Engine::new(config(), profile, vec![Box::new(GaugeCircuit)], MemoryStore::default());
        engine.boot(0);
        engine.force(NODE, false, 100_000);
        assert!(drives(&engine.tick(1_000, &mut reading(45.0))).is_empty());

        // the gauge goes silent while the override still holds
        let mut dead = |_: SensorId| None;
        for t in (2_000..=200_000).step_by(1_000) {
            assert!(drives(&engine.tick(t, &mut dead)).is_empty(), "flipped at {t}");
        }
        assert!(!engine.registry().state(NODE));
        assert_eq!(engine.sensors().average(GAUGE), Some(45));

        let actions = engine.tick(201_000, &mut reading(45.0));
        assert_eq!(drives(&actions), vec![(NODE, true)]);
    }

    #[test]
    fn circuits_are_named_by_node() {
        assert_eq!(engine().circuit_name(NODE), Some("gauge"));
        assert_eq!(engine().circuit_name(NodeId(99)), None);

        let central = Engine::for_variant(
            EngineConfig::for_variant(crate::types::NodeVariant::CentralUnit),
            &Thresholds::default(),
            MemoryStore::default(),
        );
        assert_eq!(central.circuit_name(crate::types::node::HEATING), Some("heating"));
        assert_eq!(central.circuit_name(crate::types::node::FLOOR), Some("floor"));
    }

    #[test]
    fn variant_engines_boot_on_a_blank_store() {
        for variant in [
            crate::types::NodeVariant::CentralUnit,
            crate::types::NodeVariant::Ventilation,
            crate::types::NodeVariant::HeaterReset,
            crate::types::NodeVariant::Boiler,
        ] {
            let mut engine = Engine::for_variant(
                EngineConfig::for_variant(variant),
                &Thresholds::default(),
                MemoryStore::default(),
            );
            engine.format_store().unwrap();
            let actions = engine.boot(0);
            assert!(!actions
                .iter()
                .any(|action| matches!(action, EngineAction::StoreFailed(_))));
            assert_eq!(drives(&actions).len(), engine.registry().ids().len());
        }
    }
}
