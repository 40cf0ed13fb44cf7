use super::{Engine, EngineAction};
use crate::{
    message::{ConfigEntry, Message, NodeStatus, SensorStatus},
    profile::ReportEntry,
    sensors::SensorKind,
    store::ConfigStore,
    types::{EngineStatus, NodeId, NodeView, ReportMode, SensorId, SensorView, ThresholdView},
};

impl<S: ConfigStore> Engine<S> {
    pub fn node_status(&self, id: NodeId) -> Option<NodeStatus> {
        let node = self.registry.get(id)?;
        Some(NodeStatus {
            id,
            state: node.state,
            error: node.error_since.is_some(),
            switched_at: node.last_switch,
            forced: node.forced,
            force_until: node.force_until,
        })
    }

    /// Remote readings carry their arrival time and binary inputs the time
    /// of their last change. Wired analog readings carry none.
    pub fn sensor_status(&self, id: SensorId) -> Option<SensorStatus> {
        let ts = match self.sensors.kind(id)? {
            SensorKind::Remote => self.sensors.sampled_at(id),
            SensorKind::Binary => self.sensors.changed_at(id),
            SensorKind::Direct | SensorKind::Filtered { .. } => None,
        };
        Some(SensorStatus {
            id,
            value: self.sensors.average(id),
            ts,
        })
    }

    pub fn clock_sync(&self) -> Message {
        Message::ClockSync {
            now: self.clock.now(),
            epoch: self.clock.epoch(),
        }
    }

    pub fn report_all(&self) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        for entry in &self.profile.report_order {
            self.report_entry(*entry, &mut actions);
        }
        actions
    }

    /// Stored calibration, bus addresses, thresholds and credentials. Only
    /// ever sent over local links.
    pub fn report_configuration(&self) -> Vec<EngineAction> {
        let mut entries = Vec::new();
        for id in self.store.calibrated_sensors() {
            entries.push(ConfigEntry::Calibration {
                id: *id,
                factor: self.sensors.calibration(*id),
            });
        }
        for id in self.store.calibrated_sensors() {
            if let Ok(uid) = self.store.sensor_uid(*id) {
                entries.push(ConfigEntry::SensorUid { id: *id, uid });
            }
        }
        for (id, value) in &self.thresholds {
            entries.push(ConfigEntry::Threshold {
                id: *id,
                value: *value,
            });
        }

        let mut actions: Vec<EngineAction> = entries
            .into_iter()
            .map(|entry| EngineAction::PublishLocal(Message::Configuration(entry)))
            .collect();
        match self.store.network() {
            Ok(network) => actions.extend(network.fields().into_iter().map(|field| {
                EngineAction::PublishLocal(Message::Configuration(ConfigEntry::Network(field)))
            })),
            Err(err) => actions.push(EngineAction::StoreFailed(err)),
        }
        actions
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            variant: self.config.variant.as_str(),
            now_ms: self.clock.now(),
            epoch: self.clock.epoch(),
            nodes: self
                .registry
                .iter()
                .map(|node| NodeView {
                    id: node.id,
                    state: node.state,
                    forced: node.forced,
                    permanently_forced: node.permanently_forced,
                    force_until_ms: (node.forced && node.force_until != 0)
                        .then_some(node.force_until),
                    last_switch_ms: node.last_switch,
                    error: node.error_since.is_some(),
                })
                .collect(),
            sensors: self
                .sensors
                .ids()
                .map(|id| SensorView {
                    id,
                    value: self.sensors.average(id),
                    sampled_at_ms: self.sensors.sampled_at(id),
                    calibration: self.sensors.calibration(id),
                })
                .collect(),
            thresholds: self
                .thresholds
                .iter()
                .map(|(id, value)| ThresholdView {
                    id: *id,
                    value: *value,
                })
                .collect(),
            store_writes: self.store.backend().write_count(),
        }
    }

    pub(crate) fn report_node(&self, id: NodeId, actions: &mut Vec<EngineAction>) {
        if let Some(status) = self.node_status(id) {
            actions.push(EngineAction::Publish(Message::NodeStatus(status)));
        }
    }

    pub(crate) fn report_sensor(&self, id: SensorId, actions: &mut Vec<EngineAction>) {
        if let Some(status) = self.sensor_status(id) {
            actions.push(EngineAction::Publish(Message::SensorStatus(status)));
        }
    }

    pub(crate) fn report_periodic(&mut self, actions: &mut Vec<EngineAction>) {
        match self.config.report_mode {
            ReportMode::Full => actions.extend(self.report_all()),
            ReportMode::RoundRobin => {
                let order_len = self.profile.report_order.len();
                if order_len == 0 {
                    return;
                }
                let entry = self.profile.report_order[self.report_cursor % order_len];
                self.report_cursor = (self.report_cursor + 1) % order_len;
                self.report_entry(entry, actions);
            }
        }
    }

    fn report_entry(&self, entry: ReportEntry, actions: &mut Vec<EngineAction>) {
        match entry {
            ReportEntry::Sensor(id) => self.report_sensor(id, actions),
            ReportEntry::Node(id) => self.report_node(id, actions),
            ReportEntry::Threshold(id) => {
                if let Some(value) = self.thresholds.get(&id) {
                    actions.push(EngineAction::Publish(Message::Configuration(
                        ConfigEntry::Threshold { id, value: *value },
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::{
        config::{EngineConfig, Thresholds},
        message::TAG_CONFIG,
        store::MemoryStore,
        types::{node, sensor, NodeVariant},
    };
    use pretty_assertions::assert_eq;

    fn central() -> Engine<MemoryStore> {
        let mut engine = Engine::for_variant(
            EngineConfig::for_variant(NodeVariant::CentralUnit),
            &Thresholds::default(),
            MemoryStore::default(),
        );
        engine.format_store().unwrap();
        engine.boot(0);
        engine
    }

    fn published(actions: &[EngineAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Publish(message) => message.to_json().ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn round_robin_walks_the_report_order() {
        let mut engine = central();
        let mut silent = |_: SensorId| None;

        let first = published(&engine.tick(5_000, &mut silent));
        assert_eq!(first, vec![r#"{"m":"csr","s":{"id":54,"v":-127}}"#.to_string()]);

        let second = published(&engine.tick(10_000, &mut silent));
        assert_eq!(second, vec![r#"{"m":"csr","s":{"id":55,"v":-127}}"#.to_string()]);

        // wraps back to the first entry after a full cycle
        let order = engine.profile().report_order.len() as u64;
        for step in 3..=order {
            engine.tick(step * 5_000, &mut silent);
        }
        let again = published(&engine.tick((order + 1) * 5_000, &mut silent));
        assert_eq!(again, first);
    }

    #[test]
    fn thresholds_are_part_of_the_cycle() {
        let engine = central();
        let all = published(&engine.report_all());
        assert!(all.contains(&r#"{"m":"cfg","s":{"id":202,"v":20}}"#.to_string()));
        assert!(all.contains(&r#"{"m":"cfg","s":{"id":201,"v":10}}"#.to_string()));
    }

    #[test]
    fn remote_sensor_reports_carry_arrival_time() {
        let mut engine = central();
        engine.dispatch(r#"{"m":"csr","s":{"id":74,"v":21}}"#);
        let status = engine.sensor_status(sensor::ROOM_TEMP).unwrap();
        assert_eq!(status.value, Some(21));
        assert_eq!(status.ts, Some(0));
        assert_eq!(engine.sensor_status(sensor::SUPPLY).unwrap().ts, None);
    }

    #[test]
    fn configuration_only_goes_to_local_links() {
        let engine = central();
        let actions = engine.report_configuration();
        assert!(!actions.is_empty());
        assert!(actions.iter().all(|action| matches!(
            action,
            EngineAction::PublishLocal(message) if message.tag() == TAG_CONFIG
        )));
    }

    #[test]
    fn status_snapshot_lists_every_node() {
        let mut engine = engine();
        engine.boot(0);
        engine.force(NODE, true, 0);
        let status = engine.status();
        assert_eq!(status.nodes.len(), 1);
        assert!(status.nodes[0].permanently_forced);
        assert_eq!(status.nodes[0].force_until_ms, None);
        assert!(status.store_writes > 0);
    }

    #[test]
    fn error_flag_rides_on_the_state_field() {
        let mut engine = central();
        engine.record_actuator_fault(&crate::error::ActuatorFault {
            node: node::HOTWATER,
            commanded: true,
        });
        let status = Message::NodeStatus(engine.node_status(node::HOTWATER).unwrap());
        assert_eq!(
            status.to_json().unwrap(),
            r#"{"m":"csr","n":{"id":28,"ns":32768,"ts":0,"ff":0}}"#
        );
    }
}
