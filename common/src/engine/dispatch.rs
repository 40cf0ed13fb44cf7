use super::{Engine, EngineAction};
use crate::{
    message::{Command, ConfigEntry, Message},
    store::ConfigStore,
};

impl<S: ConfigStore> Engine<S> {
    /// Executes one inbound text message. Anything malformed or not
    /// addressed to this node is dropped without a reply.
    pub fn dispatch(&mut self, raw: &str) -> Vec<EngineAction> {
        match Command::parse(raw) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) | Err(_) => Vec::new(),
        }
    }

    pub fn execute(&mut self, command: Command) -> Vec<EngineAction> {
        let now = self.clock.now();
        match command {
            Command::ClockSync => vec![EngineAction::Publish(self.clock_sync())],
            Command::ReportAll => self.report_all(),
            Command::SensorUpdate { id, value } => {
                self.sensors.set_external(id, value, now);
                Vec::new()
            }
            Command::Force {
                id,
                state,
                duration_secs,
            } => {
                // a zero deadline would read as permanent
                let until = duration_secs.map_or(0, |secs| {
                    now.saturating_add(secs.saturating_mul(1_000)).max(1)
                });
                self.force(id, state, until)
            }
            Command::Unforce { id } => self.unforce(id),
            Command::SetCalibration { id, factor } => {
                match self.store.save_calibration(id, factor) {
                    Ok(_) => {
                        let stored = self.store.calibration(id).unwrap_or(factor);
                        self.sensors.set_calibration(id, stored);
                        Vec::new()
                    }
                    Err(err) => vec![EngineAction::StoreFailed(err)],
                }
            }
            Command::SetSensorUid { id, uid } => match self.store.save_sensor_uid(id, uid) {
                Ok(_) => Vec::new(),
                Err(err) => vec![EngineAction::StoreFailed(err)],
            },
            Command::SetThreshold { id, value } => match self.store.save_threshold(id, value) {
                Ok(_) => {
                    self.thresholds.insert(id, value);
                    vec![EngineAction::Publish(Message::Configuration(
                        ConfigEntry::Threshold { id, value },
                    ))]
                }
                Err(err) => vec![EngineAction::StoreFailed(err)],
            },
            Command::SetNetwork(field) => match self.store.save_network(&field) {
                Ok(_) => vec![EngineAction::NetworkUpdated(field)],
                Err(err) => vec![EngineAction::StoreFailed(err)],
            },
            Command::ReportConfiguration => self.report_configuration(),
        }
    }
}
