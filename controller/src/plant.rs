//! Simulated boiler room standing in for the sensor bus and relay board.

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;

use homekeeper_common::{
    config::PlantConfig,
    error::ActuatorFault,
    types::{node, sensor},
    Actuator, NodeId, NodeVariant, SensorId, SensorSource,
};

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 24 * HOUR_MS;
/// Time constant of every thermal mass in the model.
const THERMAL_TAU_MS: f64 = 600_000.0;
const HEATER_DRAW_MA: f64 = 1_200.0;
const PV_LOAD_MA: f64 = 1_500.0;

#[derive(Debug)]
pub struct SimulatedPlant {
    variant: NodeVariant,
    config: PlantConfig,
    outputs: HashMap<NodeId, bool>,
    stuck: HashSet<NodeId>,
    temps: HashMap<SensorId, f64>,
    energy_wh: f64,
    heater_tripped: bool,
    elapsed_ms: u64,
}

impl SimulatedPlant {
    pub fn new(variant: NodeVariant, config: &PlantConfig) -> Self {
        let thermal: &[SensorId] = match variant {
            NodeVariant::CentralUnit => &[
                sensor::SUPPLY,
                sensor::REVERSE,
                sensor::TANK,
                sensor::BOILER,
                sensor::MIX,
                sensor::STANDBY_HEATER,
            ],
            NodeVariant::Boiler => &[sensor::TANK, sensor::BOILER],
            NodeVariant::HeaterReset => &[sensor::HEATER_ROOM_TEMP],
            NodeVariant::Ventilation => &[],
        };
        Self {
            variant,
            config: config.clone(),
            outputs: HashMap::new(),
            stuck: config.stuck_nodes.iter().copied().map(NodeId).collect(),
            temps: thermal
                .iter()
                .map(|id| (*id, config.ambient_temp))
                .collect(),
            energy_wh: 0.0,
            heater_tripped: false,
            elapsed_ms: 0,
        }
    }

    pub fn output(&self, id: NodeId) -> bool {
        self.outputs.get(&id).copied().unwrap_or(false)
    }

    /// Moves the model forward to `elapsed_ms` since start.
    pub fn advance(&mut self, elapsed_ms: u64) {
        let dt = elapsed_ms.saturating_sub(self.elapsed_ms);
        if dt == 0 {
            return;
        }
        let previous_hour = self.elapsed_ms / HOUR_MS;
        self.elapsed_ms = elapsed_ms;

        let blend = 1.0 - (-(dt as f64) / THERMAL_TAU_MS).exp();
        let ids: Vec<SensorId> = self.temps.keys().copied().collect();
        for id in ids {
            let target = self.target(id);
            if let Some(value) = self.temps.get_mut(&id) {
                *value += (target - *value) * blend;
            }
        }

        if self.variant == NodeVariant::Ventilation {
            self.energy_wh += self.ac_power() * dt as f64 / HOUR_MS as f64;
        }
        // the room heater trips its breaker every other hour
        if self.variant == NodeVariant::HeaterReset && elapsed_ms / HOUR_MS != previous_hour {
            self.heater_tripped |= (elapsed_ms / HOUR_MS) % 2 == 0;
        }
    }

    fn temp(&self, id: SensorId) -> f64 {
        self.temps.get(&id).copied().unwrap_or(self.config.ambient_temp)
    }

    fn burning(&self) -> bool {
        (self.elapsed_ms / HOUR_MS) % 3 == 0
    }

    /// 0 at night, 1 at solar noon.
    fn daylight(&self) -> f64 {
        let phase = (self.elapsed_ms % DAY_MS) as f64 / DAY_MS as f64;
        (phase * TAU).sin().max(0.0)
    }

    fn target(&self, id: SensorId) -> f64 {
        let ambient = self.config.ambient_temp;
        let tank = self.temp(sensor::TANK);
        match (self.variant, id) {
            (NodeVariant::CentralUnit, sensor::TANK) => {
                if self.burning() {
                    75.0
                } else {
                    35.0
                }
            }
            (NodeVariant::CentralUnit, sensor::SUPPLY) => {
                if self.burning() {
                    tank + 8.0
                } else {
                    tank - 4.0
                }
            }
            (NodeVariant::CentralUnit, sensor::REVERSE) => {
                if self.output(node::SUPPLY) {
                    self.temp(sensor::SUPPLY) - 6.0
                } else {
                    ambient + 10.0
                }
            }
            (NodeVariant::CentralUnit, sensor::MIX) => {
                let offset = if self.output(node::HEATING_VALVE) { 3.0 } else { 10.0 };
                (tank - offset).max(ambient)
            }
            (NodeVariant::CentralUnit, sensor::STANDBY_HEATER) => {
                if self.output(node::STANDBY_HEATER) {
                    60.0
                } else {
                    ambient + 2.0
                }
            }
            (_, sensor::BOILER) => {
                if self.output(node::BOILER) {
                    65.0
                } else if self.output(node::HOTWATER) {
                    tank
                } else {
                    ambient + 20.0
                }
            }
            (NodeVariant::Boiler, sensor::TANK) => 30.0 + 30.0 * self.daylight(),
            (NodeVariant::HeaterReset, sensor::HEATER_ROOM_TEMP) => {
                if self.heater_drawing() {
                    ambient + 2.0
                } else {
                    ambient - 3.0
                }
            }
            _ => ambient,
        }
    }

    fn heater_drawing(&self) -> bool {
        !self.heater_tripped && self.temp(sensor::HEATER_ROOM_TEMP) < 21.0
    }

    fn solar_primary(&self) -> f64 {
        let collector = self.config.ambient_temp + 110.0 * self.daylight();
        if self.output(node::SOLAR_PRIMARY) {
            collector - 20.0
        } else {
            collector
        }
    }

    fn ac_voltage(&self) -> f64 {
        if self.daylight() > 0.1 {
            self.config.mains_voltage
        } else {
            0.0
        }
    }

    fn ac_current_ma(&self) -> f64 {
        if self.output(node::PV_SWITCH) && self.ac_voltage() > 0.0 {
            PV_LOAD_MA
        } else {
            0.0
        }
    }

    fn ac_power(&self) -> f64 {
        self.ac_voltage() * self.ac_current_ma() / 1_000.0
    }

    fn binary(on: bool) -> f64 {
        if on {
            1.0
        } else {
            0.0
        }
    }
}

impl SensorSource for SimulatedPlant {
    fn sample(&mut self, id: SensorId) -> Option<f64> {
        let ambient = self.config.ambient_temp;
        let value = match (self.variant, id) {
            (_, id) if self.temps.contains_key(&id) => self.temp(id),
            (NodeVariant::CentralUnit, sensor::BOILER_POWER) => {
                Self::binary((self.elapsed_ms / HOUR_MS) % 6 < 2)
            }
            (NodeVariant::CentralUnit, sensor::SOLAR_PRIMARY) => self.solar_primary(),
            (NodeVariant::CentralUnit, sensor::SOLAR_SECONDARY) => {
                if self.output(node::SOLAR_PRIMARY) {
                    self.solar_primary() - 8.0
                } else {
                    ambient
                }
            }
            (NodeVariant::Ventilation, sensor::TEMP_IN) => 24.0,
            (NodeVariant::Ventilation, sensor::HUMIDITY_IN) => 55.0,
            (NodeVariant::Ventilation, sensor::TEMP_OUT) => ambient + 10.0 * self.daylight(),
            (NodeVariant::Ventilation, sensor::HUMIDITY_OUT) => 70.0,
            (NodeVariant::Ventilation, sensor::AC_VOLTAGE) => self.ac_voltage(),
            (NodeVariant::Ventilation, sensor::AC_CURRENT) => self.ac_current_ma(),
            (NodeVariant::Ventilation, sensor::AC_POWER) => self.ac_power(),
            (NodeVariant::Ventilation, sensor::AC_ENERGY) => self.energy_wh,
            (NodeVariant::Ventilation, sensor::WATER_PUMP_POWER) => {
                Self::binary((self.elapsed_ms / 600_000) % 4 == 0)
            }
            (NodeVariant::HeaterReset, sensor::HEATER_ROOM_HUMIDITY) => 50.0,
            (NodeVariant::HeaterReset, sensor::HEATER_CURRENT) => {
                if self.heater_drawing() {
                    HEATER_DRAW_MA
                } else {
                    0.0
                }
            }
            _ => return None,
        };
        Some(value)
    }
}

impl Actuator for SimulatedPlant {
    fn drive(&mut self, node_id: NodeId, on: bool) -> Result<(), ActuatorFault> {
        if self.stuck.contains(&node_id) {
            return Err(ActuatorFault {
                node: node_id,
                commanded: on,
            });
        }
        self.outputs.insert(node_id, on);
        if node_id == node::HEATER_RESET && on {
            self.heater_tripped = false;
        }
        Ok(())
    }
}
