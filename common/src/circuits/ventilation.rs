use crate::{
    circuits::{Circuit, CircuitContext},
    config::VentilationThresholds,
    types::{node, sensor, NodeId, SensorId},
};

const DAMPER_SENSORS: &[SensorId] = &[sensor::TEMP_IN, sensor::TEMP_OUT];
const PV_SENSORS: &[SensorId] = &[sensor::AC_VOLTAGE];

pub fn circuits(t: &VentilationThresholds) -> Vec<Box<dyn Circuit>> {
    vec![
        Box::new(Damper { t: t.clone() }),
        Box::new(PvSwitch {
            min_voltage: t.pv_min_voltage,
        }),
    ]
}

/// Opens the intake when the outside air is cooler than inside.
#[derive(Debug)]
pub struct Damper {
    t: VentilationThresholds,
}

impl Circuit for Damper {
    fn node(&self) -> NodeId {
        node::VENTILATION
    }

    fn name(&self) -> &'static str {
        "ventilation"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        DAMPER_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.temp(sensor::TEMP_IN) >= ctx.temp(sensor::TEMP_OUT) + self.t.on_delta
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.temp(sensor::TEMP_IN) <= ctx.temp(sensor::TEMP_OUT) + self.t.off_delta
    }
}

/// Moves the load to grid power while mains is present, back to the
/// inverter when it sags.
#[derive(Debug)]
pub struct PvSwitch {
    min_voltage: i16,
}

impl Circuit for PvSwitch {
    fn node(&self) -> NodeId {
        node::PV_SWITCH
    }

    fn name(&self) -> &'static str {
        "pv_switch"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        PV_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.temp(sensor::AC_VOLTAGE) > self.min_voltage
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.temp(sensor::AC_VOLTAGE) <= self.min_voltage
    }
}
