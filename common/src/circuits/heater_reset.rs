use crate::{
    circuits::{Circuit, CircuitContext},
    config::HeaterResetThresholds,
    types::{node, sensor, NodeId, SensorId, Timestamp},
};

const IDLE_SENSORS: &[SensorId] = &[sensor::HEATER_ROOM_TEMP];

pub fn circuits(t: &HeaterResetThresholds) -> Vec<Box<dyn Circuit>> {
    vec![Box::new(HeaterReset::new(t.clone()))]
}

/// Pulses the reset line of a gas heater that locked out while the room
/// is cold and the heater draws no current.
#[derive(Debug)]
pub struct HeaterReset {
    t: HeaterResetThresholds,
    last_active: Option<Timestamp>,
}

impl HeaterReset {
    pub fn new(t: HeaterResetThresholds) -> Self {
        Self {
            t,
            last_active: None,
        }
    }

    fn drawing_current(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.value(sensor::HEATER_CURRENT)
            .is_some_and(|ma| ma >= self.t.active_current_ma)
    }
}

impl Circuit for HeaterReset {
    fn node(&self) -> NodeId {
        node::HEATER_RESET
    }

    fn name(&self) -> &'static str {
        "heater_reset"
    }

    fn required_sensors(&self, on: bool) -> &[SensorId] {
        // the pulse must end even if the room sensor drops out
        if on {
            &[]
        } else {
            IDLE_SENSORS
        }
    }

    fn min_dwell_ms(&self, on: bool) -> Option<u64> {
        on.then_some(self.t.reset_ms)
    }

    fn observe(&mut self, ctx: &CircuitContext<'_>) {
        if self.drawing_current(ctx) {
            self.last_active = Some(ctx.now);
        }
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        // 0 is what the sensor reports when it fails to read
        let room = ctx.temp(sensor::HEATER_ROOM_TEMP);
        if room == 0 || room > self.t.room_max {
            return false;
        }
        let idle_for = ctx.now.saturating_sub(self.last_active.unwrap_or(0));
        !self.drawing_current(ctx) && idle_for >= self.t.idle_ms
    }

    fn should_turn_off(&self, _ctx: &CircuitContext<'_>) -> bool {
        true
    }
}
